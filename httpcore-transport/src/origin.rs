/// (scheme, host, port, ALPN) tuple used by the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub alpn: AlpnProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlpnProtocol {
    Http1,
    Http2,
}

impl Origin {
    pub fn from_uri(uri: &str, alpn: AlpnProtocol) -> Result<Self, httpcore::TurboError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| httpcore::TurboError::InvalidArgument(format!("not absolute: {uri}")))?;
        let authority = rest.split('/').next().unwrap_or(rest);
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h.to_string(), p.parse().unwrap_or(default_port(scheme)))
            }
            _ => (authority.to_string(), default_port(scheme)),
        };
        Ok(Origin {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
            alpn,
        })
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        _ => 80,
    }
}
