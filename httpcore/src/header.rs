use std::fmt;

/// Ordered multimap of header names (case-insensitive) to values.
///
/// Insertion order is preserved both across distinct names and across
/// repeated values for the same name, which the HTTP/1.1 codec and
/// the cache's vary-key construction both depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { entries: Vec::with_capacity(cap) }
    }

    /// Append a value, keeping any existing values for this name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all existing values for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct header names, lowercased, in first-seen order.
    pub fn names_lowercase(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (n, _) in &self.entries {
            let lower = n.to_ascii_lowercase();
            if !seen.contains(&lower) {
                seen.push(lower);
            }
        }
        seen
    }

    /// Builder-style helper for an immutable request API: clones self,
    /// appends, and returns the clone.
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.append(name, value);
        clone
    }

    /// Estimated wire cost of this header block in `name: value\r\n` form,
    /// used by the cache's deterministic byte-budget accounting.
    pub fn estimated_wire_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(n, v)| n.len() + v.len() + 4) // ": " + "\r\n"
            .sum()
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, v) in &self.entries {
            writeln!(f, "{n}: {v}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}
