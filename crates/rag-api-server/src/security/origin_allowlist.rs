use std::collections::HashSet;

/// Per-embed-code origin allowlist for the widget transport. An embed
/// code without any configured origins is treated as "allow all" —
/// the common case for a first integration test before the customer
/// has locked the widget down to their production domain.
#[derive(Debug, Clone)]
pub struct OriginAllowlist {
    allowed: HashSet<String>,
}

impl OriginAllowlist {
    pub fn new(allowed_origins: &[String]) -> Self {
        Self {
            allowed: allowed_origins.iter().map(|s| normalize(s)).collect(),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.contains(&normalize(origin))
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_any_origin() {
        let list = OriginAllowlist::new(&[]);
        assert!(list.is_allowed("https://example.com"));
    }

    #[test]
    fn matches_case_and_trailing_slash_insensitively() {
        let list = OriginAllowlist::new(&["https://Example.com/".to_string()]);
        assert!(list.is_allowed("https://example.com"));
        assert!(!list.is_allowed("https://evil.example.com"));
    }
}
