//! Include/exclude zone filtering (§4.7).

/// A single pattern: either a literal zone name or a `*.`-prefixed wildcard
/// matching any depth ≥ 1 of subdomains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainPattern(String);

impl DomainPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        DomainPattern(raw.into().to_ascii_lowercase())
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self.0.strip_prefix("*.") {
            Some(suffix) => name != suffix && name.ends_with(&format!(".{suffix}")),
            None => name == self.0,
        }
    }
}

impl From<&str> for DomainPattern {
    fn from(s: &str) -> Self {
        DomainPattern::new(s)
    }
}

impl From<String> for DomainPattern {
    fn from(s: String) -> Self {
        DomainPattern::new(s)
    }
}

/// Decides whether a zone is managed, per: `(include empty OR some include matches) AND (no exclude matches)`.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    include: Vec<DomainPattern>,
    exclude: Vec<DomainPattern>,
}

impl DomainFilter {
    pub fn new(include: Vec<DomainPattern>, exclude: Vec<DomainPattern>) -> Self {
        Self { include, exclude }
    }

    pub fn is_managed(&self, zone_name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(zone_name));
        let excluded = self.exclude.iter().any(|p| p.matches(zone_name));
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_include_means_everything_included() {
        let f = DomainFilter::default();
        assert!(f.is_managed("example.com"));
    }

    #[test]
    fn include_literal_matches_only_itself() {
        let f = DomainFilter::new(vec!["example.com".into()], vec![]);
        assert!(f.is_managed("example.com"));
        assert!(!f.is_managed("other.com"));
    }

    #[test]
    fn include_wildcard_matches_subdomains_not_bare_name() {
        let f = DomainFilter::new(vec!["*.example.com".into()], vec![]);
        assert!(f.is_managed("lab.example.com"));
        assert!(f.is_managed("a.b.example.com"));
        assert!(!f.is_managed("example.com"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let f = DomainFilter::new(
            vec!["*.example.com".into()],
            vec!["internal.example.com".into()],
        );
        assert!(f.is_managed("lab.example.com"));
        assert!(!f.is_managed("internal.example.com"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = DomainFilter::new(vec!["Example.COM".into()], vec![]);
        assert!(f.is_managed("example.com"));
    }
}
