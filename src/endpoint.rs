//! Shared data model: [`Endpoint`], [`RecordType`] and [`Zone`].
//!
//! These types flow through every component in the reconciliation pipeline —
//! [`crate::source`] produces them, [`crate::registry`] reads and writes them
//! via a [`crate::provider::Provider`], and [`crate::plan`] diffs them.

use std::collections::BTreeSet;
use std::fmt::Display;

/// One A/CNAME record, independent of how a particular [`crate::provider::Provider`]
/// represents it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Fully-qualified, lowercased domain name. May start with `*.` for a wildcard.
    pub dns_name: String,
    pub record_type: RecordType,
    /// IPv4 literals for [`RecordType::A`], a single FQDN for [`RecordType::Cname`].
    pub targets: Vec<String>,
    /// Seconds, or `1` for provider-auto TTL.
    pub ttl: u32,
    pub proxied: bool,
    /// Set by the Registry on read; absent on endpoints freshly produced by a Source.
    pub owner_id: Option<String>,
    /// Opaque identifier of the originating container. Never sent to a Provider.
    pub source_ref: Option<SourceRef>,
}

/// Stable identity of the container that produced an [`Endpoint`], used only by
/// [`crate::scheduler::CleanupScheduler`] to correlate a reappearing container
/// with its pending deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub container_id: String,
    pub container_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    A,
    Cname,
}

impl Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Cname => write!(f, "CNAME"),
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "CNAME" => Ok(RecordType::Cname),
            other => Err(format!("unsupported record type: {other}")),
        }
    }
}

/// The planning key: what makes two endpoints "the same record" regardless of content.
pub type EndpointKey = (String, RecordType);

impl Endpoint {
    pub fn key(&self) -> EndpointKey {
        (self.dns_name.to_ascii_lowercase(), self.record_type)
    }

    /// The comparable tuple used by the Planner to detect mutation: sorted targets, ttl
    /// (with `1`/"auto" normalized), and proxied. Two endpoints with equal `comparable()`
    /// require no provider call even if their `targets` vectors were built in a different order.
    pub fn comparable(&self) -> (BTreeSet<String>, u32, bool) {
        let ttl = if self.ttl == 0 { 1 } else { self.ttl };
        (self.targets.iter().cloned().collect(), ttl, self.proxied)
    }

    pub fn is_wildcard(&self) -> bool {
        self.dns_name.starts_with("*.")
    }
}

/// A DNS zone as reported by a [`crate::provider::Provider`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Selects the zone whose name is the longest suffix match of `dns_name`, per §4.2's
/// "longest-suffix match" mapping rule. Matches either an exact name or a proper subdomain.
pub fn find_zone_for_name<'a>(dns_name: &str, zones: &'a [Zone]) -> Option<&'a Zone> {
    let bare = dns_name.strip_prefix("*.").unwrap_or(dns_name);
    zones
        .iter()
        .filter(|z| bare == z.name || bare.ends_with(&format!(".{}", z.name)))
        .max_by_key(|z| z.name.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(name: &str, targets: &[&str], ttl: u32, proxied: bool) -> Endpoint {
        Endpoint {
            dns_name: name.to_string(),
            record_type: RecordType::A,
            targets: targets.iter().map(|s| s.to_string()).collect(),
            ttl,
            proxied,
            owner_id: None,
            source_ref: None,
        }
    }

    #[test]
    fn key_lowercases_name_but_not_targets() {
        let e = a("App.Example.com", &["10.0.0.1"], 1, false);
        assert_eq!(e.key(), ("app.example.com".to_string(), RecordType::A));
    }

    #[test]
    fn comparable_treats_ttl_zero_as_auto() {
        let e1 = a("app.example.com", &["10.0.0.1"], 1, false);
        let e2 = a("app.example.com", &["10.0.0.1"], 0, false);
        assert_eq!(e1.comparable(), e2.comparable());
    }

    #[test]
    fn comparable_ignores_target_order() {
        let e1 = a("app.example.com", &["10.0.0.1", "10.0.0.2"], 1, false);
        let e2 = a("app.example.com", &["10.0.0.2", "10.0.0.1"], 1, false);
        assert_eq!(e1.comparable(), e2.comparable());
    }

    #[test]
    fn longest_suffix_zone_wins() {
        let zones = vec![
            Zone { id: "1".into(), name: "example.com".into() },
            Zone { id: "2".into(), name: "lab.example.com".into() },
        ];
        let z = find_zone_for_name("app.lab.example.com", &zones).unwrap();
        assert_eq!(z.id, "2");
    }

    #[test]
    fn wildcard_resolves_against_its_bare_name() {
        let zones = vec![Zone { id: "1".into(), name: "example.com".into() }];
        let z = find_zone_for_name("*.lab.example.com", &zones).unwrap();
        assert_eq!(z.id, "1");
    }

    #[test]
    fn name_outside_any_zone_is_none() {
        let zones = vec![Zone { id: "1".into(), name: "example.com".into() }];
        assert!(find_zone_for_name("app.other.com", &zones).is_none());
    }
}
