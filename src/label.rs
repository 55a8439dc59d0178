//! Parses the `sherpa.dns/*` container label schema (§4.1) into an [`Endpoint`].

use std::collections::HashMap;

use thiserror::Error;

use crate::endpoint::{Endpoint, RecordType, SourceRef};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum LabelError {
    #[error("no `{0}/hostname` label, container ignored")]
    NoHostname(String),
    #[error("invalid hostname `{0}`")]
    InvalidHostname(String),
    #[error("invalid record type `{0}`")]
    InvalidType(String),
    #[error("invalid ttl `{0}`")]
    InvalidTtl(String),
    #[error("invalid target `{0}` for record type {1}")]
    InvalidTarget(String, RecordType),
    #[error("container has {0} attached networks; an explicit `{1}/target` label is required")]
    AmbiguousTarget(usize, String),
    #[error("no usable target could be determined for `{0}`")]
    NoTarget(String),
    #[error("invalid proxied value `{0}`, expected true or false")]
    InvalidProxied(String),
}

/// A minimal view of a running container, as reported by the container-runtime client.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// `(network_name, ipv4)` pairs for every attached network that has an IPv4 address.
    pub networks: Vec<(String, String)>,
}

/// Parses a single container's labels into the [`Endpoint`] it requests, per the
/// `sherpa.dns/*` schema. Returns `Ok(None)` only when the required `hostname`
/// label is entirely absent (not an error — containers without it are simply ignored).
pub fn endpoint_from_container(
    container: &ContainerInfo,
    label_prefix: &str,
    proxied_by_default: bool,
) -> Result<Option<Endpoint>, LabelError> {
    let key = |suffix: &str| format!("{label_prefix}/{suffix}");

    let hostname = match container.labels.get(&key("hostname")) {
        Some(h) => h,
        None => return Ok(None),
    };
    let dns_name = validate_hostname(hostname)
        .ok_or_else(|| LabelError::InvalidHostname(hostname.clone()))?;

    let record_type = match container.labels.get(&key("type")) {
        Some(t) => t
            .parse::<RecordType>()
            .map_err(|_| LabelError::InvalidType(t.clone()))?,
        None => RecordType::A,
    };

    let ttl = match container.labels.get(&key("ttl")) {
        Some(t) => t
            .parse::<u32>()
            .ok()
            .filter(|v| *v >= 1)
            .ok_or_else(|| LabelError::InvalidTtl(t.clone()))?,
        None => 1,
    };

    let proxied = match container.labels.get(&key("proxied")) {
        Some(p) => match p.as_str() {
            "true" => true,
            "false" => false,
            other => return Err(LabelError::InvalidProxied(other.to_string())),
        },
        None => proxied_by_default,
    };

    let target = match container.labels.get(&key("target")) {
        Some(t) => t.clone(),
        None => default_target(container, record_type, label_prefix)?,
    };
    validate_target(&target, record_type)
        .ok_or_else(|| LabelError::InvalidTarget(target.clone(), record_type))?;

    Ok(Some(Endpoint {
        dns_name,
        record_type,
        targets: vec![target],
        ttl,
        proxied,
        owner_id: None,
        source_ref: Some(SourceRef {
            container_id: container.id.clone(),
            container_name: container.name.clone(),
        }),
    }))
}

fn default_target(
    container: &ContainerInfo,
    record_type: RecordType,
    label_prefix: &str,
) -> Result<String, LabelError> {
    match record_type {
        RecordType::Cname => Ok(container.name.clone()),
        RecordType::A => match container.networks.len() {
            0 => Err(LabelError::NoTarget(container.name.clone())),
            1 => Ok(container.networks[0].1.clone()),
            n => Err(LabelError::AmbiguousTarget(n, label_prefix.to_string())),
        },
    }
}

fn validate_hostname(raw: &str) -> Option<String> {
    let name = raw.trim().to_ascii_lowercase();
    if name.is_empty() || name.len() > 253 {
        return None;
    }
    let bare = name.strip_prefix("*.").unwrap_or(&name);
    if bare.is_empty() {
        return None;
    }
    let labels_ok = bare.split('.').all(|l| {
        !l.is_empty()
            && l.len() <= 63
            && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !l.starts_with('-')
            && !l.ends_with('-')
    });
    labels_ok.then_some(name)
}

fn validate_target(target: &str, record_type: RecordType) -> Option<()> {
    match record_type {
        RecordType::A => target.parse::<std::net::Ipv4Addr>().ok().map(|_| ()),
        RecordType::Cname => validate_hostname(target).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(labels: &[(&str, &str)], networks: &[(&str, &str)]) -> ContainerInfo {
        ContainerInfo {
            id: "abc123".to_string(),
            name: "web-1".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            networks: networks
                .iter()
                .map(|(n, ip)| (n.to_string(), ip.to_string()))
                .collect(),
        }
    }

    #[test]
    fn container_without_hostname_label_is_ignored() {
        let c = container(&[], &[("bridge", "172.17.0.2")]);
        assert!(endpoint_from_container(&c, "sherpa.dns", false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn minimal_container_gets_default_a_record() {
        let c = container(
            &[("sherpa.dns/hostname", "app.example.com")],
            &[("bridge", "172.17.0.2")],
        );
        let e = endpoint_from_container(&c, "sherpa.dns", false)
            .unwrap()
            .unwrap();
        assert_eq!(e.dns_name, "app.example.com");
        assert_eq!(e.record_type, RecordType::A);
        assert_eq!(e.targets, vec!["172.17.0.2"]);
        assert_eq!(e.ttl, 1);
        assert!(!e.proxied);
    }

    #[test]
    fn multi_network_container_without_explicit_target_is_ambiguous() {
        let c = container(
            &[("sherpa.dns/hostname", "app.example.com")],
            &[("bridge", "172.17.0.2"), ("internal", "10.0.0.5")],
        );
        assert!(matches!(
            endpoint_from_container(&c, "sherpa.dns", false),
            Err(LabelError::AmbiguousTarget(2, _))
        ));
    }

    #[test]
    fn explicit_target_resolves_ambiguity() {
        let c = container(
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/target", "10.0.0.5"),
            ],
            &[("bridge", "172.17.0.2"), ("internal", "10.0.0.5")],
        );
        let e = endpoint_from_container(&c, "sherpa.dns", false)
            .unwrap()
            .unwrap();
        assert_eq!(e.targets, vec!["10.0.0.5"]);
    }

    #[test]
    fn cname_defaults_target_to_container_name() {
        let c = container(
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/type", "cname"),
            ],
            &[],
        );
        let e = endpoint_from_container(&c, "sherpa.dns", false)
            .unwrap()
            .unwrap();
        assert_eq!(e.record_type, RecordType::Cname);
        assert_eq!(e.targets, vec!["web-1"]);
    }

    #[test]
    fn invalid_ttl_is_rejected() {
        let c = container(
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/ttl", "0"),
            ],
            &[("bridge", "172.17.0.2")],
        );
        assert!(matches!(
            endpoint_from_container(&c, "sherpa.dns", false),
            Err(LabelError::InvalidTtl(_))
        ));
    }

    #[test]
    fn wildcard_hostname_is_accepted() {
        let c = container(
            &[("sherpa.dns/hostname", "*.lab.example.com")],
            &[("bridge", "172.17.0.2")],
        );
        let e = endpoint_from_container(&c, "sherpa.dns", false)
            .unwrap()
            .unwrap();
        assert_eq!(e.dns_name, "*.lab.example.com");
    }
}
