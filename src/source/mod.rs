//! Turns a container inventory into the desired [`Endpoint`] set (§4.1).
//!
//! The only implementation shipped here is [`docker::DockerSource`]. Additional
//! sources implement the [`Source`] trait; everything above this module talks
//! only to that trait.
pub mod docker;

use std::collections::HashMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::endpoint::Endpoint;

/// An opaque "something changed, reconcile sooner" signal. Carries no payload: the
/// Controller always re-derives the desired set from a fresh [`Source::snapshot`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nudge;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("container runtime unreachable: {0}")]
    RuntimeUnreachable(String),
    #[error("event subscription failed: {0}")]
    EventStream(String),
}

/// Produces the current desired endpoint set derived from the local container
/// runtime's inventory, and a coalescing stream of nudges for event-driven ticks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Lists all running containers, filters by `label_filter`, projects labels to
    /// endpoints and deduplicates by `(dns_name, record_type)` (§4.1, invariant 4).
    /// Never returns a partial result silently: a runtime failure is an `Err`, not
    /// an empty set, so the Controller never mistakes "can't see anything" for
    /// "nothing is desired".
    async fn snapshot(&self) -> Result<Vec<Endpoint>, SourceError>;
}

/// Deduplicates a raw list of per-container endpoints by `(dns_name, record_type)`.
/// On conflicting targets for the same key, both containers are dropped and the
/// conflict logged (§3 invariant 4, §8 boundary behavior).
pub fn dedup_by_key(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut by_key: HashMap<_, Vec<Endpoint>> = HashMap::new();
    for e in endpoints {
        by_key.entry(e.key()).or_default().push(e);
    }

    let mut out = Vec::new();
    for (key, mut group) in by_key {
        match group.len() {
            1 => out.push(group.pop().unwrap()),
            _ => {
                let distinct = group
                    .iter()
                    .map(|e| e.comparable())
                    .collect::<std::collections::HashSet<_>>();
                if distinct.len() == 1 {
                    // Same desired state from multiple containers (e.g. a scaled
                    // service) — last-writer-wins is moot since they agree.
                    out.push(group.pop().unwrap());
                } else {
                    log::error!(
                        "conflicting desired state for {:?}: {} containers disagree, dropping all",
                        key,
                        group.len()
                    );
                }
            }
        }
    }
    out
}
