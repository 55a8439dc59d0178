//! Container-runtime client backed by `bollard` (§4.1, "Container-runtime client").
//!
//! Owns the `bollard::Docker` handle and is injected into [`DockerSource`] rather
//! than the Source connecting for itself, per §9's "no cyclic construction" rule.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};

use crate::endpoint::Endpoint;
use crate::label::{endpoint_from_container, ContainerInfo, LabelError};
use crate::source::{dedup_by_key, Nudge, Source, SourceError};

/// Optional `"KEY"` presence or `"KEY=VALUE"` match filter applied on top of the
/// required `hostname` label (§4.1 "Inputs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelFilter {
    None,
    Present(String),
    Equals(String, String),
}

impl LabelFilter {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return LabelFilter::None;
        }
        match raw.split_once('=') {
            Some((k, v)) => LabelFilter::Equals(k.to_string(), v.to_string()),
            None => LabelFilter::Present(raw.to_string()),
        }
    }

    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            LabelFilter::None => true,
            LabelFilter::Present(k) => labels.contains_key(k),
            LabelFilter::Equals(k, v) => labels.get(k) == Some(v),
        }
    }
}

/// Wraps a connected `bollard::Docker` handle and exposes exactly the two
/// capabilities the Source needs: listing containers and streaming lifecycle events.
pub struct DockerSource {
    docker: Arc<Docker>,
    label_prefix: String,
    label_filter: LabelFilter,
    proxied_by_default: bool,
}

impl DockerSource {
    pub fn connect(
        label_prefix: String,
        label_filter: String,
        proxied_by_default: bool,
    ) -> Result<Self, SourceError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| SourceError::RuntimeUnreachable(e.to_string()))?;
        Ok(Self {
            docker: Arc::new(docker),
            label_prefix,
            label_filter: LabelFilter::parse(&label_filter),
            proxied_by_default,
        })
    }

    /// A coalescing stream of nudges derived from `start`/`die`/`stop`/`kill` container
    /// events. Consumed by the Controller alongside the tick timer in `tokio::select!`.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = Nudge> + Send>> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec![
                "start".to_string(),
                "die".to_string(),
                "stop".to_string(),
                "kill".to_string(),
            ],
        );
        let opts = EventsOptions::<String> {
            filters,
            ..Default::default()
        };
        let stream = self.docker.events(Some(opts)).filter_map(|evt| async move {
            match evt {
                Ok(_) => Some(Nudge),
                Err(e) => {
                    warn!("docker event stream error: {e}");
                    None
                }
            }
        });
        Box::pin(stream)
    }
}

#[async_trait]
impl Source for DockerSource {
    async fn snapshot(&self) -> Result<Vec<Endpoint>, SourceError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| SourceError::RuntimeUnreachable(e.to_string()))?;

        let mut endpoints = Vec::new();
        for c in containers {
            let labels = c.labels.unwrap_or_default();
            if !self.label_filter.matches(&labels) {
                continue;
            }
            let info = ContainerInfo {
                id: c.id.clone().unwrap_or_default(),
                name: c
                    .names
                    .and_then(|n| n.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                labels,
                networks: container_networks(&c.network_settings),
            };
            match endpoint_from_container(&info, &self.label_prefix, self.proxied_by_default) {
                Ok(Some(e)) => endpoints.push(e),
                Ok(None) => {}
                Err(LabelError::NoHostname(_)) => {}
                Err(e) => warn!("skipping container {}: {e}", info.name),
            }
        }

        debug!("docker snapshot produced {} raw endpoints", endpoints.len());
        Ok(dedup_by_key(endpoints))
    }
}

fn container_networks(
    settings: &Option<bollard::models::NetworkSettings>,
) -> Vec<(String, String)> {
    settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .map(|nets| {
            nets.iter()
                .filter_map(|(name, n)| {
                    n.ip_address
                        .clone()
                        .filter(|ip| !ip.is_empty())
                        .map(|ip| (name.clone(), ip))
                })
                .collect()
        })
        .unwrap_or_default()
}
