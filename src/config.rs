//! Configuration model and loader.
//!
//! Assembled from, in increasing priority: built-in defaults, an optional YAML
//! file (with `${NAME}`/`${NAME:-default}` interpolation against the process
//! environment), environment variables (`SHERPA_DNS_*`), and CLI flags (§4.9).

#![allow(non_camel_case_types)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::DomainPattern;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
impl From<Loglevel> for LevelFilter {
    fn from(ll: Loglevel) -> Self {
        match ll {
            Loglevel::Error => LevelFilter::Error,
            Loglevel::Warn => LevelFilter::Warn,
            Loglevel::Info => LevelFilter::Info,
            Loglevel::Debug => LevelFilter::Debug,
            Loglevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cloudflare,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Txt,
}

pub type Ttl = u32;

/// Fully resolved configuration, ready to construct every component from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub source: SourceConfig,
    pub provider: ProviderConfig,
    pub registry: RegistryConfig,
    pub controller: ControllerConfig,
    pub domains: DomainsConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub label_prefix: String,
    pub label_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: ProviderKind,
    pub cloudflare_api_token: String,
    pub cloudflare_proxied_by_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
    pub txt_prefix: String,
    pub txt_owner_id: String,
    pub txt_wildcard_replacement: String,
    pub encrypt_txt: bool,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub interval: Duration,
    pub once: bool,
    pub dry_run: bool,
    pub cleanup_on_stop: bool,
    pub cleanup_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainsConfig {
    pub include: Vec<DomainPattern>,
    pub exclude: Vec<DomainPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Loglevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    ParseYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("missing required config value `{0}`")]
    Missing(String),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
    #[error("unresolved environment variable `{0}` in config file interpolation")]
    UnresolvedVariable(String),
}

/// Raw, not-yet-validated layer as deserialized from YAML. Every field is optional;
/// absent fields fall through to the next-lower-priority layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub source: RawSource,
    pub provider: RawProvider,
    pub registry: RawRegistry,
    pub controller: RawController,
    pub domains: RawDomains,
    pub logging: RawLogging,
    pub health: RawHealth,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSource {
    pub label_prefix: Option<String>,
    pub label_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProvider {
    pub name: Option<ProviderKind>,
    pub cloudflare: RawCloudflare,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCloudflare {
    pub api_token: Option<String>,
    pub proxied_by_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRegistry {
    pub r#type: Option<RegistryKind>,
    pub txt_prefix: Option<String>,
    pub txt_owner_id: Option<String>,
    pub txt_wildcard_replacement: Option<String>,
    pub encrypt_txt: Option<bool>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawController {
    pub interval: Option<String>,
    pub once: Option<bool>,
    pub dry_run: Option<bool>,
    pub cleanup_on_stop: Option<bool>,
    pub cleanup_delay: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDomains {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLogging {
    pub level: Option<Loglevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawHealth {
    pub bind_addr: Option<String>,
}

/// Overrides sourced from the environment (`SHERPA_DNS_*`) or from CLI flags.
/// Both layers are expressed as the same sparse override shape since they apply
/// with the same precedence rules relative to the YAML file, differing only in
/// which layer is applied last.
pub type Overrides = RawConfig;

/// Expands `${NAME}` and `${NAME:-default}` against `env_lookup`, applied before YAML parsing.
pub fn interpolate(
    raw: &str,
    env_lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let end = raw[i + 2..]
                .find('}')
                .map(|p| i + 2 + p)
                .ok_or_else(|| ConfigError::Invalid {
                    field: "config file".to_string(),
                    reason: "unterminated `${` interpolation".to_string(),
                })?;
            let inner = &raw[i + 2..end];
            let (name, default) = match inner.split_once(":-") {
                Some((n, d)) => (n, Some(d)),
                None => (inner, None),
            };
            match env_lookup(name) {
                Some(v) => out.push_str(&v),
                None => match default {
                    Some(d) => out.push_str(d),
                    None => return Err(ConfigError::UnresolvedVariable(name.to_string())),
                },
            }
            i = end + 1;
        } else {
            let ch = raw[i..].chars().next().expect("i is a char boundary");
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Ok(out)
}

pub fn load_yaml_file(path: &str) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_string(),
        source: e,
    })?;
    let expanded = interpolate(&contents, &|name| std::env::var(name).ok())?;
    serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseYaml {
        path: path.to_string(),
        source: e,
    })
}

fn merge_option<T: Clone>(base: &mut Option<T>, over: &Option<T>) {
    if let Some(v) = over {
        *base = Some(v.clone());
    }
}

/// Merges `over` onto `base`, field by field, preferring `over` wherever it is `Some`/non-empty.
pub fn merge(base: RawConfig, over: RawConfig) -> RawConfig {
    let mut merged = base;
    merge_option(&mut merged.source.label_prefix, &over.source.label_prefix);
    merge_option(&mut merged.source.label_filter, &over.source.label_filter);
    merge_option(&mut merged.provider.name, &over.provider.name);
    merge_option(
        &mut merged.provider.cloudflare.api_token,
        &over.provider.cloudflare.api_token,
    );
    merge_option(
        &mut merged.provider.cloudflare.proxied_by_default,
        &over.provider.cloudflare.proxied_by_default,
    );
    merge_option(&mut merged.registry.r#type, &over.registry.r#type);
    merge_option(&mut merged.registry.txt_prefix, &over.registry.txt_prefix);
    merge_option(
        &mut merged.registry.txt_owner_id,
        &over.registry.txt_owner_id,
    );
    merge_option(
        &mut merged.registry.txt_wildcard_replacement,
        &over.registry.txt_wildcard_replacement,
    );
    merge_option(&mut merged.registry.encrypt_txt, &over.registry.encrypt_txt);
    merge_option(
        &mut merged.registry.encryption_key,
        &over.registry.encryption_key,
    );
    merge_option(&mut merged.controller.interval, &over.controller.interval);
    merge_option(&mut merged.controller.once, &over.controller.once);
    merge_option(&mut merged.controller.dry_run, &over.controller.dry_run);
    merge_option(
        &mut merged.controller.cleanup_on_stop,
        &over.controller.cleanup_on_stop,
    );
    merge_option(
        &mut merged.controller.cleanup_delay,
        &over.controller.cleanup_delay,
    );
    if !over.domains.include.is_empty() {
        merged.domains.include = over.domains.include;
    }
    if !over.domains.exclude.is_empty() {
        merged.domains.exclude = over.domains.exclude;
    }
    merge_option(&mut merged.logging.level, &over.logging.level);
    merge_option(&mut merged.health.bind_addr, &over.health.bind_addr);
    merged
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::Invalid {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Validates a fully-merged [`RawConfig`] into a [`Config`], applying built-in defaults
/// for every field still unset at this point.
pub fn finalize(raw: RawConfig) -> Result<Config, ConfigError> {
    let cloudflare_api_token =
        raw.provider
            .cloudflare
            .api_token
            .ok_or_else(|| ConfigError::Missing("provider.cloudflare.api_token".to_string()))?;

    let interval = match raw.controller.interval {
        Some(v) => parse_duration("controller.interval", &v)?,
        None => Duration::from_secs(60),
    };
    let cleanup_delay = match raw.controller.cleanup_delay {
        Some(v) => parse_duration("controller.cleanup_delay", &v)?,
        None => Duration::from_secs(15 * 60),
    };
    let bind_addr = match raw.health.bind_addr {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            field: "health.bind_addr".to_string(),
            reason: format!("`{v}` is not a valid socket address"),
        })?,
        None => "0.0.0.0:8080".parse().unwrap(),
    };

    Ok(Config {
        source: SourceConfig {
            label_prefix: raw.source.label_prefix.unwrap_or_else(|| "sherpa.dns".to_string()),
            label_filter: raw.source.label_filter.unwrap_or_default(),
        },
        provider: ProviderConfig {
            name: raw.provider.name.unwrap_or(ProviderKind::Cloudflare),
            cloudflare_api_token,
            cloudflare_proxied_by_default: raw
                .provider
                .cloudflare
                .proxied_by_default
                .unwrap_or(false),
        },
        registry: RegistryConfig {
            kind: raw.registry.r#type.unwrap_or(RegistryKind::Txt),
            txt_prefix: raw.registry.txt_prefix.unwrap_or_else(|| "sherpa-dns-".to_string()),
            txt_owner_id: raw.registry.txt_owner_id.unwrap_or_else(|| "default".to_string()),
            txt_wildcard_replacement: raw
                .registry
                .txt_wildcard_replacement
                .unwrap_or_else(|| "star".to_string()),
            encrypt_txt: raw.registry.encrypt_txt.unwrap_or(false),
            encryption_key: raw.registry.encryption_key,
        },
        controller: ControllerConfig {
            interval,
            once: raw.controller.once.unwrap_or(false),
            dry_run: raw.controller.dry_run.unwrap_or(false),
            cleanup_on_stop: raw.controller.cleanup_on_stop.unwrap_or(true),
            cleanup_delay,
        },
        domains: DomainsConfig {
            include: raw.domains.include.into_iter().map(DomainPattern::new).collect(),
            exclude: raw.domains.exclude.into_iter().map(DomainPattern::new).collect(),
        },
        logging: LoggingConfig {
            level: raw.logging.level.unwrap_or(Loglevel::Info),
        },
        health: HealthConfig { bind_addr },
    })
}

/// Reads `SHERPA_DNS_*` environment variables into the sparse override shape.
pub fn env_overrides(vars: &HashMap<String, String>) -> RawConfig {
    let get = |k: &str| vars.get(k).cloned();
    let get_bool = |k: &str| get(k).map(|v| v == "true" || v == "1");

    let mut raw = RawConfig::default();
    raw.source.label_prefix = get("SHERPA_DNS_SOURCE_LABEL_PREFIX");
    raw.source.label_filter = get("SHERPA_DNS_SOURCE_LABEL_FILTER");
    raw.provider.cloudflare.api_token = get("SHERPA_DNS_PROVIDER_CLOUDFLARE_API_TOKEN");
    raw.provider.cloudflare.proxied_by_default =
        get_bool("SHERPA_DNS_PROVIDER_CLOUDFLARE_PROXIED_BY_DEFAULT");
    raw.registry.txt_prefix = get("SHERPA_DNS_REGISTRY_TXT_PREFIX");
    raw.registry.txt_owner_id = get("SHERPA_DNS_REGISTRY_TXT_OWNER_ID");
    raw.registry.txt_wildcard_replacement =
        get("SHERPA_DNS_REGISTRY_TXT_WILDCARD_REPLACEMENT");
    raw.registry.encrypt_txt = get_bool("SHERPA_DNS_REGISTRY_ENCRYPT_TXT");
    raw.registry.encryption_key = get("SHERPA_DNS_REGISTRY_ENCRYPTION_KEY");
    raw.controller.interval = get("SHERPA_DNS_CONTROLLER_INTERVAL");
    raw.controller.once = get_bool("SHERPA_DNS_CONTROLLER_ONCE");
    raw.controller.dry_run = get_bool("SHERPA_DNS_DRY_RUN");
    raw.controller.cleanup_on_stop = get_bool("SHERPA_DNS_CONTROLLER_CLEANUP_ON_STOP");
    raw.controller.cleanup_delay = get("SHERPA_DNS_CONTROLLER_CLEANUP_DELAY");
    raw.health.bind_addr = get("SHERPA_DNS_HEALTH_BIND_ADDR");
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_substitutes_present_variable() {
        let env = |k: &str| (k == "FOO").then(|| "bar".to_string());
        assert_eq!(interpolate("x: ${FOO}", &env).unwrap(), "x: bar");
    }

    #[test]
    fn interpolate_falls_back_to_default() {
        let env = |_: &str| None;
        assert_eq!(interpolate("x: ${FOO:-baz}", &env).unwrap(), "x: baz");
    }

    #[test]
    fn interpolate_errors_on_missing_without_default() {
        let env = |_: &str| None;
        assert!(interpolate("x: ${FOO}", &env).is_err());
    }

    #[test]
    fn interpolate_preserves_multibyte_utf8_outside_spans() {
        let env = |k: &str| (k == "NAME").then(|| "café".to_string());
        let input = "comment: \"日本語 ${NAME} 🎉\"";
        assert_eq!(
            interpolate(input, &env).unwrap(),
            "comment: \"日本語 café 🎉\""
        );
    }

    #[test]
    fn missing_api_token_is_fatal() {
        let raw = RawConfig::default();
        assert!(matches!(finalize(raw), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn finalize_applies_defaults() {
        let mut raw = RawConfig::default();
        raw.provider.cloudflare.api_token = Some("tok".to_string());
        let cfg = finalize(raw).unwrap();
        assert_eq!(cfg.registry.txt_prefix, "sherpa-dns-");
        assert_eq!(cfg.controller.interval, Duration::from_secs(60));
        assert!(cfg.controller.cleanup_on_stop);
        assert_eq!(cfg.health.bind_addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn env_overrides_beat_yaml_layer_but_cli_beats_both() {
        let yaml = RawConfig {
            controller: RawController {
                interval: Some("30s".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let env = RawConfig {
            controller: RawController {
                interval: Some("45s".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let cli = RawConfig {
            controller: RawController {
                interval: Some("90s".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let merged = merge(merge(yaml, env), cli);
        assert_eq!(merged.controller.interval, Some("90s".to_string()));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let mut raw = RawConfig::default();
        raw.provider.cloudflare.api_token = Some("tok".to_string());
        raw.controller.interval = Some("not-a-duration".to_string());
        assert!(matches!(finalize(raw), Err(ConfigError::Invalid { .. })));
    }
}
