//! Command-line flags. Each one overrides the corresponding YAML/environment
//! config key at the highest priority (§6, §4.9).

use clap::Parser;

macro_rules! env_prefix {
    () => {
        "SHERPA_DNS_"
    };
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to an optional YAML config file.
    #[arg(short = 'c', long, env = concat!(env_prefix!(), "CONFIG"))]
    pub config: Option<String>,

    /// Container label namespace (e.g. `sherpa.dns/hostname`).
    #[arg(long, env = concat!(env_prefix!(), "SOURCE_LABEL_PREFIX"))]
    pub label_prefix: Option<String>,

    /// Extra `KEY` or `KEY=VALUE` container label filter.
    #[arg(long, env = concat!(env_prefix!(), "SOURCE_LABEL_FILTER"))]
    pub label_filter: Option<String>,

    /// Cloudflare API token.
    #[arg(long, env = concat!(env_prefix!(), "PROVIDER_CLOUDFLARE_API_TOKEN"))]
    pub cloudflare_api_token: Option<String>,

    /// Default value for the `proxied` flag on Cloudflare A/CNAME records.
    #[arg(long, action, env = concat!(env_prefix!(), "PROVIDER_CLOUDFLARE_PROXIED_BY_DEFAULT"))]
    pub proxied_by_default: bool,

    /// Prefix applied to the leftmost label of every TXT ownership sidecar.
    #[arg(long, env = concat!(env_prefix!(), "REGISTRY_TXT_PREFIX"))]
    pub txt_prefix: Option<String>,

    /// Identity stamped into every TXT ownership sidecar this instance creates.
    #[arg(long, env = concat!(env_prefix!(), "REGISTRY_TXT_OWNER_ID"))]
    pub txt_owner_id: Option<String>,

    /// Substitution for a wildcard (`*`) label when building a sidecar name.
    #[arg(long, env = concat!(env_prefix!(), "REGISTRY_TXT_WILDCARD_REPLACEMENT"))]
    pub txt_wildcard_replacement: Option<String>,

    /// Encrypt TXT sidecar payloads with a key derived from `--encryption-key`.
    #[arg(long, action, env = concat!(env_prefix!(), "REGISTRY_ENCRYPT_TXT"))]
    pub encrypt_txt: bool,

    /// Passphrase used to derive the TXT sidecar encryption key.
    #[arg(long, env = concat!(env_prefix!(), "REGISTRY_ENCRYPTION_KEY"))]
    pub encryption_key: Option<String>,

    /// Reconciliation tick period (e.g. `1m`, `30s`).
    #[arg(long, env = concat!(env_prefix!(), "CONTROLLER_INTERVAL"))]
    pub interval: Option<String>,

    /// Reconcile once, then exit.
    #[arg(long, action, env = concat!(env_prefix!(), "CONTROLLER_ONCE"))]
    pub once: bool,

    /// Compute and log the plan but never call the provider.
    #[arg(long, short = 'd', action, env = concat!(env_prefix!(), "DRY_RUN"))]
    pub dry_run: bool,

    /// Disable the delayed-delete grace window; deletes apply immediately.
    #[arg(long, action, env = concat!(env_prefix!(), "CONTROLLER_DISABLE_CLEANUP"))]
    pub disable_cleanup: bool,

    /// Grace period before a disappeared endpoint's records are actually deleted.
    #[arg(long, env = concat!(env_prefix!(), "CONTROLLER_CLEANUP_DELAY"))]
    pub cleanup_delay: Option<String>,

    /// Zone name or `*.`-wildcard pattern to manage. May be repeated.
    #[arg(long = "include-domain", env = concat!(env_prefix!(), "DOMAINS_INCLUDE"), value_delimiter = ',')]
    pub domains_include: Vec<String>,

    /// Zone name or `*.`-wildcard pattern to never manage. May be repeated.
    #[arg(long = "exclude-domain", env = concat!(env_prefix!(), "DOMAINS_EXCLUDE"), value_delimiter = ',')]
    pub domains_exclude: Vec<String>,

    /// Application log level.
    #[arg(value_enum, long, env = concat!(env_prefix!(), "LOGGING_LEVEL"))]
    pub log_level: Option<sherpa_dns::config::Loglevel>,

    /// Address the `/health` and `/metrics` server binds to.
    #[arg(long, env = concat!(env_prefix!(), "HEALTH_BIND_ADDR"))]
    pub health_bind_addr: Option<String>,
}

impl Cli {
    /// Projects the parsed flags onto the sparse override shape shared with the
    /// YAML and environment layers (§4.9).
    pub fn overrides(&self) -> sherpa_dns::config::RawConfig {
        use sherpa_dns::config::*;

        RawConfig {
            source: RawSource {
                label_prefix: self.label_prefix.clone(),
                label_filter: self.label_filter.clone(),
            },
            provider: RawProvider {
                name: None,
                cloudflare: RawCloudflare {
                    api_token: self.cloudflare_api_token.clone(),
                    proxied_by_default: self.proxied_by_default.then_some(true),
                },
            },
            registry: RawRegistry {
                r#type: None,
                txt_prefix: self.txt_prefix.clone(),
                txt_owner_id: self.txt_owner_id.clone(),
                txt_wildcard_replacement: self.txt_wildcard_replacement.clone(),
                encrypt_txt: self.encrypt_txt.then_some(true),
                encryption_key: self.encryption_key.clone(),
            },
            controller: RawController {
                interval: self.interval.clone(),
                once: self.once.then_some(true),
                dry_run: self.dry_run.then_some(true),
                cleanup_on_stop: self.disable_cleanup.then_some(false),
                cleanup_delay: self.cleanup_delay.clone(),
            },
            domains: RawDomains {
                include: self.domains_include.clone(),
                exclude: self.domains_exclude.clone(),
            },
            logging: RawLogging { level: self.log_level },
            health: RawHealth { bind_addr: self.health_bind_addr.clone() },
        }
    }
}
