mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use sherpa_dns::config::{self, Config, ConfigError};
use sherpa_dns::domain::DomainFilter;
use sherpa_dns::health::{self, HealthState, Metrics};
use sherpa_dns::provider::{CloudflareProvider, Provider};
use sherpa_dns::registry::Registry;
use sherpa_dns::source::docker::DockerSource;

use cli::Cli;

/// Process exit codes (§6): 0 on clean shutdown / `once` success, 2 on a
/// configuration error, 3 on an unrecoverable provider auth failure, 4 on an
/// unrecoverable container-runtime connection failure.
#[repr(u8)]
enum ExitStatus {
    Ok = 0,
    ConfigError = 2,
    ProviderAuthFailed = 3,
    RuntimeUnreachable = 4,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut raw = config::RawConfig::default();
    if let Some(path) = &cli.config {
        raw = config::merge(raw, config::load_yaml_file(path)?);
    }
    let env_vars: std::collections::HashMap<String, String> = std::env::vars().collect();
    raw = config::merge(raw, config::env_overrides(&env_vars));
    raw = config::merge(raw, cli.overrides());
    config::finalize(raw)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logger isn't initialized yet; a config error is as early as it gets.
            eprintln!("configuration error: {e}");
            return ExitStatus::ConfigError.into();
        }
    };

    Builder::new().filter_level(cfg.logging.level.into()).init();
    info!("sherpa-dns starting, tick interval {:?}", cfg.controller.interval);
    if cfg.controller.dry_run {
        info!("dry_run is enabled: plans will be computed and logged, never applied");
    }

    let provider: Arc<dyn Provider> = match cfg.provider.name {
        config::ProviderKind::Cloudflare => match CloudflareProvider::new(&cfg.provider.cloudflare_api_token) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                error!("failed to construct cloudflare provider: {e}");
                return ExitStatus::ProviderAuthFailed.into();
            }
        },
    };

    let docker = match DockerSource::connect(
        cfg.source.label_prefix.clone(),
        cfg.source.label_filter.clone(),
        cfg.provider.cloudflare_proxied_by_default,
    ) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to connect to the container runtime: {e}");
            return ExitStatus::RuntimeUnreachable.into();
        }
    };
    let nudges = docker.events();
    let source: Arc<dyn sherpa_dns::source::Source> = Arc::new(docker);

    let domain_filter = DomainFilter::new(cfg.domains.include.clone(), cfg.domains.exclude.clone());
    let registry = Arc::new(Registry::new(provider, cfg.registry.clone(), domain_filter));

    let health_state = Arc::new(HealthState::new());
    let metrics = Arc::new(Metrics::new());
    let cancel = CancellationToken::new();

    let health_task = tokio::spawn(health::serve(
        cfg.health.bind_addr,
        health_state.clone(),
        metrics.clone(),
        cancel.clone(),
    ));

    let controller = sherpa_dns::controller::Controller::new(
        source,
        registry,
        cfg.controller.clone(),
        health_state,
        metrics,
    );

    let shutdown = cancel.clone();
    let signals = tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown signal received, finishing the in-flight tick before exiting");
        shutdown.cancel();
    });

    controller.run(nudges, cancel.clone()).await;

    signals.abort();
    cancel.cancel();
    if let Err(e) = health_task.await {
        warn!("health server task did not shut down cleanly: {e}");
    }

    info!("sherpa-dns exiting cleanly");
    ExitStatus::Ok.into()
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
