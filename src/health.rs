//! `/health` and `/metrics` endpoints (§4.8), served by their own `axum` task so that
//! external monitoring never depends on the reconciliation loop making progress.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Prometheus counters/gauges scraped from `/metrics`. Constructed once at startup
/// and shared by reference between the Controller and the health server — the only
/// mutable state crossing that boundary besides [`HealthState`] (§5, "no global
/// mutable singletons beyond the logger").
pub struct Metrics {
    registry: Registry,
    reconciliations_total: prometheus::IntCounter,
    changes_total: IntCounterVec,
    provider_errors_total: IntCounterVec,
    scheduler_pending: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reconciliations_total = prometheus::IntCounter::new(
            "sherpa_dns_reconciliations_total",
            "Total number of completed reconciliation ticks.",
        )
        .expect("valid metric");
        let changes_total = IntCounterVec::new(
            Opts::new("sherpa_dns_changes_total", "Changes applied, by kind."),
            &["kind"],
        )
        .expect("valid metric");
        let provider_errors_total = IntCounterVec::new(
            Opts::new("sherpa_dns_provider_errors_total", "Provider call failures, by error class."),
            &["class"],
        )
        .expect("valid metric");
        let scheduler_pending = IntGauge::new(
            "sherpa_dns_scheduler_pending",
            "Endpoints currently queued for delayed deletion.",
        )
        .expect("valid metric");

        registry.register(Box::new(reconciliations_total.clone())).expect("register");
        registry.register(Box::new(changes_total.clone())).expect("register");
        registry.register(Box::new(provider_errors_total.clone())).expect("register");
        registry.register(Box::new(scheduler_pending.clone())).expect("register");

        Self { registry, reconciliations_total, changes_total, provider_errors_total, scheduler_pending }
    }

    pub fn record_reconciliation(&self) {
        self.reconciliations_total.inc();
    }

    pub fn record_change(&self, kind: &str) {
        self.changes_total.with_label_values(&[kind]).inc();
    }

    pub fn record_provider_error(&self, class: &str) {
        self.provider_errors_total.with_label_values(&[class]).inc();
    }

    pub fn set_scheduler_pending(&self, n: usize) {
        self.scheduler_pending.set(n as i64);
    }

    fn encode(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

struct LastTick {
    at: Instant,
    ok: bool,
}

/// Shared across the Controller and the health server task: the last tick's outcome
/// and whether the container-event subscription is still alive (§4.8).
#[derive(Default)]
pub struct HealthState {
    last_tick: Mutex<Option<LastTick>>,
    event_subscription_alive: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self { last_tick: Mutex::new(None), event_subscription_alive: AtomicBool::new(true) }
    }

    pub async fn record_tick(&self, ok: bool) {
        *self.last_tick.lock().await = Some(LastTick { at: Instant::now(), ok });
    }

    pub fn set_event_subscription_alive(&self, alive: bool) {
        self.event_subscription_alive.store(alive, Ordering::SeqCst);
    }

    /// `/health` is green iff a tick has completed at least once (successfully or
    /// with a logged, recoverable error — see §7) and the event subscription is alive.
    pub(crate) async fn is_healthy(&self) -> bool {
        let ticked = self.last_tick.lock().await.is_some();
        ticked && self.event_subscription_alive.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ServerState {
    health: Arc<HealthState>,
    metrics: Arc<Metrics>,
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    if state.health.is_healthy().await {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.encode())
}

/// Runs the health/metrics HTTP server until `cancel` fires. Spawned as its own
/// task alongside the Controller's tick loop (§5).
pub async fn serve(
    bind_addr: SocketAddr,
    health: Arc<HealthState>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let state = ServerState { health, metrics };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("health/metrics server listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            warn!("health/metrics server shutting down");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unhealthy_before_first_tick() {
        let state = HealthState::new();
        assert!(!state.is_healthy().await);
    }

    #[tokio::test]
    async fn healthy_after_a_tick_with_a_live_subscription() {
        let state = HealthState::new();
        state.record_tick(true).await;
        assert!(state.is_healthy().await);
    }

    #[tokio::test]
    async fn unhealthy_when_event_subscription_has_died() {
        let state = HealthState::new();
        state.record_tick(true).await;
        state.set_event_subscription_alive(false);
        assert!(!state.is_healthy().await);
    }

    #[tokio::test]
    async fn a_logged_recoverable_tick_error_still_counts_as_healthy() {
        let state = HealthState::new();
        state.record_tick(false).await;
        assert!(state.is_healthy().await);
    }

    #[test]
    fn metrics_encode_without_panicking_when_empty() {
        let m = Metrics::new();
        assert!(m.encode().contains("sherpa_dns_reconciliations_total"));
    }
}
