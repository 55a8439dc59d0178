//! Owns the reconciliation loop: Source → Planner → Registry each tick, plus the
//! delayed-cleanup scheduler and event-driven nudges (§4.6).

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::health::{HealthState, Metrics};
use crate::plan::{self, Change, Plan};
use crate::provider::ErrorClass;
use crate::registry::Registry;
use crate::scheduler::CleanupScheduler;
use crate::source::{Nudge, Source};

/// A minimum delay between the end of one tick and the start of the next triggered
/// purely by nudges, so a burst of container events coalesces into one follow-up
/// tick instead of one per event (§4.6).
const MIN_INTER_TICK_DELAY: Duration = Duration::from_secs(1);

pub struct Controller {
    source: Arc<dyn Source>,
    registry: Arc<Registry>,
    scheduler: Mutex<CleanupScheduler>,
    config: ControllerConfig,
    health: Arc<HealthState>,
    metrics: Arc<Metrics>,
}

impl Controller {
    pub fn new(
        source: Arc<dyn Source>,
        registry: Arc<Registry>,
        config: ControllerConfig,
        health: Arc<HealthState>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            registry,
            scheduler: Mutex::new(CleanupScheduler::new()),
            config,
            health,
            metrics,
        }
    }

    /// Runs the tick loop until `cancel` fires or (in `once` mode) after the first
    /// tick and its scheduler drain. Nudges arriving mid-tick are coalesced: at most
    /// one follow-up tick runs regardless of how many arrived.
    pub async fn run(&self, mut nudges: impl futures_util::Stream<Item = Nudge> + Unpin, cancel: CancellationToken) {
        loop {
            self.tick().await;

            if self.config.once {
                self.drain_once().await;
                info!("controller.once is set, exiting after one reconciliation");
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cancellation requested, controller loop exiting");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.wait_for_nudge(&mut nudges) => {
                    debug!("nudge received, reconciling sooner than the next scheduled tick");
                    tokio::time::sleep(MIN_INTER_TICK_DELAY).await;
                }
            }
        }
    }

    async fn wait_for_nudge(&self, nudges: &mut (impl futures_util::Stream<Item = Nudge> + Unpin)) {
        use futures_util::{FutureExt, StreamExt};

        if nudges.next().await.is_none() {
            // Stream ended (e.g. event subscription died): mark it so `/health` turns
            // unhealthy, then never resolve again, so the tick timer remains the only
            // thing that can wake this branch.
            warn!("container event subscription ended, /health will report unhealthy");
            self.health.set_event_subscription_alive(false);
            std::future::pending::<()>().await;
            return;
        }
        // Drain whatever else is already buffered so a burst of container events
        // collapses into a single follow-up tick.
        while nudges.next().now_or_never().flatten().is_some() {}
    }

    /// One full iteration of §4.6's numbered loop, steps 2 through 5.
    async fn tick(&self) {
        let desired = match self.source.snapshot().await {
            Ok(d) => d,
            Err(e) => {
                warn!("source snapshot failed, skipping this tick: {e}");
                self.health.record_tick(false).await;
                return;
            }
        };
        let current = match self.registry.owned().await {
            Ok(c) => c,
            Err(e) => {
                warn!("registry read failed, skipping this tick: {e}");
                self.health.record_tick(false).await;
                return;
            }
        };

        let planned = plan::generate(&desired, &current);
        debug!(
            "plan: {} create(s), {} update(s), {} delete(s)",
            planned.creates.len(),
            planned.updates.len(),
            planned.deletes.len()
        );

        let (deletes_now, deferred) = self.route_deletes(planned.deletes, &desired).await;

        let mut to_apply = Plan { creates: planned.creates, updates: planned.updates, deletes: deletes_now };
        if self.config.dry_run {
            self.log_dry_run(&to_apply, &deferred);
        } else {
            let report = self.registry.apply(&to_apply).await;
            self.record_outcomes(&report);
        }
        to_apply.deletes.extend(deferred);

        self.metrics.record_reconciliation();
        self.metrics.set_scheduler_pending(self.scheduler.lock().await.pending_count());
        self.health.record_tick(true).await;
    }

    /// Splits the Planner's deletes into "apply now" and "handed to the scheduler",
    /// and cancels any pending deletion for an endpoint that reappeared in `desired`
    /// (§4.5).
    async fn route_deletes(&self, deletes: Vec<Change>, desired: &[crate::endpoint::Endpoint]) -> (Vec<Change>, Vec<Change>) {
        let mut scheduler = self.scheduler.lock().await;
        for e in desired {
            if scheduler.cancel(&e.key()) {
                debug!("{} reappeared, cancelling its pending delete", e.dns_name);
            }
        }

        if !self.config.cleanup_on_stop {
            return (deletes, Vec::new());
        }

        let now = Instant::now();
        for change in &deletes {
            scheduler.schedule(change.endpoint().clone(), now, self.config.cleanup_delay);
        }
        let due = scheduler.due(now).into_iter().map(Change::Delete).collect();
        (due, Vec::new())
    }

    /// Drains the scheduler unconditionally (§4.5, `once` mode) and applies whatever
    /// was due, then runs one more apply pass for it.
    async fn drain_once(&self) {
        let due = self.scheduler.lock().await.drain_all();
        if due.is_empty() {
            return;
        }
        let plan = Plan { creates: vec![], updates: vec![], deletes: due.into_iter().map(Change::Delete).collect() };
        if self.config.dry_run {
            self.log_dry_run(&plan, &[]);
        } else {
            let report = self.registry.apply(&plan).await;
            self.record_outcomes(&report);
        }
    }

    fn log_dry_run(&self, plan: &Plan, deferred: &[Change]) {
        for c in &plan.creates {
            info!("[dry-run] would CREATE {} {} -> {:?}", c.endpoint().record_type, c.endpoint().dns_name, c.endpoint().targets);
        }
        for c in &plan.updates {
            info!("[dry-run] would UPDATE {} {} -> {:?}", c.endpoint().record_type, c.endpoint().dns_name, c.endpoint().targets);
        }
        for c in &plan.deletes {
            info!("[dry-run] would DELETE {} {}", c.endpoint().record_type, c.endpoint().dns_name);
        }
        for c in deferred {
            info!("[dry-run] would schedule DELETE of {} for later", c.endpoint().dns_name);
        }
    }

    fn record_outcomes(&self, report: &crate::registry::ApplyReport) {
        for outcome in &report.outcomes {
            let kind = match outcome.change {
                Change::Create(_) => "create",
                Change::UpdateTo(_) => "update",
                Change::Delete(_) => "delete",
            };
            match &outcome.result {
                Ok(()) => self.metrics.record_change(kind),
                Err(e) => {
                    error!("change failed for {}: {e}", outcome.change.endpoint().dns_name);
                    let class = classify(e);
                    self.metrics.record_provider_error(class);
                }
            }
        }
    }
}

fn classify(err: &crate::registry::RegistryError) -> &'static str {
    match err {
        crate::registry::RegistryError::Provider(p) => match p.class() {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::RateLimited => "rate_limited",
        },
        _ => "permanent",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, RecordType};
    use crate::plan::Change;

    fn e(name: &str) -> Endpoint {
        Endpoint {
            dns_name: name.to_string(),
            record_type: RecordType::A,
            targets: vec!["10.0.0.1".to_string()],
            ttl: 1,
            proxied: false,
            owner_id: None,
            source_ref: None,
        }
    }

    #[tokio::test]
    async fn cleanup_disabled_applies_deletes_immediately() {
        let source: Arc<dyn Source> = Arc::new(crate::source::MockSource::new());
        let provider: Arc<dyn crate::provider::Provider> = Arc::new(crate::provider::MockProvider::new());
        let registry = Arc::new(Registry::new(
            provider,
            crate::config::RegistryConfig {
                kind: crate::config::RegistryKind::Txt,
                txt_prefix: "sherpa-dns-".to_string(),
                txt_owner_id: "default".to_string(),
                txt_wildcard_replacement: "star".to_string(),
                encrypt_txt: false,
                encryption_key: None,
            },
            crate::domain::DomainFilter::default(),
        ));
        let controller = Controller::new(
            source,
            registry,
            ControllerConfig {
                interval: Duration::from_secs(60),
                once: true,
                dry_run: true,
                cleanup_on_stop: false,
                cleanup_delay: Duration::from_secs(900),
            },
            Arc::new(HealthState::new()),
            Arc::new(Metrics::new()),
        );
        let (deletes_now, deferred) = controller
            .route_deletes(vec![Change::Delete(e("app.example.com"))], &[])
            .await;
        assert_eq!(deletes_now.len(), 1);
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn cleanup_enabled_defers_deletes_until_due() {
        let source: Arc<dyn Source> = Arc::new(crate::source::MockSource::new());
        let provider: Arc<dyn crate::provider::Provider> = Arc::new(crate::provider::MockProvider::new());
        let registry = Arc::new(Registry::new(
            provider,
            crate::config::RegistryConfig {
                kind: crate::config::RegistryKind::Txt,
                txt_prefix: "sherpa-dns-".to_string(),
                txt_owner_id: "default".to_string(),
                txt_wildcard_replacement: "star".to_string(),
                encrypt_txt: false,
                encryption_key: None,
            },
            crate::domain::DomainFilter::default(),
        ));
        let controller = Controller::new(
            source,
            registry,
            ControllerConfig {
                interval: Duration::from_secs(60),
                once: false,
                dry_run: true,
                cleanup_on_stop: true,
                cleanup_delay: Duration::from_secs(900),
            },
            Arc::new(HealthState::new()),
            Arc::new(Metrics::new()),
        );
        let (deletes_now, _deferred) = controller
            .route_deletes(vec![Change::Delete(e("app.example.com"))], &[])
            .await;
        assert!(deletes_now.is_empty());
        assert_eq!(controller.scheduler.lock().await.pending_count(), 1);
    }

    #[tokio::test]
    async fn reappearing_endpoint_cancels_its_pending_delete() {
        let source: Arc<dyn Source> = Arc::new(crate::source::MockSource::new());
        let provider: Arc<dyn crate::provider::Provider> = Arc::new(crate::provider::MockProvider::new());
        let registry = Arc::new(Registry::new(
            provider,
            crate::config::RegistryConfig {
                kind: crate::config::RegistryKind::Txt,
                txt_prefix: "sherpa-dns-".to_string(),
                txt_owner_id: "default".to_string(),
                txt_wildcard_replacement: "star".to_string(),
                encrypt_txt: false,
                encryption_key: None,
            },
            crate::domain::DomainFilter::default(),
        ));
        let controller = Controller::new(
            source,
            registry,
            ControllerConfig {
                interval: Duration::from_secs(60),
                once: false,
                dry_run: true,
                cleanup_on_stop: true,
                cleanup_delay: Duration::from_secs(900),
            },
            Arc::new(HealthState::new()),
            Arc::new(Metrics::new()),
        );
        controller.route_deletes(vec![Change::Delete(e("app.example.com"))], &[]).await;
        assert_eq!(controller.scheduler.lock().await.pending_count(), 1);
        controller.route_deletes(vec![], &[e("app.example.com")]).await;
        assert_eq!(controller.scheduler.lock().await.pending_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_nudge_stream_marks_event_subscription_dead() {
        let source: Arc<dyn Source> = Arc::new(crate::source::MockSource::new());
        let provider: Arc<dyn crate::provider::Provider> = Arc::new(crate::provider::MockProvider::new());
        let registry = Arc::new(Registry::new(
            provider,
            crate::config::RegistryConfig {
                kind: crate::config::RegistryKind::Txt,
                txt_prefix: "sherpa-dns-".to_string(),
                txt_owner_id: "default".to_string(),
                txt_wildcard_replacement: "star".to_string(),
                encrypt_txt: false,
                encryption_key: None,
            },
            crate::domain::DomainFilter::default(),
        ));
        let health = Arc::new(HealthState::new());
        health.record_tick(true).await;
        let controller = Controller::new(
            source,
            registry,
            ControllerConfig {
                interval: Duration::from_secs(60),
                once: false,
                dry_run: true,
                cleanup_on_stop: false,
                cleanup_delay: Duration::from_secs(900),
            },
            health.clone(),
            Arc::new(Metrics::new()),
        );

        let mut empty = futures_util::stream::empty::<Nudge>();
        // The stream ends immediately, so this never resolves on its own; race it
        // against a short timeout to observe the side effect instead of the return.
        let _ = tokio::time::timeout(Duration::from_millis(50), controller.wait_for_nudge(&mut empty)).await;
        assert!(!health.is_healthy().await);
    }
}
