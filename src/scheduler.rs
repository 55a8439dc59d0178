//! Delayed-deletion queue that absorbs transient container disappearances (§4.5).
//!
//! A `Delete` the Planner emits does not necessarily mean the DNS record should go
//! away immediately: a container restart or a brief daemon outage looks identical
//! to a permanent removal from the Source's point of view. The scheduler gives
//! every delete a grace period; if the endpoint reappears before it elapses, the
//! Controller cancels the pending deletion and nothing ever reaches the Provider.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;

use crate::endpoint::{Endpoint, EndpointKey};

struct Pending {
    endpoint: Endpoint,
    scheduled_at: Instant,
}

/// Process-local, in-memory delayed-deletion queue. Mutated only by the Controller
/// task (§5, "CleanupScheduler state is mutated only by the Controller task").
/// State does not survive a restart: on restart, containers that are genuinely
/// gone are simply re-observed as absent and re-queued on the next tick.
#[derive(Default)]
pub struct CleanupScheduler {
    pending: HashMap<EndpointKey, Pending>,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `endpoint` for deletion at `now + delay`, overwriting any earlier
    /// pending deletion for the same key.
    pub fn schedule(&mut self, endpoint: Endpoint, now: Instant, delay: Duration) {
        let key = endpoint.key();
        debug!("scheduling delete of {:?} in {delay:?}", key);
        self.pending.insert(key, Pending { endpoint, scheduled_at: now + delay });
    }

    /// Cancels a pending deletion for `key`, if one exists. Called when the endpoint
    /// reappears in the desired set before its scheduled time.
    pub fn cancel(&mut self, key: &EndpointKey) -> bool {
        let existed = self.pending.remove(key).is_some();
        if existed {
            debug!("cancelled pending delete of {key:?}");
        }
        existed
    }

    /// Returns and removes every entry whose `scheduled_at <= now`.
    pub fn due(&mut self, now: Instant) -> Vec<Endpoint> {
        let due_keys: Vec<EndpointKey> = self
            .pending
            .iter()
            .filter(|(_, p)| p.scheduled_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        due_keys
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| p.endpoint))
            .collect()
    }

    /// Drains every pending deletion regardless of its scheduled time, per §4.5's
    /// `once` mode ("the delay is effectively ignored ... for deletes that would be due").
    pub fn drain_all(&mut self) -> Vec<Endpoint> {
        self.pending.drain().map(|(_, p)| p.endpoint).collect()
    }

    pub fn is_pending(&self, key: &EndpointKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of deletions currently queued, exposed as `sherpa_dns_scheduler_pending`.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;

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

    #[test]
    fn not_due_before_its_scheduled_time() {
        let mut s = CleanupScheduler::new();
        let now = Instant::now();
        s.schedule(e("app.example.com"), now, Duration::from_secs(900));
        assert!(s.due(now).is_empty());
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn due_after_its_scheduled_time() {
        let mut s = CleanupScheduler::new();
        let now = Instant::now();
        s.schedule(e("app.example.com"), now, Duration::from_secs(900));
        let later = now + Duration::from_secs(901);
        let due = s.due(later);
        assert_eq!(due.len(), 1);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn cancel_before_due_prevents_deletion_forever() {
        let mut s = CleanupScheduler::new();
        let now = Instant::now();
        s.schedule(e("app.example.com"), now, Duration::from_secs(900));
        assert!(s.cancel(&e("app.example.com").key()));
        let far_future = now + Duration::from_secs(10_000);
        assert!(s.due(far_future).is_empty());
    }

    #[test]
    fn cancel_on_absent_key_is_a_harmless_no_op() {
        let mut s = CleanupScheduler::new();
        assert!(!s.cancel(&e("nothing.example.com").key()));
    }

    #[test]
    fn drain_all_ignores_the_schedule() {
        let mut s = CleanupScheduler::new();
        let now = Instant::now();
        s.schedule(e("app.example.com"), now, Duration::from_secs(900));
        assert_eq!(s.drain_all().len(), 1);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn rescheduling_same_key_replaces_the_earlier_entry() {
        let mut s = CleanupScheduler::new();
        let now = Instant::now();
        s.schedule(e("app.example.com"), now, Duration::from_secs(10));
        s.schedule(e("app.example.com"), now, Duration::from_secs(900));
        assert!(s.due(now + Duration::from_secs(11)).is_empty());
    }
}
