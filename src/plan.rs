//! Pure diffing: `(desired, current) → (creates, updates, deletes)` (§4.4).

use crate::endpoint::{Endpoint, EndpointKey};

/// One item of a [`Plan`]. Carries the full desired endpoint; deletes carry the
/// endpoint as last observed in `current` so the Registry knows what to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create(Endpoint),
    UpdateTo(Endpoint),
    Delete(Endpoint),
}

impl Change {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Change::Create(e) | Change::UpdateTo(e) | Change::Delete(e) => e,
        }
    }

    fn key(&self) -> EndpointKey {
        self.endpoint().key()
    }
}

/// The ordered triple of changes needed to bring `current` to `desired`.
/// Applied by the Controller in the order `creates → updates → due-deletes` (§5).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub creates: Vec<Change>,
    pub updates: Vec<Change>,
    pub deletes: Vec<Change>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

fn sort_by_key(changes: &mut [Change]) {
    changes.sort_by(|a, b| a.key().cmp(&b.key()));
}

/// Diffs `desired` against `current` by `(dns_name, record_type)`. Side-effect-free:
/// takes and returns plain values, never touches a Provider or the clock.
pub fn generate(desired: &[Endpoint], current: &[Endpoint]) -> Plan {
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();

    let desired_by_key: std::collections::HashMap<EndpointKey, &Endpoint> =
        desired.iter().map(|e| (e.key(), e)).collect();
    let current_by_key: std::collections::HashMap<EndpointKey, &Endpoint> =
        current.iter().map(|e| (e.key(), e)).collect();

    for e in desired {
        match current_by_key.get(&e.key()) {
            None => creates.push(Change::Create(e.clone())),
            Some(cur) if cur.comparable() != e.comparable() => {
                updates.push(Change::UpdateTo(e.clone()))
            }
            Some(_) => {}
        }
    }
    for e in current {
        if !desired_by_key.contains_key(&e.key()) {
            deletes.push(Change::Delete(e.clone()));
        }
    }

    sort_by_key(&mut creates);
    sort_by_key(&mut updates);
    sort_by_key(&mut deletes);

    Plan { creates, updates, deletes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;

    fn e(name: &str, target: &str, ttl: u32, proxied: bool) -> Endpoint {
        Endpoint {
            dns_name: name.to_string(),
            record_type: RecordType::A,
            targets: vec![target.to_string()],
            ttl,
            proxied,
            owner_id: None,
            source_ref: None,
        }
    }

    #[test]
    fn identical_sets_produce_empty_plan() {
        let s = vec![e("app.example.com", "10.0.0.1", 1, false)];
        assert!(generate(&s, &s).is_empty());
    }

    #[test]
    fn new_desired_key_is_a_create() {
        let desired = vec![e("app.example.com", "10.0.0.1", 1, false)];
        let plan = generate(&desired, &[]);
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn missing_desired_key_is_a_delete() {
        let current = vec![e("app.example.com", "10.0.0.1", 1, false)];
        let plan = generate(&[], &current);
        assert!(plan.creates.is_empty());
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn empty_desired_never_produces_creates_and_vice_versa() {
        let s = vec![e("app.example.com", "10.0.0.1", 1, false)];
        assert!(generate(&s, &[]).deletes.is_empty());
        assert!(generate(&[], &s).creates.is_empty());
    }

    #[test]
    fn target_change_is_an_update_not_create_and_delete() {
        let desired = vec![e("app.example.com", "10.0.0.6", 1, false)];
        let current = vec![e("app.example.com", "10.0.0.5", 1, false)];
        let plan = generate(&desired, &current);
        assert_eq!(plan.updates.len(), 1);
        assert!(plan.creates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn ttl_one_and_zero_are_equivalent_auto() {
        let desired = vec![e("app.example.com", "10.0.0.1", 1, false)];
        let current = vec![e("app.example.com", "10.0.0.1", 0, false)];
        assert!(generate(&desired, &current).is_empty());
    }

    #[test]
    fn output_is_sorted_by_name_then_type() {
        let desired = vec![
            e("z.example.com", "10.0.0.1", 1, false),
            e("a.example.com", "10.0.0.1", 1, false),
        ];
        let plan = generate(&desired, &[]);
        assert_eq!(plan.creates[0].endpoint().dns_name, "a.example.com");
        assert_eq!(plan.creates[1].endpoint().dns_name, "z.example.com");
    }
}
