use std::sync::atomic::{AtomicUsize, Ordering};

use nebula_core::{Endpoint, EndpointSet};

/// How the dispatcher picks an endpoint for a request that carries no
/// per-call endpoint pin of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Rotate across every member in turn. Used both for a full cluster's
    /// coordinators and for the agency's "try each member in turn" rule.
    RoundRobin,
    /// Always prefer position 0 ("the leader"); [`EndpointSelector::rotate_away_from`]
    /// demotes it on failure so the next attempt reaches the new leader.
    ActiveFailoverLeader,
    /// A single-server deployment; never rotates.
    Single,
}

/// Stateful endpoint selection on top of an [`EndpointSet`]. Holds only a
/// round-robin cursor; the set itself remains the source of truth for
/// membership and pinning.
pub struct EndpointSelector {
    policy: SelectionPolicy,
    cursor: AtomicUsize,
}

impl EndpointSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Chooses a member from `set`. A pin on the set (via [`EndpointSet::pin`])
    /// always wins, independent of policy.
    pub fn select(&self, set: &EndpointSet) -> Option<Endpoint> {
        if let Some(pinned) = set.pinned() {
            return Some(pinned);
        }
        let snapshot = set.snapshot();
        if snapshot.is_empty() {
            return None;
        }
        match self.policy {
            SelectionPolicy::Single | SelectionPolicy::ActiveFailoverLeader => {
                snapshot.first().cloned()
            }
            SelectionPolicy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();
                snapshot.get(index).cloned()
            }
        }
    }

    /// After a dispatch against `failed` fails, demotes it to the back of
    /// the set so the next [`EndpointSelector::select`] reaches a different
    /// member. A no-op for a single-member set.
    pub fn rotate_away_from(&self, set: &EndpointSet, failed: &Endpoint) {
        let snapshot = set.snapshot();
        if snapshot.len() < 2 {
            return;
        }
        let mut rotated: Vec<Endpoint> = snapshot.as_ref().clone();
        if let Some(pos) = rotated.iter().position(|e| e == failed) {
            let demoted = rotated.remove(pos);
            rotated.push(demoted);
            let _ = set.update(rotated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        Endpoint::parse(s).unwrap()
    }

    #[test]
    fn round_robin_cycles_through_every_member() {
        let set = EndpointSet::new(vec![ep("http://a:8529"), ep("http://b:8529")]).unwrap();
        let selector = EndpointSelector::new(SelectionPolicy::RoundRobin);
        let first = selector.select(&set).unwrap();
        let second = selector.select(&set).unwrap();
        assert_ne!(first.as_str(), second.as_str());
    }

    #[test]
    fn active_failover_prefers_position_zero_until_rotated() {
        let set = EndpointSet::new(vec![ep("http://a:8529"), ep("http://b:8529")]).unwrap();
        let selector = EndpointSelector::new(SelectionPolicy::ActiveFailoverLeader);
        assert_eq!(selector.select(&set).unwrap().as_str(), "http://a:8529/");
        assert_eq!(selector.select(&set).unwrap().as_str(), "http://a:8529/");

        selector.rotate_away_from(&set, &ep("http://a:8529"));
        assert_eq!(selector.select(&set).unwrap().as_str(), "http://b:8529/");
    }

    #[test]
    fn pin_overrides_the_policy() {
        let set = EndpointSet::new(vec![ep("http://a:8529")]).unwrap();
        set.pin(ep("http://pinned:9999"));
        let selector = EndpointSelector::new(SelectionPolicy::RoundRobin);
        assert_eq!(selector.select(&set).unwrap().as_str(), "http://pinned:9999/");
    }
}
