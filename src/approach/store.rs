use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::state::ApproachState;
use crate::model::TransponderId;

/// Partition key: state is per (user, aircraft), so the same transponder
/// tracked by two tenants never shares an episode.
pub type StateKey = (Uuid, TransponderId);

/// Partitioned store of approach states.
///
/// DashMap gives per-key locking, so updates for different aircraft never
/// contend and no aircraft's state is touched by two tasks at once. The
/// scheduler additionally routes each aircraft through exactly one region
/// per tick, so entries are single-writer in practice.
#[derive(Clone, Default)]
pub struct ApproachStateStore {
    states: Arc<DashMap<StateKey, ApproachState>>,
}

impl ApproachStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the state for `key`, creating it on first sample.
    /// The entry lock is held for the duration of `f`; callers must not
    /// await inside.
    pub fn with_state<R>(
        &self,
        key: StateKey,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut ApproachState) -> R,
    ) -> R {
        let mut entry = self
            .states
            .entry(key)
            .or_insert_with(|| ApproachState::new(now));
        f(entry.value_mut())
    }

    /// Drop states whose (user, aircraft) pair is no longer in the tenant
    /// snapshot. Returns the number evicted.
    pub fn retain_known(&self, live: &HashSet<StateKey>) -> usize {
        let mut removed = 0;
        self.states.retain(|key, _| {
            if live.contains(key) {
                true
            } else {
                debug!(user_id = %key.0, transponder = %key.1, "evicting state for removed tracking target");
                removed += 1;
                false
            }
        });
        removed
    }

    /// Drop states with no samples for the idle window. Returns the number
    /// evicted.
    pub fn evict_idle(&self, now: DateTime<Utc>, idle_window: Duration) -> usize {
        let mut removed = 0;
        self.states.retain(|key, state| {
            let elapsed = now.signed_duration_since(state.updated_at);
            if elapsed > idle_window {
                debug!(
                    user_id = %key.0,
                    transponder = %key.1,
                    idle_hours = elapsed.num_hours(),
                    "evicting idle approach state"
                );
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Snapshot all states for persistence
    pub fn export(&self) -> Vec<(StateKey, ApproachState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Restore persisted states, replacing any existing entries
    pub fn restore(&self, states: Vec<(StateKey, ApproachState)>) {
        for (key, state) in states {
            self.states.insert(key, state);
        }
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.states.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: Uuid, hex: &str) -> StateKey {
        (user, TransponderId::new(hex).unwrap())
    }

    #[test]
    fn test_with_state_creates_on_first_use() {
        let store = ApproachStateStore::new();
        let now = Utc::now();
        let k = key(Uuid::new_v4(), "ab1234");

        let episode = store.with_state(k.clone(), now, |state| state.episode_id);
        assert_eq!(store.len(), 1);
        // Second access sees the same state
        let episode_again = store.with_state(k, now, |state| state.episode_id);
        assert_eq!(episode, episode_again);
    }

    #[test]
    fn test_retain_known_evicts_removed_targets() {
        let store = ApproachStateStore::new();
        let now = Utc::now();
        let keep = key(Uuid::new_v4(), "ab1234");
        let drop = key(Uuid::new_v4(), "cd5678");
        store.with_state(keep.clone(), now, |_| ());
        store.with_state(drop.clone(), now, |_| ());

        let live: HashSet<StateKey> = [keep.clone()].into_iter().collect();
        assert_eq!(store.retain_known(&live), 1);
        assert!(store.contains(&keep));
        assert!(!store.contains(&drop));
    }

    #[test]
    fn test_evict_idle_removes_stale_states() {
        let store = ApproachStateStore::new();
        let now = Utc::now();
        let stale = key(Uuid::new_v4(), "ab1234");
        let fresh = key(Uuid::new_v4(), "cd5678");

        store.with_state(stale.clone(), now - Duration::hours(30), |_| ());
        store.with_state(fresh.clone(), now, |_| ());

        assert_eq!(store.evict_idle(now, Duration::hours(24)), 1);
        assert!(!store.contains(&stale));
        assert!(store.contains(&fresh));
    }

    #[test]
    fn test_export_restore_round_trip() {
        let store = ApproachStateStore::new();
        let now = Utc::now();
        let k = key(Uuid::new_v4(), "ab1234");
        store.with_state(k.clone(), now, |state| state.mark_crossed(10.0));

        let exported = store.export();
        let restored = ApproachStateStore::new();
        restored.restore(exported);
        assert!(restored.with_state(k, now, |state| state.has_crossed(10.0)));
    }
}
