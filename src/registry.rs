//! Tenant registry: the live set of (user, aircraft, airport, integrations)
//! tuples the scheduler tracks.
//!
//! The registry itself is an external collaborator (a database in the full
//! deployment); the core consumes it as a read-mostly snapshot refreshed on a
//! slow cadence and swapped atomically, so concurrent region queries never
//! observe a half-updated tenant list.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::approach::StateKey;
use crate::model::TrackingTarget;

#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// List every active tracking target. Bounded by the caller's timeout;
    /// a failure leaves the previous snapshot in use.
    async fn list_active_targets(&self) -> Result<Vec<TrackingTarget>>;
}

/// Immutable view of the tenant set at one refresh instant
#[derive(Debug, Clone)]
pub struct TenantSnapshot {
    pub targets: Vec<TrackingTarget>,
    pub refreshed_at: DateTime<Utc>,
}

impl TenantSnapshot {
    pub fn new(targets: Vec<TrackingTarget>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            targets,
            refreshed_at,
        }
    }

    pub fn empty(at: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), at)
    }

    /// All (user, aircraft) keys present in the snapshot, for lazy eviction
    pub fn live_keys(&self) -> HashSet<StateKey> {
        self.targets
            .iter()
            .flat_map(|target| {
                target
                    .aircraft
                    .iter()
                    .map(|a| (target.user_id, a.transponder.clone()))
            })
            .collect()
    }

    pub fn aircraft_count(&self) -> usize {
        self.targets.iter().map(|t| t.aircraft.len()).sum()
    }
}

/// Atomically swappable snapshot holder shared between the refresh task and
/// the tick loop. Readers clone the Arc and never block the writer for long.
pub struct SnapshotHolder {
    inner: RwLock<Arc<TenantSnapshot>>,
}

impl SnapshotHolder {
    pub fn new(initial: TenantSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<TenantSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, snapshot: TenantSnapshot) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }
}

/// Registry backed by the static tenant list in the config file. Stands in
/// for the excluded database-backed registry; refreshes are cheap clones.
pub struct ConfigRegistry {
    targets: Vec<TrackingTarget>,
}

impl ConfigRegistry {
    pub fn new(targets: Vec<TrackingTarget>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl TenantRegistry for ConfigRegistry {
    async fn list_active_targets(&self) -> Result<Vec<TrackingTarget>> {
        Ok(self.targets.clone())
    }
}
