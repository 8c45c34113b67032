//! Injected persistence capability.
//!
//! The storage schema is owned by an outer layer; the core only needs to
//! save and restore approach states and append delivery outcomes. When no
//! backend is wired in, [`NoPersistence`] degrades everything to in-memory
//! state that is lost on restart (an in-flight alert can then be lost on
//! crash; that trade-off is deliberate and documented).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::approach::{ApproachState, StateKey};
use crate::model::{IntegrationKind, TransponderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// One delivery attempt outcome, appended for the user-facing layer to surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub user_id: Uuid,
    pub transponder: TransponderId,
    pub threshold_nm: f64,
    pub integration_kind: IntegrationKind,
    pub status: DeliveryStatus,
    pub message: String,
    pub detail: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn save_approach_states(&self, states: &[(StateKey, ApproachState)]) -> Result<()>;
    async fn load_approach_states(&self) -> Result<Vec<(StateKey, ApproachState)>>;
    async fn append_notification_log(&self, entry: &NotificationLogEntry) -> Result<()>;
}

/// In-memory-only degradation: nothing survives a restart
pub struct NoPersistence;

#[async_trait]
impl StatePersistence for NoPersistence {
    async fn save_approach_states(&self, _states: &[(StateKey, ApproachState)]) -> Result<()> {
        Ok(())
    }

    async fn load_approach_states(&self) -> Result<Vec<(StateKey, ApproachState)>> {
        Ok(Vec::new())
    }

    async fn append_notification_log(&self, _entry: &NotificationLogEntry) -> Result<()> {
        Ok(())
    }
}

/// Serialized form: JSON arrays keep the map key readable
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    user_id: Uuid,
    transponder: TransponderId,
    state: ApproachState,
}

/// File-backed persistence: one JSON snapshot for approach states, one JSONL
/// append log for notification outcomes. Stands in for the excluded database
/// layer so restarts do not re-alert thresholds already fired mid-episode.
pub struct JsonFilePersistence {
    state_path: PathBuf,
    log_path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(state_path: PathBuf, log_path: PathBuf) -> Self {
        Self {
            state_path,
            log_path,
        }
    }
}

#[async_trait]
impl StatePersistence for JsonFilePersistence {
    async fn save_approach_states(&self, states: &[(StateKey, ApproachState)]) -> Result<()> {
        let persisted: Vec<PersistedState> = states
            .iter()
            .map(|((user_id, transponder), state)| PersistedState {
                user_id: *user_id,
                transponder: transponder.clone(),
                state: state.clone(),
            })
            .collect();
        let body = serde_json::to_vec_pretty(&persisted)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .with_context(|| format!("writing state snapshot to {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.state_path)
            .await
            .context("replacing state snapshot")?;
        debug!("persisted {} approach states", persisted.len());
        Ok(())
    }

    async fn load_approach_states(&self) -> Result<Vec<(StateKey, ApproachState)>> {
        let body = match tokio::fs::read(&self.state_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("reading state snapshot from {}", self.state_path.display())
                });
            }
        };
        let persisted: Vec<PersistedState> =
            serde_json::from_slice(&body).context("parsing state snapshot")?;
        Ok(persisted
            .into_iter()
            .map(|p| ((p.user_id, p.transponder), p.state))
            .collect())
    }

    async fn append_notification_log(&self, entry: &NotificationLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .with_context(|| format!("opening notification log {}", self.log_path.display()))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &line)
            .await
            .context("appending notification log entry")?;
        Ok(())
    }
}
