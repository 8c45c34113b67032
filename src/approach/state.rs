use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutable per-(user, aircraft) tracking state.
///
/// An episode is one continuous approach attempt. Thresholds already alerted
/// for the current episode live in `crossed`; they can never fire again until
/// a new episode id is assigned (silence window or climb-away reset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproachState {
    pub episode_id: Uuid,
    /// Thresholds already alerted this episode, subset of the configured list
    pub crossed: Vec<f64>,
    pub last_distance_nm: Option<f64>,
    pub last_altitude_ft: Option<f64>,
    /// Feed timestamp of the newest accepted sample, used for ordering and
    /// the silence window
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the last state touch, used for idle eviction
    pub updated_at: DateTime<Utc>,
    /// Consecutive samples with both altitude and distance increasing,
    /// feeding the go-around heuristic
    pub climb_away_streak: u8,
}

/// Tolerance for matching a crossed threshold back to the configured list
const THRESHOLD_EPSILON: f64 = 1e-6;

impl ApproachState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            episode_id: Uuid::new_v4(),
            crossed: Vec::new(),
            last_distance_nm: None,
            last_altitude_ft: None,
            last_seen_at: None,
            updated_at: now,
            climb_away_streak: 0,
        }
    }

    /// Start a fresh episode: new id, cleared crossing set.
    ///
    /// The last known distance is dropped so the first sample of the new
    /// episode is treated as arriving from beyond all thresholds. The last
    /// known altitude is kept as the descent baseline, so a single
    /// reappearing sample that is clearly lower still alerts.
    pub fn begin_episode(&mut self) {
        self.episode_id = Uuid::new_v4();
        self.crossed.clear();
        self.last_distance_nm = None;
        self.climb_away_streak = 0;
    }

    pub fn has_crossed(&self, threshold_nm: f64) -> bool {
        self.crossed
            .iter()
            .any(|t| (t - threshold_nm).abs() < THRESHOLD_EPSILON)
    }

    pub fn mark_crossed(&mut self, threshold_nm: f64) {
        if !self.has_crossed(threshold_nm) {
            self.crossed.push(threshold_nm);
        }
    }
}
