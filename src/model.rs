//! Core domain types shared across the tracker, scheduler and dispatcher.

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::geo;

/// ICAO24-style transponder address: exactly 6 hex characters, normalized to
/// lowercase so feed matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransponderId(String);

impl TransponderId {
    pub fn new(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.len() != 6 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid transponder identifier {:?}: expected 6 hex characters", raw);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TransponderId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for TransponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An aircraft a user has asked to track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAircraft {
    pub transponder: TransponderId,
    /// Optional human-friendly label (tail number). Mutable, unlike identity.
    pub tail_number: Option<String>,
    pub user_id: Uuid,
}

impl TrackedAircraft {
    /// Display label for messages and logs: tail number if set, otherwise the
    /// transponder address uppercased.
    pub fn label(&self) -> String {
        match &self.tail_number {
            Some(tail) => tail.clone(),
            None => self.transponder.as_str().to_ascii_uppercase(),
        }
    }
}

/// A daily window (UTC) during which notifications are suppressed.
/// Detection still runs so state stays coherent across the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Whether `at` falls inside the window. Handles windows that wrap
    /// midnight (e.g. 23:00-06:00).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Reference airport plus the ordered alert thresholds around it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirportConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_ft: i32,
    /// Alert distances in nautical miles, strictly descending, all positive
    pub thresholds_nm: Vec<f64>,
    /// Radius for feed queries around the reference point
    pub query_radius_nm: f64,
    pub quiet_hours: Option<QuietHours>,
}

/// Default alert bands: 10, 5 and 2 nautical miles out
pub const DEFAULT_THRESHOLDS_NM: [f64; 3] = [10.0, 5.0, 2.0];

/// Default feed query radius around an airport
pub const DEFAULT_QUERY_RADIUS_NM: f64 = 100.0;

impl AirportConfig {
    pub fn new(
        latitude: f64,
        longitude: f64,
        elevation_ft: i32,
        thresholds_nm: Vec<f64>,
        query_radius_nm: f64,
        quiet_hours: Option<QuietHours>,
    ) -> Result<Self> {
        if !geo::valid_coordinates(latitude, longitude) {
            bail!("airport reference point out of range: ({}, {})", latitude, longitude);
        }
        if query_radius_nm <= 0.0 {
            bail!("query radius must be positive, got {}", query_radius_nm);
        }
        for pair in thresholds_nm.windows(2) {
            if pair[1] >= pair[0] {
                bail!("thresholds must be strictly descending: {:?}", thresholds_nm);
            }
        }
        if thresholds_nm.iter().any(|t| *t <= 0.0) {
            bail!("thresholds must be positive: {:?}", thresholds_nm);
        }
        Ok(Self {
            latitude,
            longitude,
            elevation_ft,
            thresholds_nm,
            query_radius_nm,
            quiet_hours,
        })
    }
}

/// One position sample from the feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionReport {
    pub transponder: TransponderId,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: Option<f64>,
    pub ground_speed_kts: Option<f64>,
    pub on_ground: bool,
    pub observed_at: DateTime<Utc>,
}

/// Supported outbound webhook providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Discord,
    Slack,
    Teams,
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationKind::Discord => write!(f, "discord"),
            IntegrationKind::Slack => write!(f, "slack"),
            IntegrationKind::Teams => write!(f, "teams"),
        }
    }
}

impl FromStr for IntegrationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "discord" => Ok(IntegrationKind::Discord),
            "slack" => Ok(IntegrationKind::Slack),
            "teams" => Ok(IntegrationKind::Teams),
            other => bail!("unknown integration kind {:?}", other),
        }
    }
}

/// A user's outbound webhook endpoint. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTarget {
    pub id: Uuid,
    pub kind: IntegrationKind,
    pub webhook_url: String,
    pub enabled: bool,
    /// Per-user override for the rendered message; see dispatcher placeholders
    pub message_template: Option<String>,
}

/// One threshold crossing, ready for delivery. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub user_id: Uuid,
    pub transponder: TransponderId,
    pub tail_number: Option<String>,
    pub threshold_nm: f64,
    pub distance_nm: f64,
    pub altitude_ft: Option<f64>,
    pub episode_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn label(&self) -> String {
        match &self.tail_number {
            Some(tail) => tail.clone(),
            None => self.transponder.as_str().to_ascii_uppercase(),
        }
    }
}

/// Everything the scheduler needs to track one tenant: the user's airport,
/// their aircraft, and where to deliver alerts.
#[derive(Debug, Clone)]
pub struct TrackingTarget {
    pub user_id: Uuid,
    pub airport: AirportConfig,
    pub aircraft: Vec<TrackedAircraft>,
    pub integrations: Vec<IntegrationTarget>,
}
