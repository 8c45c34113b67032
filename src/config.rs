//! Service configuration: TOML file plus a few environment overrides.
//!
//! Cadences and detection margins are all tunable here; the defaults match
//! the documented behavior (10 s polling, 60 s registry refresh, 5 min
//! silence window, 24 h idle eviction).

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::approach::DetectorConfig;
use crate::model::{
    AirportConfig, DEFAULT_QUERY_RADIUS_NM, DEFAULT_THRESHOLDS_NM, IntegrationKind,
    IntegrationTarget, QuietHours, TrackedAircraft, TrackingTarget, TransponderId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_secs: u64,
    pub registry_refresh_secs: u64,
    pub position_query_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    pub silence_window_secs: i64,
    pub idle_eviction_hours: i64,
    pub climb_away_margin_nm: f64,
    pub descent_noise_ft: f64,
    pub position_source_url: String,
    /// Approach-state snapshot path; unset means in-memory only
    pub state_file: Option<PathBuf>,
    /// Notification outcome log (JSONL); unset means in-memory only
    pub notification_log: Option<PathBuf>,
    pub tenants: Vec<TenantConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            registry_refresh_secs: 60,
            position_query_timeout_secs: 10,
            delivery_timeout_secs: 5,
            silence_window_secs: 300,
            idle_eviction_hours: 24,
            climb_away_margin_nm: 1.0,
            descent_noise_ft: 50.0,
            position_source_url: "https://api.adsb.lol".to_string(),
            state_file: None,
            notification_log: None,
            tenants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Stable id for the tenant; generated at load when omitted
    pub user_id: Option<Uuid>,
    pub airport: AirportTomlConfig,
    #[serde(default)]
    pub aircraft: Vec<AircraftTomlConfig>,
    #[serde(default)]
    pub integrations: Vec<IntegrationTomlConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirportTomlConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation_ft: i32,
    pub thresholds_nm: Option<Vec<f64>>,
    pub query_radius_nm: Option<f64>,
    /// Quiet window in UTC, "HH:MM" strings
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftTomlConfig {
    pub transponder: String,
    pub tail_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTomlConfig {
    pub kind: IntegrationKind,
    pub webhook_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub message_template: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&body)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DOWNWIND_POSITION_SOURCE_URL") {
            self.position_source_url = url;
        }
        if let Ok(secs) = std::env::var("DOWNWIND_POLL_INTERVAL_SECS")
            && let Ok(parsed) = secs.parse()
        {
            self.poll_interval_secs = parsed;
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            silence_window: chrono::Duration::seconds(self.silence_window_secs),
            climb_away_margin_nm: self.climb_away_margin_nm,
            descent_noise_ft: self.descent_noise_ft,
            ..DetectorConfig::default()
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn registry_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.registry_refresh_secs.max(1))
    }

    pub fn position_query_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.position_query_timeout_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delivery_timeout_secs.max(1))
    }

    pub fn idle_eviction(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idle_eviction_hours.max(1))
    }

    /// Validate and convert configured tenants into tracking targets
    pub fn tracking_targets(&self) -> Result<Vec<TrackingTarget>> {
        self.tenants.iter().map(tenant_to_target).collect()
    }
}

fn tenant_to_target(tenant: &TenantConfig) -> Result<TrackingTarget> {
    let user_id = tenant.user_id.unwrap_or_else(Uuid::new_v4);

    let quiet_hours = match (&tenant.airport.quiet_hours_start, &tenant.airport.quiet_hours_end) {
        (Some(start), Some(end)) => Some(QuietHours {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        }),
        (None, None) => None,
        _ => bail!("quiet_hours_start and quiet_hours_end must be set together"),
    };

    let airport = AirportConfig::new(
        tenant.airport.latitude,
        tenant.airport.longitude,
        tenant.airport.elevation_ft,
        tenant
            .airport
            .thresholds_nm
            .clone()
            .unwrap_or_else(|| DEFAULT_THRESHOLDS_NM.to_vec()),
        tenant.airport.query_radius_nm.unwrap_or(DEFAULT_QUERY_RADIUS_NM),
        quiet_hours,
    )?;

    let aircraft = tenant
        .aircraft
        .iter()
        .map(|a| {
            Ok(TrackedAircraft {
                transponder: TransponderId::new(&a.transponder)?,
                tail_number: a.tail_number.clone(),
                user_id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let integrations = tenant
        .integrations
        .iter()
        .map(|i| IntegrationTarget {
            id: Uuid::new_v4(),
            kind: i.kind,
            webhook_url: i.webhook_url.clone(),
            enabled: i.enabled,
            message_template: i.message_template.clone(),
        })
        .collect();

    Ok(TrackingTarget {
        user_id,
        airport,
        aircraft,
        integrations,
    })
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("invalid quiet-hours time {:?}, expected HH:MM", value))
}
