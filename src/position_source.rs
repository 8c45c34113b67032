//! Position feed adapter.
//!
//! Pure I/O boundary: fetch current position reports for aircraft within a
//! radius of a reference point. Transport failures are distinct from the
//! perfectly valid "no aircraft in the region" result.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, trace};

use crate::model::{PositionReport, TransponderId};

/// Why a region query failed. Empty results are `Ok(vec![])`, never an error.
#[derive(Debug)]
pub enum PositionSourceError {
    Timeout,
    Http { status: u16 },
    Transport(String),
    Decode(String),
}

impl fmt::Display for PositionSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSourceError::Timeout => write!(f, "position query timed out"),
            PositionSourceError::Http { status } => {
                write!(f, "position feed returned HTTP {}", status)
            }
            PositionSourceError::Transport(msg) => write!(f, "transport error: {}", msg),
            PositionSourceError::Decode(msg) => write!(f, "malformed feed response: {}", msg),
        }
    }
}

impl std::error::Error for PositionSourceError {}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Fetch all current position reports within `radius_nm` of the center
    async fn query_region(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_nm: f64,
    ) -> Result<Vec<PositionReport>, PositionSourceError>;
}

/// Client for adsb.lol-style regional query APIs
/// (`GET /v2/lat/{lat}/lon/{lon}/dist/{radius}`)
#[derive(Clone)]
pub struct AdsbLolClient {
    client: Client,
    base_url: String,
    request_timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct RegionResponse {
    #[serde(default)]
    ac: Vec<RawAircraft>,
    /// Server clock in epoch milliseconds, used to date the samples
    #[serde(default)]
    now: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawAircraft {
    hex: String,
    lat: Option<f64>,
    lon: Option<f64>,
    /// Number of feet, or the literal string "ground"
    alt_baro: Option<serde_json::Value>,
    gs: Option<f64>,
    /// Seconds since the position was last updated
    seen_pos: Option<f64>,
}

impl AdsbLolClient {
    pub fn new(client: Client, base_url: String, request_timeout: std::time::Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    fn convert(raw: RawAircraft, feed_time: DateTime<Utc>) -> Option<PositionReport> {
        let transponder = TransponderId::new(&raw.hex).ok()?;
        let (latitude, longitude) = match (raw.lat, raw.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return None,
        };

        let (altitude_ft, on_ground) = match raw.alt_baro {
            Some(serde_json::Value::Number(n)) => (n.as_f64(), false),
            Some(serde_json::Value::String(s)) if s == "ground" => (None, true),
            _ => (None, false),
        };

        // Date the sample by how stale the feed says the position is
        let observed_at = match raw.seen_pos {
            Some(age_secs) if age_secs.is_finite() && age_secs >= 0.0 => {
                feed_time - Duration::milliseconds((age_secs * 1000.0) as i64)
            }
            _ => feed_time,
        };

        Some(PositionReport {
            transponder,
            latitude,
            longitude,
            altitude_ft,
            ground_speed_kts: raw.gs,
            on_ground,
            observed_at,
        })
    }
}

#[async_trait]
impl PositionSource for AdsbLolClient {
    async fn query_region(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_nm: f64,
    ) -> Result<Vec<PositionReport>, PositionSourceError> {
        let url = format!(
            "{}/v2/lat/{}/lon/{}/dist/{}",
            self.base_url, center_lat, center_lon, radius_nm
        );
        trace!("querying position feed: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PositionSourceError::Timeout
                } else {
                    PositionSourceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PositionSourceError::Http {
                status: status.as_u16(),
            });
        }

        let body: RegionResponse = response
            .json()
            .await
            .map_err(|e| PositionSourceError::Decode(e.to_string()))?;

        let feed_time = body
            .now
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .unwrap_or_else(Utc::now);

        let reports: Vec<PositionReport> = body
            .ac
            .into_iter()
            .filter_map(|raw| Self::convert(raw, feed_time))
            .collect();

        debug!(
            "position feed returned {} reports within {:.0} nm of ({:.4}, {:.4})",
            reports.len(),
            radius_nm,
            center_lat,
            center_lon
        );
        Ok(reports)
    }
}
