//! Shared fakes and builders for integration tests.
//!
//! The scheduler takes an injected clock value, a scripted position source
//! and a recording webhook transport, so approach detection and delivery can
//! be driven tick by tick without real time or network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use downwind::dispatcher::{DeliveryError, WebhookTransport};
use downwind::model::{
    AirportConfig, DEFAULT_QUERY_RADIUS_NM, DEFAULT_THRESHOLDS_NM, IntegrationKind,
    IntegrationTarget, PositionReport, QuietHours, TrackedAircraft, TrackingTarget, TransponderId,
};
use downwind::position_source::{PositionSource, PositionSourceError};
use downwind::registry::TenantRegistry;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn airport_at(latitude: f64, longitude: f64) -> AirportConfig {
    AirportConfig::new(
        latitude,
        longitude,
        1300,
        DEFAULT_THRESHOLDS_NM.to_vec(),
        DEFAULT_QUERY_RADIUS_NM,
        None,
    )
    .unwrap()
}

pub fn discord_target(url: &str) -> IntegrationTarget {
    IntegrationTarget {
        id: Uuid::new_v4(),
        kind: IntegrationKind::Discord,
        webhook_url: url.to_string(),
        enabled: true,
        message_template: None,
    }
}

pub fn tenant(
    airport: AirportConfig,
    hexes: &[&str],
    integrations: Vec<IntegrationTarget>,
) -> TrackingTarget {
    let user_id = Uuid::new_v4();
    TrackingTarget {
        user_id,
        airport,
        aircraft: hexes
            .iter()
            .map(|hex| TrackedAircraft {
                transponder: TransponderId::new(hex).unwrap(),
                tail_number: Some(format!("N-{}", hex.to_ascii_uppercase())),
                user_id,
            })
            .collect(),
        integrations,
    }
}

pub fn quiet_all_day(airport: &mut AirportConfig) {
    airport.quiet_hours = Some(QuietHours {
        start: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        end: chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    });
}

/// Position sample `distance_nm` due north of the given airport
pub fn report_north_of(
    airport: &AirportConfig,
    hex: &str,
    distance_nm: f64,
    altitude_ft: Option<f64>,
    observed_at: DateTime<Utc>,
) -> PositionReport {
    PositionReport {
        transponder: TransponderId::new(hex).unwrap(),
        latitude: airport.latitude + distance_nm / 60.0,
        longitude: airport.longitude,
        altitude_ft,
        ground_speed_kts: Some(110.0),
        on_ground: false,
        observed_at,
    }
}

/// Region key: scripted responses are matched on the query center
fn region_key(lat: f64, lon: f64) -> (i64, i64) {
    ((lat * 1000.0).round() as i64, (lon * 1000.0).round() as i64)
}

/// Scripted position feed: responses are queued per query center and popped
/// one per tick. Unscripted queries return the valid empty result.
#[derive(Default)]
pub struct ScriptedPositionSource {
    responses:
        Mutex<HashMap<(i64, i64), VecDeque<Result<Vec<PositionReport>, PositionSourceError>>>>,
    query_count: Mutex<usize>,
}

impl ScriptedPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(
        &self,
        center_lat: f64,
        center_lon: f64,
        response: Result<Vec<PositionReport>, PositionSourceError>,
    ) {
        self.responses
            .lock()
            .unwrap()
            .entry(region_key(center_lat, center_lon))
            .or_default()
            .push_back(response);
    }

    pub fn queries(&self) -> usize {
        *self.query_count.lock().unwrap()
    }
}

#[async_trait]
impl PositionSource for ScriptedPositionSource {
    async fn query_region(
        &self,
        center_lat: f64,
        center_lon: f64,
        _radius_nm: f64,
    ) -> Result<Vec<PositionReport>, PositionSourceError> {
        *self.query_count.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .get_mut(&region_key(center_lat, center_lon))
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Registry whose target list can be swapped between refreshes, with an
/// optional one-shot scripted failure
pub struct SwappableRegistry {
    targets: Mutex<Vec<TrackingTarget>>,
    fail_next: Mutex<bool>,
}

impl SwappableRegistry {
    pub fn new(targets: Vec<TrackingTarget>) -> Self {
        Self {
            targets: Mutex::new(targets),
            fail_next: Mutex::new(false),
        }
    }

    pub fn set(&self, targets: Vec<TrackingTarget>) {
        *self.targets.lock().unwrap() = targets;
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl TenantRegistry for SwappableRegistry {
    async fn list_active_targets(&self) -> anyhow::Result<Vec<TrackingTarget>> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            anyhow::bail!("registry unavailable");
        }
        Ok(self.targets.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub kind: IntegrationKind,
    pub url: String,
    pub body: serde_json::Value,
}

enum FailurePlan {
    Permanent,
    Transient,
    TransientTimes(u32),
}

/// Recording webhook transport with per-URL scripted failures
#[derive(Default)]
pub struct FakeTransport {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    attempts: Mutex<HashMap<String, u32>>,
    failures: Mutex<HashMap<String, FailurePlan>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_permanent(&self, url: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), FailurePlan::Permanent);
    }

    pub fn fail_transient(&self, url: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), FailurePlan::Transient);
    }

    /// Fail with a transient error for the first `times` attempts, then accept
    pub fn fail_transient_times(&self, url: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), FailurePlan::TransientTimes(times));
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, url: &str) -> u32 {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Message texts actually delivered, in order
    pub fn delivered_messages(&self) -> Vec<String> {
        self.deliveries()
            .iter()
            .map(|d| {
                d.body
                    .get("content")
                    .or_else(|| d.body.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for FakeTransport {
    async fn post(
        &self,
        kind: IntegrationKind,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let failures = self.failures.lock().unwrap();
        match failures.get(url) {
            Some(FailurePlan::Permanent) => {
                return Err(DeliveryError::Permanent("scripted 404".to_string()));
            }
            Some(FailurePlan::Transient) => {
                return Err(DeliveryError::Transient("scripted 503".to_string()));
            }
            Some(FailurePlan::TransientTimes(times)) if attempt <= *times => {
                return Err(DeliveryError::Transient("scripted 503".to_string()));
            }
            _ => {}
        }
        drop(failures);

        self.deliveries.lock().unwrap().push(RecordedDelivery {
            kind,
            url: url.to_string(),
            body: body.clone(),
        });
        Ok(())
    }
}
