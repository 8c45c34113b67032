//! Webhook notification dispatch.
//!
//! Delivery is per (event, target) and isolated: one target failing never
//! affects another target for the same event. Transient failures are retried
//! with backoff; permanent failures are recorded and dropped.

use async_trait::async_trait;
use futures_util::future::join_all;
use metrics::counter;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{AlertEvent, IntegrationKind, IntegrationTarget};
use crate::persistence::{DeliveryStatus, NotificationLogEntry, StatePersistence};

/// Delivery failure classification: transient is worth retrying, permanent
/// is not (bad config, rejected payload).
#[derive(Debug, Clone)]
pub enum DeliveryError {
    Transient(String),
    Permanent(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transient(msg) => write!(f, "transient delivery failure: {}", msg),
            DeliveryError::Permanent(msg) => write!(f, "permanent delivery failure: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        kind: IntegrationKind,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

/// Real webhook transport over reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    request_timeout: std::time::Duration,
}

impl ReqwestTransport {
    pub fn new(client: Client, request_timeout: std::time::Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(
        &self,
        kind: IntegrationKind,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DeliveryError::Transient(e.to_string())
                } else if e.is_builder() {
                    // Malformed URL and friends: retrying cannot help
                    DeliveryError::Permanent(e.to_string())
                } else {
                    DeliveryError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        // Discord replies 204, Slack and Teams 200; any 2xx counts as delivered
        if status.is_success() {
            return Ok(());
        }
        let detail = format!("{} webhook returned HTTP {}", kind, status.as_u16());
        if status.as_u16() == 429 || status.is_server_error() {
            Err(DeliveryError::Transient(detail))
        } else {
            Err(DeliveryError::Permanent(detail))
        }
    }
}

/// Built-in message template; per-user overrides replace it wholesale
const DEFAULT_TEMPLATE: &str = "**{tail} - {threshold}nm out**\nETA ~{eta}min, Alt {altitude}ft";

/// Render an alert message, substituting `{tail}`, `{threshold}`,
/// `{distance}`, `{altitude}`, `{eta}` and `{time}` placeholders.
pub fn render_message(event: &AlertEvent, template: Option<&str>) -> String {
    let altitude = match event.altitude_ft {
        Some(alt) => format!("{:.0}", alt),
        None => "unknown".to_string(),
    };
    // Crude ETA at a ~90 knot approach speed, inherited behavior
    let eta_minutes = (event.distance_nm / 1.5) as i64;

    template
        .unwrap_or(DEFAULT_TEMPLATE)
        .replace("{tail}", &event.label())
        .replace("{threshold}", &format_nm(event.threshold_nm))
        .replace("{distance}", &format!("{:.1}", event.distance_nm))
        .replace("{altitude}", &altitude)
        .replace("{eta}", &eta_minutes.to_string())
        .replace("{time}", &event.timestamp.format("%H:%M").to_string())
}

fn format_nm(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Provider-specific request body around the rendered message
pub fn webhook_body(kind: IntegrationKind, message: &str) -> serde_json::Value {
    match kind {
        IntegrationKind::Discord => serde_json::json!({ "content": message }),
        IntegrationKind::Slack | IntegrationKind::Teams => {
            serde_json::json!({ "text": message })
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    persistence: Arc<dyn StatePersistence>,
    max_attempts: u32,
    backoff_base: std::time::Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn WebhookTransport>, persistence: Arc<dyn StatePersistence>) -> Self {
        Self {
            transport,
            persistence,
            max_attempts: 3,
            backoff_base: std::time::Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_base: std::time::Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_base = backoff_base;
        self
    }

    /// Deliver one alert to every enabled target, each independently.
    /// Returns the number of successful deliveries.
    pub async fn dispatch(&self, event: &AlertEvent, targets: &[IntegrationTarget]) -> usize {
        let deliveries = targets
            .iter()
            .filter(|t| t.enabled)
            .map(|target| self.deliver(event, target));
        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    async fn deliver(&self, event: &AlertEvent, target: &IntegrationTarget) -> bool {
        let message = render_message(event, target.message_template.as_deref());
        let body = webhook_body(target.kind, &message);

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self
                .transport
                .post(target.kind, &target.webhook_url, &body)
                .await
            {
                Ok(()) => break Ok(()),
                Err(DeliveryError::Transient(detail)) if attempt < self.max_attempts => {
                    warn!(
                        target_id = %target.id,
                        kind = %target.kind,
                        attempt,
                        "transient webhook failure, retrying: {}",
                        detail
                    );
                    counter!("downwind.dispatch.retries_total").increment(1);
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => break Err(e),
            }
        };

        let (delivered, detail) = match outcome {
            Ok(()) => {
                info!(
                    kind = %target.kind,
                    threshold_nm = event.threshold_nm,
                    "delivered {}nm alert for {}",
                    format_nm(event.threshold_nm),
                    event.label()
                );
                counter!("downwind.dispatch.delivered_total").increment(1);
                (true, None)
            }
            Err(e) => {
                warn!(
                    target_id = %target.id,
                    kind = %target.kind,
                    "giving up on webhook delivery: {}",
                    e
                );
                counter!("downwind.dispatch.failed_total").increment(1);
                (false, Some(e.to_string()))
            }
        };

        let entry = NotificationLogEntry {
            user_id: event.user_id,
            transponder: event.transponder.clone(),
            threshold_nm: event.threshold_nm,
            integration_kind: target.kind,
            status: if delivered {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            message,
            detail,
            sent_at: event.timestamp,
        };
        if let Err(e) = self.persistence.append_notification_log(&entry).await {
            debug!("failed to append notification log entry: {}", e);
        }

        delivered
    }

    /// Exponential backoff with a little jitter so retries don't align
    fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exp = self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1));
        exp + std::time::Duration::from_millis(rand::random::<u64>() % 100)
    }

    /// Send a connectivity-check message to a single target, bypassing retry
    pub async fn send_test_message(
        &self,
        kind: IntegrationKind,
        url: &str,
    ) -> Result<(), DeliveryError> {
        let body = webhook_body(kind, "Test notification: your downwind integration is working.");
        self.transport.post(kind, url, &body).await
    }
}
