use crate::alerts::{Alert, AlertLevel};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert dispatch failed: {0}")]
    Dispatch(String),
    #[error("alert webhook returned HTTP {status}")]
    WebhookStatus { status: u16 },
}

/// Destination for fired alerts. Failures are logged by the manager and never
/// propagate further.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the tracing subscriber at a matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertHandler;

#[async_trait]
impl AlertHandler for LogAlertHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), AlertError> {
        let alert_type = alert.alert_type.as_str();
        match alert.level {
            AlertLevel::Info => info!(
                alert_type,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            AlertLevel::Warning => warn!(
                alert_type,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            AlertLevel::Error | AlertLevel::Critical => error!(
                alert_type,
                level = alert.level.as_str(),
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs each alert as JSON to a fixed URL.
pub struct WebhookAlertHandler {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertHandler {
    pub fn new(url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AlertError::Dispatch(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertHandler for WebhookAlertHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| AlertError::Dispatch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::WebhookStatus {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
