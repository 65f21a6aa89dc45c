//! Alert ingestion sinks

use std::time::Duration;

use async_trait::async_trait;

use crate::model::Data;

/// Alert ingestion pipeline
///
/// Sends are fire-and-forget from the caller's point of view: a failure is
/// reported but never retried.
#[async_trait]
pub trait AlertsService: Send + Sync + 'static {
    async fn send_data(&self, data: Data) -> Result<(), AlertsError>;
}

/// Alert ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum AlertsError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Alert ingestion returned status {0}")]
    Rejected(u16),

    #[error("Alert ingestion unavailable: {0}")]
    Unavailable(String),
}

/// Sink that only logs the data it receives
#[derive(Debug, Clone, Default)]
pub struct LogAlerts;

#[async_trait]
impl AlertsService for LogAlerts {
    async fn send_data(&self, data: Data) -> Result<(), AlertsError> {
        tracing::warn!(
            data_id = %data.id,
            timestamp = data.timestamp,
            value = %data.value,
            "External condition data"
        );
        Ok(())
    }
}

/// Sink posting data as JSON to an alert ingestion endpoint
///
/// The body is a JSON array holding the single datum, the shape the
/// ingestion endpoint accepts for batches.
pub struct HttpAlerts {
    client: reqwest::Client,
    url: String,
}

impl HttpAlerts {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertsError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(data: &Data) -> serde_json::Value {
        serde_json::json!([data])
    }
}

#[async_trait]
impl AlertsService for HttpAlerts {
    async fn send_data(&self, data: Data) -> Result<(), AlertsError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(&data))
            .send()
            .await
            .map_err(|e| AlertsError::Http(format!("Failed to send data: {}", e)))?;

        if !response.status().is_success() {
            return Err(AlertsError::Rejected(response.status().as_u16()));
        }

        tracing::debug!(
            data_id = %data.id,
            url = %self.url,
            "External data sent"
        );

        Ok(())
    }
}
