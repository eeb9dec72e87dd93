//! HTTP client for the telemetry collector.
//!
//! The collector accepts a channel update as query parameters: the write key
//! as `api_key` plus `field1..field6`. A successful update answers 200 with
//! the new entry id; a body of `0` means the update was not stored.

use super::{MetricsSink, TelemetryError, TelemetryReport};
use reqwest::StatusCode;
use std::time::Duration;

/// Async collector client.
pub struct CollectorClient {
    url: String,
    write_key: String,
    client: reqwest::Client,
}

impl CollectorClient {
    /// Create a new collector client.
    pub fn new(
        url: impl Into<String>,
        write_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Client(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            write_key: write_key.into(),
            client,
        })
    }

    /// Submit one report.
    pub async fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        let mut query = vec![("api_key", self.write_key.clone())];
        query.extend(report.fields());

        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(TelemetryError::Server {
                status: status.as_u16(),
                message: body,
            });
        }

        if body.trim() == "0" {
            return Err(TelemetryError::Rejected);
        }

        Ok(())
    }

    /// Get the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Blocking collector client for use in the synchronous ingestion loop.
pub struct BlockingCollectorClient {
    inner: CollectorClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingCollectorClient {
    /// Create a new blocking collector client.
    pub fn new(
        url: impl Into<String>,
        write_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TelemetryError::Client(format!("failed to create runtime: {e}")))?;

        Ok(Self {
            inner: CollectorClient::new(url, write_key, timeout)?,
            runtime,
        })
    }

    /// Get the endpoint URL.
    pub fn url(&self) -> &str {
        self.inner.url()
    }
}

impl MetricsSink for BlockingCollectorClient {
    fn submit(&self, report: &TelemetryReport) -> Result<(), TelemetryError> {
        self.runtime.block_on(self.inner.submit(report))
    }
}
