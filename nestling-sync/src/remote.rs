//! Backend collaborator client
//!
//! Thin reqwest wrapper around the three REST collaborators the core
//! consumes. Response shapes are normalized to the canonical model
//! here; neither snake_case nor camelCase leaks past this module.

use std::time::Duration;

use tracing::{debug, info};

use nestling_common::error::{Error, Result};
use nestling_common::model::{
    DevelopmentSnapshot, DevelopmentWire, PregnancyRecord, PregnancyWire, StageUpdate,
    StageUpdateWire,
};
use nestling_common::stage::StageDescriptor;

/// HTTP client for the pregnancy backend
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_ms,
        })
    }

    /// Combined authoritative stage update.
    ///
    /// Preferred over separate calls so the coordinator can write the
    /// record and its development snapshot in one synchronous step.
    pub async fn update_stage(&self, stage: &StageDescriptor) -> Result<StageUpdate> {
        let url = format!("{}/stage-update-with-development", self.base_url);
        debug!(url = %url, stage_type = %stage.stage_type, "Posting stage update");

        let response = self
            .http_client
            .post(&url)
            .json(stage)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let wire: StageUpdateWire = Self::decode(response).await?;
        let update: StageUpdate = wire.into();
        info!(
            week = update.pregnancy.current_week,
            has_development = update.development.is_some(),
            "Stage update confirmed by server"
        );
        Ok(update)
    }

    /// Read-only pregnancy fetch. A 404 maps to the default record
    /// (week 1) per the collaborator contract.
    pub async fn fetch_pregnancy(&self) -> Result<PregnancyRecord> {
        let url = format!("{}/pregnancy", self.base_url);
        debug!(url = %url, "Fetching pregnancy record");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(PregnancyRecord::default_record());
        }

        let wire: PregnancyWire = Self::decode(response).await?;
        Ok(wire.into())
    }

    /// Development content for a week, in the requested language
    pub async fn fetch_development(&self, week: u8, language: &str) -> Result<DevelopmentSnapshot> {
        let url = format!("{}/baby-development/{week}", self.base_url);
        debug!(url = %url, language, "Fetching development snapshot");

        let response = self
            .http_client
            .get(&url)
            .query(&[("lang", language)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let wire: DevelopmentWire = Self::decode(response).await?;
        Ok(wire.into())
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout_ms)
        } else {
            Error::Network(e.to_string())
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("undecodable response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ApiClient::new("http://127.0.0.1:9/api/", 1_000);
        assert!(client.is_ok());
        // Trailing slash trimmed so joined paths stay clean
        assert_eq!(client.unwrap().base_url, "http://127.0.0.1:9/api");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_recoverable_error() {
        // Port 9 (discard) is not listening; connection is refused fast
        let client = ApiClient::new("http://127.0.0.1:9/api", 1_000).unwrap();
        let err = client.fetch_pregnancy().await.unwrap_err();
        assert!(err.is_recoverable(), "got {err}");
    }
}
