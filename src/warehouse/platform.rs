use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::collections::BTreeMap;

use super::DatasetMetadata;
use crate::error::ConnectorError;
use crate::observe::{HttpEvent, RunLog};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    AlreadyPublished,
    NotFound,
    Failed(u16),
    Skipped,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    id: String,
    title: &'a str,
    description: &'a str,
    columns: &'a BTreeMap<String, String>,
}

/// Announces published tables to the platform API.
#[derive(Debug)]
pub struct PlatformClient {
    client: Client,
    api_url: String,
    api_key: String,
    connector: String,
    log: RunLog,
}

impl PlatformClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        connector: &str,
        log: RunLog,
    ) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .map_err(|err| ConnectorError::Http(err.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            connector: connector.to_string(),
            log,
        })
    }

    pub fn table_id(&self, dataset: &str) -> String {
        format!("subsets.{}_{dataset}", self.connector)
    }

    pub fn publish(
        &self,
        dataset: &str,
        metadata: &DatasetMetadata,
    ) -> Result<PublishOutcome, ConnectorError> {
        if self.api_key.is_empty() {
            tracing::warn!(dataset, "SUBSETS_API_KEY not set, skipping publish");
            return Ok(PublishOutcome::Skipped);
        }
        let table_id = self.table_id(dataset);
        let title = if metadata.title.is_empty() {
            table_id.as_str()
        } else {
            metadata.title.as_str()
        };
        let request = PublishRequest {
            id: table_id.clone(),
            title,
            description: &metadata.description,
            columns: &metadata.column_descriptions,
        };
        let url = format!("{}/datasets/publish", self.api_url);

        let started = Instant::now();
        let result = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send();
        let duration_ms = started.elapsed().as_millis() as u64;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                self.log.log_http_request(&HttpEvent {
                    method: "POST",
                    url: &url,
                    status: None,
                    duration_ms,
                    cached: false,
                    error: Some(&message),
                });
                return Err(ConnectorError::Http(message));
            }
        };
        let status = response.status();
        self.log.log_http_request(&HttpEvent {
            method: "POST",
            url: &url,
            status: Some(status.as_u16()),
            duration_ms,
            cached: false,
            error: None,
        });

        let outcome = match status {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().unwrap_or_default();
                tracing::info!(
                    table = %table_id,
                    status = %body.get("status").and_then(|v| v.as_str()).unwrap_or("unknown"),
                    published_at = %body.get("published_at").and_then(|v| v.as_str()).unwrap_or(""),
                    "dataset published"
                );
                PublishOutcome::Published
            }
            StatusCode::CONFLICT => {
                tracing::info!(table = %table_id, "dataset already published");
                PublishOutcome::AlreadyPublished
            }
            StatusCode::NOT_FOUND => {
                tracing::error!(table = %table_id, "dataset not found in catalog, upload it before publishing");
                PublishOutcome::NotFound
            }
            other => {
                let text = response.text().unwrap_or_default();
                tracing::error!(table = %table_id, status = other.as_u16(), body = %text, "failed to publish dataset");
                PublishOutcome::Failed(other.as_u16())
            }
        };
        Ok(outcome)
    }
}
