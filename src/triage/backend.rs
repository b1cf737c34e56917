//! Search backend access: index bootstrap and live document counts.

use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::BackendSettings;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unable to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Outcome of making sure the target index exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Existing,
    Created,
    /// The backend refused creation; carries its reason.
    Rejected(String),
}

/// The count contract the reconciler depends on.
pub trait CountBackend {
    /// Creates `index` with the fixed settings unless it already exists.
    fn ensure_index(&self, index: &str) -> BackendResult<IndexStatus>;

    /// Live document count of `index`; a missing index counts as zero.
    fn count(&self, index: &str) -> BackendResult<u64>;
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Elasticsearch over blocking HTTP.
#[derive(Debug, Clone)]
pub struct ElasticBackend {
    client: Client,
    base_url: String,
    retry_attempts: usize,
    retry_backoff_ms: u64,
    total_fields_limit: u64,
}

impl ElasticBackend {
    pub fn new(url: &str, settings: &BackendSettings) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(BackendError::Client)?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            retry_attempts: settings.retry_attempts.max(1),
            retry_backoff_ms: settings.retry_backoff_ms,
            total_fields_limit: settings.total_fields_limit,
        })
    }

    fn endpoint(&self, parts: &[&str]) -> String {
        format!("{}/{}", self.base_url, parts.join("/"))
    }

    /// Exponential backoff, `base * 2^(attempt-1)`, capped at 60 seconds.
    fn calculate_backoff(attempt: usize, base_delay_ms: u64) -> u64 {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let max_delay = 60_000;
        std::cmp::min((1u64 << exponent).saturating_mul(base_delay_ms), max_delay)
    }

    /// Sends a request built by `send`, retrying transport failures and 5xx answers.
    fn send_with_retry<F>(&self, url: &str, send: F) -> BackendResult<Response>
    where
        F: Fn() -> reqwest::Result<Response>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > 1 {
                info!("Retry attempt {}/{} for {}", attempts, self.retry_attempts, url);
            }

            match send() {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    warn!("{} answered with status {}", url, status);
                    if attempts >= self.retry_attempts {
                        let body = response.text().unwrap_or_default();
                        return Err(BackendError::Status {
                            url: url.to_string(),
                            status,
                            body,
                        });
                    }
                }
                Ok(response) => return Ok(response),
                Err(source) => {
                    warn!("Request error: {}", source);
                    if attempts >= self.retry_attempts {
                        return Err(BackendError::Request {
                            url: url.to_string(),
                            source,
                        });
                    }
                }
            }

            let backoff = Self::calculate_backoff(attempts, self.retry_backoff_ms);
            info!("Backing off for {}ms before retry", backoff);
            sleep(Duration::from_millis(backoff));
        }
    }

    fn read_body(url: &str, response: Response) -> BackendResult<String> {
        response.text().map_err(|source| BackendError::Request {
            url: url.to_string(),
            source,
        })
    }
}

impl CountBackend for ElasticBackend {
    fn ensure_index(&self, index: &str) -> BackendResult<IndexStatus> {
        info!("Creating index: {}", index);
        let url = self.endpoint(&[index]);

        let exists = self.send_with_retry(&url, || self.client.head(&url).send())?;
        if exists.status().is_success() {
            info!("Index already exists, proceeding to upload logs...");
            return Ok(IndexStatus::Existing);
        }
        if exists.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::Status {
                url,
                status: exists.status().as_u16(),
                body: String::new(),
            });
        }

        let settings = json!({
            "settings": {
                "index.mapping.total_fields.limit": self.total_fields_limit,
            }
        });
        let response = self.send_with_retry(&url, || self.client.put(&url).json(&settings).send())?;
        let body = Self::read_body(&url, response)?;
        let value: Value = serde_json::from_str(&body).map_err(|source| BackendError::Decode {
            url: url.clone(),
            source,
        })?;

        if value.get("acknowledged").and_then(Value::as_bool) == Some(true) {
            info!("Index mapping success for index: {}", index);
            return Ok(IndexStatus::Created);
        }

        let error = value.get("error").cloned().unwrap_or(Value::Null);
        let error_type = error.get("type").and_then(Value::as_str).unwrap_or_default();
        if error_type == "resource_already_exists_exception" {
            info!("Index {} was created concurrently, proceeding", index);
            return Ok(IndexStatus::Existing);
        }

        let reason = match error.get("root_cause") {
            Some(root_cause) => format!("{} ({})", root_cause, error_type),
            None => body,
        };
        Ok(IndexStatus::Rejected(reason))
    }

    fn count(&self, index: &str) -> BackendResult<u64> {
        let url = self.endpoint(&[index, "_count"]);
        let response = self.send_with_retry(&url, || self.client.get(&url).send())?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Index {} does not exist yet, counting 0 documents", index);
            return Ok(0);
        }

        let body = Self::read_body(&url, response)?;
        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CountResponse = serde_json::from_str(&body)
            .map_err(|source| BackendError::Decode { url, source })?;
        Ok(parsed.count)
    }
}
