//! CircleCI v1 "recent builds for branch" status source

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{BuildStatus, StatusSource};
use crate::app::config::{ApiConfig, PollConfig};

/// Why the latest build status could not be determined
///
/// Every variant ends up as [`BuildStatus::Error`] on the light; the
/// classification only feeds the logs.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS or body transfer failure
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Provider answered with a non-2xx status
    #[error("unexpected HTTP status: {0}")]
    HttpStatus(StatusCode),

    /// Body is not valid JSON
    #[error("invalid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// Valid JSON, but not a list of builds with a status
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl FetchError {
    /// Short classification used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Network(_) => "network",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Parse(_) => "parse",
            FetchError::Shape(_) => "shape",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            // The request URL carries the API token
            FetchError::Network(err.without_url())
        }
    }
}

/// Polls `GET /api/v1/project/{user}/{repo}/tree/{branch}`
pub struct CircleCiSource {
    client: reqwest::Client,
    endpoint: Url,
}

impl CircleCiSource {
    pub fn new(poll: &PollConfig, api: &ApiConfig) -> Result<Self> {
        let endpoint = build_endpoint(&api.base_url, poll)?;
        Self::from_parts(endpoint, Duration::from_secs(api.timeout_secs))
    }

    /// Create a source for an already-built endpoint
    pub fn from_parts(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ci-traffic-light/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, endpoint })
    }

    /// Endpoint with the token masked, for logging
    pub fn redacted_endpoint(&self) -> String {
        redact_token(&self.endpoint)
    }
}

#[async_trait]
impl StatusSource for CircleCiSource {
    async fn fetch(&self) -> Result<BuildStatus, FetchError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response.text().await?;
        parse_build_status(&body)
    }
}

/// Build the provider URL for the configured repository and branch
///
/// Path segments are percent-encoded, so a branch such as `feature/x` is sent
/// as a single segment.
pub fn build_endpoint(base_url: &str, poll: &PollConfig) -> Result<Url> {
    let mut url =
        Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API base URL cannot have a path: {}", base_url))?;
        segments.pop_if_empty().extend([
            "api",
            "v1",
            "project",
            poll.user.as_str(),
            poll.repo.as_str(),
            "tree",
            poll.branch.as_str(),
        ]);
    }
    url.query_pairs_mut().append_pair("circle-token", &poll.token);

    Ok(url)
}

/// Extract the latest build status from a recent-builds response body
///
/// A missing or null `status` on the latest build reads as Unknown; any other
/// deviation from "array whose first element is an object" is an error.
pub fn parse_build_status(body: &str) -> Result<BuildStatus, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(FetchError::Parse)?;

    let builds = value
        .as_array()
        .ok_or_else(|| FetchError::Shape(format!("expected an array, got {}", json_kind(&value))))?;
    let latest = builds
        .first()
        .ok_or_else(|| FetchError::Shape("build list is empty".to_string()))?;
    let latest = latest.as_object().ok_or_else(|| {
        FetchError::Shape(format!("expected a build object, got {}", json_kind(latest)))
    })?;

    match latest.get("status") {
        None | Some(Value::Null) => {
            debug!("Latest build has no status");
            Ok(BuildStatus::Unknown)
        }
        Some(Value::String(raw)) => {
            debug!("Latest build status: {}", raw);
            Ok(BuildStatus::from_provider(raw))
        }
        Some(other) => Err(FetchError::Shape(format!(
            "status is {}, not a string",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "circle-token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
