//! HTTP sink
//!
//! POSTs each batch as a JSON array to a single endpoint. The receiver gets
//! the batch size in `X-Records-Count` without parsing the body; an optional
//! bearer token covers authenticated endpoints. Liveness is a HEAD request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::error::Error;
use crate::record::SerialReading;
use crate::sink::{Sink, SinkSettings};

/// Environment variables consumed by this sink
const ENV_ENDPOINT: &str = "HTTP_ENDPOINT";
const ENV_TIMEOUT: &str = "HTTP_TIMEOUT";
const ENV_AUTH_TOKEN: &str = "HTTP_AUTH_TOKEN";

const USER_AGENT: &str = concat!("gpuscout-http-sink/", env!("CARGO_PKG_VERSION"));

/// Sink POSTing JSON batches to an HTTP endpoint
pub struct HttpSink {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpSink {
    /// Build the sink from `HTTP_ENDPOINT`, `HTTP_TIMEOUT` and
    /// `HTTP_AUTH_TOKEN`; the advisory timeout applies when the env is silent.
    pub fn from_env(settings: &SinkSettings) -> Result<Self, Error> {
        let endpoint = std::env::var(ENV_ENDPOINT).unwrap_or_default();
        let timeout = std::env::var(ENV_TIMEOUT)
            .ok()
            .and_then(|v| humantime::parse_duration(&v).ok())
            .unwrap_or(settings.timeout);
        let auth_token = std::env::var(ENV_AUTH_TOKEN).ok().filter(|t| !t.is_empty());

        Self::new(endpoint, auth_token, timeout)
    }

    fn new(endpoint: String, auth_token: Option<String>, timeout: Duration) -> Result<Self, Error> {
        validate_endpoint(&endpoint)?;
        if timeout.is_zero() {
            return Err(Error::config("HTTP timeout must be positive"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::sink(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            auth_token,
            client,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), Error> {
    if endpoint.trim().is_empty() {
        return Err(Error::config(format!(
            "HTTP endpoint URL is required (set {ENV_ENDPOINT})"
        )));
    }
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(Error::config(
            "HTTP endpoint must be a valid HTTP/HTTPS URL",
        ));
    }
    Ok(())
}

#[async_trait]
impl Sink for HttpSink {
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .authorized(self.client.post(&self.endpoint))
            .header("X-Records-Count", records.len().to_string())
            .header(
                "X-Timestamp",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .json(records)
            .send()
            .await
            .map_err(|e| Error::transport(format!("failed to send HTTP request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::sink(format!(
                "HTTP request failed with status {status}"
            )));
        }

        info!(
            endpoint = %self.endpoint,
            records = records.len(),
            status = status.as_u16(),
            "export completed"
        );
        Ok(())
    }

    async fn health(&self) -> Result<(), Error> {
        let response = self
            .authorized(self.client.head(&self.endpoint))
            .send()
            .await
            .map_err(|e| Error::transport(format!("health check request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::sink(format!(
                "health check failed with status {status}"
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        // reqwest pools close when the client drops.
        Ok(())
    }
}
