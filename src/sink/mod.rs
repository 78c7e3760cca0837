//! Record sinks
//!
//! A sink is anywhere serial readings can be shipped. The contract is small:
//! construct from the environment, prove liveness before first use, accept
//! batches, release resources on shutdown. Batching discipline is each
//! sink's own concern; workers hand over all records of one pod at a time.

pub mod http;
pub mod postgres;
pub mod s3;
pub mod stdout;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use tracing::debug;

use crate::error::Error;
use crate::record::SerialReading;

/// The sink contract every backend satisfies
#[async_trait]
pub trait Sink: Send + Sync {
    /// Ship a batch of records; must be safe to call concurrently and to
    /// cancel (dropping the future aborts the attempt)
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error>;

    /// Cheap liveness probe, used at startup and on demand
    async fn health(&self) -> Result<(), Error>;

    /// Release held resources
    async fn close(&self) -> Result<(), Error>;
}

/// Selectable sink kinds
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    /// Pretty JSON records to standard output
    Stdout,
    /// JSON batches POSTed to an HTTP endpoint
    Http,
    /// Rows inserted into a PostgreSQL table
    Postgres,
    /// CSV objects uploaded to an S3 bucket
    S3,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::Stdout => "stdout",
            SinkKind::Http => "http",
            SinkKind::Postgres => "postgres",
            SinkKind::S3 => "s3",
        };
        f.write_str(name)
    }
}

/// Advisory batching hints applied when a sink's own config is silent
#[derive(Debug, Clone, Copy)]
pub struct SinkSettings {
    /// Preferred records per batch
    pub batch_size: usize,
    /// Preferred retry attempts on a failed batch
    pub retry_count: u32,
    /// Preferred per-operation timeout
    pub timeout: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_count: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Construct the sink for `kind` from the environment.
///
/// The sink's health check runs before this returns; a sink that cannot
/// prove liveness fails startup rather than dropping records later.
pub async fn open(kind: SinkKind) -> Result<Box<dyn Sink>, Error> {
    let settings = SinkSettings::default();
    debug!(
        kind = %kind,
        batch_size = settings.batch_size,
        retry_count = settings.retry_count,
        timeout_secs = settings.timeout.as_secs(),
        "initializing sink"
    );

    let sink: Box<dyn Sink> = match kind {
        SinkKind::Stdout => Box::new(stdout::StdoutSink::new()),
        SinkKind::Http => Box::new(http::HttpSink::from_env(&settings)?),
        SinkKind::Postgres => Box::new(postgres::PostgresSink::from_env().await?),
        SinkKind::S3 => Box::new(s3::S3Sink::from_env().await?),
    };

    sink.health()
        .await
        .map_err(|e| Error::sink(format!("{kind} sink failed its startup health check: {e}")))?;

    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_env_values() {
        assert_eq!(SinkKind::Stdout.to_string(), "stdout");
        assert_eq!(SinkKind::Http.to_string(), "http");
        assert_eq!(SinkKind::Postgres.to_string(), "postgres");
        assert_eq!(SinkKind::S3.to_string(), "s3");
    }

    #[test]
    fn default_settings_match_contract() {
        let s = SinkSettings::default();
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.retry_count, 2);
        assert_eq!(s.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn stdout_sink_opens_without_env() {
        let sink = open(SinkKind::Stdout).await.unwrap();
        sink.close().await.unwrap();
    }
}
