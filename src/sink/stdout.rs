//! Console sink
//!
//! Writes each record as an indented JSON object to stdout. Useful for
//! debugging and as the default when no exporter is configured; log
//! aggregation stacks pick the objects up as-is.

use std::io::Write;

use async_trait::async_trait;
use tracing::info;

use crate::error::Error;
use crate::record::SerialReading;
use crate::sink::Sink;

/// Sink writing pretty JSON records to standard output
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    /// Create a console sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error> {
        // One locked writer for the whole batch so concurrent workers never
        // interleave records.
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for record in records {
            let json = serde_json::to_string_pretty(record)
                .map_err(|e| Error::sink(format!("failed to encode record: {e}")))?;
            writeln!(out, "{json}").map_err(|e| Error::sink(format!("stdout write: {e}")))?;
        }
        out.flush()
            .map_err(|e| Error::sink(format!("stdout flush: {e}")))?;

        info!(records = records.len(), "export completed");
        Ok(())
    }

    async fn health(&self) -> Result<(), Error> {
        std::io::stdout()
            .flush()
            .map_err(|e| Error::sink(format!("stdout is not writable: {e}")))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn writes_batches_without_error() {
        let sink = StdoutSink::new();
        let records = vec![SerialReading {
            cluster: "c".into(),
            node: "n".into(),
            machine: "m".into(),
            source: "ns/p".into(),
            chassis: "ch".into(),
            gpu: "g".into(),
            time: Utc::now(),
        }];
        sink.write(&records).await.unwrap();
        sink.write(&[]).await.unwrap();
        sink.health().await.unwrap();
        sink.close().await.unwrap();
    }
}
