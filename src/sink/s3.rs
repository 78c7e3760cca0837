//! S3 sink
//!
//! Uploads each batch as one headerless CSV object, partitioned by time so
//! downstream table scans can prune on the key. Column order is fixed:
//! `cluster,node,machine,source,chassis,gpu,time`.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::error::Error;
use crate::record::SerialReading;
use crate::sink::Sink;

/// Environment variables consumed by this sink
const ENV_BUCKET: &str = "S3_BUCKET";
const ENV_PREFIX: &str = "S3_PREFIX";
const ENV_REGION: &str = "S3_REGION";
const ENV_PARTITION_PATTERN: &str = "S3_PARTITION_PATTERN";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PARTITION_PATTERN: &str = "year=%Y/month=%m/day=%d/hour=%H";

/// Sink uploading CSV batches to an S3 bucket
pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    partition_pattern: String,
}

impl S3Sink {
    /// Build the sink from `S3_*` environment variables; credentials come
    /// from the standard AWS provider chain.
    pub async fn from_env() -> Result<Self, Error> {
        let bucket = std::env::var(ENV_BUCKET).unwrap_or_default();
        if bucket.trim().is_empty() {
            return Err(Error::config(format!(
                "S3 bucket name is required (set {ENV_BUCKET})"
            )));
        }
        let prefix = std::env::var(ENV_PREFIX).unwrap_or_default();
        let region = std::env::var(ENV_REGION).unwrap_or_else(|_| DEFAULT_REGION.into());
        let partition_pattern = std::env::var(ENV_PARTITION_PATTERN)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PARTITION_PATTERN.into());

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        Ok(Self {
            client: aws_sdk_s3::Client::new(&aws_config),
            bucket,
            prefix,
            partition_pattern,
        })
    }

    fn object_key(&self, timestamp: DateTime<Utc>) -> String {
        let partition = self
            .partition_pattern
            .replace("%Y", &timestamp.format("%Y").to_string())
            .replace("%m", &timestamp.format("%m").to_string())
            .replace("%d", &timestamp.format("%d").to_string())
            .replace("%H", &timestamp.format("%H").to_string());

        let filename = format!("{}.csv", timestamp.format("%Y%m%d-%H%M%S-%3f"));

        if self.prefix.is_empty() {
            format!("{partition}/{filename}")
        } else {
            format!("{}/{partition}/{filename}", self.prefix)
        }
    }
}

#[async_trait]
impl Sink for S3Sink {
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let timestamp = Utc::now();
        let key = self.object_key(timestamp);

        let mut body = String::new();
        for record in records {
            body.push_str(&csv_line(&record.csv_row()));
            body.push('\n');
        }
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body.into_bytes()))
            .content_type("text/csv")
            .metadata("source", "gpuscout")
            .metadata("record_count", records.len().to_string())
            .metadata(
                "timestamp",
                timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .metadata("format", "csv")
            .metadata("columns", "cluster,node,machine,source,chassis,gpu,time")
            .send()
            .await
            .map_err(|e| Error::sink(format!("failed to upload records to S3: {e}")))?;

        info!(
            bucket = %self.bucket,
            key = %key,
            records = records.len(),
            size_bytes = size,
            "export completed"
        );
        Ok(())
    }

    async fn health(&self) -> Result<(), Error> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::sink(format!("failed to access S3 bucket {}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// RFC 4180 line: fields containing a comma, quote or newline are quoted
/// with internal quotes doubled.
fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
