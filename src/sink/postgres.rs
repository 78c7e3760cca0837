//! PostgreSQL sink
//!
//! One transaction per batch, one parameterized insert per record. The
//! schema is bootstrapped idempotently at startup, including the natural
//! unique key over `(cluster, node, machine, source, chassis, gpu,
//! read_time)` so replayed batches cannot duplicate rows.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use crate::error::Error;
use crate::record::SerialReading;
use crate::sink::Sink;

/// Environment variables consumed by this sink
const ENV_HOST: &str = "POSTGRES_HOST";
const ENV_PORT: &str = "POSTGRES_PORT";
const ENV_DB: &str = "POSTGRES_DB";
const ENV_USER: &str = "POSTGRES_USER";
const ENV_PASSWORD: &str = "POSTGRES_PASSWORD";
const ENV_SSLMODE: &str = "POSTGRES_SSLMODE";
const ENV_TABLE: &str = "POSTGRES_TABLE";

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SSLMODE: &str = "require";
const DEFAULT_TABLE: &str = "gpu";

const MAX_CONNECTIONS: u32 = 25;
const CONNECTION_LIFETIME: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters loaded from the environment
#[derive(Debug, Clone)]
struct PgConfig {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    sslmode: String,
    table: String,
}

impl PgConfig {
    fn from_env() -> Self {
        Self {
            host: std::env::var(ENV_HOST).unwrap_or_default(),
            port: std::env::var(ENV_PORT)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            database: std::env::var(ENV_DB).unwrap_or_default(),
            user: std::env::var(ENV_USER).unwrap_or_default(),
            password: std::env::var(ENV_PASSWORD).unwrap_or_default(),
            sslmode: std::env::var(ENV_SSLMODE).unwrap_or_else(|_| DEFAULT_SSLMODE.into()),
            table: std::env::var(ENV_TABLE).unwrap_or_else(|_| DEFAULT_TABLE.into()),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::config(format!("postgres host is required (set {ENV_HOST})")));
        }
        if self.database.is_empty() {
            return Err(Error::config(format!("postgres database is required (set {ENV_DB})")));
        }
        if self.user.is_empty() {
            return Err(Error::config(format!("postgres user is required (set {ENV_USER})")));
        }
        if self.password.is_empty() {
            return Err(Error::config(format!(
                "postgres password is required (set {ENV_PASSWORD})"
            )));
        }
        validate_table_name(&self.table)?;
        Ok(())
    }
}

/// The table name is interpolated into DDL/DML, so it must stay a plain
/// identifier; everything else is bound as a parameter.
fn validate_table_name(table: &str) -> Result<(), Error> {
    let valid = !table.is_empty()
        && table.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::config(format!(
            "postgres table name must be a plain identifier: got {table:?}"
        )));
    }
    Ok(())
}

/// Sink inserting records into a PostgreSQL table
pub struct PostgresSink {
    pool: PgPool,
    insert_sql: String,
    table: String,
}

impl PostgresSink {
    /// Connect using `POSTGRES_*` environment variables and bootstrap the
    /// schema if it does not exist yet.
    pub async fn from_env() -> Result<Self, Error> {
        let config = PgConfig::from_env();
        config.validate()?;

        let sslmode = PgSslMode::from_str(&config.sslmode).map_err(|e| {
            Error::config(format!("invalid {ENV_SSLMODE} value {:?}: {e}", config.sslmode))
        })?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(sslmode);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .max_lifetime(CONNECTION_LIFETIME)
            .connect_with(options)
            .await
            .map_err(|e| Error::sink(format!("failed to connect to postgres: {e}")))?;

        let sink = Self {
            insert_sql: format!(
                "INSERT INTO {} (cluster, node, machine, source, chassis, gpu, read_time, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                config.table
            ),
            table: config.table,
            pool,
        };
        sink.initialize_schema().await?;
        Ok(sink)
    }

    async fn initialize_schema(&self) -> Result<(), Error> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                cluster VARCHAR(255) NOT NULL,
                node VARCHAR(255) NOT NULL,
                machine VARCHAR(255) NOT NULL,
                source VARCHAR(255) NOT NULL,
                chassis VARCHAR(255) NOT NULL,
                gpu VARCHAR(255) NOT NULL,
                read_time TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(cluster, node, machine, source, chassis, gpu, read_time)
            )",
            table = self.table
        );
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::sink(format!("failed to create table {}: {e}", self.table)))?;

        for column in ["cluster", "node", "read_time", "created_at"] {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
                table = self.table,
                column = column
            );
            sqlx::query(&index)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::sink(format!("failed to create index on {column}: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::sink(format!("failed to begin transaction: {e}")))?;

        let created_at = chrono::Utc::now();
        for record in records {
            sqlx::query(&self.insert_sql)
                .bind(&record.cluster)
                .bind(&record.node)
                .bind(&record.machine)
                .bind(&record.source)
                .bind(&record.chassis)
                .bind(&record.gpu)
                .bind(record.time)
                .bind(created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::sink(format!("failed to insert record: {e}")))?;
            // A failed insert drops the transaction, rolling the batch back.
        }

        tx.commit()
            .await
            .map_err(|e| Error::sink(format!("failed to commit transaction: {e}")))?;

        info!(table = %self.table, records = records.len(), "export completed");
        Ok(())
    }

    async fn health(&self) -> Result<(), Error> {
        tokio::time::timeout(HEALTH_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| Error::sink("postgres health check timed out"))?
            .map_err(|e| Error::sink(format!("postgres health check failed: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.pool.close().await;
        Ok(())
    }
}
