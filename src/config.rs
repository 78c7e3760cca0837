//! Controller configuration
//!
//! Every option is settable as a flag or an environment variable; the env
//! names match the deployment manifests (`EXPORTER_TYPE`, `CLUSTER_NAME`,
//! ...). Defaults are production-ready; [`Config::validate`] enforces the
//! cross-field rules before anything talks to the cluster.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::Error;
use crate::sink::SinkKind;

/// Upper bound on concurrent workers; more would only pressure the API server
pub const MAX_WORKERS: usize = 100;

/// Upper bound on the per-pod deadline; longer executions leak worker slots
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Runtime configuration for the controller
#[derive(Parser, Debug, Clone)]
#[command(name = "gpuscout", version, about, long_about = None)]
pub struct Config {
    /// Sink kind that receives serial readings
    #[arg(long = "exporter", env = "EXPORTER_TYPE", value_enum, default_value_t = SinkKind::Stdout)]
    pub exporter: SinkKind,

    /// Cluster name stamped into every exported record
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster: String,

    /// Namespace the pod informer watches
    #[arg(long, env = "NAMESPACE", default_value = "gpu-operator")]
    pub namespace: String,

    /// Label selector filtering the watched pods
    #[arg(
        long,
        env = "LABEL_SELECTOR",
        default_value = "app=nvidia-device-plugin-daemonset"
    )]
    pub label_selector: String,

    /// Container the diagnostic command is executed in
    #[arg(long, env = "CONTAINER", default_value = "nvidia-device-plugin")]
    pub container: String,

    /// Number of concurrent workers draining the queue (1-100)
    #[arg(long, env = "WORKERS", default_value_t = 16)]
    pub workers: usize,

    /// Per-pod pipeline deadline (at most 10m)
    #[arg(long, env = "TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Informer resync period; 0 disables periodic resync (event-driven only)
    #[arg(long, env = "RESYNC", default_value = "0s", value_parser = humantime::parse_duration)]
    pub resync: Duration,

    /// Kubernetes client sustained request rate
    #[arg(long, env = "QPS", default_value_t = 50.0)]
    pub qps: f32,

    /// Kubernetes client burst allowance; must be >= qps
    #[arg(long, env = "BURST", default_value_t = 100)]
    pub burst: usize,

    /// Path to a kubeconfig file, used when in-cluster auth is unavailable
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log verbosity: debug, info, warn or error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Port for the health and metrics HTTP server (1000-65535)
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,
}

impl Config {
    /// Validate cross-field rules that clap cannot express.
    ///
    /// Invalid configuration is unrecoverable; callers exit with code 2.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cluster.trim().is_empty() {
            return Err(Error::config("cluster name must be specified"));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must be specified"));
        }
        if self.label_selector.trim().is_empty() {
            return Err(Error::config("label selector must be specified"));
        }
        if self.container.trim().is_empty() {
            return Err(Error::config("container must be specified"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be > 0"));
        }
        if self.workers > MAX_WORKERS {
            return Err(Error::config(format!(
                "workers should not exceed {} to prevent API server overload: got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be > 0"));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(Error::config(format!(
                "timeout should not exceed 10 minutes to prevent worker leaks: got {}",
                humantime::format_duration(self.timeout)
            )));
        }
        if self.qps <= 0.0 {
            return Err(Error::config("qps must be > 0"));
        }
        if self.burst == 0 {
            return Err(Error::config("burst must be > 0"));
        }
        if (self.burst as f32) < self.qps {
            return Err(Error::config(format!(
                "burst ({}) should be >= qps ({}) for proper rate limiting",
                self.burst, self.qps
            )));
        }
        if self.server_port < 1000 {
            return Err(Error::config(format!(
                "server port must be between 1000 and 65535: got {}",
                self.server_port
            )));
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::config(format!(
                    "log level must be one of debug|info|warn|error: got {other}"
                )));
            }
        }
        Ok(())
    }
}
