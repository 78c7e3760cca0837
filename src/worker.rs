//! Queue workers and the per-pod extraction pipeline
//!
//! Each worker pops namespaced pod keys, re-validates the pod against the
//! informer cache, and runs the pipeline under the per-pod deadline:
//! exec the diagnostic, decode and group, converge node labels, resolve the
//! node's provider identity, ship records. A pod UID is marked processed
//! before any external call so duplicate dispatches are no-ops, and one
//! pod's failure never blocks the rest of the queue.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::dedup::TtlSet;
use crate::error::Error;
use crate::exec;
use crate::labels::{self, NodeApi};
use crate::metrics::Metrics;
use crate::provider;
use crate::queue::WorkQueue;
use crate::record;
use crate::sink::Sink;
use crate::smi;

/// Upper bound (exclusive) of the pre-dispatch jitter in milliseconds
const JITTER_MS: u64 = 200;

/// Everything a worker needs, shared across the pool
#[derive(Clone)]
pub struct WorkerContext {
    /// Cluster connection for exec and node reads
    pub client: Client,
    /// Read-only informer cache of watched pods
    pub store: Store<Pod>,
    /// The shared dispatch queue
    pub queue: Arc<WorkQueue>,
    /// UIDs already processed within the TTL window
    pub seen: Arc<TtlSet>,
    /// Destination for serial readings
    pub sink: Arc<dyn Sink>,
    /// Outcome counters
    pub metrics: Arc<Metrics>,
    /// Node read/update surface for the labeler
    pub nodes: Arc<dyn NodeApi>,
    /// Controller configuration
    pub config: Arc<Config>,
}

/// Pipeline result for one pod
enum Outcome {
    /// Records were exported (possibly zero after validation drops)
    Exported(usize),
    /// The host reported no GPUs; nothing to label or export
    NoGpus,
}

/// Worker loop: drain the queue until shutdown.
pub async fn run_worker(id: usize, ctx: WorkerContext, token: CancellationToken) {
    debug!(worker_id = id, "worker started");
    while let Some(key) = ctx.queue.get().await {
        if let Err(err) = process_key(&ctx, &key, &token).await {
            warn!(worker_id = id, key = %key, error = %err, "failed to process pod");
        }
        // Forget unconditionally: there is no intrinsic retry, freshness
        // comes from informer re-notifications.
        ctx.queue.done(&key);
        ctx.queue.forget(&key);
    }
    debug!(worker_id = id, "worker stopped");
}

async fn process_key(
    ctx: &WorkerContext,
    key: &str,
    token: &CancellationToken,
) -> Result<(), Error> {
    let Some((namespace, name)) = key.split_once('/') else {
        warn!(key, "invalid cache key format");
        return Ok(());
    };

    let Some(pod) = ctx.store.get(&ObjectRef::new(name).within(namespace)) else {
        debug!(key, "pod no longer exists in cache");
        return Ok(());
    };

    // The pod may have transitioned between enqueueing and dispatch.
    if !pod_ready(&pod) {
        debug!(key, "pod not ready at processing time");
        return Ok(());
    }

    let Some(uid) = pod.metadata.uid.clone() else {
        warn!(key, "pod has no uid");
        return Ok(());
    };
    if ctx.seen.has(&uid) {
        debug!(key, uid = %uid, "pod already processed");
        return Ok(());
    }

    // Spread out the herd when many pods become ready at once.
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MS));
    tokio::select! {
        _ = tokio::time::sleep(jitter) => {}
        _ = token.cancelled() => return Ok(()),
    }

    // Marked before any external call: even a failing pod consumes its slot
    // until the TTL lapses.
    ctx.seen.add(&uid);

    let pod_name = pod.name_any();
    let node_name = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_default();

    debug!(key, uid = %uid, node = %node_name, "processing pod");

    let deadline = ctx.config.timeout;
    match tokio::time::timeout(deadline, run_pipeline(ctx, &pod, &node_name)).await {
        Ok(Ok(Outcome::Exported(count))) => {
            ctx.metrics.success(&node_name, &pod_name);
            debug!(key, records = count, "pod processed successfully");
            Ok(())
        }
        Ok(Ok(Outcome::NoGpus)) => {
            debug!(key, "no GPU serial numbers found, skipping export");
            Ok(())
        }
        Ok(Err(err)) => {
            ctx.metrics.failure(&node_name, &pod_name, err.reason());
            error!(key, node = %node_name, error = %err, "pipeline failed");
            Err(err)
        }
        Err(_) => {
            let err = Error::Timeout(format!(
                "pipeline exceeded {}",
                humantime::format_duration(deadline)
            ));
            ctx.metrics.failure(&node_name, &pod_name, err.reason());
            error!(key, node = %node_name, error = %err, "pipeline timed out");
            Err(err)
        }
    }
}

async fn run_pipeline(
    ctx: &WorkerContext,
    pod: &Pod,
    node_name: &str,
) -> Result<Outcome, Error> {
    let namespace = pod.namespace().unwrap_or_default();
    let pod_name = pod.name_any();

    let stdout = exec::exec_diagnostic(
        ctx.client.clone(),
        &namespace,
        &pod_name,
        &ctx.config.container,
    )
    .await?;

    let report = smi::parse_report(&stdout)?;
    let groups = smi::group_by_chassis(&report);
    if groups.is_empty() {
        return Ok(Outcome::NoGpus);
    }

    labels::ensure(ctx.nodes.as_ref(), node_name, &groups).await?;

    let provider = provider::fetch_provider(ctx.client.clone(), node_name).await?;
    if provider.identifier.is_empty() {
        warn!(node = %node_name, raw = %provider.raw, "node provider identifier is empty");
    }

    let source = format!("{namespace}/{pod_name}");
    let records = record::build_records(
        &ctx.config.cluster,
        node_name,
        &provider.identifier,
        &source,
        &groups,
    );
    if records.is_empty() {
        debug!(source = %source, "no valid records to export after validation");
        return Ok(Outcome::Exported(0));
    }

    ctx.sink.write(&records).await?;
    Ok(Outcome::Exported(records.len()))
}

/// The readiness predicate gating every exec call.
///
/// A pod qualifies only when it is Running, every declared container has a
/// status, and every status reports ready. This avoids racing container
/// startup with exec.
pub fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    let declared = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.len())
        .unwrap_or(0);
    let statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    if statuses.len() < declared {
        return false;
    }

    statuses.iter().all(|cs| cs.ready)
}
