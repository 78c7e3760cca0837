//! Controller shell
//!
//! Wires the pieces together for the life of the process: rate-limited
//! cluster client, label-filtered pod reflector, event handlers feeding the
//! work queue, the worker pool, the HTTP surface, and graceful shutdown on
//! SIGINT/SIGTERM. Ordering on drain: cancel the root token, let queued keys
//! drain through the workers, then give the HTTP server a 5 second budget.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::client::ClientBuilder;
use kube::core::Selector;
use kube::runtime::reflector;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::buffer::BufferLayer;
use tower::limit::RateLimitLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedup::TtlSet;
use crate::error::Error;
use crate::labels::{NodeApi, NodeClient};
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::server;
use crate::sink::{self, Sink};
use crate::worker::{self, WorkerContext};

/// Transport-level timeout applied to the cluster client
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the HTTP server gets to drain after shutdown
const SERVER_DRAIN: Duration = Duration::from_secs(5);

/// Run the controller until a shutdown signal arrives.
///
/// Any error out of here is a bootstrap failure; the binary exits 2.
pub async fn run(config: Config) -> Result<(), Error> {
    config.validate()?;
    let config = Arc::new(config);

    // Fail fast on an unparsable selector, before any watch starts.
    let selector: Selector = config
        .label_selector
        .parse()
        .map_err(|e| Error::config(format!("invalid label selector {:?}: {e}", config.label_selector)))?;

    let client = build_client(&config).await?;
    debug!(qps = config.qps, burst = config.burst, "kubernetes client created");

    let metrics = Arc::new(
        Metrics::new().map_err(|e| Error::config(format!("failed to register metrics: {e}")))?,
    );
    let sink: Arc<dyn Sink> = Arc::from(sink::open(config.exporter).await?);

    let token = CancellationToken::new();

    info!(port = config.server_port, "starting server");
    let mut server_handle = tokio::spawn(server::serve(
        config.server_port,
        metrics.clone(),
        token.clone(),
    ));

    info!(
        namespace = %config.namespace,
        selector = %config.label_selector,
        "starting pod informer"
    );
    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);
    let watcher_config = watcher::Config::default().labels_from(&selector);
    let (store, writer) = reflector::store::<Pod>();
    let queue = WorkQueue::new();

    let event_task = tokio::spawn({
        let queue = queue.clone();
        let token = token.clone();
        let stream = reflector(writer, watcher(pods, watcher_config)).default_backoff();
        async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(Event::Apply(pod)) | Ok(Event::InitApply(pod))) => {
                            enqueue_if_ready(&queue, &pod);
                        }
                        // Deletions are ignored: labels persist until another
                        // pod lands on the node.
                        Some(Ok(Event::Delete(_))) => {}
                        Some(Ok(Event::Init | Event::InitDone)) => {}
                        Some(Err(err)) => warn!(error = %err, "pod watch error"),
                        None => break,
                    }
                }
            }
        }
    });

    store
        .wait_until_ready()
        .await
        .map_err(|e| Error::transport(format!("informer cache never became ready: {e}")))?;
    info!("cache synced, starting workers");

    let resync_task = (!config.resync.is_zero()).then(|| {
        tokio::spawn({
            let store = store.clone();
            let queue = queue.clone();
            let token = token.clone();
            let period = config.resync;
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await; // the immediate first tick
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            debug!("resync: re-enqueueing cached pods");
                            for pod in store.state() {
                                enqueue_if_ready(&queue, &pod);
                            }
                        }
                    }
                }
            }
        })
    });

    let seen = Arc::new(TtlSet::new());
    let nodes: Arc<dyn NodeApi> = Arc::new(NodeClient::new(client.clone()));
    let mut workers = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        debug!(worker_id = id, "starting worker");
        let ctx = WorkerContext {
            client: client.clone(),
            store: store.clone(),
            queue: queue.clone(),
            seen: seen.clone(),
            sink: sink.clone(),
            metrics: metrics.clone(),
            nodes: nodes.clone(),
            config: config.clone(),
        };
        workers.push(tokio::spawn(worker::run_worker(id, ctx, token.clone())));
    }

    wait_for_signal().await?;
    info!("shutdown signal received, draining work queue");

    token.cancel();
    queue.shutdown_with_drain();
    for handle in workers {
        let _ = handle.await;
    }
    if let Some(handle) = resync_task {
        let _ = handle.await;
    }
    let _ = event_task.await;

    match tokio::time::timeout(SERVER_DRAIN, &mut server_handle).await {
        Ok(result) => {
            if let Ok(Err(err)) = result {
                warn!(error = %err, "http server exited with error");
            }
        }
        Err(_) => {
            warn!("http server did not drain in time, aborting");
            server_handle.abort();
        }
    }

    if let Err(err) = sink.close().await {
        warn!(error = %err, "sink close failed");
    }

    info!("controller shutdown complete");
    Ok(())
}

/// Build the cluster client: in-cluster auth first, kubeconfig fallback,
/// QPS/burst enforced client-side.
async fn build_client(config: &Config) -> Result<Client, Error> {
    let mut kube_config = match kube::Config::incluster() {
        Ok(c) => c,
        Err(_) => match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!("failed to read kubeconfig {}: {e}", path.display()))
                })?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &kube::config::KubeConfigOptions::default(),
                )
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {e}")))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| Error::config(format!("failed to infer kubernetes config: {e}")))?,
        },
    };
    kube_config.connect_timeout = Some(CLIENT_TIMEOUT);

    // RateLimit caps the sustained request rate; the Buffer absorbs bursts
    // up to its depth and keeps the stack cloneable across workers.
    let qps = config.qps.round().max(1.0) as u64;
    let client = ClientBuilder::try_from(kube_config)
        .map_err(|e| Error::config(format!("failed to build kubernetes client: {e}")))?
        .with_layer(&BufferLayer::new(config.burst.max(1)))
        .with_layer(&RateLimitLayer::new(qps, Duration::from_secs(1)))
        .build();

    Ok(client)
}

/// Enqueue the pod's namespaced key if it passes the readiness predicate.
fn enqueue_if_ready(queue: &WorkQueue, pod: &Pod) {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    if name.is_empty() || namespace.is_empty() {
        warn!("pod event without namespace/name");
        return;
    }

    if !worker::pod_ready(pod) {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("unknown");
        debug!(pod = %name, phase = %phase, "skipping non-ready pod");
        return;
    }

    let key = format!("{namespace}/{name}");
    debug!(key = %key, "enqueueing ready pod");
    queue.add(key);
}

async fn wait_for_signal() -> Result<(), Error> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::config(format!("failed to install SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
