//! Node label convergence
//!
//! Computes the desired `gpuscout.dev/*` label set from the chassis groups of
//! a host and converges the node toward it with read-modify-write retry.
//! The computation is pure so the interesting properties (sanitization,
//! ordering, idempotence) are testable without a cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use crate::error::Error;
use crate::record::UNKNOWN_CHASSIS;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::smi::ChassisGroup;

/// Domain prefix of every label this controller owns
pub const LABEL_NS: &str = "gpuscout.dev";

const CHASSIS_PREFIX: &str = "chassis";
const CHASSIS_COUNT: &str = "chassis-count";
const GPU_PREFIX: &str = "gpu";

/// Minimal node read/update surface, a seam for tests
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Fetch a node by name
    async fn get(&self, name: &str) -> Result<Node, kube::Error>;
    /// Replace a node, subject to the API server's resource-version check
    async fn update(&self, node: &Node) -> Result<Node, kube::Error>;
}

/// [`NodeApi`] backed by the cluster
pub struct NodeClient {
    api: Api<Node>,
}

impl NodeClient {
    /// Create a node client from a cluster connection
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn get(&self, name: &str) -> Result<Node, kube::Error> {
        self.api.get(name).await
    }

    async fn update(&self, node: &Node) -> Result<Node, kube::Error> {
        self.api
            .replace(&node.name_any(), &PostParams::default(), node)
            .await
    }
}

/// Convert any string into a valid Kubernetes label value.
///
/// Characters outside `[A-Za-z0-9._-]` become hyphens, leading/trailing
/// non-alphanumerics are trimmed, and empty/`N/A` inputs map to the sentinel.
/// Idempotent: sanitizing a sanitized value is a no-op.
pub fn sanitize_label_value(value: &str) -> String {
    if value.is_empty() || value == "N/A" {
        return UNKNOWN_CHASSIS.to_string();
    }

    let replaced: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        return UNKNOWN_CHASSIS.to_string();
    }

    trimmed.to_string()
}

/// Compute the full desired label set for the given chassis groups.
///
/// Groups are sorted ascending by chassis serial with unknown chassis last so
/// indices are stable across runs regardless of input order. GPUs on a
/// chassis without a serial are labelled `gpu-<j>` (no chassis prefix) to
/// keep them visible on single-chassis hardware.
pub fn compute_desired(groups: &[ChassisGroup]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if groups.is_empty() {
        return labels;
    }

    let mut sorted: Vec<&ChassisGroup> = groups.iter().collect();
    sorted.sort_by_key(|g| (g.chassis.is_empty(), g.chassis.clone()));

    for (i, group) in sorted.iter().enumerate() {
        let chassis = sanitize_label_value(&group.chassis);
        let chassis_known = chassis != UNKNOWN_CHASSIS;
        if chassis_known {
            labels.insert(format!("{LABEL_NS}/{CHASSIS_PREFIX}-{i}"), chassis.clone());
        }

        let mut gpus = group.gpus.clone();
        gpus.sort();

        for (j, gpu) in gpus.iter().enumerate() {
            if gpu.is_empty() {
                continue;
            }
            let key = if chassis_known {
                format!("{LABEL_NS}/{CHASSIS_PREFIX}-{i}-{GPU_PREFIX}-{j}")
            } else {
                format!("{LABEL_NS}/{GPU_PREFIX}-{j}")
            };
            labels.insert(key, sanitize_label_value(gpu));
        }
    }

    labels.insert(
        format!("{LABEL_NS}/{CHASSIS_COUNT}"),
        sorted.len().to_string(),
    );

    labels
}

/// Converge `node_name` toward the label set derived from `groups`.
///
/// Read-modify-write with conflict retry: up to 5 attempts under exponential
/// backoff (2s initial, x2, 10% jitter, 45s cap). A node already carrying
/// exactly the desired set is left untouched. Forbidden and Invalid responses
/// are surfaced immediately; retrying cannot fix RBAC or a bad label value.
pub async fn ensure(
    labeler: &dyn NodeApi,
    node_name: &str,
    groups: &[ChassisGroup],
) -> Result<(), Error> {
    let desired = compute_desired(groups);

    retry_with_backoff(
        &RetryConfig::default(),
        "ensure_node_labels",
        || attempt_label_update(labeler, node_name, &desired),
        |err| match err {
            Error::Kube(kube::Error::Api(ae)) => ae.code != 403 && ae.code != 422,
            _ => true,
        },
    )
    .await
}

async fn attempt_label_update(
    labeler: &dyn NodeApi,
    node_name: &str,
    desired: &BTreeMap<String, String>,
) -> Result<(), Error> {
    let mut node = labeler.get(node_name).await?;

    let current = node.metadata.labels.clone().unwrap_or_default();
    if !needs_update(&current, desired) {
        debug!(node = %node_name, "node labels already up to date");
        return Ok(());
    }

    let mut updated: BTreeMap<String, String> = current
        .into_iter()
        .filter(|(k, _)| !owned_key(k))
        .collect();
    updated.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));

    node.metadata.labels = Some(updated);
    labeler.update(&node).await?;

    info!(node = %node_name, labels = desired.len(), "updated node labels");
    Ok(())
}

/// Whether the current labels differ from the desired set within our domain.
fn needs_update(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    let stale = current
        .keys()
        .any(|k| owned_key(k) && !desired.contains_key(k));
    let missing = desired.iter().any(|(k, v)| current.get(k) != Some(v));
    stale || missing
}

fn owned_key(key: &str) -> bool {
    key.strip_prefix(LABEL_NS)
        .is_some_and(|rest| rest.starts_with('/'))
}
