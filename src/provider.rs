//! Node provider identity
//!
//! Cloud nodes carry a provider id of the form `<scheme>://<authority>/<path>`
//! (`aws:///us-east-1a/i-0abc`, `gce://project/zone/instance`, ...). The
//! instance identifier is always the last non-empty path segment, so parsing
//! is scheme-agnostic; unrecognized schemes are accepted with a debug log.

use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use tracing::debug;

use crate::error::Error;

/// Provider schemes seen in the supported environments
const KNOWN_PROVIDERS: [&str; 5] = ["aws", "gce", "azure", "baremetalhost", "kind"];

/// Parsed node provider identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Provider scheme, lowercased
    pub provider: String,
    /// Instance identifier: the last non-empty path segment
    pub identifier: String,
    /// The provider id exactly as the node reported it
    pub raw: String,
}

/// Parse a node's `spec.providerID` string.
pub fn parse_provider_id(provider_id: &str) -> Result<ProviderInfo, Error> {
    if provider_id.trim().is_empty() {
        return Err(Error::parse("node providerID is empty"));
    }

    let (scheme, rest) = provider_id
        .split_once("://")
        .ok_or_else(|| Error::parse(format!("invalid providerID format: {provider_id}")))?;

    let provider = scheme.to_lowercase();
    if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
        debug!(provider = %provider, raw = %provider_id, "unrecognized provider scheme");
    }

    let identifier = rest
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .ok_or_else(|| Error::parse(format!("providerID has no instance segment: {provider_id}")))?;

    Ok(ProviderInfo {
        provider,
        identifier: identifier.to_string(),
        raw: provider_id.to_string(),
    })
}

/// Fetch a node and parse its provider id.
pub async fn fetch_provider(client: Client, node_name: &str) -> Result<ProviderInfo, Error> {
    if node_name.trim().is_empty() {
        return Err(Error::validation("node name is required"));
    }

    let nodes: Api<Node> = Api::all(client);
    let node = nodes.get(node_name).await?;

    let provider_id = node
        .spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default();

    if provider_id.is_empty() {
        return Err(Error::backend(format!(
            "node {node_name} has no providerID"
        )));
    }

    debug!(node = %node_name, provider_id = %provider_id, "parsing node provider id");
    parse_provider_id(provider_id)
}
