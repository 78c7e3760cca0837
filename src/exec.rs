//! Pod exec client
//!
//! Runs the vendor diagnostic command inside a pod container over the
//! cluster's exec subresource and captures stdout and stderr separately.
//! TTY stays disabled so the two streams never interleave. Cancellation is
//! the caller's: dropping the returned future (e.g. when the per-pod timeout
//! fires) tears down the underlying websocket.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::Error;

/// The diagnostic command executed inside the target container
pub const DIAGNOSTIC_COMMAND: &str = "nvidia-smi -q -x";

/// Longest stderr tail carried in an error
const STDERR_TAIL: usize = 512;

/// Execute the diagnostic command in `namespace/pod_name` and return stdout.
///
/// Failure classification, in order:
/// - the exec stream could not be established or broke: [`Error::Transport`]
/// - the command wrote to stderr (even with exit 0): [`Error::Backend`]
/// - the command exited non-zero: [`Error::CommandExit`]
pub async fn exec_diagnostic(
    client: Client,
    namespace: &str,
    pod_name: &str,
    container: &str,
) -> Result<Vec<u8>, Error> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let params = AttachParams::default()
        .container(container)
        .stdin(false)
        .stdout(true)
        .stderr(true)
        .tty(false);

    debug!(ns = %namespace, pod = %pod_name, container = %container, "starting exec");

    let mut attached = pods
        .exec(pod_name, vec!["/bin/sh", "-c", DIAGNOSTIC_COMMAND], &params)
        .await
        .map_err(|e| Error::transport(format!("exec {namespace}/{pod_name}: {e}")))?;

    let mut stdout_stream = attached
        .stdout()
        .ok_or_else(|| Error::transport("exec stdout stream unavailable"))?;
    let mut stderr_stream = attached
        .stderr()
        .ok_or_else(|| Error::transport("exec stderr stream unavailable"))?;
    let status_fut = attached.take_status();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let (out_read, err_read) = tokio::join!(
        stdout_stream.read_to_end(&mut stdout),
        stderr_stream.read_to_end(&mut stderr),
    );
    out_read.map_err(|e| Error::transport(format!("reading exec stdout: {e}")))?;
    err_read.map_err(|e| Error::transport(format!("reading exec stderr: {e}")))?;

    let status = match status_fut {
        Some(fut) => fut.await,
        None => None,
    };

    attached
        .join()
        .await
        .map_err(|e| Error::transport(format!("exec stream: {e}")))?;

    // Diagnostic output on stderr means the tool is unhappy regardless of
    // what the exit status claims.
    if !stderr.is_empty() {
        return Err(Error::backend(format!(
            "diagnostic command produced stderr: {}",
            tail(&stderr)
        )));
    }

    if let Some(status) = &status {
        if status.status.as_deref() == Some("Failure") {
            return Err(Error::CommandExit {
                code: exit_code(status).unwrap_or(-1),
                stderr: tail(&stderr),
            });
        }
    }

    debug!(
        ns = %namespace,
        pod = %pod_name,
        stdout_bytes = stdout.len(),
        "exec completed"
    );
    Ok(stdout)
}

/// Pull the process exit code out of a V1 `Status` failure frame.
fn exit_code(status: &Status) -> Option<i32> {
    status
        .details
        .as_ref()?
        .causes
        .as_ref()?
        .iter()
        .find(|cause| cause.reason.as_deref() == Some("ExitCode"))?
        .message
        .as_deref()?
        .parse()
        .ok()
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
