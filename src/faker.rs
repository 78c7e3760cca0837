//! Fake diagnostic output for test pods
//!
//! Workload clusters without real GPUs still need something answering
//! `nvidia-smi -q -x` during end-to-end tests. The `smifaker` binary serves
//! a canned document from disk; this module loads and validates those
//! documents, and can synthesize one with a chosen shape when no capture of
//! real hardware is at hand.

use std::path::Path;

use tracing::info;

use crate::error::Error;
use crate::smi;

/// A validated diagnostic document ready to be served
pub struct FakeSmi {
    xml: String,
    gpu_count: usize,
}

impl FakeSmi {
    /// Load a document from disk, verifying it decodes.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        let report = smi::parse_report(xml.as_bytes())?;

        info!(
            file = %path.display(),
            size = xml.len(),
            gpus = report.gpus.len(),
            "loaded diagnostic content"
        );
        Ok(Self {
            xml,
            gpu_count: report.gpus.len(),
        })
    }

    /// The raw XML document
    pub fn content(&self) -> &str {
        &self.xml
    }

    /// Number of GPU entries in the document
    pub fn gpu_count(&self) -> usize {
        self.gpu_count
    }
}

/// Synthesize a diagnostic document with `chassis_count` chassis carrying
/// `gpus_per_chassis` GPUs each.
///
/// Serial numbers are deterministic so repeated runs produce identical
/// documents; pass `chassis_count == 0` to get a chassis-less host (the
/// platform section reports no serial, like PCIe cards outside a rack).
pub fn synthesize(chassis_count: usize, gpus_per_chassis: usize) -> String {
    let mut gpus = String::new();
    let hosts = chassis_count.max(1);
    for c in 0..hosts {
        let chassis_serial = if chassis_count == 0 {
            String::new()
        } else {
            format!("16603230020{c:02}")
        };
        for g in 0..gpus_per_chassis {
            let idx = c * gpus_per_chassis + g;
            gpus.push_str(&format!(
                r#"	<gpu id="00000000:{bus:02X}:00.0">
		<product_name>NVIDIA H100 80GB HBM3</product_name>
		<product_brand>NVIDIA</product_brand>
		<serial>16549230501{idx:02}</serial>
		<uuid>GPU-6ac64d8a-7e33-0e5c-8ba5-d95e8e3b{idx:04}</uuid>
		<minor_number>{idx}</minor_number>
		<platformInfo>
			<chassis_serial_number>{chassis_serial}</chassis_serial_number>
			<slot_number>{g}</slot_number>
			<tray_index>0</tray_index>
		</platformInfo>
		<fb_memory_usage>
			<total>81559 MiB</total>
			<used>0 MiB</used>
			<free>81559 MiB</free>
		</fb_memory_usage>
	</gpu>
"#,
                bus = 0x1B + idx * 8,
            ));
        }
    }

    format!(
        r#"<?xml version="1.0" ?>
<nvidia_smi_log>
	<timestamp>Mon Jun  2 10:12:44 2025</timestamp>
	<driver_version>570.86.10</driver_version>
	<cuda_version>12.8</cuda_version>
	<attached_gpus>{total}</attached_gpus>
{gpus}</nvidia_smi_log>
"#,
        total = hosts * gpus_per_chassis,
    )
}
