//! Vendor diagnostic XML decoding
//!
//! `nvidia-smi -q -x` emits one large XML document per host. Only the
//! identity fields are modeled; everything else in the document is ignored
//! by the decoder, which keeps it stable across driver releases.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;

/// Longest excerpt of the raw input included in a parse error
const EXCERPT_LEN: usize = 256;

/// Decoded `nvidia-smi -q -x` document, projected to the consumed fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiReport {
    /// Driver-reported timestamp of the query
    #[serde(default)]
    pub timestamp: String,
    /// Installed driver version
    #[serde(default)]
    pub driver_version: String,
    /// CUDA version supported by the driver
    #[serde(default)]
    pub cuda_version: String,
    /// Number of GPUs attached to the host, as reported by the tool
    #[serde(default)]
    pub attached_gpus: String,
    /// Per-GPU entries in document order
    #[serde(rename = "gpu", default)]
    pub gpus: Vec<SmiGpu>,
}

/// A single `<gpu>` element
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiGpu {
    /// Marketing product name
    #[serde(default)]
    pub product_name: String,
    /// GPU board serial number
    #[serde(default)]
    pub serial: String,
    /// Driver-assigned GPU UUID
    #[serde(default)]
    pub uuid: String,
    /// Chassis-level platform info; absent on non-rack hardware
    #[serde(rename = "platformInfo", default)]
    pub platform_info: PlatformInfo,
}

/// The `<platformInfo>` element carrying chassis identity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformInfo {
    /// Chassis serial number; empty when the platform does not report one
    #[serde(default)]
    pub chassis_serial_number: String,
    /// Physical slot within the chassis
    #[serde(default)]
    pub slot_number: String,
    /// Tray index within the rack
    #[serde(default)]
    pub tray_index: String,
}

/// A chassis serial together with the sorted, deduplicated GPU serials on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisGroup {
    /// Chassis serial number; empty when unknown
    pub chassis: String,
    /// GPU serials, ascending, unique within the chassis
    pub gpus: Vec<String>,
}

/// Decode a raw diagnostic document.
///
/// Unknown elements are tolerated; a document that is not well-formed XML
/// yields a single [`Error::Parse`] carrying a truncated excerpt of the input.
pub fn parse_report(data: &[u8]) -> Result<SmiReport, Error> {
    let text = String::from_utf8_lossy(data);
    quick_xml::de::from_str(&text)
        .map_err(|err| Error::parse(format!("invalid nvidia-smi XML: {err} - {}", excerpt(&text))))
}

/// Group the report's GPU entries by chassis serial number.
///
/// GPU serials are deduplicated within each chassis and sorted ascending;
/// groups come back ordered by chassis serial (an empty/unknown chassis sorts
/// first here; label computation applies its own unknown-last ordering).
pub fn group_by_chassis(report: &SmiReport) -> Vec<ChassisGroup> {
    let mut by_chassis: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for gpu in &report.gpus {
        by_chassis
            .entry(gpu.platform_info.chassis_serial_number.clone())
            .or_default()
            .insert(gpu.serial.clone());
    }

    let groups: Vec<ChassisGroup> = by_chassis
        .into_iter()
        .map(|(chassis, gpus)| ChassisGroup {
            chassis,
            gpus: gpus.into_iter().collect(),
        })
        .collect();

    debug!(groups = groups.len(), "grouped GPU entries by chassis");
    groups
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("testdata/{name}")).expect("fixture readable")
    }

    #[test]
    fn parses_eight_gpu_reference_document() {
        let report = parse_report(&fixture("h100.xml")).unwrap();
        assert!(!report.timestamp.is_empty());
        assert!(!report.driver_version.is_empty());
        assert!(!report.cuda_version.is_empty());
        assert_eq!(report.gpus.len(), 8);
        for gpu in &report.gpus {
            assert!(!gpu.serial.is_empty());
            assert!(!gpu.product_name.is_empty());
            assert!(!gpu.uuid.is_empty());
        }
    }

    #[test]
    fn parses_four_gpu_reference_document() {
        let report = parse_report(&fixture("gb200.xml")).unwrap();
        assert_eq!(report.gpus.len(), 4);
        for gpu in &report.gpus {
            assert!(!gpu.serial.is_empty());
            assert!(!gpu.platform_info.chassis_serial_number.is_empty());
        }
    }

    #[test]
    fn malformed_input_reports_excerpt() {
        let err = parse_report(b"this is not xml <<<").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid nvidia-smi XML"));
        assert!(msg.contains("this is not xml"));
    }

    #[test]
    fn unknown_elements_are_tolerated() {
        let doc = r#"<?xml version="1.0" ?>
<nvidia_smi_log>
  <timestamp>Mon Jun  2 10:00:00 2025</timestamp>
  <driver_version>570.86.10</driver_version>
  <cuda_version>12.8</cuda_version>
  <attached_gpus>1</attached_gpus>
  <some_future_section><nested>x</nested></some_future_section>
  <gpu id="00000000:1B:00.0">
    <product_name>NVIDIA H100 80GB HBM3</product_name>
    <serial>1654923050105</serial>
    <uuid>GPU-6ac64d8a-7e33-0e5c-8ba5-d95e8e3b0a1d</uuid>
    <unmodeled_field>whatever</unmodeled_field>
    <platformInfo>
      <chassis_serial_number>1660323002015</chassis_serial_number>
      <slot_number>2</slot_number>
    </platformInfo>
  </gpu>
</nvidia_smi_log>"#;
        let report = parse_report(doc.as_bytes()).unwrap();
        assert_eq!(report.gpus.len(), 1);
        assert_eq!(report.gpus[0].serial, "1654923050105");
        assert_eq!(
            report.gpus[0].platform_info.chassis_serial_number,
            "1660323002015"
        );
    }

    #[test]
    fn grouping_dedupes_and_sorts_within_chassis() {
        let report = SmiReport {
            gpus: vec![
                gpu("g-3", "ch-0"),
                gpu("g-1", "ch-0"),
                gpu("g-1", "ch-0"),
                gpu("g-2", "ch-1"),
            ],
            ..Default::default()
        };
        let groups = group_by_chassis(&report);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].chassis, "ch-0");
        assert_eq!(groups[0].gpus, vec!["g-1", "g-3"]);
        assert_eq!(groups[1].chassis, "ch-1");
        assert_eq!(groups[1].gpus, vec!["g-2"]);
    }

    #[test]
    fn empty_chassis_collapses_into_one_group() {
        let report = SmiReport {
            gpus: vec![gpu("g-2", ""), gpu("g-1", "")],
            ..Default::default()
        };
        let groups = group_by_chassis(&report);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].chassis, "");
        assert_eq!(groups[0].gpus, vec!["g-1", "g-2"]);
    }

    #[test]
    fn fixture_grouping_preserves_pairs() {
        let report = parse_report(&fixture("h100.xml")).unwrap();
        let groups = group_by_chassis(&report);
        let total: usize = groups.iter().map(|g| g.gpus.len()).sum();
        assert_eq!(total, 8);
        assert_eq!(groups.len(), 1, "h100 reference host has one chassis");
    }

    fn gpu(serial: &str, chassis: &str) -> SmiGpu {
        SmiGpu {
            serial: serial.into(),
            platform_info: PlatformInfo {
                chassis_serial_number: chassis.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
