//! End-to-end properties of the extraction pipeline, from reference XML
//! through grouping, label computation and record construction to a sink.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use gpuscout::dedup::TtlSet;
use gpuscout::error::Error;
use gpuscout::labels::compute_desired;
use gpuscout::record::{build_records, SerialReading, UNKNOWN_CHASSIS};
use gpuscout::sink::Sink;
use gpuscout::smi::{group_by_chassis, parse_report};

/// Sink capturing every batch for assertions
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<SerialReading>>>,
}

impl RecordingSink {
    fn writes(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn records(&self) -> Vec<SerialReading> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write(&self, records: &[SerialReading]) -> Result<(), Error> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    async fn health(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("testdata/{name}")).expect("fixture readable")
}

#[test]
fn happy_path_eight_gpu_host_labels() {
    let report = parse_report(&fixture("h100.xml")).unwrap();
    let groups = group_by_chassis(&report);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].gpus.len(), 8);

    let desired = compute_desired(&groups);
    assert_eq!(desired["gpuscout.dev/chassis-count"], "1");
    assert_eq!(desired["gpuscout.dev/chassis-0"], groups[0].chassis);

    // One label per GPU, indices 0..7, values sorted ascending.
    let mut gpu_values = Vec::new();
    for j in 0..8 {
        gpu_values.push(desired[&format!("gpuscout.dev/chassis-0-gpu-{j}")].clone());
    }
    let mut sorted = gpu_values.clone();
    sorted.sort();
    assert_eq!(gpu_values, sorted);
    assert_eq!(desired.len(), 10); // count + chassis + 8 GPUs
}

#[tokio::test]
async fn happy_path_eight_gpu_host_records() {
    let report = parse_report(&fixture("h100.xml")).unwrap();
    let groups = group_by_chassis(&report);

    let records = build_records(
        "prod-us-east",
        "n1",
        "i-abc",
        "gpu-operator/ndp-xyz",
        &groups,
    );
    assert_eq!(records.len(), 8);
    for record in &records {
        record.validate().unwrap();
        assert_eq!(record.machine, "i-abc");
        assert_eq!(record.source, "gpu-operator/ndp-xyz");
        assert_eq!(record.chassis, groups[0].chassis);
    }

    let sink = RecordingSink::default();
    sink.write(&records).await.unwrap();
    assert_eq!(sink.records().len(), 8);
}

#[test]
fn grouping_preserves_chassis_gpu_pairs_exactly() {
    for name in ["h100.xml", "gb200.xml"] {
        let report = parse_report(&fixture(name)).unwrap();

        let mut raw_pairs: Vec<(String, String)> = report
            .gpus
            .iter()
            .map(|g| (g.platform_info.chassis_serial_number.clone(), g.serial.clone()))
            .collect();
        raw_pairs.sort();
        raw_pairs.dedup();

        let groups = group_by_chassis(&report);
        let mut grouped_pairs: Vec<(String, String)> = groups
            .iter()
            .flat_map(|g| g.gpus.iter().map(|s| (g.chassis.clone(), s.clone())))
            .collect();
        grouped_pairs.sort();

        assert_eq!(raw_pairs, grouped_pairs, "pairs drifted for {name}");

        let records = build_records("c", "n", "m", "ns/p", &groups);
        let mut record_pairs: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.chassis.clone(), r.gpu.clone()))
            .collect();
        record_pairs.sort();
        assert_eq!(raw_pairs, record_pairs, "record pairs drifted for {name}");
    }
}

#[test]
fn unknown_chassis_keeps_gpus_visible() {
    let doc = r#"<?xml version="1.0" ?>
<nvidia_smi_log>
  <timestamp>Mon Jun  2 10:00:00 2025</timestamp>
  <driver_version>570.86.10</driver_version>
  <cuda_version>12.8</cuda_version>
  <attached_gpus>2</attached_gpus>
  <gpu id="00000000:1B:00.0">
    <product_name>NVIDIA H100 PCIe</product_name>
    <serial>1654923050200</serial>
    <uuid>GPU-aaaa</uuid>
  </gpu>
  <gpu id="00000000:3B:00.0">
    <product_name>NVIDIA H100 PCIe</product_name>
    <serial>1654923050100</serial>
    <uuid>GPU-bbbb</uuid>
  </gpu>
</nvidia_smi_log>"#;

    let report = parse_report(doc.as_bytes()).unwrap();
    let groups = group_by_chassis(&report);
    assert_eq!(groups.len(), 1);
    assert!(groups[0].chassis.is_empty());

    // Labels fall back to bare gpu-<j> keys, sorted.
    let desired = compute_desired(&groups);
    assert_eq!(desired["gpuscout.dev/chassis-count"], "1");
    assert_eq!(desired["gpuscout.dev/gpu-0"], "1654923050100");
    assert_eq!(desired["gpuscout.dev/gpu-1"], "1654923050200");
    assert!(!desired.keys().any(|k| k.contains("chassis-0")));

    // Records stamp the sentinel so the batch still validates.
    let records = build_records("c", "n1", "i-abc", "ns/p", &groups);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.chassis == UNKNOWN_CHASSIS));
    for r in &records {
        r.validate().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn dedup_makes_dispatch_at_most_once_per_uid() {
    let report = parse_report(&fixture("h100.xml")).unwrap();
    let groups = group_by_chassis(&report);
    let seen = TtlSet::new();
    let sink = Arc::new(RecordingSink::default());

    // The same pod re-notified five times within the TTL window: the sink
    // sees exactly one batch of eight.
    for _ in 0..5 {
        let uid = "U1";
        if seen.has(uid) {
            continue;
        }
        seen.add(uid);
        let records = build_records("c", "n1", "i-abc", "gpu-operator/ndp-xyz", &groups);
        sink.write(&records).await.unwrap();
    }

    assert_eq!(sink.writes(), 1);
    assert_eq!(sink.records().len(), 8);
}
