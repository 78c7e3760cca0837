//! Serial reading records
//!
//! One record is produced per (chassis, GPU) tuple observed in a pod. The
//! canonical field order is `cluster, node, machine, source, chassis, gpu,
//! time`; JSON uses the snake_case object form, CSV the headerless ordered
//! row.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::smi::ChassisGroup;

/// Sentinel stamped into the chassis field when the hardware reports none
pub const UNKNOWN_CHASSIS: &str = "na";

/// A single observation of a physical GPU behind a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialReading {
    /// Cluster the observation was made in
    pub cluster: String,
    /// Kubernetes node name hosting the pod
    pub node: String,
    /// Cloud instance identifier of the node (from the provider id)
    pub machine: String,
    /// Origin pod as `namespace/name`
    pub source: String,
    /// Chassis serial number, or [`UNKNOWN_CHASSIS`] when the hardware has none
    pub chassis: String,
    /// GPU serial number
    pub gpu: String,
    /// UTC wall-clock time the record was constructed
    pub time: DateTime<Utc>,
}

impl SerialReading {
    /// Check that every field is populated and the timestamp is non-zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cluster.is_empty() {
            return Err(Error::validation("cluster name is required"));
        }
        if self.node.is_empty() {
            return Err(Error::validation("node name is required"));
        }
        if self.machine.is_empty() {
            return Err(Error::validation("machine identifier is required"));
        }
        if self.source.is_empty() {
            return Err(Error::validation("source is required"));
        }
        if self.chassis.is_empty() {
            return Err(Error::validation("chassis serial is required"));
        }
        if self.gpu.is_empty() {
            return Err(Error::validation("GPU serial is required"));
        }
        if self.time.timestamp() == 0 && self.time.timestamp_subsec_nanos() == 0 {
            return Err(Error::validation("read time is required"));
        }
        Ok(())
    }

    /// Headerless CSV row in the canonical column order, RFC 3339 UTC time.
    pub fn csv_row(&self) -> [String; 7] {
        [
            self.cluster.clone(),
            self.node.clone(),
            self.machine.clone(),
            self.source.clone(),
            self.chassis.clone(),
            self.gpu.clone(),
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
        ]
    }
}

/// Expand chassis groups into validated records, one per (chassis, GPU) pair.
///
/// Groups with an empty chassis serial carry the [`UNKNOWN_CHASSIS`] sentinel
/// so chassis-less hardware still reaches the sink. Records that fail
/// validation are dropped with a warning; they never fail the batch.
pub fn build_records(
    cluster: &str,
    node: &str,
    machine: &str,
    source: &str,
    groups: &[ChassisGroup],
) -> Vec<SerialReading> {
    let mut records = Vec::new();
    for group in groups {
        let chassis = if group.chassis.is_empty() {
            UNKNOWN_CHASSIS.to_string()
        } else {
            group.chassis.clone()
        };
        for gpu in &group.gpus {
            let record = SerialReading {
                cluster: cluster.to_string(),
                node: node.to_string(),
                machine: machine.to_string(),
                source: source.to_string(),
                chassis: chassis.clone(),
                gpu: gpu.clone(),
                time: Utc::now(),
            };
            if let Err(err) = record.validate() {
                warn!(gpu = %gpu, error = %err, "dropping invalid record");
                continue;
            }
            records.push(record);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading() -> SerialReading {
        SerialReading {
            cluster: "prod-us-east".into(),
            node: "n1".into(),
            machine: "i-abc".into(),
            source: "gpu-operator/ndp-xyz".into(),
            chassis: "1660323002015".into(),
            gpu: "1654923050105".into(),
            time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn valid_reading_passes() {
        assert!(reading().validate().is_ok());
    }

    #[test]
    fn each_empty_field_is_rejected() {
        for field in 0..6 {
            let mut r = reading();
            match field {
                0 => r.cluster.clear(),
                1 => r.node.clear(),
                2 => r.machine.clear(),
                3 => r.source.clear(),
                4 => r.chassis.clear(),
                _ => r.gpu.clear(),
            }
            assert!(r.validate().is_err(), "field {field} should be required");
        }
    }

    #[test]
    fn zero_time_is_rejected() {
        let mut r = reading();
        r.time = Utc.timestamp_opt(0, 0).unwrap();
        assert!(r.validate().is_err());
    }

    #[test]
    fn csv_row_is_ordered_and_rfc3339() {
        let row = reading().csv_row();
        assert_eq!(row[0], "prod-us-east");
        assert_eq!(row[3], "gpu-operator/ndp-xyz");
        assert_eq!(row[4], "1660323002015");
        assert_eq!(row[5], "1654923050105");
        assert_eq!(row[6], "2025-06-01T12:00:00Z");
    }

    #[test]
    fn json_uses_snake_case_keys() {
        let json = serde_json::to_value(reading()).unwrap();
        for key in ["cluster", "node", "machine", "source", "chassis", "gpu", "time"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn unknown_chassis_gets_sentinel() {
        let groups = vec![ChassisGroup {
            chassis: String::new(),
            gpus: vec!["g-1".into(), "g-2".into()],
        }];
        let records = build_records("c", "n", "m", "ns/p", &groups);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.chassis == UNKNOWN_CHASSIS));
    }

    #[test]
    fn empty_gpu_serials_are_dropped_not_fatal() {
        let groups = vec![ChassisGroup {
            chassis: "ch-0".into(),
            gpus: vec!["".into(), "g-1".into()],
        }];
        let records = build_records("c", "n", "m", "ns/p", &groups);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].gpu, "g-1");
    }

    #[test]
    fn chassis_gpu_pairs_are_preserved() {
        let groups = vec![
            ChassisGroup {
                chassis: "ch-a".into(),
                gpus: vec!["g-1".into(), "g-2".into()],
            },
            ChassisGroup {
                chassis: "ch-b".into(),
                gpus: vec!["g-3".into()],
            },
        ];
        let records = build_records("c", "n", "m", "ns/p", &groups);
        let pairs: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.chassis.clone(), r.gpu.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("ch-a".into(), "g-1".into()),
                ("ch-a".into(), "g-2".into()),
                ("ch-b".into(), "g-3".into()),
            ]
        );
    }
}
