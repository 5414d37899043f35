//! Snapping of reported values onto the device's advertised value sets.
//!
//! Shutter speed and ISO may come back as measured values rather than one of
//! the predefined options. They are mapped onto the nearest legal option.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::ParamValue;

/// Debounce before a corrected value is written back to the device.
pub const WRITE_BACK_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapKind {
    /// Distance measured on floats (shutter speed).
    Float,
    /// Distance measured on integers (ISO).
    Integer,
}

/// Nearest legal value by absolute distance. An equal distance seen later
/// replaces the earlier candidate.
pub fn snap_f64(requested: f64, legal: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for &v in legal {
        let diff = (requested - v).abs();
        if best.map_or(true, |(d, _)| diff <= d) {
            best = Some((diff, v));
        }
    }
    best.map(|(_, v)| v)
}

pub fn snap_i64(requested: i64, legal: &[i64]) -> Option<i64> {
    let mut best: Option<(u64, i64)> = None;
    for &v in legal {
        let diff = requested.abs_diff(v);
        if best.map_or(true, |(d, _)| diff <= d) {
            best = Some((diff, v));
        }
    }
    best.map(|(_, v)| v)
}

/// Snap `requested` onto `legal` using the distance for `kind`. Returns `None`
/// when there is nothing to snap onto.
pub fn snap_value(kind: SnapKind, requested: &ParamValue, legal: &[ParamValue]) -> Option<ParamValue> {
    match kind {
        SnapKind::Float => {
            let req = requested.as_f64()?;
            let set: Vec<f64> = legal.iter().filter_map(ParamValue::as_f64).collect();
            let v = snap_f64(req, &set)?;
            // keep the legal entry's own representation
            legal.iter().find(|l| l.as_f64() == Some(v)).cloned()
        }
        SnapKind::Integer => {
            let req = requested.as_i64()?;
            let set: Vec<i64> = legal.iter().filter_map(ParamValue::as_i64).collect();
            let v = snap_i64(req, &set)?;
            legal.iter().find(|l| l.as_i64() == Some(v)).cloned()
        }
    }
}

/// Which parameters are snap-validated, and how.
#[derive(Debug, Clone, Default)]
pub struct SnapValidator {
    kinds: BTreeMap<String, SnapKind>,
}

impl SnapValidator {
    pub fn new(kinds: BTreeMap<String, SnapKind>) -> Self {
        Self { kinds }
    }

    /// Snapped value for `name`, or `value` unchanged when the parameter is not
    /// snap-validated or has no legal set yet.
    pub fn snap(&self, name: &str, value: &ParamValue, legal: Option<&[ParamValue]>) -> ParamValue {
        let Some(kind) = self.kinds.get(name) else { return value.clone() };
        let Some(legal) = legal.filter(|l| !l.is_empty()) else { return value.clone() };
        snap_value(*kind, value, legal).unwrap_or_else(|| value.clone())
    }

    /// True when `value` is already what it would snap to.
    pub fn validate(&self, name: &str, value: &ParamValue, legal: Option<&[ParamValue]>) -> bool {
        self.snap(name, value, legal).same_as(value)
    }
}

/// Parameters whose corrected value is waiting for the debounce timer. Only
/// names are kept; the value written is whatever is current when the timer
/// fires.
#[derive(Debug, Clone, Default)]
pub struct WriteBack {
    pending: Vec<String>,
}

impl WriteBack {
    pub fn push(&mut self, name: &str) {
        if !self.pending.iter().any(|n| n == name) {
            self.pending.push(name.to_string());
        }
    }

    /// Drop a queued correction superseded by a newer value.
    pub fn remove(&mut self, name: &str) {
        self.pending.retain(|n| n != name);
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHUTTER: [f64; 6] = [1.0 / 2000.0, 1.0 / 1000.0, 1.0 / 500.0, 1.0 / 250.0, 1.0 / 60.0, 1.0 / 30.0];
    const ISO: [i64; 6] = [100, 150, 200, 400, 800, 1600];

    #[test]
    fn test_snap_shutter_nearest() {
        assert_eq!(snap_f64(0.0011, &SHUTTER), Some(1.0 / 1000.0));
        assert_eq!(snap_f64(10.0, &SHUTTER), Some(1.0 / 30.0));
        assert_eq!(snap_f64(0.0, &SHUTTER), Some(1.0 / 2000.0));
    }

    #[test]
    fn test_snap_iso_nearest() {
        assert_eq!(snap_i64(180, &ISO), Some(200));
        assert_eq!(snap_i64(6400, &ISO), Some(1600));
        assert_eq!(snap_i64(-5, &ISO), Some(100));
    }

    #[test]
    fn test_snap_empty_set() {
        assert_eq!(snap_f64(1.0, &[]), None);
        assert_eq!(snap_i64(1, &[]), None);
    }

    #[test]
    fn test_snap_tie_takes_later_entry() {
        assert_eq!(snap_i64(125, &ISO), Some(150));
        assert_eq!(snap_i64(125, &[150, 100]), Some(100));
    }

    #[test]
    fn test_snap_is_member_and_minimal() {
        for req in [-50_i64, 0, 99, 101, 175, 300, 599, 601, 1200, 5000] {
            let s = snap_i64(req, &ISO).unwrap();
            assert!(ISO.contains(&s));
            for v in ISO {
                assert!(s.abs_diff(req) <= v.abs_diff(req), "req={} s={} v={}", req, s, v);
            }
        }
        for req in [0.0, 0.0007, 0.003, 0.01, 0.02, 0.5] {
            let s = snap_f64(req, &SHUTTER).unwrap();
            assert!(SHUTTER.contains(&s));
            for v in SHUTTER {
                assert!((s - req).abs() <= (v - req).abs());
            }
        }
    }

    #[test]
    fn test_snap_idempotent() {
        for req in [0, 120, 125, 333, 900, 4000] {
            let once = snap_i64(req, &ISO).unwrap();
            assert_eq!(snap_i64(once, &ISO), Some(once));
        }
        for req in [0.0001, 0.004, 0.05] {
            let once = snap_f64(req, &SHUTTER).unwrap();
            assert_eq!(snap_f64(once, &SHUTTER), Some(once));
        }
    }

    #[test]
    fn test_validator_passes_through_other_params() {
        let mut kinds = BTreeMap::new();
        kinds.insert("CAM_ISO".to_string(), SnapKind::Integer);
        let v = SnapValidator::new(kinds);
        let legal: Vec<ParamValue> = ISO.iter().map(|i| ParamValue::Int(*i)).collect();

        assert_eq!(v.snap("CAM_ISO", &ParamValue::Int(390), Some(&legal)), ParamValue::Int(400));
        assert_eq!(v.snap("CAM_EV", &ParamValue::Int(390), Some(&legal)), ParamValue::Int(390));
        assert_eq!(v.snap("CAM_ISO", &ParamValue::Int(390), None), ParamValue::Int(390));
        assert!(v.validate("CAM_ISO", &ParamValue::Int(400), Some(&legal)));
        assert!(!v.validate("CAM_ISO", &ParamValue::Int(390), Some(&legal)));
    }

    #[test]
    fn test_write_back_coalesces() {
        let mut wb = WriteBack::default();
        wb.push("CAM_ISO");
        wb.push("CAM_SHUTTERSPD");
        wb.push("CAM_ISO");
        assert_eq!(wb.take(), vec!["CAM_ISO".to_string(), "CAM_SHUTTERSPD".to_string()]);
        assert!(wb.is_empty());
    }

    #[test]
    fn test_write_back_remove() {
        let mut wb = WriteBack::default();
        wb.push("CAM_ISO");
        wb.push("CAM_EV");
        wb.remove("CAM_ISO");
        assert_eq!(wb.take(), vec!["CAM_EV".to_string()]);
    }
}
