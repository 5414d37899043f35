use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

pub const CAM_ASPECTRATIO: &str = "CAM_ASPECTRATIO";
pub const CAM_EV: &str = "CAM_EV";
pub const CAM_EXPMODE: &str = "CAM_EXPMODE";
pub const CAM_ISO: &str = "CAM_ISO";
pub const CAM_METERING: &str = "CAM_METERING";
pub const CAM_MODE: &str = "CAM_MODE";
pub const CAM_SHUTTERSPD: &str = "CAM_SHUTTERSPD";
pub const CAM_SPOTAREA: &str = "CAM_SPOTAREA";
pub const CAM_VIDFMT: &str = "CAM_VIDFMT";
pub const CAM_VIDRES: &str = "CAM_VIDRES";
pub const CAM_WBMODE: &str = "CAM_WBMODE";

pub const CAM_IRPALETTE: &str = "CAM_IRPALETTE";
pub const CAM_IRTEMPRENA: &str = "CAM_IRTEMPRENA";
pub const CAM_IRTEMPMAX: &str = "CAM_IRTEMPMAX";
pub const CAM_IRTEMPMIN: &str = "CAM_IRTEMPMIN";
pub const CAM_TEMPSTATUS: &str = "CAM_TEMPSTATUS";

/// Exposure mode value for manual exposure.
pub const EXPMODE_MANUAL: i64 = 1;

/// Raw value of a device parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bytes(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(v.round() as i64),
            ParamValue::Bytes(_) => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            ParamValue::Int(v) => *v != 0,
            ParamValue::Float(v) => *v != 0.0,
            ParamValue::Bytes(b) => b.iter().any(|x| *x != 0),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParamValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Value equality the way the device compares option values: numbers by
    /// value regardless of int/float representation.
    pub fn same_as(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Bytes(a), ParamValue::Bytes(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Key/value parameter collaborator. The engine never talks to the wire
/// directly; implementations decide how `set` and `request*` reach the device.
pub trait ParamStore {
    fn get(&self, name: &str) -> Option<ParamValue>;

    /// Write a value to the device (and the local copy).
    fn set(&mut self, name: &str, value: ParamValue);

    /// Update the local copy only, e.g. for values reported by the device.
    fn store(&mut self, name: &str, value: ParamValue);

    fn request(&mut self, name: &str);

    fn request_all(&mut self);

    /// Device-advertised legal values, if the parameter is enumerated.
    fn legal_values(&self, name: &str) -> Option<&[ParamValue]>;
}

/// Pending wire operation produced by [`ParamCache`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    Set { name: String, value: ParamValue },
    Request { name: String },
    RequestAll,
}

/// In-memory parameter store that queues wire operations for a link task to
/// drain.
#[derive(Debug, Default)]
pub struct ParamCache {
    values: BTreeMap<String, ParamValue>,
    legal: BTreeMap<String, Vec<ParamValue>>,
    outbox: VecDeque<ParamOp>,
}

impl ParamCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_legal_values(&mut self, name: &str, values: Vec<ParamValue>) {
        self.legal.insert(name.to_string(), values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn drain_ops(&mut self) -> Vec<ParamOp> {
        self.outbox.drain(..).collect()
    }
}

impl ParamStore for ParamCache {
    fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value.clone());
        // A newer write to the same key replaces the queued one.
        self.outbox.retain(|op| !matches!(op, ParamOp::Set { name: n, .. } if n == name));
        self.outbox.push_back(ParamOp::Set { name: name.to_string(), value });
    }

    fn store(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    fn request(&mut self, name: &str) {
        let op = ParamOp::Request { name: name.to_string() };
        if !self.outbox.contains(&op) {
            self.outbox.push_back(op);
        }
    }

    fn request_all(&mut self) {
        if !self.outbox.contains(&ParamOp::RequestAll) {
            self.outbox.push_back(ParamOp::RequestAll);
        }
    }

    fn legal_values(&self, name: &str) -> Option<&[ParamValue]> {
        self.legal.get(name).map(|v| v.as_slice())
    }
}
