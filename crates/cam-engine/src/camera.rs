use serde::Serialize;

use crate::params::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    Photo,
    Video,
    Undefined,
}

impl CameraMode {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => CameraMode::Photo,
            1 => CameraMode::Video,
            _ => CameraMode::Undefined,
        }
    }

    /// Value written to CAM_MODE.
    pub fn raw(&self) -> Option<ParamValue> {
        match self {
            CameraMode::Photo => Some(ParamValue::Int(0)),
            CameraMode::Video => Some(ParamValue::Int(1)),
            CameraMode::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Stopped,
    Running,
    Undefined,
}

impl VideoStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => VideoStatus::Stopped,
            1 => VideoStatus::Running,
            _ => VideoStatus::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    Idle,
    InProgress,
    IntervalIdle,
    IntervalInProgress,
    Undefined,
}

impl PhotoStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => PhotoStatus::Idle,
            1 => PhotoStatus::InProgress,
            2 => PhotoStatus::IntervalIdle,
            3 => PhotoStatus::IntervalInProgress,
            _ => PhotoStatus::Undefined,
        }
    }

    pub fn accepts_capture(&self) -> bool {
        matches!(self, PhotoStatus::Idle | PhotoStatus::IntervalIdle)
    }
}

/// State owned by the generic camera layer; the engine reads and updates it
/// from capture status, storage and settings reports.
#[derive(Debug, Clone)]
pub struct CameraState {
    pub mode: CameraMode,
    pub video_status: VideoStatus,
    pub photo_status: PhotoStatus,
    pub storage_total_mib: f32,
    pub storage_free_mib: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            mode: CameraMode::Undefined,
            video_status: VideoStatus::Undefined,
            photo_status: PhotoStatus::Undefined,
            storage_total_mib: 0.0,
            storage_free_mib: 0.0,
        }
    }
}

/// Camera firmware: `major.minor.build_country`, one byte each, LSB first.
pub fn firmware_version_string(raw: u32) -> String {
    let country = ((raw >> 24) & 0xFF) as u8 as char;
    let build = (raw >> 16) & 0xFF;
    let minor = (raw >> 8) & 0xFF;
    let major = raw & 0xFF;
    format!("{}.{}.{}_{}", major, minor, build, country)
}

/// Gimbal firmware from AUTOPILOT_VERSION.flight_sw_version: bytes 3, 2, 1.
pub fn gimbal_version_string(flight_sw_version: u32) -> String {
    let major = (flight_sw_version >> 24) & 0xFF;
    let minor = (flight_sw_version >> 16) & 0xFF;
    let patch = (flight_sw_version >> 8) & 0xFF;
    format!("{}.{}.{}", major, minor, patch)
}

/// Metering spot position. The device stores it as percentages of the video
/// frame, `(x << 8) | y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

pub fn encode_spot_area(x: i32, y: i32, size: VideoSize) -> Option<u16> {
    if size.width == 0 || size.height == 0 {
        return None;
    }
    let fx = x.max(0) as f32;
    let fy = y.max(0) as f32;
    let px = ((fx / size.width as f32) * 100.0).min(100.0) as u16;
    let py = ((fy / size.height as f32) * 100.0).min(100.0) as u16;
    Some((px << 8) | py)
}

pub fn decode_spot_area(raw: u32, size: VideoSize) -> (i32, i32) {
    let px = ((raw >> 8) & 0xFF) as f32;
    let py = (raw & 0xFF) as f32;
    let x = (px * size.width as f32 / 100.0) as i32;
    let y = (py * size.height as f32 / 100.0) as i32;
    (x, y)
}
