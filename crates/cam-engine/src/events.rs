use serde::Serialize;

use crate::camera::{CameraMode, PhotoStatus, VideoStatus};
use crate::gimbal::Axis;
use crate::shutter::FailReason;
use crate::thermal::IrTempStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    Shutter,
    Beep,
    Error,
}

/// State changes published by the engine, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CameraEvent {
    Sound { sound: Sound, count: u8 },
    ActionFailed { reason: FailReason },
    CameraMode { mode: CameraMode },
    VideoStatus { status: VideoStatus },
    PhotoStatus { status: PhotoStatus },
    RecordTime { elapsed_ms: u64 },
    ActiveSettings { settings: Vec<String> },
    GimbalProgress { progress: u8 },
    GimbalCalibrating { on: bool },
    GimbalVersion { version: String },
    GimbalAxis { axis: Axis, degrees: f32 },
    GimbalData,
    MissionMode { active: bool },
    FactsLoaded,
    ParameterCorrected { name: String, value: String },
    IrTemperature { status: IrTempStatus },
    PaletteChanged { bar: &'static str },
    SpotAreaChanged,
}
