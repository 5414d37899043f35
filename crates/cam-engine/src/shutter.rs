//! Physical shutter buttons on the remote controller.

use serde::{Deserialize, Serialize};

use crate::camera::{CameraMode, PhotoStatus, VideoStatus};

/// Free storage (MiB) below which captures are refused.
pub const MIN_FREE_STORAGE_MIB: f32 = 250.0;
/// Time the camera needs to finish a mode switch before it accepts a capture.
pub const SETTLE_DELAY_MS: u64 = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    CameraShutter,
    VideoShutter,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEdge {
    pub button: Button,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettledAction {
    TakePhoto,
    StartVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    NoStorage,
    LowStorage,
    PhotoBusy,
    Recording,
    UndefinedMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterAction {
    Ignore,
    Fail(FailReason),
    TakePhoto,
    ToggleVideo,
    SwitchThen { mode: CameraMode, then: SettledAction },
}

/// Snapshot of what the dispatcher needs to decide.
#[derive(Debug, Clone, Copy)]
pub struct ShutterContext {
    pub mode: CameraMode,
    pub video_status: VideoStatus,
    pub photo_status: PhotoStatus,
    pub storage_total_mib: f32,
    pub storage_free_mib: f32,
    pub photos_in_video_mode: bool,
}

pub fn dispatch(edge: ButtonEdge, ctx: &ShutterContext) -> ShutterAction {
    if !edge.pressed {
        return ShutterAction::Ignore;
    }
    if matches!(edge.button, Button::Other(_)) {
        return ShutterAction::Ignore;
    }

    if ctx.storage_total_mib <= 0.0 {
        return ShutterAction::Fail(FailReason::NoStorage);
    }
    if ctx.storage_free_mib < MIN_FREE_STORAGE_MIB {
        return ShutterAction::Fail(FailReason::LowStorage);
    }
    if ctx.photo_status != PhotoStatus::Idle {
        return ShutterAction::Fail(FailReason::PhotoBusy);
    }

    match edge.button {
        Button::CameraShutter => match ctx.mode {
            CameraMode::Photo => ShutterAction::TakePhoto,
            CameraMode::Video => {
                if ctx.video_status != VideoStatus::Stopped {
                    ShutterAction::Fail(FailReason::Recording)
                } else if ctx.photos_in_video_mode {
                    ShutterAction::TakePhoto
                } else {
                    ShutterAction::SwitchThen { mode: CameraMode::Photo, then: SettledAction::TakePhoto }
                }
            }
            CameraMode::Undefined => ShutterAction::Fail(FailReason::UndefinedMode),
        },
        Button::VideoShutter => match ctx.mode {
            CameraMode::Video => ShutterAction::ToggleVideo,
            _ => ShutterAction::SwitchThen { mode: CameraMode::Video, then: SettledAction::StartVideo },
        },
        Button::Other(_) => ShutterAction::Ignore,
    }
}

/// Action for a press that arrives while a mode switch is still settling.
/// The mode the button belongs to is selected and its capture deferred.
pub fn deferred(button: Button) -> ShutterAction {
    match button {
        Button::CameraShutter => ShutterAction::SwitchThen { mode: CameraMode::Photo, then: SettledAction::TakePhoto },
        Button::VideoShutter => ShutterAction::SwitchThen { mode: CameraMode::Video, then: SettledAction::StartVideo },
        Button::Other(_) => ShutterAction::Ignore,
    }
}
