use serde::{Deserialize, Serialize};

/// Well-known MAVLink component ids the engine filters on.
pub const COMP_ID_AUTOPILOT: u8 = 1;
pub const COMP_ID_CAMERA: u8 = 100;
pub const COMP_ID_GIMBAL: u8 = 154;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub system_id: u8,
    pub component_id: u8,
}

impl Source {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self { system_id, component_id }
    }
}

/// A decoded telemetry record. Framing and checksums are the link's business;
/// everything downstream only sees these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub source: Source,
    pub kind: RecordKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    AutopilotVersion {
        flight_sw_version: u32,
    },
    MountOrientation {
        roll: f32,
        pitch: f32,
        yaw: f32,
    },
    CommandAck {
        command: u16,
        result: u8,
        // 0..=254 in progress, 255 done
        progress: u8,
    },
    Heartbeat {
        custom_mode: u32,
        base_mode: u8,
    },
    CaptureStatus {
        image_status: u8,
        video_status: u8,
        recording_time_ms: u32,
        available_capacity_mib: f32,
    },
    StorageInformation {
        total_capacity_mib: f32,
        available_capacity_mib: f32,
    },
    CameraSettings {
        mode_id: u8,
    },
}

impl TelemetryRecord {
    pub fn new(source: Source, kind: RecordKind) -> Self {
        Self { source, kind }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            RecordKind::AutopilotVersion { .. } => "AUTOPILOT_VERSION",
            RecordKind::MountOrientation { .. } => "MOUNT_ORIENTATION",
            RecordKind::CommandAck { .. } => "COMMAND_ACK",
            RecordKind::Heartbeat { .. } => "HEARTBEAT",
            RecordKind::CaptureStatus { .. } => "CAMERA_CAPTURE_STATUS",
            RecordKind::StorageInformation { .. } => "STORAGE_INFORMATION",
            RecordKind::CameraSettings { .. } => "CAMERA_SETTINGS",
        }
    }
}
