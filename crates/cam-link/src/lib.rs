pub mod mav;
pub mod autodetect;
pub mod state;

use serde::Deserialize;

use cam_proto::telemetry::{COMP_ID_AUTOPILOT, COMP_ID_CAMERA, COMP_ID_GIMBAL};

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub enable: bool,

    /// If true, probe candidate serial ports/bauds and pick the first that
    /// yields a MAVLink HEARTBEAT.
    #[serde(default)]
    pub autodetect: bool,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidates (paths).
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (ground side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// Vehicle system id commands and parameter requests are sent to.
    pub target_sys: u8,

    #[serde(default = "default_camera_comp")]
    pub camera_comp_id: u8,
    #[serde(default = "default_gimbal_comp")]
    pub gimbal_comp_id: u8,
    /// Only this component's heartbeats drive mission-mode detection.
    #[serde(default = "default_vehicle_comp")]
    pub vehicle_comp_id: u8,

    /// Optional: heartbeat send interval. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,
}

fn default_camera_comp() -> u8 {
    COMP_ID_CAMERA
}

fn default_gimbal_comp() -> u8 {
    COMP_ID_GIMBAL
}

fn default_vehicle_comp() -> u8 {
    COMP_ID_AUTOPILOT
}

impl LinkConfig {
    pub fn heartbeat_period(&self) -> std::time::Duration {
        let hz = self.send_heartbeat_hz.filter(|hz| *hz > 0.0).unwrap_or(1.0);
        std::time::Duration::from_secs_f32(1.0 / hz)
    }
}
