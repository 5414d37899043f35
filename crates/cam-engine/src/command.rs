/// MAVLink command ids the engine issues.
pub const MAV_CMD_PREFLIGHT_CALIBRATION: u16 = 241;
pub const MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES: u16 = 520;
pub const MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS: u16 = 527;
pub const MAV_CMD_IMAGE_START_CAPTURE: u16 = 2000;
pub const MAV_CMD_VIDEO_START_CAPTURE: u16 = 2500;
pub const MAV_CMD_VIDEO_STOP_CAPTURE: u16 = 2501;

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub component_id: u8,
    pub command: u16,
    pub show_error: bool,
    pub params: [f32; 7],
}

/// Fire-and-forget command sender. Acknowledgments come back later as
/// COMMAND_ACK telemetry.
pub trait CommandLink {
    fn send_command(&mut self, component_id: u8, command: u16, show_error: bool, params: [f32; 7]);
}

/// Records commands instead of sending them. Used by `replay` and tests.
#[derive(Debug, Default)]
pub struct CommandLog {
    pub sent: Vec<SentCommand>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, command: u16) -> usize {
        self.sent.iter().filter(|c| c.command == command).count()
    }

    pub fn drain(&mut self) -> Vec<SentCommand> {
        std::mem::take(&mut self.sent)
    }
}

impl CommandLink for CommandLog {
    fn send_command(&mut self, component_id: u8, command: u16, show_error: bool, params: [f32; 7]) {
        self.sent.push(SentCommand { component_id, command, show_error, params });
    }
}
