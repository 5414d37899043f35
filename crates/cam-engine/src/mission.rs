/// PX4 auto sub-mode for mission execution.
pub const PX4_CUSTOM_SUB_MODE_AUTO_MISSION: u8 = 4;

/// PX4 packs `{reserved: u16, main_mode: u8, sub_mode: u8}` into the
/// heartbeat's little-endian custom_mode.
pub fn px4_main_mode(custom_mode: u32) -> u8 {
    ((custom_mode >> 16) & 0xFF) as u8
}

pub fn px4_sub_mode(custom_mode: u32) -> u8 {
    ((custom_mode >> 24) & 0xFF) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionEdge {
    Entered,
    /// Camera parameters may have been changed during the mission; callers
    /// re-fetch everything.
    Exited,
}

#[derive(Debug, Clone, Default)]
pub struct MissionModeDetector {
    in_mission: bool,
}

impl MissionModeDetector {
    pub fn in_mission(&self) -> bool {
        self.in_mission
    }

    pub fn on_heartbeat(&mut self, custom_mode: u32) -> Option<MissionEdge> {
        let is_mission = px4_sub_mode(custom_mode) == PX4_CUSTOM_SUB_MODE_AUTO_MISSION;
        match (self.in_mission, is_mission) {
            (true, false) => {
                self.in_mission = false;
                Some(MissionEdge::Exited)
            }
            (false, true) => {
                self.in_mission = true;
                Some(MissionEdge::Entered)
            }
            _ => None,
        }
    }
}
