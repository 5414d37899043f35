use serde::Serialize;

/// Progress value the gimbal reports when calibration has finished.
pub const PROGRESS_COMPLETE: u8 = 255;
/// Progress at which the tail timer is armed.
pub const PROGRESS_TAIL: u8 = 99;
/// Some gimbals stop acknowledging at 99%; assume completion after this.
pub const TAIL_TIMEOUT_MS: u64 = 5000;
/// Minimum change (degrees) before an orientation axis is republished.
pub const ORIENTATION_DEADBAND_DEG: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    Running,
    Finishing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailTimer {
    Arm,
    Cancel,
    Keep,
}

#[derive(Debug, Clone)]
pub struct GimbalCalibration {
    state: CalibrationState,
    progress: u8,
}

impl Default for GimbalCalibration {
    fn default() -> Self {
        Self { state: CalibrationState::Idle, progress: 0 }
    }
}

impl GimbalCalibration {
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Displayed progress, 0..=100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.state, CalibrationState::Running | CalibrationState::Finishing)
    }

    /// A new calibration command was issued.
    pub fn begin(&mut self) -> TailTimer {
        self.state = CalibrationState::Idle;
        self.progress = 0;
        TailTimer::Cancel
    }

    pub fn on_progress(&mut self, progress: u8) -> TailTimer {
        if progress == PROGRESS_COMPLETE {
            self.state = CalibrationState::Done;
            self.progress = 100;
            return TailTimer::Cancel;
        }
        if self.state == CalibrationState::Done {
            return TailTimer::Keep;
        }

        self.progress = progress;
        if progress == PROGRESS_TAIL {
            self.state = CalibrationState::Finishing;
            return TailTimer::Arm;
        }
        if progress > 0 || self.state == CalibrationState::Finishing {
            self.state = CalibrationState::Running;
        }
        TailTimer::Keep
    }

    /// Tail timer fired. Returns true when it forced completion.
    pub fn on_tail_timeout(&mut self) -> bool {
        if self.progress != PROGRESS_TAIL {
            return false;
        }
        self.progress = 100;
        self.state = CalibrationState::Done;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Roll,
    Pitch,
    Yaw,
}

/// Last published mount orientation.
#[derive(Debug, Clone, Default)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub has_data: bool,
}

impl Orientation {
    /// Axes that moved past the deadband; their stored values are updated.
    pub fn update(&mut self, roll: f32, pitch: f32, yaw: f32) -> Vec<(Axis, f32)> {
        let mut changed = Vec::new();
        for (axis, slot, v) in [
            (Axis::Roll, &mut self.roll, roll),
            (Axis::Pitch, &mut self.pitch, pitch),
            (Axis::Yaw, &mut self.yaw, yaw),
        ] {
            if (*slot - v).abs() > ORIENTATION_DEADBAND_DEG {
                *slot = v;
                changed.push((axis, v));
            }
        }
        changed
    }
}
