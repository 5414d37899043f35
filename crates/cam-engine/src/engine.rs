//! Camera/gimbal state reconciliation.
//!
//! The engine is driven by three kinds of input: decoded telemetry, parameter
//! updates and timer expiry. Each call runs to completion and publishes its
//! state changes on the event channel before returning.

use cam_proto::telemetry::{RecordKind, TelemetryRecord, COMP_ID_AUTOPILOT, COMP_ID_CAMERA, COMP_ID_GIMBAL};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::camera::{
    decode_spot_area, encode_spot_area, firmware_version_string, gimbal_version_string, CameraMode,
    CameraState, PhotoStatus, VideoSize, VideoStatus,
};
use crate::command::{
    CommandLink, MAV_CMD_IMAGE_START_CAPTURE, MAV_CMD_PREFLIGHT_CALIBRATION,
    MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES, MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS,
    MAV_CMD_VIDEO_START_CAPTURE, MAV_CMD_VIDEO_STOP_CAPTURE,
};
use crate::events::{CameraEvent, Sound};
use crate::exclusion::{is_trigger, resolve_active, ActiveSettings};
use crate::gimbal::{CalibrationState, GimbalCalibration, Orientation, TailTimer, TAIL_TIMEOUT_MS};
use crate::mission::{MissionEdge, MissionModeDetector};
use crate::params::*;
use crate::recording::{format_record_time, RecordingTracker, RecordingTransition, RECORD_TICK_MS};
use crate::shutter::{self, ButtonEdge, SettledAction, ShutterAction, ShutterContext, SETTLE_DELAY_MS};
use crate::snap::{SnapValidator, WriteBack, WRITE_BACK_DELAY_MS};
use crate::thermal::{
    palette_bar, IrTempStatus, IR_ROI_CENTER_AREA, IR_STATUS_FIRST_POLL_MS, IR_STATUS_PERIOD_MS, PALETTE_BARS,
};
use crate::timer::TimerQueue;
use crate::variant::VariantConfig;

/// Delay before asking for capture status after an exposure setting changed.
pub const CAPTURE_STATUS_REQUEST_DELAY_MS: u64 = 1000;

/// Changing any of these invalidates the shutter until the camera reports
/// its capture status again.
const EXPOSURE_PARAMS: [&str; 7] = [CAM_EV, CAM_EXPMODE, CAM_ISO, CAM_METERING, CAM_MODE, CAM_SHUTTERSPD, CAM_WBMODE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKey {
    RecordTick,
    GimbalTail,
    WriteBack,
    Settle,
    IrStatus,
    CaptureStatusRequest,
}

/// Component ids used for filtering telemetry and addressing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentIds {
    pub camera: u8,
    /// The vehicle's primary component; only its heartbeats count.
    pub vehicle: u8,
    pub gimbal: u8,
}

impl Default for ComponentIds {
    fn default() -> Self {
        Self { camera: COMP_ID_CAMERA, vehicle: COMP_ID_AUTOPILOT, gimbal: COMP_ID_GIMBAL }
    }
}

pub struct CameraEngine<P, L> {
    variant: VariantConfig,
    ids: ComponentIds,
    params: P,
    link: L,
    events: mpsc::UnboundedSender<CameraEvent>,

    camera: CameraState,
    snap: SnapValidator,
    write_back: WriteBack,
    active: ActiveSettings,
    recording: RecordingTracker,
    calibration: GimbalCalibration,
    orientation: Orientation,
    mission: MissionModeDetector,
    timers: TimerQueue<TimerKey>,
    settle: Option<SettledAction>,

    params_complete: bool,
    firmware_version: Option<u32>,
    gimbal_version: Option<String>,
    ir_roi: Option<ParamValue>,
    ir_valid: bool,
    ir_status: IrTempStatus,
    video_size: VideoSize,
}

impl<P: ParamStore, L: CommandLink> CameraEngine<P, L> {
    pub fn new(
        variant: VariantConfig,
        ids: ComponentIds,
        params: P,
        link: L,
    ) -> (Self, mpsc::UnboundedReceiver<CameraEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let snap = SnapValidator::new(variant.snap.clone());
        let mut engine = Self {
            variant,
            ids,
            params,
            link,
            events: tx,
            camera: CameraState::default(),
            snap,
            write_back: WriteBack::default(),
            active: ActiveSettings::default(),
            recording: RecordingTracker::new(),
            calibration: GimbalCalibration::default(),
            orientation: Orientation::default(),
            mission: MissionModeDetector::default(),
            timers: TimerQueue::new(),
            settle: None,
            params_complete: false,
            firmware_version: None,
            gimbal_version: None,
            ir_roi: None,
            ir_valid: false,
            ir_status: IrTempStatus::default(),
            video_size: VideoSize::default(),
        };

        info!(
            "camera engine: model={} thermal={} photos_in_video={}",
            engine.variant.model,
            engine.variant.is_thermal(),
            engine.variant.photos_in_video_mode
        );
        // gimbal firmware version comes back as AUTOPILOT_VERSION
        engine.link.send_command(
            engine.ids.gimbal,
            MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES,
            true,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
        (engine, rx)
    }

    // ----- accessors -----

    pub fn variant(&self) -> &VariantConfig {
        &self.variant
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn parameters_complete(&self) -> bool {
        self.params_complete
    }

    pub fn active_settings(&self) -> &[String] {
        self.active.snapshot()
    }

    pub fn record_time_ms(&self) -> u64 {
        self.recording.elapsed_ms()
    }

    pub fn record_time_str(&self) -> String {
        format_record_time(self.recording.elapsed_ms())
    }

    pub fn gimbal_progress(&self) -> u8 {
        self.calibration.progress()
    }

    pub fn gimbal_calibrating(&self) -> bool {
        self.calibration.is_calibrating()
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    pub fn gimbal_version(&self) -> Option<&str> {
        self.gimbal_version.as_deref()
    }

    pub fn gimbal_orientation(&self) -> Option<(f32, f32, f32)> {
        let o = &self.orientation;
        o.has_data.then_some((o.roll, o.pitch, o.yaw))
    }

    pub fn in_mission_mode(&self) -> bool {
        self.mission.in_mission()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.firmware_version.map(firmware_version_string)
    }

    pub fn set_firmware_version(&mut self, raw: u32) {
        self.firmware_version = Some(raw);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    // ----- gated parameter accessors -----

    fn visible_fact(&self, name: &str) -> Option<ParamValue> {
        if self.params_complete && !self.variant.is_thermal() {
            self.params.get(name)
        } else {
            None
        }
    }

    fn thermal_fact(&self, name: &str) -> Option<ParamValue> {
        if self.params_complete && self.variant.is_thermal() {
            self.params.get(name)
        } else {
            None
        }
    }

    pub fn exposure_mode(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_EXPMODE)
    }

    pub fn ev(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_EV)
    }

    pub fn iso(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_ISO)
    }

    pub fn shutter_speed(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_SHUTTERSPD)
    }

    pub fn wb(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_WBMODE)
    }

    pub fn metering_mode(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_METERING)
    }

    pub fn video_res(&self) -> Option<ParamValue> {
        self.visible_fact(CAM_VIDRES)
    }

    pub fn aspect_ratio(&self) -> Option<ParamValue> {
        if self.params_complete {
            self.params.get(CAM_ASPECTRATIO)
        } else {
            None
        }
    }

    pub fn ir_palette(&self) -> Option<ParamValue> {
        self.thermal_fact(CAM_IRPALETTE)
    }

    pub fn min_temp(&self) -> Option<ParamValue> {
        self.thermal_fact(CAM_IRTEMPMIN)
    }

    pub fn max_temp(&self) -> Option<ParamValue> {
        self.thermal_fact(CAM_IRTEMPMAX)
    }

    pub fn ir_roi(&self) -> Option<&ParamValue> {
        self.ir_roi.as_ref()
    }

    pub fn ir_temp_status(&self) -> Option<IrTempStatus> {
        self.ir_valid.then_some(self.ir_status)
    }

    fn ir_range_enabled(&self) -> bool {
        self.params.get(CAM_IRTEMPRENA).map_or(false, |v| v.as_bool())
    }

    pub fn ir_min_temp(&self) -> f64 {
        if self.ir_range_enabled() {
            return self.min_temp().and_then(|v| v.as_f64()).unwrap_or(0.0);
        }
        self.ir_status.all_area_min_c()
    }

    pub fn ir_max_temp(&self) -> f64 {
        if self.ir_range_enabled() {
            return self.max_temp().and_then(|v| v.as_f64()).unwrap_or(0.0);
        }
        self.ir_status.all_area_max_c()
    }

    pub fn palette_bar(&self) -> &'static str {
        if !self.variant.is_thermal() {
            return PALETTE_BARS[0];
        }
        palette_bar(self.params.get(CAM_IRPALETTE).and_then(|v| v.as_i64()))
    }

    pub fn video_size(&self) -> VideoSize {
        self.video_size
    }

    pub fn set_video_size(&mut self, width: u32, height: u32) {
        self.video_size = VideoSize { width, height };
    }

    pub fn spot_area(&self) -> (i32, i32) {
        match self.visible_fact(CAM_SPOTAREA).and_then(|v| v.as_i64()) {
            Some(raw) => decode_spot_area(raw as u32, self.video_size),
            None => (0, 0),
        }
    }

    pub fn set_spot_area(&mut self, x: i32, y: i32) {
        if self.variant.is_thermal() || !self.params_complete || self.params.get(CAM_SPOTAREA).is_none() {
            return;
        }
        if let Some(raw) = encode_spot_area(x, y, self.video_size) {
            debug!("set spot x={} y={} raw={:#06x}", raw >> 8, raw & 0xFF, raw);
            self.params.set(CAM_SPOTAREA, ParamValue::Int(raw as i64));
        }
    }

    // ----- telemetry -----

    pub fn handle_telemetry(&mut self, rec: &TelemetryRecord, now_ms: u64) {
        let src = rec.source;
        match &rec.kind {
            RecordKind::AutopilotVersion { flight_sw_version } => {
                if src.component_id == self.ids.gimbal {
                    let version = gimbal_version_string(*flight_sw_version);
                    info!("gimbal version {}", version);
                    self.gimbal_version = Some(version.clone());
                    self.emit(CameraEvent::GimbalVersion { version });
                }
            }
            RecordKind::MountOrientation { roll, pitch, yaw } => {
                for (axis, degrees) in self.orientation.update(*roll, *pitch, *yaw) {
                    self.emit(CameraEvent::GimbalAxis { axis, degrees });
                }
                if !self.orientation.has_data {
                    self.orientation.has_data = true;
                    self.emit(CameraEvent::GimbalData);
                }
            }
            RecordKind::CommandAck { command, result, progress } => {
                if *command == MAV_CMD_PREFLIGHT_CALIBRATION && src.component_id == self.ids.gimbal {
                    self.handle_gimbal_result(*result, *progress, now_ms);
                }
            }
            RecordKind::Heartbeat { custom_mode, .. } => {
                if src.component_id == self.ids.vehicle {
                    self.handle_heartbeat(*custom_mode);
                }
            }
            RecordKind::CaptureStatus { image_status, video_status, recording_time_ms, available_capacity_mib } => {
                if src.component_id == self.ids.camera {
                    self.handle_capture_status(
                        PhotoStatus::from_raw(*image_status),
                        VideoStatus::from_raw(*video_status),
                        *recording_time_ms as u64,
                        *available_capacity_mib,
                        now_ms,
                    );
                }
            }
            RecordKind::StorageInformation { total_capacity_mib, available_capacity_mib } => {
                if src.component_id == self.ids.camera {
                    self.camera.storage_total_mib = *total_capacity_mib;
                    self.camera.storage_free_mib = *available_capacity_mib;
                    debug!("storage total={}MiB free={}MiB", total_capacity_mib, available_capacity_mib);
                }
            }
            RecordKind::CameraSettings { mode_id } => {
                if src.component_id == self.ids.camera {
                    self.set_camera_mode(CameraMode::from_raw(*mode_id as i64));
                }
            }
        }
    }

    fn handle_heartbeat(&mut self, custom_mode: u32) {
        match self.mission.on_heartbeat(custom_mode) {
            Some(MissionEdge::Exited) => {
                info!("transition out of mission mode, re-fetching camera parameters");
                self.params.request_all();
                self.emit(CameraEvent::MissionMode { active: false });
            }
            Some(MissionEdge::Entered) => {
                info!("transition into mission mode");
                self.emit(CameraEvent::MissionMode { active: true });
            }
            None => {}
        }
    }

    fn handle_capture_status(
        &mut self,
        photo: PhotoStatus,
        video: VideoStatus,
        recording_time_ms: u64,
        available_mib: f32,
        now_ms: u64,
    ) {
        if available_mib.is_finite() && available_mib >= 0.0 {
            self.camera.storage_free_mib = available_mib;
        }
        self.set_photo_status(photo);
        self.set_video_status(video, now_ms);
        if let Some(elapsed_ms) = self.recording.reanchor(recording_time_ms, now_ms) {
            self.emit(CameraEvent::RecordTime { elapsed_ms });
        }
    }

    fn handle_gimbal_result(&mut self, result: u8, progress: u8, now_ms: u64) {
        match self.calibration.on_progress(progress) {
            TailTimer::Arm => self.timers.arm(TimerKey::GimbalTail, now_ms, TAIL_TIMEOUT_MS),
            TailTimer::Cancel => {
                self.timers.cancel(TimerKey::GimbalTail);
            }
            TailTimer::Keep => {}
        }
        debug!("gimbal calibration result={} progress={}", result, progress);
        self.emit(CameraEvent::GimbalProgress { progress: self.calibration.progress() });
        self.emit(CameraEvent::GimbalCalibrating { on: self.calibration.is_calibrating() });
    }

    /// Start an accelerometer calibration of the gimbal.
    pub fn calibrate_gimbal(&mut self) {
        if let TailTimer::Cancel = self.calibration.begin() {
            self.timers.cancel(TimerKey::GimbalTail);
        }
        self.link.send_command(
            self.ids.gimbal,
            MAV_CMD_PREFLIGHT_CALIBRATION,
            true,
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        );
        self.emit(CameraEvent::GimbalProgress { progress: 0 });
        self.emit(CameraEvent::GimbalCalibrating { on: false });
    }

    // ----- camera status -----

    fn set_camera_mode(&mut self, mode: CameraMode) {
        if self.camera.mode != mode {
            self.camera.mode = mode;
            self.emit(CameraEvent::CameraMode { mode });
        }
    }

    fn set_photo_status(&mut self, status: PhotoStatus) {
        if self.camera.photo_status != status {
            self.camera.photo_status = status;
            self.emit(CameraEvent::PhotoStatus { status });
        }
    }

    fn set_video_status(&mut self, status: VideoStatus, now_ms: u64) {
        let old = self.camera.video_status;
        if old == status {
            return;
        }
        self.camera.video_status = status;
        self.emit(CameraEvent::VideoStatus { status });

        match self.recording.on_status(old, status, now_ms) {
            RecordingTransition::Started => {
                self.timers.arm_periodic(TimerKey::RecordTick, now_ms, RECORD_TICK_MS);
                self.play(Sound::Beep, 1);
                self.refresh_active_settings();
            }
            RecordingTransition::Stopped { silent } => {
                self.timers.cancel(TimerKey::RecordTick);
                self.emit(CameraEvent::RecordTime { elapsed_ms: 0 });
                if !silent {
                    self.play(Sound::Beep, 2);
                }
                self.refresh_active_settings();
            }
            RecordingTransition::Unchanged => {}
        }
    }

    fn refresh_active_settings(&mut self) {
        let locked: &[String] = if self.recording.is_running() && self.variant.locks_settings_while_recording() {
            &self.variant.recording_locked
        } else {
            &[]
        };
        let next = resolve_active(&self.variant.settings, &self.variant.exclusions, |n| self.params.get(n), locked);
        if self.active.update(next) {
            debug!("active settings: {:?}", self.active.snapshot());
            self.emit(CameraEvent::ActiveSettings { settings: self.active.snapshot().to_vec() });
        }
    }

    // ----- parameters -----

    /// Value reported by the camera. Snap-validated parameters are mapped onto
    /// their legal set and the correction is written back after a debounce.
    pub fn receive_parameter(&mut self, name: &str, value: ParamValue, now_ms: u64) {
        let snapped = self.snap.snap(name, &value, self.params.legal_values(name));
        if snapped.same_as(&value) {
            self.write_back.remove(name);
        } else {
            debug!("{} adjusted: {} ==> {}", name, value, snapped);
            // the first correction of a batch sets the deadline
            if self.write_back.is_empty() {
                self.timers.arm(TimerKey::WriteBack, now_ms, WRITE_BACK_DELAY_MS);
            }
            self.write_back.push(name);
        }
        self.params.store(name, snapped);
        self.on_param_changed(name, now_ms);
    }

    /// Value entered by the user.
    pub fn set_parameter(&mut self, name: &str, value: ParamValue, now_ms: u64) {
        let snapped = self.snap.snap(name, &value, self.params.legal_values(name));
        self.write_back.remove(name);
        self.params.set(name, snapped);
        self.on_param_changed(name, now_ms);
    }

    /// True when `value` is already legal for `name`.
    pub fn validate_parameter(&self, name: &str, value: &ParamValue) -> bool {
        self.snap.validate(name, value, self.params.legal_values(name))
    }

    /// Change notification from the parameter layer.
    pub fn on_param_changed(&mut self, name: &str, now_ms: u64) {
        if self.variant.is_thermal() {
            if name == CAM_TEMPSTATUS {
                self.handle_ir_status(now_ms);
                return;
            }
            if name == CAM_IRPALETTE {
                self.emit(CameraEvent::PaletteChanged { bar: self.palette_bar() });
            }
        } else if name == CAM_SPOTAREA {
            self.emit(CameraEvent::SpotAreaChanged);
        }

        if name == CAM_MODE {
            if let Some(raw) = self.params.get(CAM_MODE).and_then(|v| v.as_i64()) {
                self.set_camera_mode(CameraMode::from_raw(raw));
            }
        }
        if is_trigger(&self.variant.exclusions, name) {
            self.refresh_active_settings();
        }
        if EXPOSURE_PARAMS.contains(&name) {
            // shutter stays disabled until the camera reports again
            self.set_photo_status(PhotoStatus::Undefined);
            self.timers.arm(TimerKey::CaptureStatusRequest, now_ms, CAPTURE_STATUS_REQUEST_DELAY_MS);
        }
    }

    /// All parameters have been fetched once.
    pub fn on_parameters_ready(&mut self, now_ms: u64) {
        if self.params_complete {
            return;
        }
        info!("all parameters loaded for {}", self.variant.model);
        self.params_complete = true;
        if self.variant.is_thermal() {
            self.ir_roi = Some(ParamValue::Int(IR_ROI_CENTER_AREA));
        }
        self.refresh_active_settings();
        self.emit(CameraEvent::FactsLoaded);
        if self.variant.is_thermal() && !self.ir_valid {
            self.timers.arm(TimerKey::IrStatus, now_ms, IR_STATUS_FIRST_POLL_MS);
        }
    }

    fn handle_ir_status(&mut self, now_ms: u64) {
        let Some(status) = self.params.get(CAM_TEMPSTATUS).and_then(|v| v.as_bytes().and_then(IrTempStatus::decode))
        else {
            warn!("{}: malformed IR temperature status", CAM_TEMPSTATUS);
            return;
        };
        debug!("{}", status);
        self.ir_status = status;
        if !self.ir_valid {
            self.ir_valid = true;
            self.timers.arm_periodic(TimerKey::IrStatus, now_ms, IR_STATUS_PERIOD_MS);
        }
        self.emit(CameraEvent::IrTemperature { status });
    }

    fn send_updates(&mut self) {
        let pending = self.write_back.take();
        if pending.is_empty() {
            return;
        }
        let manual = self.params.get(CAM_EXPMODE).and_then(|v| v.as_i64()) == Some(EXPMODE_MANUAL);
        if self.variant.is_thermal() || !manual {
            debug!("dropping {} corrected parameter(s), not in manual exposure", pending.len());
            return;
        }
        for name in pending {
            let Some(value) = self.params.get(&name) else { continue };
            info!("writing back corrected {}={}", name, value);
            self.emit(CameraEvent::ParameterCorrected { name: name.clone(), value: value.to_string() });
            self.params.set(&name, value);
        }
    }

    // ----- actions -----

    pub fn take_photo(&mut self) -> bool {
        let blocked = self.camera.mode == CameraMode::Video && !self.variant.photos_in_video_mode;
        let ok = !blocked && self.camera.photo_status.accepts_capture();
        if ok {
            self.link.send_command(
                self.ids.camera,
                MAV_CMD_IMAGE_START_CAPTURE,
                false,
                [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            );
            self.set_photo_status(PhotoStatus::InProgress);
            self.play(Sound::Shutter, 1);
        } else {
            self.play(Sound::Error, 1);
        }
        ok
    }

    pub fn start_video(&mut self) -> bool {
        let ok = self.camera.video_status != VideoStatus::Running;
        if ok {
            self.link.send_command(self.ids.camera, MAV_CMD_VIDEO_START_CAPTURE, false, [0.0; 7]);
        } else {
            self.play(Sound::Error, 1);
        }
        ok
    }

    pub fn stop_video(&mut self) -> bool {
        let ok = self.camera.video_status == VideoStatus::Running;
        if ok {
            self.link.send_command(self.ids.camera, MAV_CMD_VIDEO_STOP_CAPTURE, false, [0.0; 7]);
        } else {
            self.play(Sound::Error, 1);
        }
        ok
    }

    pub fn toggle_video(&mut self) -> bool {
        if self.camera.video_status == VideoStatus::Running {
            self.stop_video()
        } else {
            self.start_video()
        }
    }

    pub fn set_photo_mode(&mut self) {
        self.switch_mode(CameraMode::Photo);
    }

    pub fn set_video_mode(&mut self) {
        self.switch_mode(CameraMode::Video);
    }

    fn switch_mode(&mut self, mode: CameraMode) {
        if self.camera.mode == mode {
            return;
        }
        if let Some(raw) = mode.raw() {
            debug!("switching camera to {:?}", mode);
            self.params.set(CAM_MODE, raw);
            self.set_camera_mode(mode);
        }
    }

    /// Physical button edge from the remote controller.
    pub fn handle_button(&mut self, edge: ButtonEdge, now_ms: u64) {
        let ctx = ShutterContext {
            mode: self.camera.mode,
            video_status: self.camera.video_status,
            photo_status: self.camera.photo_status,
            storage_total_mib: self.camera.storage_total_mib,
            storage_free_mib: self.camera.storage_free_mib,
            photos_in_video_mode: self.variant.photos_in_video_mode,
        };
        let mut action = shutter::dispatch(edge, &ctx);
        if self.settle.is_some() && !matches!(action, ShutterAction::Ignore | ShutterAction::Fail(_)) {
            // the camera is still switching: this press replaces the deferred action
            action = shutter::deferred(edge.button);
        }
        match action {
            ShutterAction::Ignore => {}
            ShutterAction::Fail(reason) => {
                info!("{:?} refused: {:?}", edge.button, reason);
                self.emit(CameraEvent::ActionFailed { reason });
                self.play(Sound::Error, 1);
            }
            ShutterAction::TakePhoto => {
                self.take_photo();
            }
            ShutterAction::ToggleVideo => {
                self.toggle_video();
            }
            ShutterAction::SwitchThen { mode, then } => {
                self.switch_mode(mode);
                self.settle = Some(then);
                self.timers.arm(TimerKey::Settle, now_ms, SETTLE_DELAY_MS);
            }
        }
    }

    // ----- timers -----

    /// Run every timer due at `now_ms`.
    pub fn poll_timers(&mut self, now_ms: u64) {
        while let Some(key) = self.timers.pop_due(now_ms) {
            match key {
                TimerKey::RecordTick => {
                    if self.recording.is_running() {
                        let elapsed_ms = self.recording.tick(now_ms);
                        self.emit(CameraEvent::RecordTime { elapsed_ms });
                    }
                }
                TimerKey::GimbalTail => {
                    if self.calibration.on_tail_timeout() {
                        info!("gimbal calibration end timeout");
                        self.emit(CameraEvent::GimbalProgress { progress: self.calibration.progress() });
                        self.emit(CameraEvent::GimbalCalibrating { on: false });
                    }
                }
                TimerKey::WriteBack => self.send_updates(),
                TimerKey::Settle => match self.settle.take() {
                    Some(SettledAction::TakePhoto) => {
                        self.take_photo();
                    }
                    Some(SettledAction::StartVideo) => {
                        self.start_video();
                    }
                    None => {}
                },
                TimerKey::IrStatus => {
                    if self.variant.is_thermal() {
                        self.params.request(CAM_TEMPSTATUS);
                    }
                }
                TimerKey::CaptureStatusRequest => {
                    self.link.send_command(
                        self.ids.camera,
                        MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS,
                        false,
                        [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    );
                }
            }
        }
    }

    fn play(&self, sound: Sound, count: u8) {
        self.emit(CameraEvent::Sound { sound, count });
    }

    fn emit(&self, ev: CameraEvent) {
        // receiver gone means nobody is listening; state is still current
        let _ = self.events.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandLog;
    use crate::exclusion::ExclusionRule;
    use crate::params::{ParamCache, ParamOp};
    use crate::shutter::{Button, FailReason};
    use crate::variant::ParamSpec;
    use cam_proto::telemetry::Source;

    type Engine = CameraEngine<ParamCache, CommandLog>;

    fn variant(model: &str) -> VariantConfig {
        let mut v = VariantConfig::new(model);
        v.settings = [CAM_MODE, CAM_EXPMODE, CAM_EV, CAM_ISO, CAM_SHUTTERSPD, CAM_VIDRES, CAM_VIDFMT]
            .iter()
            .map(|s| s.to_string())
            .collect();
        v.exclusions = vec![ExclusionRule {
            param: CAM_EXPMODE.into(),
            value: ParamValue::Int(0),
            excludes: vec![CAM_ISO.into(), CAM_SHUTTERSPD.into()],
        }];
        v.params = vec![
            ParamSpec {
                name: CAM_ISO.into(),
                default: Some(ParamValue::Int(100)),
                values: [100, 200, 400, 800, 1600].iter().map(|i| ParamValue::Int(*i)).collect(),
            },
            ParamSpec {
                name: CAM_SHUTTERSPD.into(),
                default: None,
                values: [0.0005, 0.001, 0.002, 0.004].iter().map(|f| ParamValue::Float(*f)).collect(),
            },
        ];
        v
    }

    fn engine_for(v: VariantConfig) -> (Engine, mpsc::UnboundedReceiver<CameraEvent>) {
        let cache = v.param_cache();
        let (mut e, mut rx) = CameraEngine::new(v, ComponentIds::default(), cache, CommandLog::new());
        e.link_mut().drain();
        drain(&mut rx);
        (e, rx)
    }

    fn engine() -> (Engine, mpsc::UnboundedReceiver<CameraEvent>) {
        engine_for(variant("E90"))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CameraEvent>) -> Vec<CameraEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn rec(component_id: u8, kind: RecordKind) -> TelemetryRecord {
        TelemetryRecord::new(Source::new(1, component_id), kind)
    }

    fn ack(progress: u8) -> TelemetryRecord {
        rec(
            COMP_ID_GIMBAL,
            RecordKind::CommandAck { command: MAV_CMD_PREFLIGHT_CALIBRATION, result: 0, progress },
        )
    }

    fn heartbeat(sub_mode: u8) -> TelemetryRecord {
        rec(COMP_ID_AUTOPILOT, RecordKind::Heartbeat { custom_mode: (sub_mode as u32) << 24 | 4 << 16, base_mode: 0 })
    }

    fn capture(video_status: u8, recording_time_ms: u32) -> TelemetryRecord {
        rec(
            COMP_ID_CAMERA,
            RecordKind::CaptureStatus {
                image_status: 0,
                video_status,
                recording_time_ms,
                available_capacity_mib: 30_000.0,
            },
        )
    }

    /// Camera idle in `mode` with plenty of storage.
    fn ready(e: &mut Engine, mode: u8) {
        e.handle_telemetry(
            &rec(
                COMP_ID_CAMERA,
                RecordKind::StorageInformation { total_capacity_mib: 60_000.0, available_capacity_mib: 30_000.0 },
            ),
            0,
        );
        e.handle_telemetry(&rec(COMP_ID_CAMERA, RecordKind::CameraSettings { mode_id: mode }), 0);
        e.handle_telemetry(&capture(0, 0), 0);
    }

    fn press(button: Button) -> ButtonEdge {
        ButtonEdge { button, pressed: true }
    }

    #[test]
    fn test_requests_gimbal_version_on_start() {
        let v = variant("E90");
        let cache = v.param_cache();
        let (e, _rx) = CameraEngine::new(v, ComponentIds::default(), cache, CommandLog::new());
        assert_eq!(e.link().count(MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES), 1);
        assert_eq!(e.link().sent[0].component_id, COMP_ID_GIMBAL);
    }

    #[test]
    fn test_calibration_tail_timeout() {
        let (mut e, mut rx) = engine();
        for p in [0, 10, 50, 99] {
            e.handle_telemetry(&ack(p), 1000);
        }
        assert_eq!(e.calibration_state(), CalibrationState::Finishing);
        assert_eq!(e.next_deadline(), Some(6000));

        e.poll_timers(5999);
        assert_eq!(e.gimbal_progress(), 99);

        e.poll_timers(6000);
        assert_eq!(e.calibration_state(), CalibrationState::Done);
        assert_eq!(e.gimbal_progress(), 100);
        assert!(!e.gimbal_calibrating());
        let events = drain(&mut rx);
        assert_eq!(
            &events[events.len() - 2..],
            &[CameraEvent::GimbalProgress { progress: 100 }, CameraEvent::GimbalCalibrating { on: false }]
        );
    }

    #[test]
    fn test_calibration_complete_without_tail() {
        let (mut e, mut rx) = engine();
        for p in [0, 10, 50, 255] {
            e.handle_telemetry(&ack(p), 1000);
        }
        assert_eq!(e.calibration_state(), CalibrationState::Done);
        assert_eq!(e.gimbal_progress(), 100);
        assert_eq!(e.next_deadline(), None);

        // every update publishes both values
        let events = drain(&mut rx);
        assert_eq!(events.len(), 8);
        e.poll_timers(20_000);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_calibration_ack_from_other_component_ignored() {
        let (mut e, _rx) = engine();
        e.handle_telemetry(
            &rec(COMP_ID_CAMERA, RecordKind::CommandAck { command: MAV_CMD_PREFLIGHT_CALIBRATION, result: 0, progress: 30 }),
            0,
        );
        assert_eq!(e.calibration_state(), CalibrationState::Idle);
    }

    #[test]
    fn test_calibrate_gimbal_restarts() {
        let (mut e, _rx) = engine();
        e.handle_telemetry(&ack(255), 0);
        e.calibrate_gimbal();
        assert_eq!(e.calibration_state(), CalibrationState::Idle);
        let sent = e.link_mut().drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, MAV_CMD_PREFLIGHT_CALIBRATION);
        assert_eq!(sent[0].params[4], 1.0);
        e.handle_telemetry(&ack(5), 10);
        assert!(e.gimbal_calibrating());
    }

    #[test]
    fn test_mission_exit_refetches_once() {
        let (mut e, mut rx) = engine();
        e.handle_telemetry(&heartbeat(4), 0);
        assert!(e.in_mission_mode());
        assert!(e.params_mut().drain_ops().is_empty());

        e.handle_telemetry(&heartbeat(3), 1000);
        e.handle_telemetry(&heartbeat(3), 2000);
        e.handle_telemetry(&heartbeat(3), 3000);
        assert_eq!(e.params_mut().drain_ops(), vec![ParamOp::RequestAll]);
        assert_eq!(
            drain(&mut rx),
            vec![CameraEvent::MissionMode { active: true }, CameraEvent::MissionMode { active: false }]
        );
    }

    #[test]
    fn test_heartbeat_from_other_component_ignored() {
        let (mut e, _rx) = engine();
        e.handle_telemetry(
            &rec(COMP_ID_CAMERA, RecordKind::Heartbeat { custom_mode: 4 << 24, base_mode: 0 }),
            0,
        );
        assert!(!e.in_mission_mode());
    }

    #[test]
    fn test_photo_button_waits_for_settle() {
        let (mut e, _rx) = engine();
        ready(&mut e, 1);
        e.params_mut().drain_ops();

        e.handle_button(press(Button::CameraShutter), 10_000);
        assert_eq!(e.camera().mode, CameraMode::Photo);
        assert_eq!(
            e.params_mut().drain_ops(),
            vec![ParamOp::Set { name: CAM_MODE.into(), value: ParamValue::Int(0) }]
        );

        e.poll_timers(12_499);
        assert_eq!(e.link().count(MAV_CMD_IMAGE_START_CAPTURE), 0);
        e.poll_timers(12_500);
        assert_eq!(e.link().count(MAV_CMD_IMAGE_START_CAPTURE), 1);
    }

    #[test]
    fn test_low_storage_only_signals() {
        let (mut e, mut rx) = engine();
        ready(&mut e, 1);
        e.handle_telemetry(
            &rec(
                COMP_ID_CAMERA,
                RecordKind::StorageInformation { total_capacity_mib: 60_000.0, available_capacity_mib: 100.0 },
            ),
            0,
        );
        e.params_mut().drain_ops();
        e.link_mut().drain();
        drain(&mut rx);

        for b in [Button::CameraShutter, Button::VideoShutter] {
            e.handle_button(press(b), 0);
        }
        e.poll_timers(10_000);

        assert_eq!(e.camera().mode, CameraMode::Video);
        assert!(e.link().sent.is_empty());
        assert!(e.params_mut().drain_ops().is_empty());
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                CameraEvent::ActionFailed { reason: FailReason::LowStorage },
                CameraEvent::Sound { sound: Sound::Error, count: 1 },
                CameraEvent::ActionFailed { reason: FailReason::LowStorage },
                CameraEvent::Sound { sound: Sound::Error, count: 1 },
            ]
        );
    }

    #[test]
    fn test_repeated_video_press_supersedes_settle() {
        let (mut e, _rx) = engine();
        ready(&mut e, 0);
        e.handle_button(press(Button::VideoShutter), 0);
        e.handle_button(press(Button::VideoShutter), 1000);
        e.poll_timers(2500);
        assert_eq!(e.link().count(MAV_CMD_VIDEO_START_CAPTURE), 0);
        e.poll_timers(3500);
        assert_eq!(e.link().count(MAV_CMD_VIDEO_START_CAPTURE), 1);
    }

    #[test]
    fn test_press_during_settle_checks_storage() {
        let (mut e, mut rx) = engine();
        ready(&mut e, 0);
        e.handle_button(press(Button::VideoShutter), 0);
        assert_eq!(e.camera().mode, CameraMode::Video);

        e.handle_telemetry(
            &rec(
                COMP_ID_CAMERA,
                RecordKind::StorageInformation { total_capacity_mib: 60_000.0, available_capacity_mib: 100.0 },
            ),
            500,
        );
        e.params_mut().drain_ops();
        drain(&mut rx);

        e.handle_button(press(Button::CameraShutter), 1000);
        assert_eq!(e.camera().mode, CameraMode::Video);
        assert!(e.params_mut().drain_ops().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![
                CameraEvent::ActionFailed { reason: FailReason::LowStorage },
                CameraEvent::Sound { sound: Sound::Error, count: 1 },
            ]
        );
        assert_eq!(e.link().count(MAV_CMD_IMAGE_START_CAPTURE), 0);
    }

    #[test]
    fn test_video_button_toggles_in_video_mode() {
        let (mut e, _rx) = engine();
        ready(&mut e, 1);
        e.handle_button(press(Button::VideoShutter), 0);
        assert_eq!(e.link().count(MAV_CMD_VIDEO_START_CAPTURE), 1);
        e.handle_telemetry(&capture(1, 0), 100);
        e.handle_button(press(Button::VideoShutter), 5000);
        assert_eq!(e.link().count(MAV_CMD_VIDEO_STOP_CAPTURE), 1);
    }

    #[test]
    fn test_recording_session() {
        let (mut e, mut rx) = engine();
        ready(&mut e, 1);
        e.on_parameters_ready(0);
        assert!(e.active_settings().contains(&CAM_VIDRES.to_string()));
        drain(&mut rx);

        e.handle_telemetry(&capture(1, 0), 1000);
        assert!(!e.active_settings().contains(&CAM_VIDRES.to_string()));
        assert!(!e.active_settings().contains(&CAM_VIDFMT.to_string()));

        e.poll_timers(1333);
        e.poll_timers(1666);
        assert_eq!(e.record_time_ms(), 666);

        // camera is 200 ms ahead of us
        e.handle_telemetry(&capture(1, 866), 1666);
        assert_eq!(e.record_time_ms(), 866);
        e.poll_timers(1999);
        assert_eq!(e.record_time_ms(), 1199);
        assert_eq!(e.record_time_str(), "00:00:01");

        e.handle_telemetry(&capture(0, 0), 2100);
        assert_eq!(e.record_time_ms(), 0);
        assert!(e.active_settings().contains(&CAM_VIDRES.to_string()));

        let events = drain(&mut rx);
        assert!(events.contains(&CameraEvent::Sound { sound: Sound::Beep, count: 1 }));
        assert!(events.contains(&CameraEvent::Sound { sound: Sound::Beep, count: 2 }));
        let times: Vec<u64> = events
            .iter()
            .filter_map(|ev| match ev {
                CameraEvent::RecordTime { elapsed_ms } => Some(*elapsed_ms),
                _ => None,
            })
            .collect();
        assert_eq!(times, vec![0, 333, 666, 866, 1199, 0]);

        // tick stopped
        e.poll_timers(10_000);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_boot_status_is_silent() {
        let (mut e, mut rx) = engine();
        e.handle_telemetry(&capture(0, 0), 0);
        let events = drain(&mut rx);
        assert!(!events.iter().any(|ev| matches!(ev, CameraEvent::Sound { .. })));
        assert_eq!(e.camera().video_status, VideoStatus::Stopped);
    }

    #[test]
    fn test_thermal_keeps_settings_while_recording() {
        let mut v = variant("CGOET");
        v.settings.retain(|s| s != CAM_ISO && s != CAM_SHUTTERSPD);
        v.exclusions.clear();
        let (mut e, _rx) = engine_for(v);
        e.on_parameters_ready(0);
        e.handle_telemetry(&capture(1, 0), 10);
        assert!(e.active_settings().contains(&CAM_VIDRES.to_string()));
    }

    #[test]
    fn test_snap_write_back_in_manual_exposure() {
        let (mut e, mut rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(1), 0);
        e.params_mut().drain_ops();

        e.receive_parameter(CAM_ISO, ParamValue::Int(390), 1000);
        e.receive_parameter(CAM_SHUTTERSPD, ParamValue::Float(0.0011), 1050);
        e.receive_parameter(CAM_ISO, ParamValue::Int(1500), 1080);
        assert_eq!(e.params().get(CAM_ISO), Some(ParamValue::Int(1600)));
        assert!(e.params_mut().drain_ops().is_empty());

        // deadline set by the first correction of the batch
        e.poll_timers(1099);
        assert!(e.params_mut().drain_ops().is_empty());
        e.poll_timers(1100);
        assert_eq!(
            e.params_mut().drain_ops(),
            vec![
                ParamOp::Set { name: CAM_ISO.into(), value: ParamValue::Int(1600) },
                ParamOp::Set { name: CAM_SHUTTERSPD.into(), value: ParamValue::Float(0.001) },
            ]
        );
        assert!(drain(&mut rx)
            .iter()
            .any(|ev| matches!(ev, CameraEvent::ParameterCorrected { name, .. } if name == CAM_ISO)));
    }

    #[test]
    fn test_write_back_flushes_under_steady_reports() {
        let (mut e, _rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(1), 0);
        e.params_mut().drain_ops();

        for t in [0, 40, 80] {
            e.receive_parameter(CAM_ISO, ParamValue::Int(390), t);
        }
        e.poll_timers(100);
        assert_eq!(
            e.params_mut().drain_ops(),
            vec![ParamOp::Set { name: CAM_ISO.into(), value: ParamValue::Int(400) }]
        );
    }

    #[test]
    fn test_user_set_supersedes_write_back() {
        let (mut e, mut rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(1), 0);
        e.params_mut().drain_ops();

        e.receive_parameter(CAM_ISO, ParamValue::Int(390), 0);
        e.set_parameter(CAM_ISO, ParamValue::Int(800), 50);
        e.poll_timers(100);

        assert_eq!(e.params().get(CAM_ISO), Some(ParamValue::Int(800)));
        assert_eq!(
            e.params_mut().drain_ops(),
            vec![ParamOp::Set { name: CAM_ISO.into(), value: ParamValue::Int(800) }]
        );
        assert!(!drain(&mut rx).iter().any(|ev| matches!(ev, CameraEvent::ParameterCorrected { .. })));
    }

    #[test]
    fn test_device_report_supersedes_write_back() {
        let (mut e, _rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(1), 0);
        e.params_mut().drain_ops();

        e.receive_parameter(CAM_ISO, ParamValue::Int(390), 0);
        e.receive_parameter(CAM_ISO, ParamValue::Int(800), 50);
        e.poll_timers(100);

        assert_eq!(e.params().get(CAM_ISO), Some(ParamValue::Int(800)));
        assert!(!e
            .params_mut()
            .drain_ops()
            .iter()
            .any(|op| matches!(op, ParamOp::Set { .. })));
    }

    #[test]
    fn test_snap_write_back_dropped_in_auto_exposure() {
        let (mut e, _rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(0), 0);
        e.receive_parameter(CAM_ISO, ParamValue::Int(390), 0);
        e.poll_timers(1000);
        assert!(!e
            .params_mut()
            .drain_ops()
            .iter()
            .any(|op| matches!(op, ParamOp::Set { .. })));
        assert_eq!(e.params().get(CAM_ISO), Some(ParamValue::Int(400)));
    }

    #[test]
    fn test_legal_value_passes_without_write_back() {
        let (mut e, _rx) = engine();
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(1), 0);
        e.receive_parameter(CAM_ISO, ParamValue::Int(800), 0);
        assert!(e.validate_parameter(CAM_ISO, &ParamValue::Int(800)));
        assert!(!e.validate_parameter(CAM_ISO, &ParamValue::Int(801)));
        e.poll_timers(200);
        assert!(!e
            .params_mut()
            .drain_ops()
            .iter()
            .any(|op| matches!(op, ParamOp::Set { .. })));
    }

    #[test]
    fn test_exclusion_recompute_emits_once() {
        let (mut e, mut rx) = engine();
        e.on_parameters_ready(0);
        drain(&mut rx);

        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(0), 10);
        e.receive_parameter(CAM_EXPMODE, ParamValue::Int(0), 20);
        let updates: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|ev| matches!(ev, CameraEvent::ActiveSettings { .. }))
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            e.active_settings(),
            &[CAM_MODE, CAM_EXPMODE, CAM_EV, CAM_VIDRES, CAM_VIDFMT].map(String::from)
        );
    }

    #[test]
    fn test_exposure_change_requests_capture_status() {
        let (mut e, _rx) = engine();
        ready(&mut e, 0);
        e.receive_parameter(CAM_EV, ParamValue::Float(0.5), 5000);
        assert_eq!(e.camera().photo_status, PhotoStatus::Undefined);
        e.poll_timers(6000);
        assert_eq!(e.link().count(MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS), 1);
    }

    #[test]
    fn test_gated_accessors() {
        let (mut e, _rx) = engine();
        assert_eq!(e.iso(), None);
        e.on_parameters_ready(0);
        assert_eq!(e.iso(), Some(ParamValue::Int(100)));
        assert_eq!(e.ir_palette(), None);
        assert_eq!(e.ir_roi(), None);
    }

    #[test]
    fn test_thermal_status_polling() {
        let mut v = variant("CGOET");
        v.exclusions.clear();
        let (mut e, mut rx) = engine_for(v);
        e.on_parameters_ready(0);
        assert_eq!(e.iso(), None);
        assert_eq!(e.ir_roi(), Some(&ParamValue::Int(IR_ROI_CENTER_AREA)));

        e.poll_timers(100);
        assert_eq!(e.params_mut().drain_ops(), vec![ParamOp::Request { name: CAM_TEMPSTATUS.into() }]);

        let mut raw = Vec::new();
        for v in [40_i16, -5, 2150, 3620, -480] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        e.receive_parameter(CAM_TEMPSTATUS, ParamValue::Bytes(raw), 150);
        assert_eq!(e.ir_max_temp(), 36.2);
        assert!(drain(&mut rx).iter().any(|ev| matches!(ev, CameraEvent::IrTemperature { .. })));

        for now in [1150, 2150] {
            e.poll_timers(now);
            assert_eq!(e.params_mut().drain_ops(), vec![ParamOp::Request { name: CAM_TEMPSTATUS.into() }]);
        }
    }

    #[test]
    fn test_gimbal_orientation_and_version() {
        let (mut e, mut rx) = engine();
        e.handle_telemetry(&rec(COMP_ID_GIMBAL, RecordKind::AutopilotVersion { flight_sw_version: 0x0103_0200 }), 0);
        assert_eq!(e.gimbal_version(), Some("1.3.2"));
        e.handle_telemetry(&rec(COMP_ID_GIMBAL, RecordKind::MountOrientation { roll: 0.1, pitch: -30.0, yaw: 0.0 }), 0);
        assert_eq!(e.gimbal_orientation(), Some((0.0, -30.0, 0.0)));
        let events = drain(&mut rx);
        assert!(events.contains(&CameraEvent::GimbalData));
    }
}
