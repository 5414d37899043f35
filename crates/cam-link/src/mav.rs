use std::sync::Arc;

use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavParamType, MavState, MavType, COMMAND_LONG_DATA,
        HEARTBEAT_DATA, PARAM_REQUEST_LIST_DATA, PARAM_REQUEST_READ_DATA, PARAM_SET_DATA, PARAM_VALUE_DATA,
    },
    MavConnection, MavHeader,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use cam_engine::command::{
    CommandLink, MAV_CMD_IMAGE_START_CAPTURE, MAV_CMD_PREFLIGHT_CALIBRATION,
    MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES, MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS,
    MAV_CMD_VIDEO_START_CAPTURE, MAV_CMD_VIDEO_STOP_CAPTURE,
};
use cam_engine::params::{ParamOp, ParamValue};
use cam_proto::telemetry::{RecordKind, Source, TelemetryRecord};

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkInput {
    Telemetry(TelemetryRecord),
    Param {
        source: Source,
        name: String,
        value: ParamValue,
        index: u16,
        count: u16,
    },
}

pub struct CamLink {
    conn: Conn,
    hdr: MavHeader,
    target_sys: u8,
    camera_comp: u8,
}

impl CamLink {
    pub fn open(dev: &str, baud: u32, sys_id: u8, comp_id: u8, target_sys: u8, camera_comp: u8) -> Result<Self> {
        // quick validate device
        let _ = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open camera serial device {}", dev))?;

        let url = format!("serial:{}:{}", dev, baud);
        let link = Self::connect(&url, sys_id, comp_id, target_sys, camera_comp)?;
        info!("camera link: opened {} @ {}", dev, baud);
        Ok(link)
    }

    /// Any mavlink connection string (`udpin:`, `tcpout:`, `serial:`).
    pub fn connect(url: &str, sys_id: u8, comp_id: u8, target_sys: u8, camera_comp: u8) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url).with_context(|| format!("mavlink connect {}", url))?;
        Ok(Self {
            conn: Arc::from(conn),
            hdr: MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 },
            target_sys,
            camera_comp,
        })
    }

    /// Handle for a blocking reader thread.
    pub fn reader(&self) -> LinkReader {
        LinkReader { conn: Arc::clone(&self.conn) }
    }

    pub fn send_heartbeat(&mut self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    pub fn command_long(&mut self, component_id: u8, command: u16, params: [f32; 7]) -> Result<()> {
        let Some(cmd) = mav_cmd(command) else {
            anyhow::bail!("unsupported command id {}", command);
        };
        let msg = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: component_id,
            command: cmd,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        debug!("camera link: COMMAND_LONG {:?} -> comp {}", cmd, component_id);
        self.send(MavMessage::COMMAND_LONG(msg))
    }

    /// Put a queued parameter operation on the wire.
    pub fn apply_param_op(&mut self, op: &ParamOp) -> Result<()> {
        let msg = match op {
            ParamOp::Set { name, value } => {
                let Some((param_value, param_type)) = encode_param_value(value) else {
                    warn!("camera link: {} has no standard wire encoding, not sent", name);
                    return Ok(());
                };
                MavMessage::PARAM_SET(PARAM_SET_DATA {
                    param_value,
                    target_system: self.target_sys,
                    target_component: self.camera_comp,
                    param_id: encode_param_id(name),
                    param_type,
                })
            }
            ParamOp::Request { name } => MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
                param_index: -1,
                target_system: self.target_sys,
                target_component: self.camera_comp,
                param_id: encode_param_id(name),
            }),
            ParamOp::RequestAll => MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
                target_system: self.target_sys,
                target_component: self.camera_comp,
            }),
        };
        self.send(msg)
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }
}

impl CommandLink for CamLink {
    fn send_command(&mut self, component_id: u8, command: u16, show_error: bool, params: [f32; 7]) {
        if let Err(e) = self.command_long(component_id, command, params) {
            if show_error {
                warn!("camera link: command {} failed: {:#}", command, e);
            } else {
                debug!("camera link: command {} failed: {:#}", command, e);
            }
        }
    }
}

pub struct LinkReader {
    conn: Conn,
}

impl LinkReader {
    /// Blocks until the next message. Returns Ok(None) for messages nothing
    /// downstream cares about and for receive errors.
    pub fn recv(&self) -> Result<Option<LinkInput>> {
        match self.conn.recv() {
            Ok((hdr, msg)) => Ok(decode(&hdr, &msg)),
            Err(e) => {
                debug!("camera link: recv error {:?}", e);
                Ok(None)
            }
        }
    }

    pub fn recv_raw(&self) -> Option<(MavHeader, MavMessage)> {
        self.conn.recv().ok()
    }
}

pub fn decode(hdr: &MavHeader, msg: &MavMessage) -> Option<LinkInput> {
    let source = Source::new(hdr.system_id, hdr.component_id);
    let kind = match msg {
        MavMessage::HEARTBEAT(d) => RecordKind::Heartbeat { custom_mode: d.custom_mode, base_mode: d.base_mode.bits() },
        MavMessage::COMMAND_ACK(d) => RecordKind::CommandAck {
            command: d.command as u16,
            result: d.result as u8,
            progress: d.progress,
        },
        MavMessage::AUTOPILOT_VERSION(d) => RecordKind::AutopilotVersion { flight_sw_version: d.flight_sw_version },
        MavMessage::MOUNT_ORIENTATION(d) => RecordKind::MountOrientation { roll: d.roll, pitch: d.pitch, yaw: d.yaw },
        MavMessage::CAMERA_CAPTURE_STATUS(d) => RecordKind::CaptureStatus {
            image_status: d.image_status,
            video_status: d.video_status,
            recording_time_ms: d.recording_time_ms,
            available_capacity_mib: d.available_capacity,
        },
        MavMessage::STORAGE_INFORMATION(d) => RecordKind::StorageInformation {
            total_capacity_mib: d.total_capacity,
            available_capacity_mib: d.available_capacity,
        },
        MavMessage::CAMERA_SETTINGS(d) => RecordKind::CameraSettings { mode_id: d.mode_id as u8 },
        MavMessage::PARAM_VALUE(d) => return Some(decode_param_value(source, d)),
        _ => return None,
    };
    Some(LinkInput::Telemetry(TelemetryRecord::new(source, kind)))
}

fn decode_param_value(source: Source, d: &PARAM_VALUE_DATA) -> LinkInput {
    let value = match d.param_type {
        MavParamType::MAV_PARAM_TYPE_REAL32 | MavParamType::MAV_PARAM_TYPE_REAL64 => {
            ParamValue::Float(d.param_value as f64)
        }
        // integers travel bytewise inside the float
        MavParamType::MAV_PARAM_TYPE_UINT8 => ParamValue::Int((d.param_value.to_bits() & 0xFF) as i64),
        MavParamType::MAV_PARAM_TYPE_INT8 => ParamValue::Int(d.param_value.to_bits() as u8 as i8 as i64),
        MavParamType::MAV_PARAM_TYPE_UINT16 => ParamValue::Int((d.param_value.to_bits() & 0xFFFF) as i64),
        MavParamType::MAV_PARAM_TYPE_INT16 => ParamValue::Int(d.param_value.to_bits() as u16 as i16 as i64),
        MavParamType::MAV_PARAM_TYPE_UINT32 => ParamValue::Int(d.param_value.to_bits() as i64),
        _ => ParamValue::Int(d.param_value.to_bits() as i32 as i64),
    };
    LinkInput::Param {
        source,
        name: decode_param_id(&d.param_id),
        value,
        index: d.param_index,
        count: d.param_count,
    }
}

fn encode_param_value(value: &ParamValue) -> Option<(f32, MavParamType)> {
    match value {
        ParamValue::Float(f) => Some((*f as f32, MavParamType::MAV_PARAM_TYPE_REAL32)),
        ParamValue::Int(i) => Some((f32::from_bits(*i as i32 as u32), MavParamType::MAV_PARAM_TYPE_INT32)),
        ParamValue::Bytes(_) => None,
    }
}

pub fn encode_param_id(name: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    for (slot, b) in id.iter_mut().zip(name.bytes()) {
        *slot = b;
    }
    id
}

pub fn decode_param_id(id: &[u8; 16]) -> String {
    let end = id.iter().position(|b| *b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}

fn mav_cmd(command: u16) -> Option<MavCmd> {
    Some(match command {
        MAV_CMD_PREFLIGHT_CALIBRATION => MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
        MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES => MavCmd::MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES,
        MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS => MavCmd::MAV_CMD_REQUEST_CAMERA_CAPTURE_STATUS,
        MAV_CMD_IMAGE_START_CAPTURE => MavCmd::MAV_CMD_IMAGE_START_CAPTURE,
        MAV_CMD_VIDEO_START_CAPTURE => MavCmd::MAV_CMD_VIDEO_START_CAPTURE,
        MAV_CMD_VIDEO_STOP_CAPTURE => MavCmd::MAV_CMD_VIDEO_STOP_CAPTURE,
        _ => return None,
    })
}
