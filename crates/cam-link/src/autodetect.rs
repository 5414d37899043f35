use anyhow::Result;
use mavlink::common::MavMessage;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::CamLink;
use crate::LinkConfig;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub camera_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/serial0".into(),
        "/dev/ttyS0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Probe every candidate port/baud pair. A port is chosen as soon as a
/// heartbeat from the camera component shows up; a vehicle heartbeat alone is
/// recorded but keeps probing.
pub fn autodetect_link(cfg: &LinkConfig) -> Result<AutodetectResult> {
    let devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = cfg.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));

    let mut probes = Vec::new();
    let mut fallback: Option<(String, u32)> = None;

    for dev in devs {
        for baud in &bauds {
            let start = Instant::now();
            let mut hb_seen = false;
            let mut camera_seen = false;
            let note;

            match CamLink::open(&dev, *baud, cfg.sys_id, cfg.comp_id, cfg.target_sys, cfg.camera_comp_id) {
                Ok(link) => {
                    let reader = link.reader();
                    while start.elapsed() < timeout {
                        if let Some((hdr, MavMessage::HEARTBEAT(_))) = reader.recv_raw() {
                            hb_seen = true;
                            if hdr.component_id == cfg.camera_comp_id {
                                camera_seen = true;
                                break;
                            }
                        }
                        std::thread::sleep(Duration::from_millis(25));
                    }
                    note = match (hb_seen, camera_seen) {
                        (_, true) => "camera heartbeat".to_string(),
                        (true, false) => "heartbeat, no camera".to_string(),
                        _ => "no heartbeat".to_string(),
                    };
                }
                Err(e) => {
                    note = format!("open/connect failed: {}", e);
                    warn!("camera link autodetect probe failed dev={} baud={} err={}", dev, baud, e);
                }
            }

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen,
                camera_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
            if camera_seen {
                info!("camera link autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
            if hb_seen && fallback.is_none() {
                fallback = Some((dev.clone(), *baud));
            }
        }
    }

    if let Some((dev, baud)) = &fallback {
        info!("camera link autodetect: no camera heartbeat, using vehicle link {} @ {}", dev, baud);
    }
    Ok(AutodetectResult { chosen: fallback, probes })
}
