use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use cam_engine::command::{CommandLog, SentCommand};
use cam_engine::doctor as engine_doctor;
use cam_engine::params::ParamOp;
use cam_engine::shutter::ButtonEdge;
use cam_engine::{CameraEngine, CameraEvent, ComponentIds, ParamCache, ParamStore, ParamValue, VariantConfig};
use cam_proto::telemetry::TelemetryRecord;

use cam_link::autodetect::{autodetect_link, AutodetectResult};
use cam_link::mav::{CamLink, LinkInput};
use cam_link::state::{LinkStatus, ParamTracker};
use cam_link::LinkConfig;

use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "camctl", version, about = "camctl - camera and gimbal control over MAVLink")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run {
        /// Read shutter button edges as JSON lines from stdin (RC input handler).
        #[arg(long)]
        stdin_buttons: bool,
    },
    Link { #[command(subcommand)] cmd: LinkCmd },
    /// Feed a JSON-lines input script through the engine and print what it does.
    Replay {
        file: String,
        /// Keep running timers this long after the last step.
        #[arg(long, default_value_t = 10_000)]
        settle_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum LinkCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    link: Option<LinkConfig>,
    camera: VariantConfig,
}

impl Config {
    fn component_ids(&self) -> ComponentIds {
        match &self.link {
            Some(l) => ComponentIds { camera: l.camera_comp_id, vehicle: l.vehicle_comp_id, gimbal: l.gimbal_comp_id },
            None => ComponentIds::default(),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run { stdin_buttons } => run(&cfg, stdin_buttons).await?,
        Command::Link { cmd } => link_cmd(&cfg, cmd).await?,
        Command::Replay { file, settle_ms } => replay(&cfg, &file, settle_ms)?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    engine_doctor::check_variant(&cfg.camera)?;
    engine_doctor::check_param_defaults(&cfg.camera)?;
    engine_doctor::check_component_ids(&cfg.component_ids())?;
    info!(
        "doctor: camera {} thermal={} settings={}",
        cfg.camera.model,
        cfg.camera.is_thermal(),
        cfg.camera.settings.len()
    );

    if let Some(link) = &cfg.link {
        if link.enable {
            if link.autodetect {
                info!("doctor: link autodetect enabled (OK)");
            } else {
                anyhow::ensure!(
                    link.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                    "link.serial_dev missing"
                );
                anyhow::ensure!(link.baud.unwrap_or(0) > 0, "link.baud invalid");
            }
            anyhow::ensure!(link.send_heartbeat_hz.map_or(true, |hz| hz > 0.0), "link.send_heartbeat_hz must be > 0");
        }
    }

    info!("doctor: OK");
    Ok(())
}

async fn link_cmd(cfg: &Config, cmd: LinkCmd) -> Result<()> {
    match cmd {
        LinkCmd::Autodetect => {
            let link = cfg.link.as_ref().context("no [link] config section")?;
            anyhow::ensure!(link.enable, "link.enable=false");
            let res = autodetect_link(link)?;
            print_probes(&res);
            Ok(())
        }
    }
}

fn print_probes(res: &AutodetectResult) {
    match &res.chosen {
        Some((dev, baud)) => println!("CHOSEN: {} @ {}", dev, baud),
        None => println!("CHOSEN: none"),
    }
    for p in &res.probes {
        println!(
            "probe dev={} baud={} hb={} camera={} {}ms note={}",
            p.dev, p.baud, p.hb_seen, p.camera_seen, p.elapsed_ms, p.note
        );
    }
}

fn resolve_port(link: &LinkConfig) -> Result<(String, u32)> {
    if link.autodetect {
        let res = autodetect_link(link)?;
        if let Some((dev, baud)) = res.chosen {
            return Ok((dev, baud));
        }
        anyhow::bail!("link autodetect failed: no heartbeat found");
    }
    let dev = link.serial_dev.clone().context("link.serial_dev missing (autodetect=false)")?;
    let baud = link.baud.context("link.baud missing (autodetect=false)")?;
    Ok((dev, baud))
}

type LiveEngine = CameraEngine<ParamCache, CamLink>;

async fn run(cfg: &Config, stdin_buttons: bool) -> Result<()> {
    info!("run: starting");
    engine_doctor::check_variant(&cfg.camera)?;

    let link_cfg = cfg.link.as_ref().context("no [link] config section")?;
    anyhow::ensure!(link_cfg.enable, "link.enable=false");

    let (dev, baud) = resolve_port(link_cfg)?;
    let link = CamLink::open(&dev, baud, link_cfg.sys_id, link_cfg.comp_id, link_cfg.target_sys, link_cfg.camera_comp_id)
        .context("camera link open")?;
    let status = Arc::new(Mutex::new(LinkStatus::default()));
    if let Ok(mut st) = status.lock() {
        st.mark_connected(&dev, baud);
    }

    // Reader loop on its own thread (mavlink serial recv blocks); a blocking
    // tokio task would hold up runtime shutdown.
    let (tx, mut rx) = mpsc::unbounded_channel::<LinkInput>();
    let reader = link.reader();
    let status2 = status.clone();
    std::thread::spawn(move || loop {
        match reader.recv() {
            Ok(Some(input)) => {
                if let Ok(mut st) = status2.lock() {
                    if let LinkInput::Telemetry(rec) = &input {
                        st.last_msg = Some(rec.name().to_string());
                        if matches!(rec.kind, cam_proto::telemetry::RecordKind::Heartbeat { .. }) {
                            st.last_heartbeat = Some(std::time::Instant::now());
                        }
                    }
                }
                if tx.send(input).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("camera link reader: {:#}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    });

    let (btn_tx, mut buttons) = mpsc::unbounded_channel::<ButtonEdge>();
    if stdin_buttons {
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_button_line(&line) {
                    Ok(Some(edge)) => {
                        if btn_tx.send(edge).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("button input: {:#}", e),
                }
            }
        });
    } else {
        drop(btn_tx);
    }

    let ids = cfg.component_ids();
    let cache = cfg.camera.param_cache();
    let (mut engine, mut events) = CameraEngine::new(cfg.camera.clone(), ids, cache, link);
    let mut tracker = ParamTracker::default();
    let start = tokio::time::Instant::now();
    let now_ms = || start.elapsed().as_millis() as u64;

    engine.params_mut().request_all();
    flush(&mut engine, &mut events);

    let mut heartbeat = tokio::time::interval(link_cfg.heartbeat_period());
    loop {
        let deadline = match engine.next_deadline() {
            Some(ms) => start + Duration::from_millis(ms),
            None => tokio::time::Instant::now() + Duration::from_secs(3600),
        };

        tokio::select! {
            input = rx.recv() => {
                let Some(input) = input else {
                    warn!("camera link reader stopped");
                    break;
                };
                let now = now_ms();
                engine.poll_timers(now);
                match input {
                    LinkInput::Telemetry(rec) => engine.handle_telemetry(&rec, now),
                    LinkInput::Param { source, name, value, index, count } => {
                        if source.component_id == ids.camera {
                            engine.receive_parameter(&name, value, now);
                            if tracker.on_value(index, count) {
                                engine.on_parameters_ready(now);
                            }
                        }
                    }
                }
            }
            Some(edge) = buttons.recv() => {
                let now = now_ms();
                engine.poll_timers(now);
                engine.handle_button(edge, now);
            }
            _ = tokio::time::sleep_until(deadline) => {
                engine.poll_timers(now_ms());
            }
            _ = heartbeat.tick() => {
                if let Err(e) = engine.link_mut().send_heartbeat() {
                    debug!("heartbeat send failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupted");
                break;
            }
        }
        flush(&mut engine, &mut events);
    }

    if let Ok(st) = status.lock() {
        info!(
            "run: link {:?} @ {:?} last={:?} hb_age={:?}",
            st.port,
            st.baud,
            st.last_msg,
            st.hb_age()
        );
    }
    Ok(())
}

/// Push queued parameter operations to the wire and log published events.
fn flush(engine: &mut LiveEngine, events: &mut mpsc::UnboundedReceiver<CameraEvent>) {
    let ops = engine.params_mut().drain_ops();
    for op in &ops {
        if let Err(e) = engine.link_mut().apply_param_op(op) {
            warn!("param op {:?} failed: {:#}", op, e);
        }
    }
    while let Ok(ev) = events.try_recv() {
        let ts = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        match serde_json::to_string(&ev) {
            Ok(json) => info!("event ts={} {}", ts, json),
            Err(e) => warn!("event encode failed: {}", e),
        }
    }
}

/// One `ButtonEdge` per line; blank lines are skipped.
fn parse_button_line(line: &str) -> Result<Option<ButtonEdge>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line).context("parse button edge")?))
}

// --- replay ---

#[derive(Debug, serde::Deserialize)]
struct ReplayStep {
    t_ms: u64,
    #[serde(flatten)]
    input: ReplayInput,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayInput {
    Telemetry { record: TelemetryRecord },
    /// Value reported by the camera.
    Param { name: String, value: ParamValue },
    /// Value entered by the user.
    SetParam { name: String, value: ParamValue },
    ParamsReady,
    Button { edge: ButtonEdge },
    CalibrateGimbal,
    Firmware { raw: u32 },
    Tick,
}

type ReplayEngine = CameraEngine<ParamCache, CommandLog>;

fn replay(cfg: &Config, path: &str, settle_ms: u64) -> Result<()> {
    engine_doctor::check_variant(&cfg.camera)?;
    let file = std::fs::File::open(path).with_context(|| format!("open replay {}", path))?;

    let cache = cfg.camera.param_cache();
    let (mut engine, mut events) = CameraEngine::new(cfg.camera.clone(), cfg.component_ids(), cache, CommandLog::new());
    report(&mut engine, &mut events, 0);

    let mut last_t = 0;
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.context("read replay")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ReplayStep =
            serde_json::from_str(line).with_context(|| format!("{}:{}: bad replay step", path, n + 1))?;
        anyhow::ensure!(step.t_ms >= last_t, "{}:{}: time goes backwards", path, n + 1);
        last_t = step.t_ms;

        // timers due before this input fire first
        engine.poll_timers(step.t_ms);
        report(&mut engine, &mut events, step.t_ms);

        let now = step.t_ms;
        match step.input {
            ReplayInput::Telemetry { record } => engine.handle_telemetry(&record, now),
            ReplayInput::Param { name, value } => engine.receive_parameter(&name, value, now),
            ReplayInput::SetParam { name, value } => engine.set_parameter(&name, value, now),
            ReplayInput::ParamsReady => engine.on_parameters_ready(now),
            ReplayInput::Button { edge } => engine.handle_button(edge, now),
            ReplayInput::CalibrateGimbal => engine.calibrate_gimbal(),
            ReplayInput::Firmware { raw } => {
                engine.set_firmware_version(raw);
                info!("camera firmware {:?}", engine.firmware_version());
            }
            ReplayInput::Tick => {}
        }
        report(&mut engine, &mut events, now);
    }

    let end = last_t + settle_ms;
    while let Some(t) = engine.next_deadline().filter(|t| *t <= end) {
        engine.poll_timers(t);
        report(&mut engine, &mut events, t);
    }
    info!("replay: done at {} ms, record time {}", end, engine.record_time_str());
    Ok(())
}

/// Print everything the engine did since the last call as JSON lines.
fn report(engine: &mut ReplayEngine, events: &mut mpsc::UnboundedReceiver<CameraEvent>, t_ms: u64) {
    while let Ok(ev) = events.try_recv() {
        println!("{}", serde_json::json!({ "t_ms": t_ms, "event": ev }));
    }
    for SentCommand { component_id, command, params, .. } in engine.link_mut().drain() {
        println!("{}", serde_json::json!({ "t_ms": t_ms, "command": command, "component": component_id, "params": params }));
    }
    for op in engine.params_mut().drain_ops() {
        let line = match op {
            ParamOp::Set { name, value } => serde_json::json!({ "t_ms": t_ms, "param_set": name, "value": value }),
            ParamOp::Request { name } => serde_json::json!({ "t_ms": t_ms, "param_request": name }),
            ParamOp::RequestAll => serde_json::json!({ "t_ms": t_ms, "param_request_all": true }),
        };
        println!("{}", line);
    }
    debug!("t={} active={:?}", t_ms, engine.active_settings());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_engine::shutter::Button;

    #[test]
    fn test_parse_replay_steps() {
        let step: ReplayStep = serde_json::from_str(
            r#"{"t_ms": 1200, "kind": "telemetry", "record": {"source": {"system_id": 1, "component_id": 154},
                "kind": {"type": "command_ack", "command": 241, "result": 5, "progress": 99}}}"#,
        )
        .unwrap();
        assert_eq!(step.t_ms, 1200);
        assert!(matches!(step.input, ReplayInput::Telemetry { .. }));

        let step: ReplayStep =
            serde_json::from_str(r#"{"t_ms": 5, "kind": "button", "edge": {"button": "camera_shutter", "pressed": true}}"#)
                .unwrap();
        assert!(matches!(step.input, ReplayInput::Button { edge } if edge.pressed));

        let step: ReplayStep =
            serde_json::from_str(r#"{"t_ms": 9, "kind": "param", "name": "CAM_ISO", "value": 390}"#).unwrap();
        assert!(matches!(step.input, ReplayInput::Param { value: ParamValue::Int(390), .. }));
    }

    #[test]
    fn test_parse_button_line() {
        let edge = parse_button_line(r#" {"button": "video_shutter", "pressed": true} "#).unwrap();
        assert_eq!(edge, Some(ButtonEdge { button: Button::VideoShutter, pressed: true }));
        assert_eq!(parse_button_line("   ").unwrap(), None);
        assert!(parse_button_line("{\"button\": 3}").is_err());
    }

    #[test]
    fn test_config_without_link() {
        let cfg: Config = toml::from_str(
            r#"
[camera]
model = "E90"
settings = ["CAM_MODE", "CAM_EV"]
"#,
        )
        .unwrap();
        assert!(cfg.link.is_none());
        assert_eq!(cfg.component_ids(), ComponentIds::default());
    }
}
