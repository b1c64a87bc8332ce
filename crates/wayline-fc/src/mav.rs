use anyhow::{bail, ensure, Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        COMMAND_ACK_DATA, COMMAND_INT_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
    },
    MavConnection, MavHeader,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use wayline_cam::{
    CameraBus, CameraConfig, CameraControl, CameraResponse, CameraState, CommandKind,
    PeripheralCommand, PeripheralLink, ResponseSender,
};
use wayline_proto::status::DroneType;
use wayline_proto::Location;

use crate::{
    follow_leg, FcConfig, FlightMode, Halt, Leg, ParamStore, SharedTelemetry, Takeoff, Telemetry,
    Vehicle,
};

/// MAV_COMP_ID_GIMBAL; the camera hangs off the gimbal.
const GIMBAL_COMP: u8 = 154;
const MODE_TIMEOUT: Duration = Duration::from_secs(5);
const ARM_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_TICK: Duration = Duration::from_millis(100);
const MOUNT_MODE_MAVLINK_TARGETING: f32 = 2.0;

type Conn = Box<dyn MavConnection<MavMessage> + Send + Sync>;

/// Send half shared by the vehicle and the camera link; owns the sequence counter.
struct MavSender {
    conn: Arc<Conn>,
    hdr: Mutex<MavHeader>,
    target_sys: u8,
    target_comp: u8,
}

impl MavSender {
    fn send(&self, msg: MavMessage) -> Result<()> {
        let mut hdr = self.hdr.lock().unwrap_or_else(PoisonError::into_inner);
        hdr.sequence = hdr.sequence.wrapping_add(1);
        self.conn.send(&hdr, &msg).context("mavlink send")?;
        Ok(())
    }

    fn command_to(&self, component: u8, command: MavCmd, p: [f32; 7]) -> Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: component,
            command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        };
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    fn command(&self, command: MavCmd, p: [f32; 7]) -> Result<()> {
        self.command_to(self.target_comp, command, p)
    }

    fn set_mode(&self, mode: FlightMode) -> Result<()> {
        let custom = mode.custom().context("cannot command an unknown mode")?;
        let flag = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        debug!("FC: set mode {:?}", mode);
        self.command(MavCmd::MAV_CMD_DO_SET_MODE, [flag, custom as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }
}

/// The command awaiting an ack, with the tag it was sent under.
type InFlight = Arc<Mutex<Option<(u8, PeripheralCommand)>>>;

/// Camera commands ride on MAV_CMD_USER_1 to the gimbal: param1 id, param2 kind
/// (0 get, 1 set), param3..6 payload, param7 a rolling tag. The gimbal answers
/// with COMMAND_ACK, echoing the tag in `progress` and carrying the value bytes
/// little-endian in `result_param2`.
struct MavCameraLink {
    tx: Arc<MavSender>,
    in_flight: InFlight,
    tag: u8,
}

impl PeripheralLink for MavCameraLink {
    fn transmit(&mut self, cmd: &PeripheralCommand) -> Result<()> {
        self.tag = self.tag.wrapping_add(1);
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some((self.tag, *cmd));
        let kind = match cmd.kind {
            CommandKind::Get => 0.0,
            CommandKind::Set => 1.0,
        };
        let b = cmd.payload.map(f32::from);
        self.tx.command_to(
            GIMBAL_COMP,
            MavCmd::MAV_CMD_USER_1,
            [cmd.id as f32, kind, b[0], b[1], b[2], b[3], f32::from(self.tag)],
        )
    }

    fn resync(&mut self, state: &CameraState) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).take();
        info!("FC: camera link resynchronised {:?}", state);
    }
}

/// Match a gimbal ack against the command in flight. Acks with another tag
/// answer a command the serializer already gave up on.
fn camera_ack(in_flight: &InFlight, ack: &COMMAND_ACK_DATA) -> Option<CameraResponse> {
    let mut slot = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    match *slot {
        Some((tag, cmd)) if tag == ack.progress => {
            *slot = None;
            Some(CameraResponse {
                kind: cmd.kind,
                id: cmd.id,
                success: ack.result == MavResult::MAV_RESULT_ACCEPTED,
                value: ack.result_param2.to_le_bytes(),
            })
        }
        Some((tag, _)) => {
            debug!("FC: camera ack tagged {} while {} is in flight, dropped", ack.progress, tag);
            None
        }
        None => {
            debug!("FC: camera ack with nothing in flight");
            None
        }
    }
}

pub struct MavVehicle {
    tx: Arc<MavSender>,
    telemetry: SharedTelemetry,
    params: ParamStore,
    camera: CameraControl,
    drone: DroneType,
    poll: Duration,
}

impl MavVehicle {
    /// Must be called inside a tokio runtime.
    pub fn connect(cfg: &FcConfig, cam: &CameraConfig) -> Result<Self> {
        if let Some(rest) = cfg.url.strip_prefix("serial:") {
            let (dev, baud) = rest.rsplit_once(':').context("serial url must be serial:<dev>:<baud>")?;
            let baud: u32 = baud.parse().with_context(|| format!("bad baud rate {}", baud))?;
            // quick validate device
            let _ = tokio_serial::new(dev, baud)
                .open_native_async()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn: Conn = mavlink::connect::<MavMessage>(&cfg.url)
            .with_context(|| format!("mavlink connect {}", cfg.url))?;
        let conn = Arc::new(conn);
        let tx = Arc::new(MavSender {
            conn: conn.clone(),
            hdr: Mutex::new(MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 }),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
        });

        let in_flight = InFlight::default();
        let bus = CameraBus::new();
        let reader = Reader {
            conn,
            telemetry: SharedTelemetry::default(),
            in_flight: in_flight.clone(),
            camera: bus.responder(),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
        };
        let telemetry = reader.telemetry.clone();
        std::thread::Builder::new()
            .name("mav-reader".into())
            .spawn(move || reader.run())
            .context("spawn mavlink reader")?;

        let hb = tx.clone();
        std::thread::Builder::new()
            .name("mav-heartbeat".into())
            .spawn(move || loop {
                if let Err(e) = hb.heartbeat() {
                    warn!("FC: heartbeat send failed: {:#}", e);
                }
                std::thread::sleep(Duration::from_secs(1));
            })
            .context("spawn mavlink heartbeat")?;

        let link = MavCameraLink { tx: tx.clone(), in_flight, tag: 0 };
        let (camera, _task) = bus.start(link, cam.busy_timeout());

        info!("FC: connected {} (target {}/{})", cfg.url, cfg.target_sys, cfg.target_comp);
        Ok(Self {
            tx,
            telemetry,
            params: ParamStore::new(cfg.flight_params()),
            camera,
            drone: cfg.drone_type(),
            poll: cfg.arrival_poll(),
        })
    }

    fn wait_for(&self, what: &str, timeout: Duration, done: impl Fn(&Telemetry) -> bool) -> Result<()> {
        let start = Instant::now();
        while !done(&self.telemetry.snapshot()) {
            if start.elapsed() > timeout {
                bail!("timed out after {:?} waiting for {}", timeout, what);
            }
            std::thread::sleep(WAIT_TICK);
        }
        Ok(())
    }

    fn ensure_guided(&self) -> Result<()> {
        if self.telemetry.snapshot().mode != FlightMode::Guided {
            self.tx.set_mode(FlightMode::Guided)?;
            self.wait_for("GUIDED", MODE_TIMEOUT, |t| t.mode == FlightMode::Guided)?;
        }
        Ok(())
    }
}

impl Vehicle for MavVehicle {
    fn arm(&self) -> Result<()> {
        self.ensure_guided()?;
        debug!("FC: control granted");
        if !self.telemetry.snapshot().armed {
            self.tx.command(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])?;
            self.wait_for("arming", ARM_TIMEOUT, |t| t.armed)?;
            info!("FC: armed");
        }
        Ok(())
    }

    fn takeoff(&self) -> Result<Takeoff> {
        let t = self.telemetry.snapshot();
        if t.mode != FlightMode::Guided {
            warn!("FC: takeoff not executed, vehicle not in GUIDED");
            return Ok(Takeoff::Retry);
        }
        ensure!(t.armed, "takeoff requested while disarmed");
        if t.airborne {
            debug!("FC: already airborne");
            return Ok(Takeoff::Airborne);
        }

        let height = self.params.get().height_m;
        info!("FC: taking off to {:.1} m", height);
        self.tx.command(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, f32::NAN, 0.0, 0.0, height])?;
        loop {
            let t = self.telemetry.snapshot();
            if t.mode != FlightMode::Guided {
                warn!("FC: takeoff interrupted, vehicle left GUIDED");
                return Ok(Takeoff::Retry);
            }
            if t.altitude_m >= height as f64 * 0.95 {
                info!("FC: ready to fly");
                return Ok(Takeoff::Airborne);
            }
            std::thread::sleep(self.poll);
        }
    }

    fn land(&self) -> Result<()> {
        self.tx.set_mode(FlightMode::Land)?;
        self.wait_for("LAND", MODE_TIMEOUT, |t| t.mode == FlightMode::Land)?;
        info!("FC: landing");
        Ok(())
    }

    fn brake(&self) -> Result<()> {
        info!("FC: brake");
        self.tx.set_mode(FlightMode::Brake)
    }

    fn fly_to(&self, target: &Location, halt: &Halt) -> Result<Leg> {
        ensure!(self.telemetry.snapshot().armed, "fly_to requested while disarmed");
        self.ensure_guided()?;
        let p = self.params.get();
        self.tx.command(
            MavCmd::MAV_CMD_DO_CHANGE_SPEED,
            [1.0, p.speed_mps, -1.0, 0.0, 0.0, 0.0, 0.0],
        )?;
        let reposition = COMMAND_INT_DATA {
            param1: p.speed_mps,
            param2: 0.0,
            param3: 0.0,
            param4: f32::NAN,
            x: (target.latitude * 1e7) as i32,
            y: (target.longitude * 1e7) as i32,
            z: p.height_m,
            command: MavCmd::MAV_CMD_DO_REPOSITION,
            target_system: self.tx.target_sys,
            target_component: self.tx.target_comp,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
            current: 0,
            autocontinue: 0,
        };
        self.tx.send(MavMessage::COMMAND_INT(reposition))?;
        debug!("FC: flying to {:.7},{:.7}", target.latitude, target.longitude);
        Ok(follow_leg(target, &self.params, halt, self.poll, || self.telemetry.snapshot()))
    }

    fn point_camera(&self, pitch_deg: f32) -> Result<()> {
        self.params.set_camera_angle(pitch_deg)?;
        self.tx.command_to(
            GIMBAL_COMP,
            MavCmd::MAV_CMD_DO_MOUNT_CONTROL,
            [pitch_deg, 0.0, 0.0, 0.0, 0.0, 0.0, MOUNT_MODE_MAVLINK_TARGETING],
        )
    }

    fn telemetry(&self) -> Telemetry {
        self.telemetry.snapshot()
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn camera(&self) -> &CameraControl {
        &self.camera
    }

    fn drone_type(&self) -> DroneType {
        self.drone.clone()
    }
}

struct Reader {
    conn: Arc<Conn>,
    telemetry: SharedTelemetry,
    in_flight: InFlight,
    camera: ResponseSender,
    target_sys: u8,
    target_comp: u8,
}

impl Reader {
    fn run(self) {
        loop {
            match self.conn.recv() {
                Ok((hdr, msg)) => self.handle(&hdr, msg),
                Err(e) => {
                    debug!("FC: recv error: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    fn handle(&self, hdr: &MavHeader, msg: MavMessage) {
        if hdr.system_id != self.target_sys {
            return;
        }
        match msg {
            MavMessage::HEARTBEAT(hb) if hdr.component_id == self.target_comp => {
                self.telemetry.update(|t| {
                    let mode = FlightMode::from_custom(hb.custom_mode);
                    if mode != t.mode {
                        info!("FC: mode {:?} -> {:?}", t.mode, mode);
                    }
                    t.mode = mode;
                    t.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                    t.airborne = hb.system_status == MavState::MAV_STATE_ACTIVE;
                    t.last_heartbeat = Some(Instant::now());
                });
            }
            MavMessage::GLOBAL_POSITION_INT(p) => self.telemetry.update(|t| {
                t.location = Some(Location::new(p.lat as f64 / 1e7, p.lon as f64 / 1e7));
                t.altitude_m = p.relative_alt as f64 / 1000.0;
            }),
            MavMessage::SYS_STATUS(s) => {
                // -1 means unknown
                if (0..=100).contains(&s.battery_remaining) {
                    self.telemetry.update(|t| t.battery = Some(s.battery_remaining as u8));
                }
            }
            MavMessage::VFR_HUD(v) => self.telemetry.update(|t| t.ground_speed_mps = v.groundspeed),
            MavMessage::ATTITUDE(a) => {
                self.telemetry.update(|t| t.heading_deg = a.yaw.to_degrees().rem_euclid(360.0))
            }
            MavMessage::GPS_RAW_INT(g) if g.satellites_visible != u8::MAX => {
                self.telemetry.update(|t| t.satellites = Some(g.satellites_visible))
            }
            MavMessage::COMMAND_ACK(ack) if ack.command == MavCmd::MAV_CMD_USER_1 => {
                if let Some(resp) = camera_ack(&self.in_flight, &ack) {
                    self.camera.send(resp);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_cam::command::id;

    fn ack(progress: u8, result: MavResult, value: i32) -> COMMAND_ACK_DATA {
        COMMAND_ACK_DATA {
            command: MavCmd::MAV_CMD_USER_1,
            result,
            progress,
            result_param2: value,
            target_system: 0,
            target_component: 0,
        }
    }

    #[test]
    fn camera_ack_needs_the_in_flight_tag() {
        let in_flight = InFlight::default();
        let cmd = PeripheralCommand::get(id::BATTERY).unwrap();
        *in_flight.lock().unwrap() = Some((7, cmd));

        // late ack for the command sent under tag 6
        assert_eq!(camera_ack(&in_flight, &ack(6, MavResult::MAV_RESULT_ACCEPTED, 40)), None);
        assert!(in_flight.lock().unwrap().is_some());

        let resp = camera_ack(&in_flight, &ack(7, MavResult::MAV_RESULT_ACCEPTED, 81)).unwrap();
        assert_eq!(resp.id, id::BATTERY);
        assert_eq!(resp.kind, CommandKind::Get);
        assert!(resp.success);
        assert_eq!(resp.value, [81, 0, 0, 0]);
        assert!(in_flight.lock().unwrap().is_none());

        assert_eq!(camera_ack(&in_flight, &ack(7, MavResult::MAV_RESULT_ACCEPTED, 81)), None);
    }

    #[test]
    fn rejected_camera_command_is_reported_as_failure() {
        let in_flight = InFlight::default();
        let cmd = PeripheralCommand::set(id::CAPTURE_MODE, [1, 0, 0, 0]).unwrap();
        *in_flight.lock().unwrap() = Some((1, cmd));
        let resp = camera_ack(&in_flight, &ack(1, MavResult::MAV_RESULT_DENIED, 0)).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.kind, CommandKind::Set);
    }
}
