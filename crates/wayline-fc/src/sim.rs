//! In-process vehicle: integrates position toward the commanded target on every
//! telemetry read, and drives a simulated camera through the real serializer.

use anyhow::{ensure, Context, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use wayline_cam::{CameraBus, CameraConfig, CameraControl, SimCameraLink};
use wayline_proto::geo::{offset_m, translate};
use wayline_proto::status::DroneType;
use wayline_proto::Location;

use crate::{follow_leg, FcConfig, FlightMode, Halt, Leg, ParamStore, Takeoff, Telemetry, Vehicle};

const LAND_SPEED_MPS: f64 = 1.5;
const STABILIZE: u32 = 0;
const LOITER: u32 = 5;

struct SimState {
    telemetry: Telemetry,
    /// Target position and altitude, None while holding.
    target: Option<(Location, f64)>,
    last_step: Instant,
    failing_takeoffs: u32,
}

pub struct SimVehicle {
    state: Mutex<SimState>,
    params: ParamStore,
    camera: CameraControl,
    drone: DroneType,
    poll: Duration,
    time_scale: f64,
}

impl SimVehicle {
    /// Must be called inside a tokio runtime; the camera serializer runs as a task.
    pub fn start(cfg: &FcConfig, cam: &CameraConfig) -> Self {
        let bus = CameraBus::new();
        let link = SimCameraLink::new(bus.responder());
        let (camera, _task) = bus.start(link, cam.busy_timeout());

        let telemetry = Telemetry {
            location: Some(cfg.sim_home),
            battery: Some(100),
            satellites: Some(10),
            mode: FlightMode::Other(STABILIZE),
            last_heartbeat: Some(Instant::now()),
            ..Default::default()
        };
        Self {
            state: Mutex::new(SimState {
                telemetry,
                target: None,
                last_step: Instant::now(),
                failing_takeoffs: 0,
            }),
            params: ParamStore::new(cfg.flight_params()),
            camera,
            drone: cfg.drone_type(),
            poll: cfg.arrival_poll(),
            time_scale: cfg.sim_time_scale,
        }
    }

    /// Make the next `n` takeoffs drop out of GUIDED before reaching height.
    pub fn fail_takeoffs(&self, n: u32) {
        self.lock().failing_takeoffs = n;
    }

    /// Switch mode as a pilot on the transmitter would.
    pub fn set_mode(&self, mode: FlightMode) {
        self.lock().telemetry.mode = mode;
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.step(&mut st);
        st
    }

    fn step(&self, st: &mut SimState) {
        let now = Instant::now();
        let dt = now.saturating_duration_since(st.last_step).as_secs_f64() * self.time_scale;
        st.last_step = now;
        st.telemetry.last_heartbeat = Some(now);

        let Some((target, target_alt)) = st.target else {
            st.telemetry.ground_speed_mps = 0.0;
            return;
        };
        let Some(here) = st.telemetry.location else { return };

        let speed = match st.telemetry.mode {
            FlightMode::Guided => self.params.get().speed_mps as f64,
            FlightMode::Land => LAND_SPEED_MPS,
            _ => 0.0,
        };
        let (dn, de) = offset_m(&here, &target);
        let du = target_alt - st.telemetry.altitude_m;
        let dist = (dn * dn + de * de + du * du).sqrt();
        let travel = speed * dt;

        if travel >= dist {
            st.telemetry.location = Some(target);
            st.telemetry.altitude_m = target_alt;
            st.telemetry.ground_speed_mps = 0.0;
            st.target = None;
        } else if dist > 0.0 {
            let f = travel / dist;
            st.telemetry.location = Some(translate(&here, dn * f, de * f));
            st.telemetry.altitude_m += du * f;
            st.telemetry.ground_speed_mps = speed as f32;
            if dn != 0.0 || de != 0.0 {
                st.telemetry.heading_deg = de.atan2(dn).to_degrees().rem_euclid(360.0) as f32;
            }
        }

        st.telemetry.airborne = st.telemetry.altitude_m > 0.1;
        if !st.telemetry.airborne && st.telemetry.mode == FlightMode::Land && st.target.is_none() {
            st.telemetry.armed = false;
        }
    }
}

impl Vehicle for SimVehicle {
    fn arm(&self) -> Result<()> {
        let mut st = self.lock();
        st.telemetry.mode = FlightMode::Guided;
        if !st.telemetry.armed {
            st.telemetry.armed = true;
            info!("sim: armed");
        }
        Ok(())
    }

    fn takeoff(&self) -> Result<Takeoff> {
        let height = self.params.get().height_m as f64;
        {
            let mut st = self.lock();
            if st.telemetry.mode != FlightMode::Guided {
                warn!("sim: takeoff refused, not in GUIDED");
                return Ok(Takeoff::Retry);
            }
            ensure!(st.telemetry.armed, "takeoff requested while disarmed");
            if st.telemetry.airborne {
                debug!("sim: already airborne");
                return Ok(Takeoff::Airborne);
            }
            if st.failing_takeoffs > 0 {
                st.failing_takeoffs -= 1;
                st.telemetry.mode = FlightMode::Other(LOITER);
                warn!("sim: takeoff interrupted, vehicle left GUIDED");
                return Ok(Takeoff::Retry);
            }
            let here = st.telemetry.location.context("no position fix")?;
            st.target = Some((here, height));
            info!("sim: taking off to {:.1} m", height);
        }

        loop {
            std::thread::sleep(self.poll);
            let st = self.lock();
            if st.telemetry.mode != FlightMode::Guided {
                return Ok(Takeoff::Retry);
            }
            if st.telemetry.altitude_m >= height * 0.95 {
                info!("sim: ready to fly");
                return Ok(Takeoff::Airborne);
            }
        }
    }

    fn land(&self) -> Result<()> {
        let mut st = self.lock();
        st.telemetry.mode = FlightMode::Land;
        st.target = st.telemetry.location.map(|here| (here, 0.0));
        info!("sim: landing");
        Ok(())
    }

    fn brake(&self) -> Result<()> {
        let mut st = self.lock();
        st.telemetry.mode = FlightMode::Brake;
        st.target = None;
        info!("sim: brake");
        Ok(())
    }

    fn fly_to(&self, target: &Location, halt: &Halt) -> Result<Leg> {
        let height = self.params.get().height_m as f64;
        {
            let mut st = self.lock();
            ensure!(st.telemetry.armed, "fly_to requested while disarmed");
            st.telemetry.mode = FlightMode::Guided;
            st.target = Some((*target, height));
        }
        debug!("sim: flying to {:.6},{:.6}", target.latitude, target.longitude);
        Ok(follow_leg(target, &self.params, halt, self.poll, || self.telemetry()))
    }

    fn point_camera(&self, pitch_deg: f32) -> Result<()> {
        self.params.set_camera_angle(pitch_deg)?;
        debug!("sim: gimbal pitch {:.1}", pitch_deg);
        Ok(())
    }

    fn telemetry(&self) -> Telemetry {
        self.lock().telemetry.clone()
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
