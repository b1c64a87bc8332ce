pub mod halt;
pub mod mav;
pub mod params;
pub mod sim;
pub mod state;

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use wayline_cam::{CameraConfig, CameraControl};
use wayline_proto::geo::distance_m;
use wayline_proto::status::DroneType;
use wayline_proto::Location;

pub use halt::Halt;
pub use params::{FlightParams, ParamStore};
pub use state::{FlightMode, SharedTelemetry, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process vehicle, no autopilot needed.
    Sim,
    Mavlink,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    pub backend: Backend,

    /// mavlink connection string, e.g. `udpin:0.0.0.0:14550` or `serial:/dev/ttyAMA0:57600`.
    #[serde(default = "default_url")]
    pub url: String,

    /// MAVLink ids we use (companion side)
    #[serde(default = "default_sys_id")]
    pub sys_id: u8,
    #[serde(default = "default_comp_id")]
    pub comp_id: u8,

    /// target system/component (autopilot side). 1/1 is common for ArduPilot.
    #[serde(default = "one")]
    pub target_sys: u8,
    #[serde(default = "one")]
    pub target_comp: u8,

    #[serde(default = "default_height")]
    pub height_m: f32,
    #[serde(default = "default_speed")]
    pub speed_mps: f32,
    #[serde(default = "default_threshold")]
    pub distance_threshold_m: f32,

    /// Arrival test period while a leg is in flight.
    #[serde(default = "default_arrival_poll")]
    pub arrival_poll_ms: u64,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,

    /// Sim only: where the vehicle starts, and how much faster than wall clock it moves.
    #[serde(default = "default_sim_home")]
    pub sim_home: Location,
    #[serde(default = "default_time_scale")]
    pub sim_time_scale: f64,
}

fn default_url() -> String { "udpin:0.0.0.0:14550".into() }
fn default_sys_id() -> u8 { 255 }
fn default_comp_id() -> u8 { 190 }
fn one() -> u8 { 1 }
fn default_height() -> f32 { 4.0 }
fn default_speed() -> f32 { 5.0 }
fn default_threshold() -> f32 { 1.0 }
fn default_arrival_poll() -> u64 { 500 }
fn default_manufacturer() -> String { "3DR".into() }
fn default_model() -> String { "Solo".into() }
fn default_sim_home() -> Location { Location::new(51.022593, 3.709853) }
fn default_time_scale() -> f64 { 1.0 }

impl FcConfig {
    pub fn sim() -> Self {
        Self {
            backend: Backend::Sim,
            url: default_url(),
            sys_id: default_sys_id(),
            comp_id: default_comp_id(),
            target_sys: 1,
            target_comp: 1,
            height_m: default_height(),
            speed_mps: default_speed(),
            distance_threshold_m: default_threshold(),
            arrival_poll_ms: default_arrival_poll(),
            manufacturer: default_manufacturer(),
            model: default_model(),
            sim_home: default_sim_home(),
            sim_time_scale: default_time_scale(),
        }
    }

    pub fn flight_params(&self) -> FlightParams {
        FlightParams {
            speed_mps: self.speed_mps,
            height_m: self.height_m,
            distance_threshold_m: self.distance_threshold_m,
            camera_angle_deg: None,
        }
    }

    pub fn arrival_poll(&self) -> Duration {
        Duration::from_millis(self.arrival_poll_ms)
    }

    pub fn drone_type(&self) -> DroneType {
        DroneType { manufacturer: self.manufacturer.clone(), model: self.model.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Takeoff {
    Airborne,
    /// Vehicle left GUIDED before reaching height; safe to try again.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Arrived,
    Halted,
    ModeChanged(FlightMode),
}

/// Blocking vehicle actuation. Calls may take seconds; never call from an async task.
pub trait Vehicle: Send + Sync {
    /// Switch to GUIDED and arm, waiting until the autopilot reports armed.
    fn arm(&self) -> Result<()>;
    /// Climb to the selected height. Returns immediately if already airborne.
    fn takeoff(&self) -> Result<Takeoff>;
    fn land(&self) -> Result<()>;
    fn brake(&self) -> Result<()>;
    /// Fly to `target` at the selected height and speed, blocking until arrival,
    /// `halt` firing, or the vehicle leaving GUIDED.
    fn fly_to(&self, target: &Location, halt: &Halt) -> Result<Leg>;
    fn point_camera(&self, pitch_deg: f32) -> Result<()>;

    fn telemetry(&self) -> Telemetry;
    fn params(&self) -> &ParamStore;
    fn camera(&self) -> &CameraControl;
    fn drone_type(&self) -> DroneType;

    fn location(&self) -> Option<Location> {
        self.telemetry().location
    }
}

/// Arrival loop shared by vehicle backends: poll telemetry until within the
/// distance threshold of `target` at the selected height.
pub fn follow_leg(
    target: &Location,
    params: &ParamStore,
    halt: &Halt,
    poll: Duration,
    mut read: impl FnMut() -> Telemetry,
) -> Leg {
    loop {
        if halt.is_set() {
            return Leg::Halted;
        }
        let t = read();
        if t.mode != FlightMode::Guided {
            debug!("fc: leg interrupted, mode now {:?}", t.mode);
            return Leg::ModeChanged(t.mode);
        }
        if let Some(here) = t.location {
            let p = params.get();
            let d = distance_m(&here, t.altitude_m, target, p.height_m as f64);
            if d <= p.distance_threshold_m as f64 {
                return Leg::Arrived;
            }
        }
        if halt.wait(poll) {
            return Leg::Halted;
        }
    }
}

/// Build the configured vehicle. Must be called inside a tokio runtime.
pub fn connect(cfg: &FcConfig, cam: &CameraConfig) -> Result<Arc<dyn Vehicle>> {
    info!("fc: backend={:?} drone={} {}", cfg.backend, cfg.manufacturer, cfg.model);
    Ok(match cfg.backend {
        Backend::Sim => Arc::new(sim::SimVehicle::start(cfg, cam)),
        Backend::Mavlink => Arc::new(mav::MavVehicle::connect(cfg, cam)?),
    })
}
