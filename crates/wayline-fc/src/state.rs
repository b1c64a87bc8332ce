use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use wayline_proto::Location;

/// ArduCopter flight modes the companion cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightMode {
    #[default]
    Unknown,
    Guided,
    Land,
    Brake,
    Other(u32),
}

impl FlightMode {
    pub const GUIDED: u32 = 4;
    pub const LAND: u32 = 9;
    pub const BRAKE: u32 = 17;

    pub fn from_custom(mode: u32) -> Self {
        match mode {
            Self::GUIDED => Self::Guided,
            Self::LAND => Self::Land,
            Self::BRAKE => Self::Brake,
            other => Self::Other(other),
        }
    }

    pub fn custom(self) -> Option<u32> {
        match self {
            Self::Guided => Some(Self::GUIDED),
            Self::Land => Some(Self::LAND),
            Self::Brake => Some(Self::BRAKE),
            Self::Other(m) => Some(m),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub location: Option<Location>,
    /// Altitude above home.
    pub altitude_m: f64,
    pub battery: Option<u8>,
    pub ground_speed_mps: f32,
    pub heading_deg: f32,
    pub satellites: Option<u8>,
    pub mode: FlightMode,
    pub armed: bool,
    pub airborne: bool,
    pub last_heartbeat: Option<Instant>,
}

/// Telemetry written by a link reader and read by everyone else.
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetry(Arc<RwLock<Telemetry>>);

impl SharedTelemetry {
    pub fn snapshot(&self) -> Telemetry {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Telemetry)) {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_mode_mapping() {
        assert_eq!(FlightMode::from_custom(4), FlightMode::Guided);
        assert_eq!(FlightMode::from_custom(6), FlightMode::Other(6));
        assert_eq!(FlightMode::Brake.custom(), Some(17));
        assert_eq!(FlightMode::Unknown.custom(), None);
    }
}
