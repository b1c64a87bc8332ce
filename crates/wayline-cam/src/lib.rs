//! Camera control over a single-outstanding-command link.

pub mod command;
pub mod serializer;
pub mod sim;
pub mod state;

use serde::Deserialize;
use std::time::Duration;

pub use command::{CameraResponse, CommandError, CommandKind, PeripheralCommand};
pub use serializer::{
    CameraBus, CameraControl, CommandSerializer, LinkEvent, PeripheralLink, ResponseSender,
    DEFAULT_BUSY_TIMEOUT,
};
pub use sim::SimCameraLink;
pub use state::CameraState;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// A link busy for longer than this is reset on the next submission.
    pub busy_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64 }
    }
}

impl CameraConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
