pub mod doctor;
pub mod queue;
pub mod worker;

use serde::Deserialize;
use std::time::Duration;

pub use queue::WayPointQueue;
pub use worker::{NavigationHandle, NavigationState};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// How long the worker sleeps when there is nothing to fly.
    pub idle_poll_ms: u64,
    /// Takeoff attempts per start, counting the first.
    pub takeoff_attempts: u32,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self { idle_poll_ms: 1000, takeoff_attempts: 2 }
    }
}

impl NavConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}
