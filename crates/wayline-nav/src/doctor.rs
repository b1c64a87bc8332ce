use anyhow::Result;
use wayline_fc::FcConfig;

use crate::NavConfig;

pub fn check_nav(cfg: &NavConfig) -> Result<()> {
    anyhow::ensure!(cfg.idle_poll_ms >= 10 && cfg.idle_poll_ms <= 10_000, "nav.idle_poll_ms should be 10..10000");
    anyhow::ensure!(cfg.takeoff_attempts >= 1 && cfg.takeoff_attempts <= 5, "nav.takeoff_attempts should be 1..5");
    Ok(())
}

pub fn check_flight(fc: &FcConfig) -> Result<()> {
    anyhow::ensure!(fc.height_m > 0.0 && fc.height_m <= 120.0, "fc.height_m out of range (0, 120]");
    anyhow::ensure!(fc.speed_mps > 0.0 && fc.speed_mps <= 20.0, "fc.speed_mps out of range (0, 20]");
    anyhow::ensure!(fc.distance_threshold_m > 0.0, "fc.distance_threshold_m must be positive");
    anyhow::ensure!(fc.arrival_poll_ms >= 10 && fc.arrival_poll_ms <= 5_000, "fc.arrival_poll_ms should be 10..5000");
    // Basic sanity: sim home not NaN
    anyhow::ensure!(fc.sim_home.is_valid(), "fc.sim_home coordinates invalid");
    anyhow::ensure!(fc.sim_time_scale > 0.0, "fc.sim_time_scale must be positive");
    Ok(())
}
