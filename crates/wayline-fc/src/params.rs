use anyhow::{ensure, Result};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Values the workstation may change while flying. Read at the start of every leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlightParams {
    pub speed_mps: f32,
    pub height_m: f32,
    pub distance_threshold_m: f32,
    pub camera_angle_deg: Option<f32>,
}

const MAX_SPEED_MPS: f32 = 20.0;
const MAX_HEIGHT_M: f32 = 120.0;

#[derive(Debug, Clone)]
pub struct ParamStore(Arc<RwLock<FlightParams>>);

impl ParamStore {
    pub fn new(params: FlightParams) -> Self {
        Self(Arc::new(RwLock::new(params)))
    }

    pub fn get(&self) -> FlightParams {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut FlightParams)) {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn set_speed(&self, mps: f32) -> Result<()> {
        Self::check_speed(mps)?;
        self.update(|p| p.speed_mps = mps);
        Ok(())
    }

    pub fn set_height(&self, m: f32) -> Result<()> {
        Self::check_height(m)?;
        self.update(|p| p.height_m = m);
        Ok(())
    }

    pub fn set_distance_threshold(&self, m: f32) -> Result<()> {
        Self::check_distance_threshold(m)?;
        self.update(|p| p.distance_threshold_m = m);
        Ok(())
    }

    pub fn set_camera_angle(&self, deg: f32) -> Result<()> {
        Self::check_camera_angle(deg)?;
        self.update(|p| p.camera_angle_deg = Some(deg));
        Ok(())
    }

    // Range checks shared by the setters, usable before committing to any change.

    pub fn check_speed(mps: f32) -> Result<()> {
        ensure!(mps > 0.0 && mps <= MAX_SPEED_MPS, "speed {} m/s out of range (0, {}]", mps, MAX_SPEED_MPS);
        Ok(())
    }

    pub fn check_height(m: f32) -> Result<()> {
        ensure!(m > 0.0 && m <= MAX_HEIGHT_M, "height {} m out of range (0, {}]", m, MAX_HEIGHT_M);
        Ok(())
    }

    pub fn check_distance_threshold(m: f32) -> Result<()> {
        ensure!(m > 0.0 && m.is_finite(), "distance threshold {} m must be positive", m);
        Ok(())
    }

    pub fn check_camera_angle(deg: f32) -> Result<()> {
        ensure!((-90.0..=0.0).contains(&deg), "camera angle {} deg out of range [-90, 0]", deg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_values() {
        let store = ParamStore::new(FlightParams {
            speed_mps: 5.0,
            height_m: 4.0,
            distance_threshold_m: 1.0,
            camera_angle_deg: None,
        });
        assert!(store.set_speed(0.0).is_err());
        assert!(store.set_height(500.0).is_err());
        assert!(store.set_camera_angle(10.0).is_err());
        store.set_speed(8.5).unwrap();
        store.set_camera_angle(-45.0).unwrap();
        let p = store.get();
        assert_eq!(p.speed_mps, 8.5);
        assert_eq!(p.height_m, 4.0);
        assert_eq!(p.camera_angle_deg, Some(-45.0));
    }

    #[test]
    fn range_checks_match_setters() {
        assert!(ParamStore::check_speed(f32::NAN).is_err());
        assert!(ParamStore::check_height(120.5).is_err());
        assert!(ParamStore::check_distance_threshold(f32::INFINITY).is_err());
        assert!(ParamStore::check_camera_angle(-90.0).is_ok());
        ParamStore::check_speed(20.0).unwrap();
    }
}
