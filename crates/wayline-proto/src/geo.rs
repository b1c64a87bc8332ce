use serde::{Deserialize, Serialize};

/// Degrees of latitude/longitude to meters on the local tangent plane.
pub const METERS_PER_DEGREE: f64 = 111_319.5;

/// Order reserved for the synthetic home waypoint pushed on return-to-home.
pub const HOME_ORDER: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.abs() <= 90.0 && self.longitude.abs() <= 180.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WayPoint {
    pub location: Location,
    pub order: i32,
}

impl WayPoint {
    pub fn new(location: Location, order: i32) -> Self {
        Self { location, order }
    }

    pub fn home(location: Location) -> Self {
        Self { location, order: HOME_ORDER }
    }

    pub fn is_home(&self) -> bool {
        self.order == HOME_ORDER
    }
}

// ----- Geometry -----

/// 3D distance in meters between two positions, flat-earth approximation.
/// Good enough for the few hundred meters a single leg covers.
pub fn distance_m(from: &Location, from_alt_m: f64, to: &Location, to_alt_m: f64) -> f64 {
    let (dn, de) = offset_m(from, to);
    let du = to_alt_m - from_alt_m;
    (dn * dn + de * de + du * du).sqrt()
}

/// North/east offset in meters from `from` to `to`.
pub fn offset_m(from: &Location, to: &Location) -> (f64, f64) {
    let dn = (to.latitude - from.latitude) * METERS_PER_DEGREE;
    let de = (to.longitude - from.longitude) * METERS_PER_DEGREE;
    (dn, de)
}

/// Move `from` by the given north/east meters.
pub fn translate(from: &Location, north_m: f64, east_m: f64) -> Location {
    Location {
        latitude: from.latitude + north_m / METERS_PER_DEGREE,
        longitude: from.longitude + east_m / METERS_PER_DEGREE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_thousandth_degree_is_about_111m() {
        let a = Location::new(50.0, 4.0);
        let b = Location::new(50.001, 4.0);
        let d = distance_m(&a, 0.0, &b, 0.0);
        assert!((d - 111.3195).abs() < 1e-6);
    }

    #[test]
    fn altitude_counts_towards_distance() {
        let a = Location::new(50.0, 4.0);
        assert!((distance_m(&a, 0.0, &a, 4.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn translate_then_measure() {
        let a = Location::new(-33.0, 151.0);
        let b = translate(&a, 30.0, 40.0);
        assert!((distance_m(&a, 10.0, &b, 10.0) - 50.0).abs() < 1e-6);
    }
}
