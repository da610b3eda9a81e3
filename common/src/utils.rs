use crate::constants::EARTH_RADIUS_KM;
use crate::errors::DispatchError;
use crate::types::dtos::Coordinate;
use rand::Rng;

/// Great-circle distance in kilometers (haversine).
pub fn calculate_distance(from: Coordinate, to: Coordinate) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lon - from.lon).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Random point within `radius_km` of `center`. Used by the simulation.
pub fn random_point_near(center: Coordinate, radius_km: f64) -> Coordinate {
    let mut rng = rand::thread_rng();
    let distance = radius_km * rng.gen_range(0.0_f64..1.0).sqrt();
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    let d_lat = (distance / EARTH_RADIUS_KM).to_degrees() * bearing.cos();
    let d_lon = (distance / EARTH_RADIUS_KM).to_degrees() * bearing.sin()
        / center.lat.to_radians().cos().max(1e-6);
    Coordinate {
        lat: (center.lat + d_lat).clamp(-90.0, 90.0),
        lon: (center.lon + d_lon).clamp(-180.0, 180.0),
    }
}

/// Trims a user supplied reason and rejects it when nothing is left.
pub fn require_reason(reason: &str) -> Result<String, DispatchError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::validation("a reason is required"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_points() {
        let seoul_city_hall = Coordinate { lat: 37.5665, lon: 126.9780 };
        let gangnam = Coordinate { lat: 37.4979, lon: 127.0276 };
        let km = calculate_distance(seoul_city_hall, gangnam);
        assert!((km - 8.8).abs() < 0.3, "got {}", km);
        assert_eq!(calculate_distance(gangnam, gangnam), 0.0);
    }

    #[test]
    fn random_points_stay_in_radius() {
        let center = Coordinate { lat: 37.5665, lon: 126.9780 };
        for _ in 0..100 {
            let p = random_point_near(center, 2.0);
            assert!(calculate_distance(center, p) <= 2.05);
        }
    }

    #[test]
    fn reasons_are_trimmed_and_required() {
        assert_eq!(require_reason("  too far ").as_deref(), Ok("too far"));
        assert!(require_reason("   ").is_err());
    }
}
