use thiserror::Error;

use crate::models::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("coordinate is not a finite number")]
    NotFinite,

    #[error("latitude {0} out of range -90..=90")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} out of range -180..=180")]
    LongitudeOutOfRange(f64),
}

pub fn validate(point: &GeoPoint) -> Result<(), GeoError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(GeoError::NotFinite);
    }
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(GeoError::LatitudeOutOfRange(point.lat));
    }
    if !(-180.0..=180.0).contains(&point.lng) {
        return Err(GeoError::LongitudeOutOfRange(point.lng));
    }
    Ok(())
}

/// Great-circle distance in meters. Malformed input is a typed error, never
/// a silent NaN.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> Result<f64, GeoError> {
    validate(a)?;
    validate(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    Ok(EARTH_RADIUS_M * central_angle)
}

#[cfg(test)]
mod tests {
    use super::{haversine_m, validate, GeoError};
    use crate::models::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_m(&p, &p).unwrap();
        assert!(distance < 1e-6);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_m(&london, &paris).unwrap();
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn threshold_scale_distances_resolve() {
        // ~0.0001 deg latitude is ~11.1 m
        let a = GeoPoint { lat: 10.0, lng: 10.0 };
        let b = GeoPoint {
            lat: 10.0001,
            lng: 10.0,
        };
        let distance = haversine_m(&a, &b).unwrap();
        assert!((distance - 11.1).abs() < 0.5, "got {distance}");
    }

    #[test]
    fn nan_is_rejected() {
        let bad = GeoPoint {
            lat: f64::NAN,
            lng: 0.0,
        };
        assert_eq!(validate(&bad), Err(GeoError::NotFinite));
        let ok = GeoPoint { lat: 0.0, lng: 0.0 };
        assert!(haversine_m(&bad, &ok).is_err());
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert_eq!(
            validate(&GeoPoint {
                lat: 91.0,
                lng: 0.0
            }),
            Err(GeoError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            validate(&GeoPoint {
                lat: 0.0,
                lng: -180.5
            }),
            Err(GeoError::LongitudeOutOfRange(-180.5))
        );
    }
}
