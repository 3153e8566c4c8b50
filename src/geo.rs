// Great-circle distance and felt-impact estimation for the event nearest the user.

use serde::{Deserialize, Serialize};

use crate::types::{LatLng, SeismicEvent};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let sin_d_lat = (d_lat / 2.0).sin();
    let sin_d_lng = (d_lng / 2.0).sin();
    let h = sin_d_lat * sin_d_lat + lat1.cos() * lat2.cos() * sin_d_lng * sin_d_lng;
    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Felt intensity at the user's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImpactLevel {
    NotFelt,
    Weak,
    Light,
    Moderate,
    Strong,
    Severe,
}

impl ImpactLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ImpactLevel::NotFelt => "Not felt",
            ImpactLevel::Weak => "Weak",
            ImpactLevel::Light => "Light",
            ImpactLevel::Moderate => "Moderate",
            ImpactLevel::Strong => "Strong",
            ImpactLevel::Severe => "Severe",
        }
    }
}

/// Magnitude attenuated by log distance: `m - 1.1 * log10(max(1, d))`.
pub fn effective_magnitude(magnitude: f64, distance_km: f64) -> f64 {
    magnitude - 1.1 * distance_km.max(1.0).log10()
}

pub fn estimate_impact(magnitude: f64, distance_km: f64) -> ImpactLevel {
    let m_eff = effective_magnitude(magnitude, distance_km);
    if m_eff.is_nan() || m_eff < 2.5 {
        ImpactLevel::NotFelt
    } else if m_eff < 3.5 {
        ImpactLevel::Weak
    } else if m_eff < 4.5 {
        ImpactLevel::Light
    } else if m_eff < 5.5 {
        ImpactLevel::Moderate
    } else if m_eff < 6.5 {
        ImpactLevel::Strong
    } else {
        ImpactLevel::Severe
    }
}

/// The event closest to the user and how strongly it was likely felt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestEvent {
    pub event: SeismicEvent,
    pub distance_km: f64,
    pub impact: ImpactLevel,
}

pub fn nearest_event(user: LatLng, events: &[SeismicEvent]) -> Option<NearestEvent> {
    let (event, distance_km) = events
        .iter()
        .map(|e| (e, haversine_km(user, e.position())))
        .filter(|(_, d)| d.is_finite())
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    Some(NearestEvent {
        event: event.clone(),
        distance_km,
        impact: estimate_impact(event.magnitude, distance_km),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, EpochMillis, EventId};

    fn event(id: &str, mag: f64, lat: f64, lng: f64) -> SeismicEvent {
        SeismicEvent {
            id: EventId::new(id),
            magnitude: mag,
            coordinates: Coordinates::new(lng, lat, 10.0),
            time: EpochMillis::from_millis(0),
            place: id.to_string(),
            url: String::new(),
            title: String::new(),
        }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = LatLng::new(35.0, 139.0);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(LatLng::new(0.0, 0.0), LatLng::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn antipodes_are_half_circumference() {
        let d = haversine_km(LatLng::new(0.0, 0.0), LatLng::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn impact_attenuates_with_distance() {
        assert_eq!(estimate_impact(7.0, 0.5), ImpactLevel::Severe);
        assert_eq!(estimate_impact(7.0, 10.0), ImpactLevel::Strong);
        assert_eq!(estimate_impact(4.0, 1000.0), ImpactLevel::NotFelt);
        assert_eq!(estimate_impact(f64::NAN, 1.0), ImpactLevel::NotFelt);
    }

    #[test]
    fn picks_closest_event() {
        let events = vec![
            event("far", 6.0, 10.0, 10.0),
            event("near", 3.0, 35.1, 139.1),
        ];
        let nearest = nearest_event(LatLng::new(35.0, 139.0), &events).unwrap();
        assert_eq!(nearest.event.id.as_str(), "near");
        assert!(nearest.distance_km < 20.0);
    }

    #[test]
    fn no_events_no_nearest() {
        assert!(nearest_event(LatLng::new(0.0, 0.0), &[]).is_none());
    }
}
