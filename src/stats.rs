// Summary statistics for the statistics panel.

use serde::{Deserialize, Serialize};

use crate::style::MagnitudeBand;
use crate::types::{EpochMillis, SeismicEvent};

/// Upper bound of shallow-focus events (km).
pub const SHALLOW_MAX_KM: f64 = 70.0;
/// Upper bound of intermediate-focus events (km).
pub const INTERMEDIATE_MAX_KM: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MagnitudeDistribution {
    pub minor: usize,
    pub light: usize,
    pub moderate: usize,
    pub severe: usize,
}

impl MagnitudeDistribution {
    pub fn count(&self, band: MagnitudeBand) -> usize {
        match band {
            MagnitudeBand::Minor => self.minor,
            MagnitudeBand::Light => self.light,
            MagnitudeBand::Moderate => self.moderate,
            MagnitudeBand::Severe => self.severe,
        }
    }

    fn record(&mut self, band: MagnitudeBand) {
        match band {
            MagnitudeBand::Minor => self.minor += 1,
            MagnitudeBand::Light => self.light += 1,
            MagnitudeBand::Moderate => self.moderate += 1,
            MagnitudeBand::Severe => self.severe += 1,
        }
    }
}

/// Shallow `[0, 70)`, intermediate `[70, 300]`, deep `> 300` km.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DepthDistribution {
    pub shallow: usize,
    pub intermediate: usize,
    pub deep: usize,
}

impl DepthDistribution {
    fn record(&mut self, depth_km: f64) {
        if depth_km < SHALLOW_MAX_KM {
            self.shallow += 1;
        } else if depth_km <= INTERMEDIATE_MAX_KM {
            self.intermediate += 1;
        } else {
            self.deep += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_count: usize,
    pub largest_magnitude: f64,
    pub average_magnitude: f64,
    pub deepest_km: f64,
    pub shallowest_km: f64,
    pub most_recent: EpochMillis,
    pub magnitudes: MagnitudeDistribution,
    pub depths: DepthDistribution,
}

impl EventStats {
    /// Aggregate over `events`. An empty slice yields all zeros.
    pub fn from_events(events: &[SeismicEvent]) -> Self {
        let Some(first) = events.first() else {
            return EventStats::default();
        };

        let mut stats = EventStats {
            total_count: events.len(),
            largest_magnitude: first.magnitude,
            deepest_km: first.depth_km(),
            shallowest_km: first.depth_km(),
            most_recent: first.time,
            ..EventStats::default()
        };
        let mut magnitude_sum = 0.0;

        for event in events {
            let depth = event.depth_km();
            stats.largest_magnitude = stats.largest_magnitude.max(event.magnitude);
            stats.deepest_km = stats.deepest_km.max(depth);
            stats.shallowest_km = stats.shallowest_km.min(depth);
            stats.most_recent = stats.most_recent.max(event.time);
            magnitude_sum += event.magnitude;

            stats.magnitudes.record(MagnitudeBand::from_magnitude(event.magnitude));
            stats.depths.record(depth);
        }
        stats.average_magnitude = magnitude_sum / events.len() as f64;
        stats
    }
}
