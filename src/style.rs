// Magnitude bands and marker styling.
// One table shared by the map layer, the filter legend, and the statistics aggregator.

use serde::{Deserialize, Serialize};

/// Severity band. Closed-open intervals, disjoint and exhaustive over magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MagnitudeBand {
    /// m < 3.0 (also NaN and negative values).
    Minor,
    /// 3.0 <= m < 5.0
    Light,
    /// 5.0 <= m < 6.0
    Moderate,
    /// m >= 6.0
    Severe,
}

impl MagnitudeBand {
    pub const ALL: [MagnitudeBand; 4] = [
        MagnitudeBand::Minor,
        MagnitudeBand::Light,
        MagnitudeBand::Moderate,
        MagnitudeBand::Severe,
    ];

    pub fn from_magnitude(magnitude: f64) -> Self {
        // NaN fails every comparison and lands in Minor.
        if magnitude >= 6.0 {
            MagnitudeBand::Severe
        } else if magnitude >= 5.0 {
            MagnitudeBand::Moderate
        } else if magnitude >= 3.0 {
            MagnitudeBand::Light
        } else {
            MagnitudeBand::Minor
        }
    }

    /// Legend label.
    pub fn label(&self) -> &'static str {
        match self {
            MagnitudeBand::Minor => "Minor (< 3.0)",
            MagnitudeBand::Light => "Light (3.0-5.0)",
            MagnitudeBand::Moderate => "Moderate (5.0-6.0)",
            MagnitudeBand::Severe => "Severe (>= 6.0)",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            MagnitudeBand::Minor => "magnitude-low",
            MagnitudeBand::Light => "magnitude-medium",
            MagnitudeBand::Moderate => "magnitude-high",
            MagnitudeBand::Severe => "magnitude-severe",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            MagnitudeBand::Minor => "hsl(142, 76%, 36%)",
            MagnitudeBand::Light => "hsl(48, 100%, 67%)",
            MagnitudeBand::Moderate => "hsl(25, 95%, 53%)",
            MagnitudeBand::Severe => "hsl(0, 86%, 58%)",
        }
    }

    /// Base marker radius in pixels.
    pub fn radius_px(&self) -> f64 {
        match self {
            MagnitudeBand::Minor => 6.0,
            MagnitudeBand::Light => 8.0,
            MagnitudeBand::Moderate => 12.0,
            MagnitudeBand::Severe => 16.0,
        }
    }
}

/// Deterministic visual treatment for a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MagnitudeStyle {
    pub color: &'static str,
    pub radius_px: f64,
    pub band: MagnitudeBand,
    pub class_name: &'static str,
}

pub fn classify(magnitude: f64) -> MagnitudeStyle {
    let band = MagnitudeBand::from_magnitude(magnitude);
    MagnitudeStyle {
        color: band.color(),
        radius_px: band.radius_px(),
        band,
        class_name: band.class_name(),
    }
}
