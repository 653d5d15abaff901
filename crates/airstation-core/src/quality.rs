//! Air quality categorisation.
//!
//! Each pollutant has two fixed breakpoints (inclusive upper bounds for
//! `Good` and `Moderate`); anything above the second is `Critical`.
//! Temperature and humidity have no critical tier and always classify `Good`.
//!
//! # Example
//!
//! ```
//! use airstation_core::{classify, QualityLevel};
//! use airstation_types::SensorKind;
//!
//! assert_eq!(classify(SensorKind::Pm25, 25.0), QualityLevel::Good);
//! assert_eq!(classify(SensorKind::Pm25, 25.1), QualityLevel::Moderate);
//! assert_eq!(classify(SensorKind::Co, 36.0), QualityLevel::Critical);
//! ```

use serde::{Deserialize, Serialize};

use airstation_types::{Reading, SensorKind};

/// Quality category for a sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// Within healthy limits.
    Good,
    /// Elevated; sensitive people may be affected.
    Moderate,
    /// Harmful; action required.
    Critical,
    /// No meaningful category (no value, or a non-finite one).
    Unknown,
}

impl QualityLevel {
    /// Classify a reading.
    pub fn of(reading: &Reading) -> Self {
        classify(reading.kind, reading.value)
    }

    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            QualityLevel::Good => "Good",
            QualityLevel::Moderate => "Moderate",
            QualityLevel::Critical => "Critical",
            QualityLevel::Unknown => "--",
        }
    }

    /// Severity rank, `None` for [`QualityLevel::Unknown`].
    pub fn severity(&self) -> Option<u8> {
        match self {
            QualityLevel::Good => Some(0),
            QualityLevel::Moderate => Some(1),
            QualityLevel::Critical => Some(2),
            QualityLevel::Unknown => None,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive upper bounds of the `Good` and `Moderate` tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoints {
    /// Upper bound for Good.
    pub good_max: f64,
    /// Upper bound for Moderate. Above this is Critical.
    pub moderate_max: f64,
}

impl Breakpoints {
    const fn new(good_max: f64, moderate_max: f64) -> Self {
        Self {
            good_max,
            moderate_max,
        }
    }

    /// Categorise a value against these bounds.
    pub fn evaluate(&self, value: f64) -> QualityLevel {
        if value.is_nan() {
            QualityLevel::Unknown
        } else if value <= self.good_max {
            QualityLevel::Good
        } else if value <= self.moderate_max {
            QualityLevel::Moderate
        } else {
            QualityLevel::Critical
        }
    }
}

/// Breakpoints for a kind, or `None` when the kind has no critical tier.
pub fn breakpoints(kind: SensorKind) -> Option<Breakpoints> {
    match kind {
        SensorKind::Pm25 => Some(Breakpoints::new(25.0, 50.0)),
        SensorKind::Pm10 => Some(Breakpoints::new(50.0, 100.0)),
        SensorKind::Co => Some(Breakpoints::new(9.0, 35.0)),
        SensorKind::Lpg => Some(Breakpoints::new(500.0, 1000.0)),
        SensorKind::Temperature | SensorKind::Humidity | SensorKind::Unknown => None,
    }
}

/// Classify a value of the given kind.
pub fn classify(kind: SensorKind, value: f64) -> QualityLevel {
    match breakpoints(kind) {
        Some(bounds) => bounds.evaluate(value),
        None => QualityLevel::Good,
    }
}
