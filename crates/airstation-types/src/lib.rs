//! Platform-agnostic types for AirStation environmental sensors.
//!
//! This crate provides the shared vocabulary used by the core library, the
//! store, and the service: sensor kinds, readings, and raw bridge events.
//!
//! # Example
//!
//! ```
//! use airstation_types::{Reading, SensorKind};
//!
//! let reading = Reading::now(SensorKind::Co, 12.0);
//! assert_eq!(reading.unit(), "ppm");
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    PersistedReading, RawSensorEvent, Reading, SENSOR_TYPE_CO, SENSOR_TYPE_HUMIDITY,
    SENSOR_TYPE_LPG, SENSOR_TYPE_PM10, SENSOR_TYPE_PM25, SENSOR_TYPE_TEMPERATURE, SensorKind,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_any_sensor_type_maps_to_a_kind(id in any::<i32>()) {
            let kind = SensorKind::from_sensor_type(id);
            match kind.sensor_type() {
                Some(known) => prop_assert_eq!(known, id),
                None => prop_assert_eq!(kind, SensorKind::Unknown),
            }
        }

        #[test]
        fn prop_unknown_names_never_panic(name in "\\PC*") {
            let _ = name.parse::<SensorKind>();
        }
    }
}
