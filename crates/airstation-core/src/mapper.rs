//! Translation of raw bridge events into typed readings.

use airstation_types::{RawSensorEvent, Reading, SensorKind};

/// Map a raw sensor event to a [`Reading`].
///
/// Never fails: an unrecognised sensor id yields [`SensorKind::Unknown`].
/// The value and timestamp are carried over unchanged.
pub fn map(event: &RawSensorEvent) -> Reading {
    Reading::new(
        SensorKind::from_sensor_type(event.sensor_type),
        event.value,
        event.timestamp,
    )
}
