//! Sensor bridge frame decoding.
//!
//! The bridge speaks newline-delimited JSON. Only `"data"` frames carry
//! measurements; acknowledgements and other control frames are ignored.
//!
//! ```text
//! {"type":"data","src":"wifi","payload":{"pm25":12.0,"co_ppm":3.0,"temp_c":24.5}}
//! ```

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::trace;

use airstation_types::{
    RawSensorEvent, SENSOR_TYPE_CO, SENSOR_TYPE_HUMIDITY, SENSOR_TYPE_LPG, SENSOR_TYPE_PM10,
    SENSOR_TYPE_PM25, SENSOR_TYPE_TEMPERATURE,
};

use crate::error::{Error, Result};

/// Lowest temperature the bridge reports for a working probe.
const TEMPERATURE_SENTINEL: f64 = -273.0;

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    src: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    pm25: Option<f64>,
    pm10: Option<f64>,
    co_ppm: Option<f64>,
    lpg_ppm: Option<f64>,
    temp_c: Option<f64>,
    humid_p: Option<f64>,
}

impl Payload {
    fn into_events(self, timestamp: OffsetDateTime) -> Vec<RawSensorEvent> {
        let concentration = |v: f64| v >= 0.0;
        let fields = [
            (SENSOR_TYPE_PM25, self.pm25.filter(|v| concentration(*v))),
            (SENSOR_TYPE_PM10, self.pm10.filter(|v| concentration(*v))),
            (SENSOR_TYPE_CO, self.co_ppm.filter(|v| concentration(*v))),
            (SENSOR_TYPE_LPG, self.lpg_ppm.filter(|v| concentration(*v))),
            (
                SENSOR_TYPE_TEMPERATURE,
                self.temp_c.filter(|v| *v > TEMPERATURE_SENTINEL),
            ),
            (SENSOR_TYPE_HUMIDITY, self.humid_p.filter(|v| concentration(*v))),
        ];

        fields
            .into_iter()
            .filter_map(|(sensor_type, value)| {
                value.map(|value| RawSensorEvent {
                    sensor_type,
                    value,
                    timestamp,
                })
            })
            .collect()
    }
}

/// Decode one bridge line, stamping events with the current time.
pub fn decode_frame(line: &str) -> Result<Vec<RawSensorEvent>> {
    decode_frame_at(line, OffsetDateTime::now_utc())
}

/// Decode one bridge line, stamping every event with `timestamp`.
///
/// Non-data frames decode to an empty list. Missing fields and sentinel
/// values (negative concentrations, temperatures at or below -273 °C)
/// produce no event.
pub fn decode_frame_at(line: &str, timestamp: OffsetDateTime) -> Result<Vec<RawSensorEvent>> {
    let frame: Frame =
        serde_json::from_str(line.trim()).map_err(|e| Error::InvalidFrame(e.to_string()))?;

    if frame.kind.as_deref() != Some("data") {
        trace!("Ignoring non-data frame: {:?}", frame.kind);
        return Ok(Vec::new());
    }

    let payload = frame
        .payload
        .ok_or_else(|| Error::InvalidFrame("data frame without payload".to_string()))?;

    let events = payload.into_events(timestamp);
    trace!(
        "Decoded {} events from {}",
        events.len(),
        frame.src.as_deref().unwrap_or("bridge")
    );
    Ok(events)
}
