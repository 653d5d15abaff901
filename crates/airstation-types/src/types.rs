//! Core types for AirStation sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Hardware sensor type id reported by the bridge for PM2.5.
pub const SENSOR_TYPE_PM25: i32 = 65537;
/// Hardware sensor type id reported by the bridge for PM10.
pub const SENSOR_TYPE_PM10: i32 = 65538;
/// Hardware sensor type id reported by the bridge for carbon monoxide.
pub const SENSOR_TYPE_CO: i32 = 65539;
/// Hardware sensor type id reported by the bridge for LPG / flammable gas.
pub const SENSOR_TYPE_LPG: i32 = 65540;
/// Hardware sensor type id for ambient temperature.
pub const SENSOR_TYPE_TEMPERATURE: i32 = 13;
/// Hardware sensor type id for relative humidity.
pub const SENSOR_TYPE_HUMIDITY: i32 = 12;

/// Kind of environmental sensor a reading came from.
///
/// The set is closed: anything the bridge reports that is not recognised maps
/// to [`SensorKind::Unknown`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SensorKind {
    /// Fine particulate matter (PM2.5).
    Pm25,
    /// Inhalable particulate matter (PM10).
    Pm10,
    /// Carbon monoxide.
    Co,
    /// Liquefied petroleum gas / flammable gas.
    Lpg,
    /// Ambient temperature.
    Temperature,
    /// Relative humidity.
    Humidity,
    /// Unrecognised sensor.
    Unknown,
}

impl SensorKind {
    /// Number of sensor kinds, including [`SensorKind::Unknown`].
    pub const COUNT: usize = 7;

    /// Every sensor kind, in index order.
    pub const ALL: [SensorKind; Self::COUNT] = [
        SensorKind::Pm25,
        SensorKind::Pm10,
        SensorKind::Co,
        SensorKind::Lpg,
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Unknown,
    ];

    /// Map a hardware sensor type id to a kind.
    ///
    /// ```
    /// use airstation_types::SensorKind;
    ///
    /// assert_eq!(SensorKind::from_sensor_type(65539), SensorKind::Co);
    /// assert_eq!(SensorKind::from_sensor_type(1), SensorKind::Unknown);
    /// ```
    #[must_use]
    pub fn from_sensor_type(sensor_type: i32) -> Self {
        match sensor_type {
            SENSOR_TYPE_PM25 => SensorKind::Pm25,
            SENSOR_TYPE_PM10 => SensorKind::Pm10,
            SENSOR_TYPE_CO => SensorKind::Co,
            SENSOR_TYPE_LPG => SensorKind::Lpg,
            SENSOR_TYPE_TEMPERATURE => SensorKind::Temperature,
            SENSOR_TYPE_HUMIDITY => SensorKind::Humidity,
            _ => SensorKind::Unknown,
        }
    }

    /// The hardware sensor type id for this kind, if it has one.
    #[must_use]
    pub fn sensor_type(&self) -> Option<i32> {
        match self {
            SensorKind::Pm25 => Some(SENSOR_TYPE_PM25),
            SensorKind::Pm10 => Some(SENSOR_TYPE_PM10),
            SensorKind::Co => Some(SENSOR_TYPE_CO),
            SensorKind::Lpg => Some(SENSOR_TYPE_LPG),
            SensorKind::Temperature => Some(SENSOR_TYPE_TEMPERATURE),
            SensorKind::Humidity => Some(SENSOR_TYPE_HUMIDITY),
            SensorKind::Unknown => None,
        }
    }

    /// Measurement unit for this kind.
    ///
    /// This is the only place units come from; a [`Reading`] never stores one.
    ///
    /// ```
    /// use airstation_types::SensorKind;
    ///
    /// assert_eq!(SensorKind::Temperature.unit(), "°C");
    /// assert_eq!(SensorKind::Lpg.unit(), "ppm");
    /// assert_eq!(SensorKind::Unknown.unit(), "µg/m³");
    /// ```
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Co | SensorKind::Lpg => "ppm",
            SensorKind::Pm25 | SensorKind::Pm10 | SensorKind::Unknown => "µg/m³",
        }
    }

    /// Stable lowercase name, used for storage and URLs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Pm25 => "pm25",
            SensorKind::Pm10 => "pm10",
            SensorKind::Co => "co",
            SensorKind::Lpg => "lpg",
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Unknown => "unknown",
        }
    }

    /// Position of this kind in [`SensorKind::ALL`].
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Pm25 => write!(f, "PM2.5"),
            SensorKind::Pm10 => write!(f, "PM10"),
            SensorKind::Co => write!(f, "CO"),
            SensorKind::Lpg => write!(f, "LPG"),
            SensorKind::Temperature => write!(f, "Temperature"),
            SensorKind::Humidity => write!(f, "Humidity"),
            SensorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

impl FromStr for SensorKind {
    type Err = ParseError;

    /// Parse a kind from its storage name or display label, case-insensitively.
    ///
    /// ```
    /// use airstation_types::SensorKind;
    ///
    /// assert_eq!("pm25".parse::<SensorKind>(), Ok(SensorKind::Pm25));
    /// assert_eq!("PM2.5".parse::<SensorKind>(), Ok(SensorKind::Pm25));
    /// assert!("radon".parse::<SensorKind>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pm25" | "pm2.5" | "pm2_5" => Ok(SensorKind::Pm25),
            "pm10" => Ok(SensorKind::Pm10),
            "co" => Ok(SensorKind::Co),
            "lpg" => Ok(SensorKind::Lpg),
            "temperature" | "temp" => Ok(SensorKind::Temperature),
            "humidity" | "humid" => Ok(SensorKind::Humidity),
            "unknown" => Ok(SensorKind::Unknown),
            _ => Err(ParseError::UnknownKind(s.to_string())),
        }
    }
}

/// A raw event as delivered by the sensor bridge, before mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawSensorEvent {
    /// Hardware sensor type id (see the `SENSOR_TYPE_*` constants).
    pub sensor_type: i32,
    /// Measured value, in the unit implied by the sensor type.
    pub value: f64,
    /// When the event was received.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl RawSensorEvent {
    /// Create a raw event stamped with the current time.
    pub fn now(sensor_type: i32, value: f64) -> Self {
        Self {
            sensor_type,
            value,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// One timestamped sensor measurement.
///
/// Readings are immutable values. The unit is not stored; it is always
/// derived from the kind through [`Reading::unit`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Sensor kind.
    pub kind: SensorKind,
    /// Measured value.
    pub value: f64,
    /// When the measurement was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    /// Create a reading.
    pub fn new(kind: SensorKind, value: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            kind,
            value,
            timestamp,
        }
    }

    /// Create a reading stamped with the current time.
    pub fn now(kind: SensorKind, value: f64) -> Self {
        Self::new(kind, value, OffsetDateTime::now_utc())
    }

    /// Unit of the value, derived from the kind.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    /// Timestamp as Unix milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1} {}", self.kind, self.value, self.unit())
    }
}

/// A reading as stored in the history, with its assigned row id.
///
/// Ids are assigned by the store, strictly increasing in append order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PersistedReading {
    /// Store-assigned identifier.
    pub id: i64,
    /// The stored reading.
    pub reading: Reading,
}

impl PersistedReading {
    /// Wrap a reading with its assigned id.
    pub fn new(id: i64, reading: Reading) -> Self {
        Self { id, reading }
    }
}
