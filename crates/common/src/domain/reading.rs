use crate::domain::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Number of temperatures a reading needs for a record to be derived from it.
pub const REQUIRED_TEMPERATURES: usize = 2;

/// Sensor reading as published by a field device.
///
/// Wire format: `{"name": "AA:BB", "reading_idx": 3, "temps": [21.5, 22.1]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "name")]
    pub device_id: String,
    #[serde(rename = "reading_idx")]
    pub sequence_index: i64,
    #[serde(rename = "temps")]
    pub temperatures: Vec<f64>,
}

impl SensorReading {
    /// Decodes a JSON payload. All three fields are required.
    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Row written to the `conditions` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub temp_delta: f64,
    pub raw_temp0: f64,
    pub raw_temp1: f64,
}

impl PersistedRecord {
    /// Derives a record from the first two temperatures of `reading`.
    ///
    /// `timestamp` is the insertion instant, not the sensing instant.
    pub fn from_reading(reading: &SensorReading, timestamp: DateTime<Utc>) -> DomainResult<Self> {
        match reading.temperatures.as_slice() {
            [temp0, temp1, ..] => Ok(Self {
                timestamp,
                device_id: reading.device_id.clone(),
                temp_delta: temp1 - temp0,
                raw_temp0: *temp0,
                raw_temp1: *temp1,
            }),
            temps => Err(DomainError::InsufficientTemperatures {
                expected: REQUIRED_TEMPERATURES,
                actual: temps.len(),
            }),
        }
    }
}
