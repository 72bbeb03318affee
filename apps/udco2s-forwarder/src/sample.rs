use crate::parser::Reading;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    #[serde(rename = "co2ppm")]
    pub co2_ppm: String,
    pub humidity: String,
    pub temperature: String,
}

/// One parsed reading plus its capture time (unix seconds). This is also the
/// shape of the JSON line written to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub time: i64,
    pub status: SensorStatus,
}

impl Sample {
    pub fn new(time: i64, reading: &Reading<'_>) -> Self {
        Self {
            time,
            status: SensorStatus {
                co2_ppm: reading.co2ppm.to_string(),
                humidity: reading.humidity.to_string(),
                temperature: reading.temperature.to_string(),
            },
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
