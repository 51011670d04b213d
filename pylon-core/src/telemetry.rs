//! Telemetry snapshot: the last known state of a live event.
//!
//! Field names serialize in camelCase to match the `liveRace.json` files the
//! display side already reads.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Cars running within this gap of the car ahead are "battling".
pub const BATTLE_THRESHOLD_SECS: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagStatus {
    None,
    Green,
    #[serde(alias = "CAUTION")]
    Yellow,
    Red,
    White,
    Checkered,
    Orange,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FlagStatus {
    /// Map the numeric flag state used by upstream feeds.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => FlagStatus::None,
            1 => FlagStatus::Green,
            2 => FlagStatus::Yellow,
            3 => FlagStatus::Red,
            4 => FlagStatus::White,
            5 | 9 => FlagStatus::Checkered,
            8 => FlagStatus::Orange,
            _ => FlagStatus::Unknown,
        }
    }

    /// Cars are circulating under this flag.
    pub fn is_racing(&self) -> bool {
        matches!(self, FlagStatus::Green | FlagStatus::Yellow | FlagStatus::White)
    }
}

/// One participant in a live running order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarRecord {
    pub position: u32,
    /// Car number; unique within a snapshot.
    pub car: String,
    #[serde(default)]
    pub driver: String,
    /// Gap to the leader in seconds. `None` for the leader.
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default)]
    pub laps_completed: u32,
    #[serde(default = "default_on_track")]
    pub is_on_track: bool,
    #[serde(default, rename = "isOnDVP")]
    pub is_on_dvp: bool,
}

fn default_on_track() -> bool {
    true
}

impl CarRecord {
    pub fn new(position: u32, car: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            position,
            car: car.into(),
            driver: driver.into(),
            interval: None,
            laps_completed: 0,
            is_on_track: true,
            is_on_dvp: false,
        }
    }

    pub fn with_interval(mut self, secs: f64) -> Self {
        self.interval = Some(secs);
        self
    }

    pub fn is_battling(&self) -> bool {
        self.interval.map(|i| i < BATTLE_THRESHOLD_SECS).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub flag: FlagStatus,
    #[serde(default)]
    pub lap: u32,
    #[serde(default)]
    pub laps_total: u32,
    #[serde(default)]
    pub laps_to_go: Option<u32>,
    /// Capture time. Kept as text: a malformed value must read as "not fresh"
    /// rather than fail the whole record.
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub cars: Vec<CarRecord>,
}

impl TelemetrySnapshot {
    pub fn new(cars: Vec<CarRecord>) -> Self {
        Self {
            cars,
            ..Self::default()
        }
    }

    pub fn with_last_update(mut self, stamp: impl Into<String>) -> Self {
        self.last_update = Some(stamp.into());
        self
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn with_laps(mut self, lap: u32, total: u32) -> Self {
        self.lap = lap;
        self.laps_total = total;
        self.laps_to_go = Some(total.saturating_sub(lap));
        self
    }

    /// Participants unique by car number; positions contiguous from 1 once sorted.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for c in &self.cars {
            if c.car.trim().is_empty() {
                return Err(format!("car at position {} has no number", c.position));
            }
            if !seen.insert(c.car.as_str()) {
                return Err(format!("duplicate car number: {}", c.car));
            }
        }

        let mut positions: Vec<u32> = self.cars.iter().map(|c| c.position).collect();
        positions.sort_unstable();
        for (idx, p) in positions.iter().enumerate() {
            let expected = idx as u32 + 1;
            if *p != expected {
                return Err(format!("positions not contiguous: expected {expected}, found {p}"));
            }
        }
        Ok(())
    }

    /// Running order sorted by position.
    pub fn sorted(mut self) -> Self {
        self.cars.sort_by_key(|c| c.position);
        self
    }

    pub fn leader(&self) -> Option<&CarRecord> {
        self.cars.iter().min_by_key(|c| c.position)
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Vec<CarRecord> {
        vec![
            CarRecord::new(2, "5", "Larson").with_interval(0.234),
            CarRecord::new(1, "24", "Byron"),
            CarRecord::new(3, "11", "Hamlin").with_interval(0.089),
        ]
    }

    #[test]
    fn valid_field_passes_and_sorts() {
        let snap = TelemetrySnapshot::new(field()).sorted();
        snap.validate().unwrap();
        assert_eq!(snap.cars[0].car, "24");
        assert_eq!(snap.leader().unwrap().driver, "Byron");
    }

    #[test]
    fn duplicate_car_numbers_are_rejected() {
        let mut cars = field();
        cars[2].car = "5".to_string();
        let err = TelemetrySnapshot::new(cars).validate().unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn gaps_in_positions_are_rejected() {
        let mut cars = field();
        cars[2].position = 7;
        assert!(TelemetrySnapshot::new(cars).validate().is_err());
    }

    #[test]
    fn reads_camel_case_live_file() {
        let json = r#"{
            "series": "CUP",
            "track": "Bowman Gray",
            "flag": "CAUTION",
            "lap": 45,
            "lapsTotal": 200,
            "lastUpdate": "2025-06-01T13:00:00",
            "cars": [
                {"position": 1, "car": "24", "driver": "Byron", "interval": null},
                {"position": 2, "car": "5", "driver": "Larson", "interval": 0.234, "isOnTrack": false, "isOnDVP": true}
            ]
        }"#;
        let snap: TelemetrySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.flag, FlagStatus::Yellow);
        assert_eq!(snap.laps_total, 200);
        assert_eq!(snap.last_update.as_deref(), Some("2025-06-01T13:00:00"));
        assert!(!snap.cars[1].is_on_track);
        assert!(snap.cars[1].is_on_dvp);
        assert!(snap.cars[0].is_on_track);
    }

    #[test]
    fn unknown_flag_string_is_unknown() {
        let snap: TelemetrySnapshot = serde_json::from_str(r#"{"flag": "PURPLE"}"#).unwrap();
        assert_eq!(snap.flag, FlagStatus::Unknown);
        assert!(snap.cars.is_empty());
    }

    #[test]
    fn battle_detection_uses_threshold() {
        let cars = field();
        assert!(!cars[0].is_battling());
        assert!(cars[2].is_battling());
        assert!(!cars[1].is_battling());
    }

    #[test]
    fn flag_codes_map_like_feed() {
        assert_eq!(FlagStatus::from_code(1), FlagStatus::Green);
        assert_eq!(FlagStatus::from_code(9), FlagStatus::Checkered);
        assert_eq!(FlagStatus::from_code(42), FlagStatus::Unknown);
        assert!(FlagStatus::Yellow.is_racing());
        assert!(!FlagStatus::Checkered.is_racing());
    }
}
