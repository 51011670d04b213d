//! Position history between consecutive snapshots.

use std::collections::HashMap;

use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// First sighting since the last reset.
    New,
    Held,
    Gained(u32),
    Lost(u32),
}

/// Last seen position per car number. Owned by whoever needs history, reset
/// explicitly when the context changes (e.g. a phase transition).
#[derive(Debug, Clone, Default)]
pub struct PositionHistory {
    last: HashMap<String, u32>,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `snapshot` against the previous one and remember it.
    ///
    /// Returns one `(car, movement)` per participant, in snapshot order.
    pub fn observe(&mut self, snapshot: &TelemetrySnapshot) -> Vec<(String, Movement)> {
        let mut out = Vec::with_capacity(snapshot.cars.len());
        for c in &snapshot.cars {
            let movement = match self.last.get(&c.car) {
                None => Movement::New,
                Some(&prev) if c.position < prev => Movement::Gained(prev - c.position),
                Some(&prev) if c.position > prev => Movement::Lost(c.position - prev),
                Some(_) => Movement::Held,
            };
            out.push((c.car.clone(), movement));
        }

        self.last = snapshot
            .cars
            .iter()
            .map(|c| (c.car.clone(), c.position))
            .collect();
        out
    }

    /// Car number that held P1 in the last observed snapshot.
    pub fn previous_leader(&self) -> Option<&str> {
        self.last
            .iter()
            .find(|(_, p)| **p == 1)
            .map(|(car, _)| car.as_str())
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CarRecord;

    fn order(cars: &[&str]) -> TelemetrySnapshot {
        TelemetrySnapshot::new(
            cars.iter()
                .enumerate()
                .map(|(i, c)| CarRecord::new(i as u32 + 1, *c, ""))
                .collect(),
        )
    }

    #[test]
    fn first_observation_is_all_new() {
        let mut h = PositionHistory::new();
        let moves = h.observe(&order(&["24", "5", "11"]));
        assert!(moves.iter().all(|(_, m)| *m == Movement::New));
        assert_eq!(h.previous_leader(), Some("24"));
    }

    #[test]
    fn tracks_gains_and_losses() {
        let mut h = PositionHistory::new();
        h.observe(&order(&["24", "5", "11"]));
        let moves = h.observe(&order(&["11", "24", "5"]));
        assert_eq!(moves[0], ("11".to_string(), Movement::Gained(2)));
        assert_eq!(moves[1], ("24".to_string(), Movement::Lost(1)));
        assert_eq!(moves[2], ("5".to_string(), Movement::Lost(1)));
        assert_eq!(h.previous_leader(), Some("11"));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut h = PositionHistory::new();
        h.observe(&order(&["24", "5"]));
        h.reset();
        assert!(h.is_empty());
        let moves = h.observe(&order(&["5", "24"]));
        assert!(moves.iter().all(|(_, m)| *m == Movement::New));
    }
}
