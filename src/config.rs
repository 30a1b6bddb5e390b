use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    ABLE_BODIED_PACE_MS, DEFAULT_MAX_TICKS, EARTHQUAKE_ODDS, ELEVATOR_RETRY_MS,
    ELEVATOR_WINDOW_MS, FIRE_ODDS, FIRE_SPREAD_ODDS, FLOOR_SETTLE_MS, HOSTILE_ODDS,
    LIGHTING_RESTORE_MS, LIGHTS_OUT_ODDS, MAILBOX_CAPACITY, MAILBOX_POLL_MS, MAX_FLOORS,
    MAX_GRID_SIDE, MAX_OCCUPANTS, MEDIC_HOLD_MS, MIN_FLOORS, MIN_GRID_SIDE, MIN_OCCUPANTS,
    MONITOR_INTERVAL_MS, REDUCED_MOBILITY_PACE_MS, RESPONDER_STEP_MS, TICK_MS,
};
use crate::error::{SimError, SimResult};
use crate::types::Mobility;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BuildingConfig {
    pub min_floors: usize,
    pub max_floors: usize,
    pub min_side: usize,
    pub max_side: usize,
    pub min_occupants: usize,
    pub max_occupants: usize,
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self {
            min_floors: MIN_FLOORS,
            max_floors: MAX_FLOORS,
            min_side: MIN_GRID_SIDE,
            max_side: MAX_GRID_SIDE,
            min_occupants: MIN_OCCUPANTS,
            max_occupants: MAX_OCCUPANTS,
        }
    }
}

/// Per-tick probabilities used by the hazard injector.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HazardOdds {
    pub fire: f64,
    pub earthquake: f64,
    pub hostile: f64,
    pub fire_spread: f64,
    pub lights_out: f64,
}

impl HazardOdds {
    pub fn none() -> Self {
        Self {
            fire: 0.0,
            earthquake: 0.0,
            hostile: 0.0,
            fire_spread: 0.0,
            lights_out: 0.0,
        }
    }
}

impl Default for HazardOdds {
    fn default() -> Self {
        Self {
            fire: FIRE_ODDS,
            earthquake: EARTHQUAKE_ODDS,
            hostile: HOSTILE_ODDS,
            fire_spread: FIRE_SPREAD_ODDS,
            lights_out: LIGHTS_OUT_ODDS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub tick_ms: u64,
    pub mailbox_poll_ms: u64,
    pub monitor_interval_ms: u64,
    pub able_bodied_pace_ms: u64,
    pub reduced_mobility_pace_ms: u64,
    pub responder_step_ms: u64,
    pub floor_settle_ms: u64,
    pub elevator_window_ms: u64,
    pub elevator_retry_ms: u64,
    pub lighting_restore_ms: u64,
    pub medic_hold_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tick_ms: TICK_MS,
            mailbox_poll_ms: MAILBOX_POLL_MS,
            monitor_interval_ms: MONITOR_INTERVAL_MS,
            able_bodied_pace_ms: ABLE_BODIED_PACE_MS,
            reduced_mobility_pace_ms: REDUCED_MOBILITY_PACE_MS,
            responder_step_ms: RESPONDER_STEP_MS,
            floor_settle_ms: FLOOR_SETTLE_MS,
            elevator_window_ms: ELEVATOR_WINDOW_MS,
            elevator_retry_ms: ELEVATOR_RETRY_MS,
            lighting_restore_ms: LIGHTING_RESTORE_MS,
            medic_hold_ms: MEDIC_HOLD_MS,
        }
    }
}

impl Timings {
    /// Divides every delay by `speed`, keeping each at least 1 ms.
    pub fn scaled(&self, speed: f64) -> Self {
        if !speed.is_finite() || speed <= 0.0 {
            return self.clone();
        }
        let scale = |ms: u64| ((ms as f64 / speed).round() as u64).max(1);
        Self {
            tick_ms: scale(self.tick_ms),
            mailbox_poll_ms: scale(self.mailbox_poll_ms),
            monitor_interval_ms: scale(self.monitor_interval_ms),
            able_bodied_pace_ms: scale(self.able_bodied_pace_ms),
            reduced_mobility_pace_ms: scale(self.reduced_mobility_pace_ms),
            responder_step_ms: scale(self.responder_step_ms),
            floor_settle_ms: scale(self.floor_settle_ms),
            elevator_window_ms: scale(self.elevator_window_ms),
            elevator_retry_ms: scale(self.elevator_retry_ms),
            lighting_restore_ms: scale(self.lighting_restore_ms),
            medic_hold_ms: scale(self.medic_hold_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn mailbox_poll(&self) -> Duration {
        Duration::from_millis(self.mailbox_poll_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn pace(&self, mobility: Mobility) -> Duration {
        match mobility {
            Mobility::AbleBodied => Duration::from_millis(self.able_bodied_pace_ms),
            Mobility::ReducedMobility => Duration::from_millis(self.reduced_mobility_pace_ms),
        }
    }

    pub fn responder_step(&self) -> Duration {
        Duration::from_millis(self.responder_step_ms)
    }

    pub fn floor_settle(&self) -> Duration {
        Duration::from_millis(self.floor_settle_ms)
    }

    pub fn elevator_window(&self) -> Duration {
        Duration::from_millis(self.elevator_window_ms)
    }

    pub fn elevator_retry(&self) -> Duration {
        Duration::from_millis(self.elevator_retry_ms)
    }

    pub fn lighting_restore(&self) -> Duration {
        Duration::from_millis(self.lighting_restore_ms)
    }

    pub fn medic_hold(&self) -> Duration {
        Duration::from_millis(self.medic_hold_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: Option<u32>,
    pub building: BuildingConfig,
    pub hazards: HazardOdds,
    pub timings: Timings,
    /// Ticks after which a run that has not fully evacuated is reported as
    /// stalled. `None` keeps polling forever.
    pub max_ticks: Option<u64>,
    pub mailbox_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            building: BuildingConfig::default(),
            hazards: HazardOdds::default(),
            timings: Timings::default(),
            max_ticks: Some(DEFAULT_MAX_TICKS),
            mailbox_capacity: MAILBOX_CAPACITY,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> SimResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| SimError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> SimResult<()> {
        let building = &self.building;
        if building.min_floors == 0 || building.min_floors > building.max_floors {
            return Err(SimError::InvalidConfig(format!(
                "floor range {}..={} is empty",
                building.min_floors, building.max_floors
            )));
        }
        if building.min_side == 0 || building.min_side > building.max_side {
            return Err(SimError::InvalidConfig(format!(
                "grid side range {}..={} is empty",
                building.min_side, building.max_side
            )));
        }
        if building.min_occupants > building.max_occupants {
            return Err(SimError::InvalidConfig(format!(
                "occupant range {}..={} is empty",
                building.min_occupants, building.max_occupants
            )));
        }

        let odds = &self.hazards;
        for (name, value) in [
            ("fire", odds.fire),
            ("earthquake", odds.earthquake),
            ("hostile", odds.hostile),
            ("fire_spread", odds.fire_spread),
            ("lights_out", odds.lights_out),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::InvalidConfig(format!(
                    "{name} probability {value} is outside 0..=1"
                )));
            }
        }

        if self.timings.tick_ms == 0 || self.timings.mailbox_poll_ms == 0 {
            return Err(SimError::InvalidConfig(
                "tick and mailbox poll intervals must be positive".to_string(),
            ));
        }
        if self.timings.monitor_interval_ms == 0 {
            return Err(SimError::InvalidConfig(
                "monitor interval must be positive".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(SimError::InvalidConfig(
                "mailbox capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = SimConfig::from_json_str(r#"{"hazards":{"fire":0.5},"seed":9}"#)
            .expect("config should parse");
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.hazards.fire, 0.5);
        assert_eq!(config.hazards.earthquake, EARTHQUAKE_ODDS);
        assert_eq!(config.timings.tick_ms, TICK_MS);
        assert_eq!(config.max_ticks, Some(DEFAULT_MAX_TICKS));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let result = SimConfig::from_json_str(r#"{"hazards":{"fire_spread":1.5}}"#);
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn empty_floor_range_is_rejected() {
        let result =
            SimConfig::from_json_str(r#"{"building":{"min_floors":4,"max_floors":2}}"#);
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn missing_config_file_reports_path() {
        let path = std::env::temp_dir().join("evac-sim-missing-dir").join("config.json");
        let result = SimConfig::from_file(&path);
        assert!(matches!(result, Err(SimError::ReadConfig { .. })));
    }

    #[test]
    fn scaled_timings_never_reach_zero() {
        let timings = Timings::default().scaled(10_000.0);
        assert_eq!(timings.tick_ms, 1);
        assert_eq!(timings.monitor_interval_ms, 1);
        let fast = Timings::default().scaled(4.0);
        assert_eq!(fast.able_bodied_pace_ms, ABLE_BODIED_PACE_MS / 4);
        let unchanged = Timings::default().scaled(0.0);
        assert_eq!(unchanged.tick_ms, TICK_MS);
    }
}
