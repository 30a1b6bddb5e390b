use crate::types::Mobility;

pub const TICK_MS: u64 = 1_000;
pub const MAILBOX_POLL_MS: u64 = 100;
pub const MONITOR_INTERVAL_MS: u64 = 50;

pub const ABLE_BODIED_PACE_MS: u64 = 4_000;
pub const REDUCED_MOBILITY_PACE_MS: u64 = 5_000;
pub const RESPONDER_STEP_MS: u64 = 1_500;
pub const FLOOR_SETTLE_MS: u64 = 4_000;
pub const ELEVATOR_WINDOW_MS: u64 = 1_000;
pub const ELEVATOR_RETRY_MS: u64 = 2_000;
pub const LIGHTING_RESTORE_MS: u64 = 1_000;
pub const MEDIC_HOLD_MS: u64 = 2_000;

pub const FIRE_ODDS: f64 = 0.07;
pub const EARTHQUAKE_ODDS: f64 = 0.05;
pub const HOSTILE_ODDS: f64 = 0.05;
pub const FIRE_SPREAD_ODDS: f64 = 0.1;
/// Hops one ignition may travel from its origin room.
pub const FIRE_SPREAD_MAX_HOPS: usize = 1;
pub const LIGHTS_OUT_ODDS: f64 = 0.5;

pub const MIN_FLOORS: usize = 1;
pub const MAX_FLOORS: usize = 6;
pub const MIN_GRID_SIDE: usize = 2;
pub const MAX_GRID_SIDE: usize = 6;
/// Transit shafts are placed inside the first five rows and columns.
pub const TRANSIT_SPAN: usize = 5;

pub const MIN_OCCUPANTS: usize = 4;
pub const MAX_OCCUPANTS: usize = 8;

pub const RECENT_UPDATES_CAPACITY: usize = 5;
pub const MAILBOX_CAPACITY: usize = 256;
pub const WORLD_COMMAND_CAPACITY: usize = 1_024;
pub const DEFAULT_MAX_TICKS: u64 = 3_600;

/// Occupants alternate able-bodied / reduced-mobility by spawn order.
pub fn mobility_for_index(index: usize) -> Mobility {
    if index % 2 == 0 {
        Mobility::AbleBodied
    } else {
        Mobility::ReducedMobility
    }
}
