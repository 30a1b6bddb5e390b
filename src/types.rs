use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Globally unique room coordinate. `floor` is a zero-based index; the
/// display form counts floors from one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomId {
    pub floor: usize,
    pub row: usize,
    pub col: usize,
}

impl RoomId {
    pub fn new(floor: usize, row: usize, col: usize) -> Self {
        Self { floor, row, col }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Room {}-{}-{}", self.floor + 1, self.row, self.col)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Fire,
    StructuralDamage,
    HostileOccupation,
}

impl HazardKind {
    pub const ALL: [HazardKind; 3] = [
        HazardKind::Fire,
        HazardKind::StructuralDamage,
        HazardKind::HostileOccupation,
    ];

    pub fn label(self) -> &'static str {
        match self {
            HazardKind::Fire => "fire",
            HazardKind::StructuralDamage => "earthquake damage",
            HazardKind::HostileOccupation => "hostile occupation",
        }
    }

    pub fn index(self) -> usize {
        match self {
            HazardKind::Fire => 0,
            HazardKind::StructuralDamage => 1,
            HazardKind::HostileOccupation => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mobility {
    AbleBodied,
    ReducedMobility,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderRole {
    Firefighter,
    RescueWorker,
    Paramedic,
    Security,
}

impl ResponderRole {
    pub const ALL: [ResponderRole; 4] = [
        ResponderRole::Firefighter,
        ResponderRole::RescueWorker,
        ResponderRole::Paramedic,
        ResponderRole::Security,
    ];

    /// The hazard this role clears when dispatched. Paramedics clear nothing.
    pub fn resolves(self) -> Option<HazardKind> {
        match self {
            ResponderRole::Firefighter => Some(HazardKind::Fire),
            ResponderRole::RescueWorker => Some(HazardKind::StructuralDamage),
            ResponderRole::Security => Some(HazardKind::HostileOccupation),
            ResponderRole::Paramedic => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentKind {
    Occupant,
    Responder,
    Management,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    pub kind: AgentKind,
    pub index: usize,
}

impl AgentId {
    pub fn occupant(index: usize) -> Self {
        Self {
            kind: AgentKind::Occupant,
            index,
        }
    }

    pub fn responder(index: usize) -> Self {
        Self {
            kind: AgentKind::Responder,
            index,
        }
    }

    pub fn management(index: usize) -> Self {
        Self {
            kind: AgentKind::Management,
            index,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            AgentKind::Occupant => "occupant",
            AgentKind::Responder => "responder",
            AgentKind::Management => "management",
        };
        write!(f, "{prefix}-{}", self.index + 1)
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    InRoom(RoomId),
    Evacuated,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::InRoom(room) => room.fmt(f),
            Location::Evacuated => f.write_str("Evacuated"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HazardTally {
    pub kind: HazardKind,
    pub resolved: u64,
    pub total: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildingView {
    pub floors: usize,
    pub rows: usize,
    pub cols: usize,
    pub elevator: (usize, usize),
    pub staircase: (usize, usize),
}

#[derive(Clone, Debug, Serialize)]
pub struct OccupantView {
    pub id: AgentId,
    pub mobility: Mobility,
    pub location: Location,
    #[serde(rename = "roomsTraversed")]
    pub rooms_traversed: u64,
    #[serde(rename = "evacuatedAfterMs")]
    pub evacuated_after_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponderView {
    pub id: AgentId,
    pub role: ResponderRole,
    pub location: Location,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActiveHazard {
    pub room: RoomId,
    pub kinds: Vec<HazardKind>,
    #[serde(rename = "lightsOn")]
    pub lights_on: bool,
    /// Age of the oldest hazard still active in the room.
    #[serde(rename = "activeForMs")]
    pub active_for_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentDuration {
    pub id: AgentId,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletionStats {
    #[serde(rename = "evacuationTimes")]
    pub evacuation_times: Vec<AgentDuration>,
    #[serde(rename = "totalEvacuationMs")]
    pub total_evacuation_ms: u64,
    #[serde(rename = "responderResponses")]
    pub responder_responses: usize,
    #[serde(rename = "meanResponseMs")]
    pub mean_response_ms: f64,
}

/// Read-only view handed to the dashboard. Produced on demand by the world
/// actor; holding one never blocks the simulation.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    #[serde(rename = "generatedAtIso")]
    pub generated_at_iso: String,
    pub tick: u64,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    pub building: BuildingView,
    pub hazards: Vec<HazardTally>,
    pub occupants: Vec<OccupantView>,
    pub responders: Vec<ResponderView>,
    #[serde(rename = "recentUpdates")]
    pub recent_updates: Vec<String>,
    #[serde(rename = "activeHazards")]
    pub active_hazards: Vec<ActiveHazard>,
    #[serde(rename = "assemblyPoints")]
    pub assembly_points: Vec<RoomId>,
    #[serde(rename = "elevatorGrants")]
    pub elevator_grants: u64,
    pub completion: Option<CompletionStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Stalled,
}

/// Fixed-shape result of one full run, consumed by the batch harness.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub seed: u32,
    pub outcome: RunOutcome,
    pub ticks: u64,
    #[serde(rename = "firesResolved")]
    pub fires_resolved: u64,
    #[serde(rename = "firesTotal")]
    pub fires_total: u64,
    #[serde(rename = "earthquakesResolved")]
    pub earthquakes_resolved: u64,
    #[serde(rename = "earthquakesTotal")]
    pub earthquakes_total: u64,
    #[serde(rename = "attacksResolved")]
    pub attacks_resolved: u64,
    #[serde(rename = "attacksTotal")]
    pub attacks_total: u64,
    pub evacuated: usize,
    #[serde(rename = "totalAgents")]
    pub total_agents: usize,
    pub responses: usize,
    #[serde(rename = "totalEvacuationMs")]
    pub total_evacuation_ms: u64,
    #[serde(rename = "meanResponseMs")]
    pub mean_response_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_ids_display_one_based() {
        assert_eq!(AgentId::occupant(0).to_string(), "occupant-1");
        assert_eq!(AgentId::responder(3).to_string(), "responder-4");
        assert_eq!(AgentId::management(0).to_string(), "management-1");
    }

    #[test]
    fn room_display_counts_floors_from_one() {
        assert_eq!(RoomId::new(0, 2, 3).to_string(), "Room 1-2-3");
    }

    #[test]
    fn every_hazard_has_exactly_one_resolving_role() {
        for kind in HazardKind::ALL {
            let roles: Vec<_> = ResponderRole::ALL
                .iter()
                .filter(|role| role.resolves() == Some(kind))
                .collect();
            assert_eq!(roles.len(), 1, "{kind:?}");
        }
    }

    #[test]
    fn location_serializes_evacuated_marker() {
        let value = serde_json::to_value(Location::Evacuated).expect("serialize location");
        assert_eq!(value, serde_json::json!("evacuated"));
        let value = serde_json::to_value(AgentId::occupant(1)).expect("serialize id");
        assert_eq!(value, serde_json::json!("occupant-2"));
    }
}
