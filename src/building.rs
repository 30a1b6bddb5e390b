use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::BuildingConfig;
use crate::constants::{RECENT_UPDATES_CAPACITY, TRANSIT_SPAN};
use crate::error::{SimError, SimResult};
use crate::rng::Rng;
use crate::types::{
    ActiveHazard, AgentDuration, AgentId, BuildingView, CompletionStats, HazardKind, HazardTally,
    Location, Mobility, OccupantView, ResponderRole, ResponderView, RoomId, RunOutcome, RunReport,
    Snapshot,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transit {
    Elevator,
    Staircase,
}

impl Transit {
    pub fn label(self) -> &'static str {
        match self {
            Transit::Elevator => "elevator",
            Transit::Staircase => "staircase",
        }
    }
}

/// Manhattan distance over (floor, row, col). A floor change costs the same as
/// one step inside a floor.
pub fn distance(a: RoomId, b: RoomId) -> usize {
    a.floor.abs_diff(b.floor) + a.row.abs_diff(b.row) + a.col.abs_diff(b.col)
}

/// Immutable building topology: every floor is the same `rows x cols` grid and
/// the elevator and staircase shafts sit at one fixed position on all floors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    floors: usize,
    rows: usize,
    cols: usize,
    elevator: (usize, usize),
    staircase: (usize, usize),
}

impl Layout {
    pub fn new(
        floors: usize,
        rows: usize,
        cols: usize,
        elevator: (usize, usize),
        staircase: (usize, usize),
    ) -> SimResult<Self> {
        if floors == 0 || rows == 0 || cols == 0 {
            return Err(SimError::InvalidLayout(format!(
                "dimensions must be positive, got {floors}x{rows}x{cols}"
            )));
        }
        for (name, (row, col)) in [("elevator", elevator), ("staircase", staircase)] {
            if row >= rows || col >= cols {
                return Err(SimError::InvalidLayout(format!(
                    "{name} position ({row}, {col}) is outside a {rows}x{cols} floor"
                )));
            }
        }
        Ok(Self {
            floors,
            rows,
            cols,
            elevator,
            staircase,
        })
    }

    pub fn generate(rng: &mut Rng, config: &BuildingConfig) -> Self {
        let floors = rng.range(config.min_floors.max(1), config.max_floors.max(1));
        let rows = rng.range(config.min_side.max(1), config.max_side.max(1));
        let cols = rng.range(config.min_side.max(1), config.max_side.max(1));
        let row_span = rows.min(TRANSIT_SPAN);
        let col_span = cols.min(TRANSIT_SPAN);
        let elevator = (rng.range(0, row_span - 1), rng.range(0, col_span - 1));
        let staircase = (rng.range(0, row_span - 1), rng.range(0, col_span - 1));
        Self {
            floors,
            rows,
            cols,
            elevator,
            staircase,
        }
    }

    pub fn floors(&self) -> usize {
        self.floors
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn room_count(&self) -> usize {
        self.floors * self.rows * self.cols
    }

    pub fn contains(&self, room: RoomId) -> bool {
        room.floor < self.floors && room.row < self.rows && room.col < self.cols
    }

    /// Dense index used by the world state's room table.
    pub fn index_of(&self, room: RoomId) -> usize {
        (room.floor * self.rows + room.row) * self.cols + room.col
    }

    pub fn rooms(&self) -> impl Iterator<Item = RoomId> + '_ {
        (0..self.floors).flat_map(move |floor| {
            (0..self.rows)
                .flat_map(move |row| (0..self.cols).map(move |col| RoomId::new(floor, row, col)))
        })
    }

    /// Same-floor orthogonal neighbors in a stable up, down, left, right order.
    /// Vertical movement only happens through the transit rooms.
    pub fn neighbors(&self, room: RoomId) -> Vec<RoomId> {
        let mut out = Vec::with_capacity(4);
        if !self.contains(room) {
            return out;
        }
        if room.row > 0 {
            out.push(RoomId::new(room.floor, room.row - 1, room.col));
        }
        if room.row + 1 < self.rows {
            out.push(RoomId::new(room.floor, room.row + 1, room.col));
        }
        if room.col > 0 {
            out.push(RoomId::new(room.floor, room.row, room.col - 1));
        }
        if room.col + 1 < self.cols {
            out.push(RoomId::new(room.floor, room.row, room.col + 1));
        }
        out
    }

    pub fn transit_room(&self, floor: usize, transit: Transit) -> RoomId {
        let (row, col) = match transit {
            Transit::Elevator => self.elevator,
            Transit::Staircase => self.staircase,
        };
        RoomId::new(floor, row, col)
    }

    pub fn elevator_room(&self, floor: usize) -> RoomId {
        self.transit_room(floor, Transit::Elevator)
    }

    pub fn staircase_room(&self, floor: usize) -> RoomId {
        self.transit_room(floor, Transit::Staircase)
    }

    /// Shafts a room is linked through. Empty on single-floor buildings, since
    /// links only exist between adjacent floors.
    pub fn vertical_links(&self, room: RoomId) -> Vec<Transit> {
        if self.floors < 2 || !self.contains(room) {
            return Vec::new();
        }
        let pos = (room.row, room.col);
        let mut out = Vec::new();
        if pos == self.elevator {
            out.push(Transit::Elevator);
        }
        if pos == self.staircase {
            out.push(Transit::Staircase);
        }
        out
    }

    /// Ground floor, top-left and bottom-left corners.
    pub fn default_assembly_points(&self) -> Vec<RoomId> {
        let first = RoomId::new(0, 0, 0);
        let second = RoomId::new(0, self.rows - 1, 0);
        if first == second {
            vec![first]
        } else {
            vec![first, second]
        }
    }

    /// Uniform floor, then uniform room on that floor.
    pub fn random_room(&self, rng: &mut Rng) -> RoomId {
        let floor = rng.pick_index(self.floors);
        let row = rng.pick_index(self.rows);
        let col = rng.pick_index(self.cols);
        RoomId::new(floor, row, col)
    }

    pub fn view(&self) -> BuildingView {
        BuildingView {
            floors: self.floors,
            rows: self.rows,
            cols: self.cols,
            elevator: self.elevator,
            staircase: self.staircase,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct HazardSlot {
    active: bool,
    noted: bool,
    started_at: Option<Instant>,
}

/// Mutable per-room state. Hazard setters are idempotent and a noted flag is
/// only cleared together with its hazard.
#[derive(Clone, Debug)]
pub struct RoomState {
    slots: [HazardSlot; 3],
    lights_on: bool,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            slots: [HazardSlot::default(); 3],
            lights_on: true,
        }
    }
}

impl RoomState {
    pub fn is_active(&self, kind: HazardKind) -> bool {
        self.slots[kind.index()].active
    }

    pub fn is_noted(&self, kind: HazardKind) -> bool {
        self.slots[kind.index()].noted
    }

    pub fn lights_on(&self) -> bool {
        self.lights_on
    }

    pub fn started_at(&self, kind: HazardKind) -> Option<Instant> {
        self.slots[kind.index()].started_at
    }

    /// Returns `true` when a new hazard instance began.
    fn start(&mut self, kind: HazardKind, now: Instant) -> bool {
        let slot = &mut self.slots[kind.index()];
        if slot.active {
            return false;
        }
        slot.active = true;
        slot.started_at = Some(now);
        true
    }

    pub fn start_fire(&mut self, now: Instant) -> bool {
        self.start(HazardKind::Fire, now)
    }

    pub fn damage(&mut self, now: Instant, lights_out: bool) -> bool {
        let started = self.start(HazardKind::StructuralDamage, now);
        if started && lights_out {
            self.lights_on = false;
        }
        started
    }

    pub fn occupy(&mut self, now: Instant) -> bool {
        self.start(HazardKind::HostileOccupation, now)
    }

    pub fn apply(&mut self, kind: HazardKind, now: Instant, lights_out: bool) -> bool {
        match kind {
            HazardKind::Fire => self.start_fire(now),
            HazardKind::StructuralDamage => self.damage(now, lights_out),
            HazardKind::HostileOccupation => self.occupy(now),
        }
    }

    /// Clears the hazard and its noted flag. Returns `false` if it was not active.
    pub fn clear(&mut self, kind: HazardKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        if !slot.active {
            return false;
        }
        slot.active = false;
        slot.noted = false;
        true
    }

    /// Returns `true` only on the first transition for an active hazard.
    pub fn mark_noted(&mut self, kind: HazardKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        if !slot.active || slot.noted {
            return false;
        }
        slot.noted = true;
        true
    }

    pub fn restore_lighting(&mut self) -> bool {
        let changed = !self.lights_on;
        self.lights_on = true;
        changed
    }

    pub fn active_kinds(&self) -> Vec<HazardKind> {
        HazardKind::ALL
            .into_iter()
            .filter(|kind| self.is_active(*kind))
            .collect()
    }
}

/// One hazard instance picked up by the management monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detection {
    pub room: RoomId,
    pub kind: HazardKind,
    pub occupants_present: bool,
    pub lights_out: bool,
    pub assembly_point_blocked: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    resolved: u64,
    total: u64,
}

#[derive(Clone, Debug)]
struct OccupantRecord {
    mobility: Mobility,
    location: Location,
    rooms_traversed: u64,
    evacuated_after: Option<Duration>,
}

#[derive(Clone, Debug)]
struct ResponderRecord {
    role: ResponderRole,
    location: Location,
}

/// The single mutable world: room hazards, the assembly-point list, agent
/// registries and the run metrics. Owned by the world actor.
#[derive(Debug)]
pub struct WorldState {
    layout: Arc<Layout>,
    rooms: Vec<RoomState>,
    assembly_points: Vec<RoomId>,
    occupants: BTreeMap<AgentId, OccupantRecord>,
    responders: BTreeMap<AgentId, ResponderRecord>,
    management: Vec<AgentId>,
    tallies: [Tally; 3],
    response_times: Vec<Duration>,
    recent_updates: VecDeque<String>,
    elevator_grants: u64,
    medic_callouts: u64,
    started_at: Instant,
    tick: u64,
}

impl WorldState {
    pub fn new(layout: Arc<Layout>, assembly_points: Vec<RoomId>) -> Self {
        let rooms = vec![RoomState::default(); layout.room_count()];
        let assembly_points = assembly_points
            .into_iter()
            .filter(|room| layout.contains(*room))
            .collect();
        Self {
            layout,
            rooms,
            assembly_points,
            occupants: BTreeMap::new(),
            responders: BTreeMap::new(),
            management: Vec::new(),
            tallies: [Tally::default(); 3],
            response_times: Vec::new(),
            recent_updates: VecDeque::with_capacity(RECENT_UPDATES_CAPACITY),
            elevator_grants: 0,
            medic_callouts: 0,
            started_at: Instant::now(),
            tick: 0,
        }
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn register_occupant(&mut self, id: AgentId, mobility: Mobility, start: RoomId) {
        self.occupants.insert(
            id,
            OccupantRecord {
                mobility,
                location: Location::InRoom(start),
                rooms_traversed: 0,
                evacuated_after: None,
            },
        );
    }

    pub fn register_responder(&mut self, id: AgentId, role: ResponderRole, start: RoomId) {
        self.responders.insert(
            id,
            ResponderRecord {
                role,
                location: Location::InRoom(start),
            },
        );
    }

    pub fn register_management(&mut self, id: AgentId) {
        if !self.management.contains(&id) {
            self.management.push(id);
        }
    }

    pub fn room(&self, room: RoomId) -> Option<&RoomState> {
        if !self.layout.contains(room) {
            return None;
        }
        self.rooms.get(self.layout.index_of(room))
    }

    pub fn room_mut(&mut self, room: RoomId) -> Option<&mut RoomState> {
        if !self.layout.contains(room) {
            return None;
        }
        let idx = self.layout.index_of(room);
        self.rooms.get_mut(idx)
    }

    pub fn apply_hazard(&mut self, kind: HazardKind, room: RoomId, lights_out: bool) -> bool {
        let now = Instant::now();
        self.room_mut(room)
            .map(|state| state.apply(kind, now, lights_out))
            .unwrap_or(false)
    }

    /// Marks every active, not-yet-noted hazard as noted and reports it once.
    /// A damaged room that is still an assembly point is removed from the list
    /// for good.
    pub fn detect_unnoted(&mut self) -> Vec<Detection> {
        let mut detections = Vec::new();
        let rooms: Vec<RoomId> = self.layout.rooms().collect();
        for room in rooms {
            for kind in HazardKind::ALL {
                let Some(state) = self.room_mut(room) else {
                    continue;
                };
                if !state.mark_noted(kind) {
                    continue;
                }
                let lights_out = kind == HazardKind::StructuralDamage && !state.lights_on();
                self.tallies[kind.index()].total += 1;

                let occupants_present = self
                    .occupants
                    .values()
                    .any(|record| record.location == Location::InRoom(room));

                let mut assembly_point_blocked = false;
                if kind == HazardKind::StructuralDamage {
                    if let Some(pos) = self.assembly_points.iter().position(|ap| *ap == room) {
                        self.assembly_points.remove(pos);
                        assembly_point_blocked = true;
                    }
                }

                if assembly_point_blocked {
                    self.push_update(format!(
                        "Assembly point {room} blocked due to earthquake damage"
                    ));
                } else {
                    self.push_update(format!("Detected {} in {room}", kind.label()));
                }

                detections.push(Detection {
                    room,
                    kind,
                    occupants_present,
                    lights_out,
                    assembly_point_blocked,
                });
            }
        }
        detections
    }

    pub fn restore_lighting(&mut self, room: RoomId) -> bool {
        let restored = self
            .room_mut(room)
            .map(RoomState::restore_lighting)
            .unwrap_or(false);
        if restored {
            self.push_update(format!("Lights back on in {room}"));
        }
        restored
    }

    /// Clears a hazard on responder arrival. Counts it as resolved and keeps the
    /// response time only if the hazard was still active.
    pub fn resolve_hazard(
        &mut self,
        responder: AgentId,
        kind: HazardKind,
        room: RoomId,
        elapsed: Duration,
    ) -> bool {
        let cleared = self
            .room_mut(room)
            .map(|state| state.clear(kind))
            .unwrap_or(false);
        if !cleared {
            return false;
        }
        self.tallies[kind.index()].resolved += 1;
        self.response_times.push(elapsed);
        self.push_update(format!("{responder} cleared {} in {room}", kind.label()));
        true
    }

    pub fn record_medic_response(&mut self, responder: AgentId, room: RoomId, elapsed: Duration) {
        self.medic_callouts += 1;
        self.response_times.push(elapsed);
        self.push_update(format!("{responder} providing medical help in {room}"));
    }

    pub fn record_location(&mut self, agent: AgentId, location: Location) {
        if let Some(record) = self.occupants.get_mut(&agent) {
            if record.location == Location::Evacuated {
                return;
            }
            if let (Location::InRoom(from), Location::InRoom(to)) = (record.location, location) {
                if from != to {
                    record.rooms_traversed += 1;
                }
            }
            record.location = location;
        } else if let Some(record) = self.responders.get_mut(&agent) {
            record.location = location;
        }
    }

    /// Sets the evacuation time once; later calls keep the first value.
    pub fn mark_evacuated(&mut self, agent: AgentId) -> bool {
        let elapsed = self.started_at.elapsed();
        let Some(record) = self.occupants.get_mut(&agent) else {
            return false;
        };
        if record.evacuated_after.is_some() {
            return false;
        }
        record.location = Location::Evacuated;
        record.evacuated_after = Some(elapsed);
        self.push_update(format!("{agent} has reached an assembly point"));
        true
    }

    pub fn record_elevator_grant(&mut self, requester: AgentId) {
        self.elevator_grants += 1;
        self.push_update(format!("Elevator access granted to {requester}"));
    }

    pub fn all_evacuated(&self) -> bool {
        self.occupants
            .values()
            .all(|record| record.location == Location::Evacuated)
    }

    pub fn evacuated_count(&self) -> usize {
        self.occupants
            .values()
            .filter(|record| record.location == Location::Evacuated)
            .count()
    }

    pub fn assembly_points(&self) -> &[RoomId] {
        &self.assembly_points
    }

    pub fn occupant_location(&self, agent: AgentId) -> Option<Location> {
        self.occupants.get(&agent).map(|record| record.location)
    }

    pub fn rooms_traversed(&self, agent: AgentId) -> Option<u64> {
        self.occupants.get(&agent).map(|record| record.rooms_traversed)
    }

    pub fn elevator_grants(&self) -> u64 {
        self.elevator_grants
    }

    pub fn medic_callouts(&self) -> u64 {
        self.medic_callouts
    }

    pub fn tally(&self, kind: HazardKind) -> (u64, u64) {
        let tally = self.tallies[kind.index()];
        (tally.resolved, tally.total)
    }

    pub fn response_times(&self) -> &[Duration] {
        &self.response_times
    }

    /// Rolling log; keeps the newest `RECENT_UPDATES_CAPACITY` entries.
    pub fn push_update(&mut self, update: String) {
        while self.recent_updates.len() >= RECENT_UPDATES_CAPACITY {
            self.recent_updates.pop_front();
        }
        self.recent_updates.push_back(update);
    }

    pub fn recent_updates(&self) -> Vec<String> {
        self.recent_updates.iter().cloned().collect()
    }

    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn active_hazards(&self) -> Vec<ActiveHazard> {
        self.layout
            .rooms()
            .filter_map(|room| {
                let state = self.room(room)?;
                let kinds = state.active_kinds();
                if kinds.is_empty() {
                    return None;
                }
                let active_for_ms = kinds
                    .iter()
                    .filter_map(|kind| state.started_at(*kind))
                    .min()
                    .map(|started| started.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                Some(ActiveHazard {
                    room,
                    kinds,
                    lights_on: state.lights_on(),
                    active_for_ms,
                })
            })
            .collect()
    }

    fn total_evacuation_ms(&self) -> u64 {
        self.occupants
            .values()
            .filter_map(|record| record.evacuated_after)
            .map(|elapsed| elapsed.as_millis() as u64)
            .max()
            .unwrap_or(0)
    }

    fn mean_response_ms(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .response_times
            .iter()
            .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
            .sum();
        total / self.response_times.len() as f64
    }

    pub fn snapshot(&self) -> Snapshot {
        let completion = self.all_evacuated().then(|| CompletionStats {
            evacuation_times: self
                .occupants
                .iter()
                .map(|(id, record)| AgentDuration {
                    id: *id,
                    duration_ms: record
                        .evacuated_after
                        .map(|elapsed| elapsed.as_millis() as u64)
                        .unwrap_or(0),
                })
                .collect(),
            total_evacuation_ms: self.total_evacuation_ms(),
            responder_responses: self.response_times.len(),
            mean_response_ms: self.mean_response_ms(),
        });

        Snapshot {
            generated_at_iso: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            tick: self.tick,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            building: self.layout.view(),
            hazards: HazardKind::ALL
                .into_iter()
                .map(|kind| {
                    let (resolved, total) = self.tally(kind);
                    HazardTally {
                        kind,
                        resolved,
                        total,
                    }
                })
                .collect(),
            occupants: self
                .occupants
                .iter()
                .map(|(id, record)| OccupantView {
                    id: *id,
                    mobility: record.mobility,
                    location: record.location,
                    rooms_traversed: record.rooms_traversed,
                    evacuated_after_ms: record
                        .evacuated_after
                        .map(|elapsed| elapsed.as_millis() as u64),
                })
                .collect(),
            responders: self
                .responders
                .iter()
                .map(|(id, record)| ResponderView {
                    id: *id,
                    role: record.role,
                    location: record.location,
                })
                .collect(),
            recent_updates: self.recent_updates(),
            active_hazards: self.active_hazards(),
            assembly_points: self.assembly_points.clone(),
            elevator_grants: self.elevator_grants,
            completion,
        }
    }

    pub fn report(&self, seed: u32, outcome: RunOutcome) -> RunReport {
        let (fires_resolved, fires_total) = self.tally(HazardKind::Fire);
        let (earthquakes_resolved, earthquakes_total) = self.tally(HazardKind::StructuralDamage);
        let (attacks_resolved, attacks_total) = self.tally(HazardKind::HostileOccupation);
        RunReport {
            seed,
            outcome,
            ticks: self.tick,
            fires_resolved,
            fires_total,
            earthquakes_resolved,
            earthquakes_total,
            attacks_resolved,
            attacks_total,
            evacuated: self.evacuated_count(),
            total_agents: self.occupants.len(),
            responses: self.response_times.len(),
            total_evacuation_ms: self.total_evacuation_ms(),
            mean_response_ms: self.mean_response_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(floors: usize, rows: usize, cols: usize) -> Arc<Layout> {
        Arc::new(Layout::new(floors, rows, cols, (0, 0), (rows - 1, cols - 1)).expect("layout"))
    }

    #[test]
    fn distance_is_symmetric_and_neighbors_are_one_apart() {
        let layout = layout(3, 4, 5);
        let rooms: Vec<RoomId> = layout.rooms().collect();
        for a in &rooms {
            for b in &rooms {
                assert_eq!(distance(*a, *b), distance(*b, *a));
            }
            assert_eq!(distance(*a, *a), 0);
            for n in layout.neighbors(*a) {
                assert_eq!(distance(*a, n), 1);
                assert_eq!(n.floor, a.floor);
            }
        }
    }

    #[test]
    fn floor_change_weighs_like_one_step() {
        assert_eq!(distance(RoomId::new(0, 1, 1), RoomId::new(1, 1, 1)), 1);
        assert_eq!(distance(RoomId::new(0, 0, 0), RoomId::new(2, 1, 3)), 6);
    }

    #[test]
    fn neighbors_are_orthogonal_and_bounded() {
        let layout = layout(1, 3, 3);
        assert_eq!(layout.neighbors(RoomId::new(0, 1, 1)).len(), 4);
        assert_eq!(layout.neighbors(RoomId::new(0, 0, 0)).len(), 2);
        assert_eq!(layout.neighbors(RoomId::new(0, 0, 1)).len(), 3);
        assert!(layout.neighbors(RoomId::new(0, 5, 5)).is_empty());
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(matches!(
            Layout::new(0, 2, 2, (0, 0), (0, 0)),
            Err(SimError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::new(2, 2, 2, (2, 0), (0, 0)),
            Err(SimError::InvalidLayout(_))
        ));
    }

    #[test]
    fn generated_layout_respects_config_ranges() {
        let config = BuildingConfig::default();
        for seed in 0..50 {
            let mut rng = Rng::new(seed);
            let layout = Layout::generate(&mut rng, &config);
            assert!((1..=6).contains(&layout.floors()));
            assert!((2..=6).contains(&layout.rows()));
            assert!((2..=6).contains(&layout.cols()));
            let elevator = layout.elevator_room(0);
            let staircase = layout.staircase_room(0);
            assert!(elevator.row < 5 && elevator.col < 5);
            assert!(layout.contains(elevator));
            assert!(layout.contains(staircase));
        }
    }

    #[test]
    fn vertical_links_only_exist_with_several_floors() {
        let single = layout(1, 2, 2);
        assert!(single.vertical_links(RoomId::new(0, 0, 0)).is_empty());
        let tower = layout(3, 2, 2);
        assert_eq!(
            tower.vertical_links(RoomId::new(2, 0, 0)),
            vec![Transit::Elevator]
        );
        assert_eq!(
            tower.vertical_links(RoomId::new(1, 1, 1)),
            vec![Transit::Staircase]
        );
    }

    #[test]
    fn hazard_setters_are_idempotent() {
        let now = Instant::now();
        let mut room = RoomState::default();
        assert!(room.start_fire(now));
        assert!(!room.start_fire(now));
        assert!(room.damage(now, true));
        assert!(!room.lights_on());
        assert!(!room.damage(now, false));
        assert!(room.occupy(now));
        assert!(!room.occupy(now));
    }

    #[test]
    fn noted_flag_is_set_once_and_cleared_with_hazard() {
        let now = Instant::now();
        let mut room = RoomState::default();
        assert!(!room.mark_noted(HazardKind::Fire));
        room.start_fire(now);
        assert!(room.mark_noted(HazardKind::Fire));
        assert!(!room.mark_noted(HazardKind::Fire));
        assert!(room.is_noted(HazardKind::Fire));
        assert!(room.clear(HazardKind::Fire));
        assert!(!room.is_noted(HazardKind::Fire));
        assert!(!room.clear(HazardKind::Fire));
    }

    #[tokio::test]
    async fn rolling_log_keeps_five_newest_entries() {
        let mut world = WorldState::new(layout(1, 2, 2), Vec::new());
        for idx in 0..8 {
            world.push_update(format!("update {idx}"));
            assert!(world.recent_updates().len() <= RECENT_UPDATES_CAPACITY);
        }
        assert_eq!(
            world.recent_updates(),
            vec!["update 3", "update 4", "update 5", "update 6", "update 7"]
        );
    }

    #[tokio::test]
    async fn detection_happens_once_per_hazard_instance() {
        let layout = layout(1, 3, 3);
        let mut world = WorldState::new(layout.clone(), layout.default_assembly_points());
        let room = RoomId::new(0, 1, 1);
        assert!(world.apply_hazard(HazardKind::Fire, room, false));
        assert!(!world.apply_hazard(HazardKind::Fire, room, false));

        let first = world.detect_unnoted();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, HazardKind::Fire);
        assert!(world.detect_unnoted().is_empty());
        assert_eq!(world.tally(HazardKind::Fire), (0, 1));

        let responder = AgentId::responder(0);
        assert!(world.resolve_hazard(responder, HazardKind::Fire, room, Duration::from_secs(3)));
        assert!(!world.resolve_hazard(responder, HazardKind::Fire, room, Duration::from_secs(3)));
        assert_eq!(world.tally(HazardKind::Fire), (1, 1));
        assert_eq!(world.response_times().len(), 1);

        world.apply_hazard(HazardKind::Fire, room, false);
        assert_eq!(world.detect_unnoted().len(), 1);
        assert_eq!(world.tally(HazardKind::Fire), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn active_hazards_report_the_oldest_start() {
        let mut world = WorldState::new(layout(1, 2, 2), Vec::new());
        let room = RoomId::new(0, 1, 1);
        world.apply_hazard(HazardKind::Fire, room, false);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        world.apply_hazard(HazardKind::HostileOccupation, room, false);
        tokio::time::advance(Duration::from_millis(500)).await;

        let active = world.active_hazards();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].room, room);
        assert_eq!(active[0].kinds.len(), 2);
        assert_eq!(active[0].active_for_ms, 2_000);
    }

    #[tokio::test]
    async fn damaged_assembly_point_is_removed_for_good() {
        let layout = layout(1, 3, 2);
        let mut world = WorldState::new(layout.clone(), layout.default_assembly_points());
        let ap = RoomId::new(0, 2, 0);
        world.apply_hazard(HazardKind::StructuralDamage, ap, true);
        let detections = world.detect_unnoted();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].assembly_point_blocked);
        assert!(detections[0].lights_out);
        assert_eq!(world.assembly_points(), &[RoomId::new(0, 0, 0)]);

        world.resolve_hazard(
            AgentId::responder(1),
            HazardKind::StructuralDamage,
            ap,
            Duration::from_secs(1),
        );
        world.apply_hazard(HazardKind::StructuralDamage, ap, false);
        world.detect_unnoted();
        assert_eq!(world.assembly_points(), &[RoomId::new(0, 0, 0)]);
    }

    #[tokio::test]
    async fn detection_flags_occupants_in_the_room() {
        let layout = layout(1, 2, 2);
        let mut world = WorldState::new(layout.clone(), layout.default_assembly_points());
        let room = RoomId::new(0, 1, 1);
        world.register_occupant(AgentId::occupant(0), Mobility::AbleBodied, room);
        world.apply_hazard(HazardKind::HostileOccupation, room, false);
        let detections = world.detect_unnoted();
        assert!(detections[0].occupants_present);
    }

    #[tokio::test]
    async fn evacuation_time_is_recorded_once() {
        let layout = layout(1, 2, 2);
        let mut world = WorldState::new(layout.clone(), layout.default_assembly_points());
        let id = AgentId::occupant(0);
        world.register_occupant(id, Mobility::ReducedMobility, RoomId::new(0, 1, 1));
        assert!(!world.all_evacuated());
        world.record_location(id, Location::InRoom(RoomId::new(0, 1, 0)));
        assert!(world.mark_evacuated(id));
        assert!(!world.mark_evacuated(id));
        world.record_location(id, Location::InRoom(RoomId::new(0, 0, 0)));
        assert_eq!(world.occupant_location(id), Some(Location::Evacuated));
        assert_eq!(world.rooms_traversed(id), Some(1));
        assert!(world.all_evacuated());

        let report = world.report(5, RunOutcome::Completed);
        assert_eq!(report.evacuated, 1);
        assert_eq!(report.total_agents, 1);
        assert!(world.snapshot().completion.is_some());
    }
}
