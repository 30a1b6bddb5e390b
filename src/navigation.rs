use std::collections::HashSet;

use crate::building::{distance, Layout, Transit};
use crate::types::RoomId;

/// Which shafts a traveller may use to change floors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitPolicy {
    ElevatorOnly,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Arrived,
    Move(RoomId),
    /// Standing in the shaft room; `to` is the same position on the target floor.
    ChangeFloor { via: Transit, to: RoomId },
    /// Every neighbor is excluded. Not fatal: the caller holds and retries.
    Stuck,
}

/// Greedy route toward `target`. The shaft used for a floor change is fixed the
/// first time it is needed and kept until the change happens.
#[derive(Clone, Debug)]
pub struct Route {
    target: RoomId,
    policy: TransitPolicy,
    leg: Option<(Transit, RoomId)>,
}

impl Route {
    pub fn new(target: RoomId, policy: TransitPolicy) -> Self {
        Self {
            target,
            policy,
            leg: None,
        }
    }

    pub fn leg(&self) -> Option<(Transit, RoomId)> {
        self.leg
    }

    pub fn next_step(&mut self, layout: &Layout, from: RoomId, avoid: &HashSet<RoomId>) -> Step {
        if from == self.target {
            return Step::Arrived;
        }

        if from.floor != self.target.floor {
            let (via, shaft) = *self
                .leg
                .get_or_insert_with(|| choose_transit(layout, from, self.policy));
            if from == shaft {
                let to = layout.transit_room(self.target.floor, via);
                return Step::ChangeFloor { via, to };
            }
            return match greedy_step(layout, from, shaft, avoid) {
                Some(next) => Step::Move(next),
                None => Step::Stuck,
            };
        }

        match greedy_step(layout, from, self.target, avoid) {
            Some(next) => Step::Move(next),
            None => Step::Stuck,
        }
    }

    /// Call after the traveller has been moved to the target floor.
    pub fn finish_floor_change(&mut self) {
        self.leg = None;
    }
}

/// Nearer of elevator and staircase on the current floor, ties to the
/// elevator. `ElevatorOnly` ignores the staircase entirely.
pub fn choose_transit(layout: &Layout, from: RoomId, policy: TransitPolicy) -> (Transit, RoomId) {
    let elevator = layout.elevator_room(from.floor);
    if policy == TransitPolicy::ElevatorOnly {
        return (Transit::Elevator, elevator);
    }
    let staircase = layout.staircase_room(from.floor);
    if distance(from, elevator) <= distance(from, staircase) {
        (Transit::Elevator, elevator)
    } else {
        (Transit::Staircase, staircase)
    }
}

/// Neighbor closest to `goal`, skipping avoided rooms. Ties go to the first
/// neighbor in layout order.
pub fn greedy_step(
    layout: &Layout,
    from: RoomId,
    goal: RoomId,
    avoid: &HashSet<RoomId>,
) -> Option<RoomId> {
    layout
        .neighbors(from)
        .into_iter()
        .filter(|room| !avoid.contains(room))
        .min_by_key(|room| distance(*room, goal))
}

/// Nearest assembly point from `from`, ties to the earlier entry.
pub fn nearest_assembly_point(from: RoomId, assembly_points: &[RoomId]) -> Option<RoomId> {
    assembly_points
        .iter()
        .copied()
        .min_by_key(|room| distance(from, *room))
}
