use std::collections::HashSet;

use tracing::debug;

use crate::building::{Layout, WorldState};
use crate::config::HazardOdds;
use crate::constants::FIRE_SPREAD_MAX_HOPS;
use crate::rng::Rng;
use crate::types::{HazardKind, RoomId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HazardEvent {
    pub kind: HazardKind,
    pub room: RoomId,
    /// `false` when the room already carried this hazard.
    pub new: bool,
    pub spread: bool,
}

/// Per-tick random hazard source.
#[derive(Clone, Debug)]
pub struct HazardInjector {
    odds: HazardOdds,
    rng: Rng,
}

impl HazardInjector {
    pub fn new(odds: HazardOdds, rng: Rng) -> Self {
        Self { odds, rng }
    }

    /// Three independent draws: fire, earthquake, hostile occupation.
    pub fn inject(&mut self, world: &mut WorldState) -> Vec<HazardEvent> {
        let layout = world.layout().clone();
        let mut events = Vec::new();

        if self.rng.chance(self.odds.fire) {
            let room = layout.random_room(&mut self.rng);
            events.extend(self.ignite(world, &layout, room));
        }

        if self.rng.chance(self.odds.earthquake) {
            let room = layout.random_room(&mut self.rng);
            let lights_out = self.rng.chance(self.odds.lights_out);
            let new = world.apply_hazard(HazardKind::StructuralDamage, room, lights_out);
            events.push(HazardEvent {
                kind: HazardKind::StructuralDamage,
                room,
                new,
                spread: false,
            });
        }

        if self.rng.chance(self.odds.hostile) {
            let room = layout.random_room(&mut self.rng);
            let new = world.apply_hazard(HazardKind::HostileOccupation, room, false);
            events.push(HazardEvent {
                kind: HazardKind::HostileOccupation,
                room,
                new,
                spread: false,
            });
        }

        for event in &events {
            if event.new {
                let verb = if event.spread { "spread to" } else { "broke out in" };
                world.push_update(format!("{} {verb} {}", event.kind.label(), event.room));
            }
        }
        events
    }

    /// Starts a fire and walks the spread chain. Each hop succeeds with
    /// `fire_spread` and picks one same-floor neighbor uniformly. The chain ends
    /// on a failed draw, on a room already burned by this event, or after
    /// `FIRE_SPREAD_MAX_HOPS` hops. A newly lit room spreads on its own only
    /// when a later ignition starts there.
    pub fn ignite(
        &mut self,
        world: &mut WorldState,
        layout: &Layout,
        origin: RoomId,
    ) -> Vec<HazardEvent> {
        let mut events = vec![HazardEvent {
            kind: HazardKind::Fire,
            room: origin,
            new: world.apply_hazard(HazardKind::Fire, origin, false),
            spread: false,
        }];
        let mut visited = HashSet::from([origin]);
        let mut current = origin;

        while events.len() <= FIRE_SPREAD_MAX_HOPS && self.rng.chance(self.odds.fire_spread) {
            let neighbors = layout.neighbors(current);
            let Some(next) = self.rng.pick(&neighbors).copied() else {
                break;
            };
            if !visited.insert(next) {
                debug!(room = %next, "fire spread looped back, stopping");
                break;
            }
            debug!(from = %current, to = %next, "fire spreading");
            events.push(HazardEvent {
                kind: HazardKind::Fire,
                room: next,
                new: world.apply_hazard(HazardKind::Fire, next, false),
                spread: true,
            });
            current = next;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn chain_world() -> (Arc<Layout>, WorldState) {
        let layout = Arc::new(Layout::new(1, 1, 3, (0, 0), (0, 0)).expect("chain layout"));
        let world = WorldState::new(layout.clone(), Vec::new());
        (layout, world)
    }

    fn burning(world: &WorldState, layout: &Layout) -> Vec<RoomId> {
        layout
            .rooms()
            .filter(|room| {
                world
                    .room(*room)
                    .map(|state| state.is_active(HazardKind::Fire))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn certain_spread_from(origin: RoomId) {
        for seed in 0..40 {
            let (layout, mut world) = chain_world();
            let odds = HazardOdds {
                fire_spread: 1.0,
                ..HazardOdds::none()
            };
            let mut injector = HazardInjector::new(odds, Rng::new(seed));
            let events = injector.ignite(&mut world, &layout, origin);

            let burning = burning(&world, &layout);
            assert_eq!(burning.len(), 2, "seed {seed}: {burning:?}");
            assert!(burning.contains(&origin));
            assert_eq!(events.len(), 2);
            assert!(events[1].spread);
            assert_eq!(crate::building::distance(events[1].room, origin), 1);
        }
    }

    #[tokio::test]
    async fn certain_spread_from_chain_middle_reaches_one_neighbor() {
        certain_spread_from(RoomId::new(0, 0, 1));
    }

    #[tokio::test]
    async fn certain_spread_from_chain_end_stops_after_one_hop() {
        certain_spread_from(RoomId::new(0, 0, 0));
        certain_spread_from(RoomId::new(0, 0, 2));
    }

    #[tokio::test]
    async fn reignition_spreads_from_the_lit_room() {
        let (layout, mut world) = chain_world();
        let odds = HazardOdds {
            fire_spread: 1.0,
            ..HazardOdds::none()
        };
        let mut injector = HazardInjector::new(odds, Rng::new(2));
        let end = RoomId::new(0, 0, 0);
        let middle = RoomId::new(0, 0, 1);
        injector.ignite(&mut world, &layout, end);
        assert_eq!(burning(&world, &layout), vec![end, middle]);

        let events = injector.ignite(&mut world, &layout, middle);
        assert_eq!(events.len(), 2);
        assert!(!events[0].new);
        assert!(events[1].spread);
        assert_eq!(crate::building::distance(events[1].room, middle), 1);
    }

    #[tokio::test]
    async fn spread_terminates_on_cyclic_floor() {
        let layout = Arc::new(Layout::new(1, 4, 4, (0, 0), (0, 0)).expect("layout"));
        let mut world = WorldState::new(layout.clone(), Vec::new());
        let odds = HazardOdds {
            fire_spread: 1.0,
            ..HazardOdds::none()
        };
        let mut injector = HazardInjector::new(odds, Rng::new(11));
        let events = injector.ignite(&mut world, &layout, RoomId::new(0, 1, 1));
        assert!(events.len() <= layout.room_count());
        for pair in events.windows(2) {
            assert_eq!(crate::building::distance(pair[0].room, pair[1].room), 1);
        }
    }

    #[tokio::test]
    async fn zero_spread_only_burns_origin() {
        let (layout, mut world) = chain_world();
        let mut injector = HazardInjector::new(HazardOdds::none(), Rng::new(1));
        injector.ignite(&mut world, &layout, RoomId::new(0, 0, 0));
        assert_eq!(burning(&world, &layout), vec![RoomId::new(0, 0, 0)]);
    }

    #[tokio::test]
    async fn zero_odds_inject_nothing() {
        let (_, mut world) = chain_world();
        let mut injector = HazardInjector::new(HazardOdds::none(), Rng::new(5));
        for _ in 0..200 {
            assert!(injector.inject(&mut world).is_empty());
        }
        assert!(world.active_hazards().is_empty());
    }

    #[tokio::test]
    async fn certain_odds_apply_every_kind() {
        let layout = Arc::new(Layout::new(2, 3, 3, (0, 0), (2, 2)).expect("layout"));
        let mut world = WorldState::new(layout, Vec::new());
        let odds = HazardOdds {
            fire: 1.0,
            earthquake: 1.0,
            hostile: 1.0,
            fire_spread: 0.0,
            lights_out: 1.0,
        };
        let mut injector = HazardInjector::new(odds, Rng::new(8));
        let events = injector.inject(&mut world);
        let kinds: Vec<HazardKind> = events.iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HazardKind::Fire,
                HazardKind::StructuralDamage,
                HazardKind::HostileOccupation
            ]
        );
        let damaged = events[1].room;
        assert!(!world.room(damaged).expect("room").lights_on());
    }
}
