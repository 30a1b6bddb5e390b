use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::AgentContext;
use crate::building::Detection;
use crate::error::SimResult;
use crate::mailbox::{Envelope, Mailbox, Message};
use crate::types::{AgentId, AgentKind, HazardKind};

/// Building management: orders the evacuation, watches for new hazards and
/// hands out elevator access one requester at a time.
pub struct Management {
    ctx: AgentContext,
    mailbox: Mailbox,
    occupants: Vec<AgentId>,
    elevator_locked: bool,
}

impl Management {
    pub fn new(ctx: AgentContext, mailbox: Mailbox) -> Self {
        let occupants = ctx.post.recipients(AgentKind::Occupant);
        Self {
            ctx,
            mailbox,
            occupants,
            elevator_locked: true,
        }
    }

    pub fn id(&self) -> AgentId {
        self.ctx.id
    }

    pub fn monitor(&self) -> HazardMonitor {
        HazardMonitor::new(self.ctx.clone())
    }

    pub fn order_evacuation(&self) -> usize {
        let delivered = self.ctx.broadcast(&self.occupants, Message::Evacuate);
        info!(agent = %self.id(), delivered, "evacuation ordered");
        delivered
    }

    /// Orders the evacuation once, then runs the hazard monitor and the
    /// elevator desk side by side until aborted.
    pub async fn run(mut self) -> SimResult<()> {
        self.order_evacuation();
        self.ctx
            .world
            .log(format!("{} ordered a full evacuation", self.id()))
            .await?;
        let monitor = self.monitor();
        tokio::select! {
            result = monitor.run() => result,
            result = self.serve_requests() => result,
        }
    }

    async fn serve_requests(&mut self) -> SimResult<()> {
        loop {
            let poll = self.ctx.timings.mailbox_poll();
            let Some(envelope) = self.mailbox.recv_timeout(poll).await else {
                continue;
            };
            self.handle(envelope).await?;
        }
    }

    pub async fn handle(&mut self, envelope: Envelope) -> SimResult<()> {
        match envelope.message {
            Message::ElevatorRequest => self.grant_elevator(envelope.from).await,
            Message::AllClear { .. }
            | Message::Evacuate
            | Message::AvoidRoom { .. }
            | Message::AssemblyPointBlocked { .. }
            | Message::ElevatorAccessGranted
            | Message::HazardDispatch { .. }
            | Message::MedicsDispatch { .. } => self.handle_notice(envelope).await,
        }
    }

    async fn handle_notice(&self, envelope: Envelope) -> SimResult<()> {
        match envelope.message {
            Message::AllClear { room } => {
                info!(agent = %self.id(), from = %envelope.from, %room, "all clear");
                self.ctx
                    .world
                    .log(format!("{} reports all clear in {room}", envelope.from))
                    .await?;
            }
            Message::ElevatorRequest
            | Message::Evacuate
            | Message::AvoidRoom { .. }
            | Message::AssemblyPointBlocked { .. }
            | Message::ElevatorAccessGranted
            | Message::HazardDispatch { .. }
            | Message::MedicsDispatch { .. } => {}
        }
        Ok(())
    }

    /// Unlocks the elevator for one requester, holds the window, locks again.
    /// Requests that came in while it was open are dropped; their senders retry.
    async fn grant_elevator(&mut self, requester: AgentId) -> SimResult<()> {
        self.elevator_locked = false;
        debug!(
            agent = %self.id(),
            %requester,
            locked = self.elevator_locked,
            "elevator unlocked"
        );
        if !self.ctx.send(requester, Message::ElevatorAccessGranted) {
            warn!(agent = %self.id(), %requester, "elevator grant not delivered");
        }
        self.ctx.world.record_elevator_grant(requester).await?;
        sleep(self.ctx.timings.elevator_window()).await;
        self.elevator_locked = true;
        debug!(agent = %self.id(), locked = self.elevator_locked, "elevator locked");
        self.turn_away_window_requests().await
    }

    async fn turn_away_window_requests(&mut self) -> SimResult<()> {
        let mut notices = Vec::new();
        while let Some(envelope) = self.mailbox.try_recv() {
            if envelope.message == Message::ElevatorRequest {
                debug!(
                    agent = %self.id(),
                    requester = %envelope.from,
                    "elevator busy, request dropped"
                );
            } else {
                notices.push(envelope);
            }
        }
        for envelope in notices {
            self.handle_notice(envelope).await?;
        }
        Ok(())
    }
}

/// Periodic scan for hazards nobody has reported yet. Each detection turns
/// into dispatches to responders and warnings to occupants.
pub struct HazardMonitor {
    ctx: AgentContext,
}

impl HazardMonitor {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> SimResult<()> {
        let mut ticker = interval(self.ctx.timings.monitor_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.scan_once().await?;
        }
    }

    pub async fn scan_once(&self) -> SimResult<Vec<Detection>> {
        let detections = self.ctx.world.detect_hazards().await?;
        for detection in &detections {
            self.dispatch(detection).await?;
        }
        Ok(detections)
    }

    async fn dispatch(&self, detection: &Detection) -> SimResult<()> {
        let Detection {
            room,
            kind,
            occupants_present,
            lights_out,
            assembly_point_blocked,
        } = *detection;
        let responders = self.ctx.post.recipients(AgentKind::Responder);
        let occupants = self.ctx.post.recipients(AgentKind::Occupant);
        info!(
            agent = %self.ctx.id,
            hazard = kind.label(),
            %room,
            occupants_present,
            "hazard detected"
        );

        if occupants_present {
            self.ctx.broadcast(&responders, Message::MedicsDispatch { room });
        }
        self.ctx
            .broadcast(&responders, Message::HazardDispatch { kind, room });

        if kind == HazardKind::StructuralDamage && lights_out {
            self.ctx
                .world
                .log(format!("Lights went off in {room}"))
                .await?;
            let world = self.ctx.world.clone();
            let delay = self.ctx.timings.lighting_restore();
            tokio::spawn(async move {
                sleep(delay).await;
                if let Err(err) = world.restore_lighting(room).await {
                    debug!(%room, error = %err, "lighting restore skipped");
                }
            });
        }

        if assembly_point_blocked {
            self.ctx
                .broadcast(&occupants, Message::AssemblyPointBlocked { room });
        } else {
            self.ctx.broadcast(&occupants, Message::AvoidRoom { room });
            self.ctx
                .world
                .log(format!("Agents will avoid {room} due to {}", kind.label()))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::building::{Layout, WorldState};
    use crate::config::{HazardOdds, Timings};
    use crate::hazards::HazardInjector;
    use crate::mailbox::PostOffice;
    use crate::rng::Rng;
    use crate::types::RoomId;
    use crate::world::spawn_world;

    struct Fixture {
        monitor: HazardMonitor,
        management: Management,
        occupant_boxes: Vec<Mailbox>,
        responder_box: Mailbox,
    }

    fn fixture() -> Fixture {
        let layout = Arc::new(Layout::new(1, 3, 3, (1, 1), (1, 1)).expect("layout"));
        let mut state = WorldState::new(layout.clone(), layout.default_assembly_points());
        let mut post = PostOffice::new();
        let mut occupant_boxes = Vec::new();
        for index in 0..3 {
            let id = AgentId::occupant(index);
            state.register_occupant(id, crate::types::Mobility::AbleBodied, RoomId::new(0, 1, 2));
            occupant_boxes.push(post.register(id, 16));
        }
        let responder_box = post.register(AgentId::responder(0), 16);
        let manager = AgentId::management(0);
        state.register_management(manager);
        let management_box = post.register(manager, 16);
        let (world, _task) = spawn_world(
            state,
            HazardInjector::new(HazardOdds::none(), Rng::new(3)),
        );
        let ctx = AgentContext {
            id: manager,
            layout,
            post: Arc::new(post),
            world,
            timings: Arc::new(Timings::default()),
        };
        let management = Management::new(ctx, management_box);
        Fixture {
            monitor: management.monitor(),
            management,
            occupant_boxes,
            responder_box,
        }
    }

    fn drain(mailbox: &mut Mailbox) -> Vec<Message> {
        std::iter::from_fn(|| mailbox.try_recv())
            .map(|envelope| envelope.message)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn damaged_assembly_point_is_announced_once_to_every_occupant() {
        let mut fx = fixture();
        let blocked = RoomId::new(0, 0, 0);
        fx.management
            .ctx
            .world
            .apply_hazard(HazardKind::StructuralDamage, blocked, false)
            .await
            .expect("apply");

        assert_eq!(fx.monitor.scan_once().await.expect("scan").len(), 1);
        assert!(fx.monitor.scan_once().await.expect("scan").is_empty());

        for mailbox in &mut fx.occupant_boxes {
            assert_eq!(
                drain(mailbox),
                vec![Message::AssemblyPointBlocked { room: blocked }]
            );
        }
        let points = fx
            .management
            .ctx
            .world
            .assembly_points()
            .await
            .expect("points");
        assert_eq!(points, vec![RoomId::new(0, 2, 0)]);
        assert_eq!(
            drain(&mut fx.responder_box),
            vec![Message::HazardDispatch {
                kind: HazardKind::StructuralDamage,
                room: blocked
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn occupied_hazard_room_calls_medics_first() {
        let mut fx = fixture();
        let room = RoomId::new(0, 1, 2);
        fx.management
            .ctx
            .world
            .apply_hazard(HazardKind::Fire, room, false)
            .await
            .expect("apply");
        fx.monitor.scan_once().await.expect("scan");

        assert_eq!(
            drain(&mut fx.responder_box),
            vec![
                Message::MedicsDispatch { room },
                Message::HazardDispatch {
                    kind: HazardKind::Fire,
                    room
                }
            ]
        );
        for mailbox in &mut fx.occupant_boxes {
            assert_eq!(drain(mailbox), vec![Message::AvoidRoom { room }]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lights_come_back_after_the_restore_delay() {
        let fx = fixture();
        let room = RoomId::new(0, 2, 2);
        let world = fx.management.ctx.world.clone();
        world
            .apply_hazard(HazardKind::StructuralDamage, room, true)
            .await
            .expect("apply");
        fx.monitor.scan_once().await.expect("scan");

        let dark = world.snapshot().await.expect("snapshot");
        assert!(dark
            .active_hazards
            .iter()
            .any(|hazard| hazard.room == room && !hazard.lights_on));

        sleep(Timings::default().lighting_restore() + Duration::from_millis(10)).await;
        let lit = world.snapshot().await.expect("snapshot");
        assert!(lit
            .active_hazards
            .iter()
            .all(|hazard| hazard.lights_on));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_sent_while_the_elevator_is_open_are_dropped() {
        let mut fx = fixture();
        let requester = AgentId::occupant(0);
        let manager = fx.management.id();
        let post = fx.management.ctx.post.clone();
        let during_window = async {
            sleep(Timings::default().elevator_window() / 2).await;
            assert!(post.send(requester, manager, Message::ElevatorRequest));
            assert!(post.send(
                AgentId::responder(0),
                manager,
                Message::AllClear {
                    room: RoomId::new(0, 1, 2)
                }
            ));
        };
        let (granted, ()) = tokio::join!(
            fx.management.handle(Envelope {
                from: requester,
                message: Message::ElevatorRequest,
            }),
            during_window,
        );
        granted.expect("grant");

        assert!(fx.management.elevator_locked);
        assert!(fx.management.mailbox.try_recv().is_none());
        assert_eq!(
            drain(&mut fx.occupant_boxes[0]),
            vec![Message::ElevatorAccessGranted]
        );
        let snapshot = fx
            .management
            .ctx
            .world
            .snapshot()
            .await
            .expect("snapshot");
        assert_eq!(snapshot.elevator_grants, 1);
        assert!(snapshot
            .recent_updates
            .iter()
            .any(|update| update.contains("all clear")));
    }

    #[tokio::test(start_paused = true)]
    async fn elevator_grants_are_serialized() {
        let mut fx = fixture();
        let first = AgentId::occupant(0);
        let second = AgentId::occupant(1);
        let started = tokio::time::Instant::now();
        fx.management
            .handle(Envelope {
                from: first,
                message: Message::ElevatorRequest,
            })
            .await
            .expect("grant");
        fx.management
            .handle(Envelope {
                from: second,
                message: Message::ElevatorRequest,
            })
            .await
            .expect("grant");
        assert!(started.elapsed() >= Timings::default().elevator_window() * 2);
        assert!(fx.management.elevator_locked);

        assert_eq!(
            drain(&mut fx.occupant_boxes[0]),
            vec![Message::ElevatorAccessGranted]
        );
        assert_eq!(
            drain(&mut fx.occupant_boxes[1]),
            vec![Message::ElevatorAccessGranted]
        );
        assert!(drain(&mut fx.occupant_boxes[2]).is_empty());
        let snapshot = fx
            .management
            .ctx
            .world
            .snapshot()
            .await
            .expect("snapshot");
        assert_eq!(snapshot.elevator_grants, 2);
    }
}
