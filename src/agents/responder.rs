use std::collections::HashSet;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::AgentContext;
use crate::error::SimResult;
use crate::mailbox::{Envelope, Mailbox, Message};
use crate::navigation::{Route, Step, TransitPolicy};
use crate::types::{AgentId, AgentKind, HazardKind, Location, ResponderRole, RoomId};

/// Emergency responder. Walks to a dispatched hazard of its own type and
/// clears it; paramedics also answer medics callouts.
pub struct Responder {
    ctx: AgentContext,
    mailbox: Mailbox,
    role: ResponderRole,
    location: RoomId,
}

impl Responder {
    pub fn new(ctx: AgentContext, mailbox: Mailbox, role: ResponderRole, start: RoomId) -> Self {
        Self {
            ctx,
            mailbox,
            role,
            location: start,
        }
    }

    pub fn id(&self) -> AgentId {
        self.ctx.id
    }

    pub fn role(&self) -> ResponderRole {
        self.role
    }

    pub fn location(&self) -> RoomId {
        self.location
    }

    pub async fn run(mut self) -> SimResult<()> {
        info!(
            agent = %self.id(),
            role = ?self.role,
            location = %self.location,
            "responder on standby"
        );
        loop {
            let poll = self.ctx.timings.mailbox_poll();
            if let Some(envelope) = self.mailbox.recv_timeout(poll).await {
                self.handle(envelope).await?;
            }
        }
    }

    /// Acts on one message. Dispatches are served one at a time, so a second
    /// dispatch waits in the mailbox while the first is handled.
    pub async fn handle(&mut self, envelope: Envelope) -> SimResult<()> {
        match envelope.message {
            Message::HazardDispatch { kind, room } => {
                if self.role.resolves() == Some(kind) {
                    self.respond(kind, room).await?;
                }
            }
            Message::MedicsDispatch { room } => {
                if self.role == ResponderRole::Paramedic {
                    self.attend(room).await?;
                }
            }
            Message::Evacuate
            | Message::AvoidRoom { .. }
            | Message::AssemblyPointBlocked { .. }
            | Message::ElevatorRequest
            | Message::ElevatorAccessGranted
            | Message::AllClear { .. } => {}
        }
        Ok(())
    }

    async fn respond(&mut self, kind: HazardKind, room: RoomId) -> SimResult<()> {
        let started = Instant::now();
        info!(agent = %self.id(), hazard = kind.label(), %room, "dispatched");
        if !self.travel_to(room).await? {
            return Ok(());
        }
        let elapsed = started.elapsed();
        let cleared = self
            .ctx
            .world
            .resolve_hazard(self.id(), kind, room, elapsed)
            .await?;
        if cleared {
            info!(
                agent = %self.id(),
                hazard = kind.label(),
                %room,
                elapsed_ms = elapsed.as_millis() as u64,
                "hazard cleared"
            );
        } else {
            debug!(
                agent = %self.id(),
                hazard = kind.label(),
                %room,
                "hazard already gone on arrival"
            );
        }
        Ok(())
    }

    async fn attend(&mut self, room: RoomId) -> SimResult<()> {
        let started = Instant::now();
        info!(agent = %self.id(), %room, "medics callout");
        if !self.travel_to(room).await? {
            return Ok(());
        }
        let elapsed = started.elapsed();
        self.ctx
            .world
            .record_medic_response(self.id(), room, elapsed)
            .await?;
        sleep(self.ctx.timings.medic_hold()).await;

        let mut notify = self.ctx.post.recipients(AgentKind::Management);
        notify.extend(self.ctx.post.recipients(AgentKind::Occupant));
        self.ctx.broadcast(&notify, Message::AllClear { room });
        self.ctx
            .world
            .log(format!("{} has left {room}", self.id()))
            .await
    }

    /// Walks one room per step interval, never avoiding anything. Returns
    /// false if the target cannot be reached from here.
    async fn travel_to(&mut self, target: RoomId) -> SimResult<bool> {
        let mut route = Route::new(target, TransitPolicy::Nearest);
        let open = HashSet::new();
        loop {
            match route.next_step(&self.ctx.layout, self.location, &open) {
                Step::Arrived => return Ok(true),
                Step::Move(next) => {
                    sleep(self.ctx.timings.responder_step()).await;
                    self.relocate(next).await?;
                }
                Step::ChangeFloor { via, to } => {
                    debug!(
                        agent = %self.id(),
                        via = via.label(),
                        floor = to.floor + 1,
                        "changing floors"
                    );
                    sleep(self.ctx.timings.floor_settle()).await;
                    route.finish_floor_change();
                    self.relocate(to).await?;
                }
                Step::Stuck => {
                    warn!(agent = %self.id(), from = %self.location, %target, "no path to target");
                    return Ok(false);
                }
            }
        }
    }

    async fn relocate(&mut self, room: RoomId) -> SimResult<()> {
        self.location = room;
        self.ctx
            .world
            .record_location(self.id(), Location::InRoom(room))
            .await
    }
}
