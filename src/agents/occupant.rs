use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::AgentContext;
use crate::building::Transit;
use crate::error::SimResult;
use crate::mailbox::{Envelope, Mailbox, Message};
use crate::navigation::{nearest_assembly_point, Route, Step, TransitPolicy};
use crate::types::{AgentId, AgentKind, Location, Mobility, RoomId};

#[derive(Debug)]
enum Phase {
    /// No evacuation order yet.
    Idle,
    /// Ordered out but no assembly point is left; re-checks at `retry_at`.
    NoExit { retry_at: Instant },
    Navigating {
        route: Route,
        next_step_at: Instant,
    },
    AwaitingElevator {
        route: Route,
        to: RoomId,
        retry_at: Instant,
    },
    Transit {
        route: Route,
        via: Transit,
        to: RoomId,
        arrive_at: Instant,
    },
    Evacuated,
}

impl Phase {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::Idle | Phase::Evacuated => None,
            Phase::NoExit { retry_at } => Some(*retry_at),
            Phase::Navigating { next_step_at, .. } => Some(*next_step_at),
            Phase::AwaitingElevator { retry_at, .. } => Some(*retry_at),
            Phase::Transit { arrive_at, .. } => Some(*arrive_at),
        }
    }
}

/// Building occupant. Moves one room per pace interval toward the nearest
/// assembly point and never re-enters a room it was told to avoid.
pub struct Occupant {
    ctx: AgentContext,
    mailbox: Mailbox,
    mobility: Mobility,
    location: Location,
    avoid: HashSet<RoomId>,
    phase: Phase,
    evacuation_ordered: bool,
    stuck: bool,
    management: Vec<AgentId>,
}

impl Occupant {
    pub fn new(ctx: AgentContext, mailbox: Mailbox, mobility: Mobility, start: RoomId) -> Self {
        let management = ctx.post.recipients(AgentKind::Management);
        Self {
            ctx,
            mailbox,
            mobility,
            location: Location::InRoom(start),
            avoid: HashSet::new(),
            phase: Phase::Idle,
            evacuation_ordered: false,
            stuck: false,
            management,
        }
    }

    pub fn id(&self) -> AgentId {
        self.ctx.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn avoid_set(&self) -> &HashSet<RoomId> {
        &self.avoid
    }

    pub fn is_evacuated(&self) -> bool {
        matches!(self.phase, Phase::Evacuated)
    }

    fn policy(&self) -> TransitPolicy {
        match self.mobility {
            Mobility::AbleBodied => TransitPolicy::Nearest,
            Mobility::ReducedMobility => TransitPolicy::ElevatorOnly,
        }
    }

    fn pace(&self) -> Duration {
        self.ctx.timings.pace(self.mobility)
    }

    /// Runs until the task is aborted. After evacuating the occupant keeps
    /// draining its mailbox so senders never see a closed queue.
    pub async fn run(mut self) -> SimResult<()> {
        info!(
            agent = %self.id(),
            location = %self.location,
            mobility = ?self.mobility,
            "occupant ready"
        );
        loop {
            let wait = self.next_wait();
            if let Some(envelope) = self.mailbox.recv_timeout(wait).await {
                self.handle(envelope).await?;
            }
            self.advance().await?;
        }
    }

    fn next_wait(&self) -> Duration {
        let poll = self.ctx.timings.mailbox_poll();
        match self.phase.deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(poll),
            None => poll,
        }
    }

    pub async fn handle(&mut self, envelope: Envelope) -> SimResult<()> {
        match envelope.message {
            Message::Evacuate => {
                if self.evacuation_ordered {
                    return Ok(());
                }
                self.evacuation_ordered = true;
                self.begin_evacuation().await?;
            }
            Message::AvoidRoom { room } => {
                if self.avoid.insert(room) {
                    debug!(agent = %self.id(), %room, "avoiding room");
                }
            }
            Message::AssemblyPointBlocked { room } => {
                if !self.evacuation_ordered || self.is_evacuated() {
                    return Ok(());
                }
                info!(agent = %self.id(), %room, "assembly point blocked, rerouting");
                self.ctx
                    .world
                    .log(format!(
                        "{} will redirect due to assembly point {room} blocked",
                        self.id()
                    ))
                    .await?;
                self.begin_evacuation().await?;
            }
            Message::ElevatorAccessGranted => {
                self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
                    Phase::AwaitingElevator { route, to, .. } => {
                        debug!(agent = %self.id(), "elevator access granted");
                        Phase::Transit {
                            route,
                            via: Transit::Elevator,
                            to,
                            arrive_at: Instant::now() + self.ctx.timings.floor_settle(),
                        }
                    }
                    other => other,
                };
            }
            Message::ElevatorRequest
            | Message::HazardDispatch { .. }
            | Message::MedicsDispatch { .. }
            | Message::AllClear { .. } => {}
        }
        Ok(())
    }

    /// Picks the nearest remaining assembly point from the current room and
    /// restarts navigation toward it.
    async fn begin_evacuation(&mut self) -> SimResult<()> {
        let Location::InRoom(here) = self.location else {
            return Ok(());
        };
        let points = self.ctx.world.assembly_points().await?;
        let Some(target) = nearest_assembly_point(here, &points) else {
            if !matches!(self.phase, Phase::NoExit { .. }) {
                warn!(agent = %self.id(), "no assembly point left, holding position");
                self.ctx
                    .world
                    .log(format!("{} has no assembly point left", self.id()))
                    .await?;
            }
            self.phase = Phase::NoExit {
                retry_at: Instant::now() + self.pace(),
            };
            return Ok(());
        };

        let route = Route::new(target, self.policy());
        let now = Instant::now();
        debug!(agent = %self.id(), from = %here, to = %target, "navigating to assembly point");
        self.phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            // Already inside the shaft: keep riding, just aim for the new target.
            Phase::Transit { via, arrive_at, .. } if target.floor != here.floor => Phase::Transit {
                to: self.ctx.layout.transit_room(target.floor, via),
                route,
                via,
                arrive_at,
            },
            _ => Phase::Navigating {
                route,
                next_step_at: now + self.pace(),
            },
        };
        Ok(())
    }

    /// Periodic work between mailbox polls: take a step when one is due.
    pub async fn advance(&mut self) -> SimResult<()> {
        let now = Instant::now();
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle => Phase::Idle,
            Phase::Evacuated => Phase::Evacuated,
            Phase::NoExit { retry_at } => {
                if now < retry_at {
                    Phase::NoExit { retry_at }
                } else {
                    self.phase = Phase::NoExit { retry_at };
                    self.begin_evacuation().await?;
                    return Ok(());
                }
            }
            Phase::Navigating {
                mut route,
                next_step_at,
            } => {
                let Location::InRoom(here) = self.location else {
                    return Ok(());
                };
                match route.next_step(&self.ctx.layout, here, &self.avoid) {
                    Step::Arrived => {
                        self.finish(here).await?;
                        Phase::Evacuated
                    }
                    _ if now < next_step_at => Phase::Navigating {
                        route,
                        next_step_at,
                    },
                    Step::Move(next) => {
                        self.stuck = false;
                        self.move_to(next).await?;
                        Phase::Navigating {
                            route,
                            next_step_at: now + self.pace(),
                        }
                    }
                    Step::ChangeFloor { via, to } => {
                        self.stuck = false;
                        self.ctx
                            .world
                            .log(format!(
                                "{} is changing floors using the {}",
                                self.id(),
                                via.label()
                            ))
                            .await?;
                        match via {
                            Transit::Elevator => {
                                self.request_elevator();
                                Phase::AwaitingElevator {
                                    route,
                                    to,
                                    retry_at: now + self.ctx.timings.elevator_retry(),
                                }
                            }
                            Transit::Staircase => Phase::Transit {
                                route,
                                via,
                                to,
                                arrive_at: now + self.ctx.timings.floor_settle(),
                            },
                        }
                    }
                    Step::Stuck => {
                        if !self.stuck {
                            self.stuck = true;
                            warn!(
                                agent = %self.id(),
                                room = %here,
                                "no available room to move to,
                                stuck"
                            );
                            self.ctx
                                .world
                                .log(format!("{} is stuck in {here}", self.id()))
                                .await?;
                        }
                        Phase::Navigating {
                            route,
                            next_step_at: now + self.pace(),
                        }
                    }
                }
            }
            Phase::AwaitingElevator {
                route,
                to,
                retry_at,
            } => {
                if now < retry_at {
                    Phase::AwaitingElevator {
                        route,
                        to,
                        retry_at,
                    }
                } else {
                    debug!(agent = %self.id(), "no elevator grant yet, asking again");
                    self.request_elevator();
                    Phase::AwaitingElevator {
                        route,
                        to,
                        retry_at: now + self.ctx.timings.elevator_retry(),
                    }
                }
            }
            Phase::Transit {
                mut route,
                via,
                to,
                arrive_at,
            } => {
                if now < arrive_at {
                    Phase::Transit {
                        route,
                        via,
                        to,
                        arrive_at,
                    }
                } else {
                    route.finish_floor_change();
                    self.move_to(to).await?;
                    info!(
                        agent = %self.id(),
                        floor = to.floor + 1,
                        via = via.label(),
                        "arrived on new floor"
                    );
                    Phase::Navigating {
                        route,
                        next_step_at: now + self.pace(),
                    }
                }
            }
        };
        Ok(())
    }

    fn request_elevator(&self) {
        for manager in &self.management {
            self.ctx.send(*manager, Message::ElevatorRequest);
        }
    }

    async fn move_to(&mut self, next: RoomId) -> SimResult<()> {
        debug!(agent = %self.id(), from = %self.location, to = %next, "moved");
        self.location = Location::InRoom(next);
        self.ctx.world.record_location(self.id(), self.location).await
    }

    async fn finish(&mut self, exit: RoomId) -> SimResult<()> {
        info!(agent = %self.id(), %exit, "reached assembly point");
        self.location = Location::Evacuated;
        self.ctx.world.mark_evacuated(self.id()).await?;
        Ok(())
    }
}
