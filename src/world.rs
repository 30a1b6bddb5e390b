//! World actor: the only task that mutates [`WorldState`]. Agents and the
//! driver hold a [`WorldHandle`] and talk to it over a command channel, so
//! hazard flags, noted flags, counters and the assembly-point list are changed
//! strictly one request at a time.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::building::{Detection, WorldState};
use crate::constants::WORLD_COMMAND_CAPACITY;
use crate::error::{SimError, SimResult};
use crate::hazards::{HazardEvent, HazardInjector};
use crate::types::{AgentId, HazardKind, Location, RoomId, RunOutcome, RunReport, Snapshot};

enum WorldCommand {
    Tick {
        reply: oneshot::Sender<(u64, Vec<HazardEvent>)>,
    },
    ApplyHazard {
        kind: HazardKind,
        room: RoomId,
        lights_out: bool,
        reply: oneshot::Sender<bool>,
    },
    DetectHazards {
        reply: oneshot::Sender<Vec<Detection>>,
    },
    RestoreLighting {
        room: RoomId,
    },
    AssemblyPoints {
        reply: oneshot::Sender<Vec<RoomId>>,
    },
    ResolveHazard {
        responder: AgentId,
        kind: HazardKind,
        room: RoomId,
        elapsed: Duration,
        reply: oneshot::Sender<bool>,
    },
    MedicResponse {
        responder: AgentId,
        room: RoomId,
        elapsed: Duration,
    },
    RecordLocation {
        agent: AgentId,
        location: Location,
    },
    MarkEvacuated {
        agent: AgentId,
        reply: oneshot::Sender<bool>,
    },
    ElevatorGranted {
        requester: AgentId,
    },
    Log {
        update: String,
    },
    AllEvacuated {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Report {
        seed: u32,
        outcome: RunOutcome,
        reply: oneshot::Sender<RunReport>,
    },
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct WorldHandle {
    tx: mpsc::Sender<WorldCommand>,
}

impl std::fmt::Debug for WorldCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorldCommand::Tick { .. } => "Tick",
            WorldCommand::ApplyHazard { .. } => "ApplyHazard",
            WorldCommand::DetectHazards { .. } => "DetectHazards",
            WorldCommand::RestoreLighting { .. } => "RestoreLighting",
            WorldCommand::AssemblyPoints { .. } => "AssemblyPoints",
            WorldCommand::ResolveHazard { .. } => "ResolveHazard",
            WorldCommand::MedicResponse { .. } => "MedicResponse",
            WorldCommand::RecordLocation { .. } => "RecordLocation",
            WorldCommand::MarkEvacuated { .. } => "MarkEvacuated",
            WorldCommand::ElevatorGranted { .. } => "ElevatorGranted",
            WorldCommand::Log { .. } => "Log",
            WorldCommand::AllEvacuated { .. } => "AllEvacuated",
            WorldCommand::Snapshot { .. } => "Snapshot",
            WorldCommand::Report { .. } => "Report",
            WorldCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Starts the actor. The join handle yields the final state after
/// [`WorldHandle::shutdown`] or once every handle is dropped.
pub fn spawn_world(
    state: WorldState,
    injector: HazardInjector,
) -> (WorldHandle, JoinHandle<WorldState>) {
    let (tx, rx) = mpsc::channel(WORLD_COMMAND_CAPACITY);
    let task = tokio::spawn(run_world(state, injector, rx));
    (WorldHandle { tx }, task)
}

async fn run_world(
    mut state: WorldState,
    mut injector: HazardInjector,
    mut rx: mpsc::Receiver<WorldCommand>,
) -> WorldState {
    while let Some(command) = rx.recv().await {
        match command {
            WorldCommand::Tick { reply } => {
                let tick = state.advance_tick();
                let events = injector.inject(&mut state);
                for event in events.iter().filter(|event| event.new) {
                    info!(
                        tick,
                        kind = event.kind.label(),
                        room = %event.room,
                        spread = event.spread,
                        "hazard started"
                    );
                }
                let _ = reply.send((tick, events));
            }
            WorldCommand::ApplyHazard {
                kind,
                room,
                lights_out,
                reply,
            } => {
                let _ = reply.send(state.apply_hazard(kind, room, lights_out));
            }
            WorldCommand::DetectHazards { reply } => {
                let _ = reply.send(state.detect_unnoted());
            }
            WorldCommand::RestoreLighting { room } => {
                state.restore_lighting(room);
            }
            WorldCommand::AssemblyPoints { reply } => {
                let _ = reply.send(state.assembly_points().to_vec());
            }
            WorldCommand::ResolveHazard {
                responder,
                kind,
                room,
                elapsed,
                reply,
            } => {
                let _ = reply.send(state.resolve_hazard(responder, kind, room, elapsed));
            }
            WorldCommand::MedicResponse {
                responder,
                room,
                elapsed,
            } => {
                state.record_medic_response(responder, room, elapsed);
            }
            WorldCommand::RecordLocation { agent, location } => {
                state.record_location(agent, location);
            }
            WorldCommand::MarkEvacuated { agent, reply } => {
                let _ = reply.send(state.mark_evacuated(agent));
            }
            WorldCommand::ElevatorGranted { requester } => {
                state.record_elevator_grant(requester);
            }
            WorldCommand::Log { update } => {
                state.push_update(update);
            }
            WorldCommand::AllEvacuated { reply } => {
                let _ = reply.send(state.all_evacuated());
            }
            WorldCommand::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
            WorldCommand::Report {
                seed,
                outcome,
                reply,
            } => {
                let _ = reply.send(state.report(seed, outcome));
            }
            WorldCommand::Shutdown => break,
        }
    }
    debug!("world actor stopped");
    state
}

impl WorldHandle {
    async fn send(&self, command: WorldCommand) -> SimResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SimError::WorldUnavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorldCommand,
    ) -> SimResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| SimError::WorldUnavailable)
    }

    /// Advances the tick counter and runs the hazard injector once.
    pub async fn tick(&self) -> SimResult<(u64, Vec<HazardEvent>)> {
        self.request(|reply| WorldCommand::Tick { reply }).await
    }

    pub async fn apply_hazard(
        &self,
        kind: HazardKind,
        room: RoomId,
        lights_out: bool,
    ) -> SimResult<bool> {
        self.request(|reply| WorldCommand::ApplyHazard {
            kind,
            room,
            lights_out,
            reply,
        })
        .await
    }

    pub async fn detect_hazards(&self) -> SimResult<Vec<Detection>> {
        self.request(|reply| WorldCommand::DetectHazards { reply })
            .await
    }

    pub async fn restore_lighting(&self, room: RoomId) -> SimResult<()> {
        self.send(WorldCommand::RestoreLighting { room }).await
    }

    pub async fn assembly_points(&self) -> SimResult<Vec<RoomId>> {
        self.request(|reply| WorldCommand::AssemblyPoints { reply })
            .await
    }

    pub async fn resolve_hazard(
        &self,
        responder: AgentId,
        kind: HazardKind,
        room: RoomId,
        elapsed: Duration,
    ) -> SimResult<bool> {
        self.request(|reply| WorldCommand::ResolveHazard {
            responder,
            kind,
            room,
            elapsed,
            reply,
        })
        .await
    }

    pub async fn record_medic_response(
        &self,
        responder: AgentId,
        room: RoomId,
        elapsed: Duration,
    ) -> SimResult<()> {
        self.send(WorldCommand::MedicResponse {
            responder,
            room,
            elapsed,
        })
        .await
    }

    pub async fn record_location(&self, agent: AgentId, location: Location) -> SimResult<()> {
        self.send(WorldCommand::RecordLocation { agent, location })
            .await
    }

    pub async fn mark_evacuated(&self, agent: AgentId) -> SimResult<bool> {
        self.request(|reply| WorldCommand::MarkEvacuated { agent, reply })
            .await
    }

    pub async fn record_elevator_grant(&self, requester: AgentId) -> SimResult<()> {
        self.send(WorldCommand::ElevatorGranted { requester }).await
    }

    pub async fn log(&self, update: impl Into<String>) -> SimResult<()> {
        self.send(WorldCommand::Log {
            update: update.into(),
        })
        .await
    }

    pub async fn all_evacuated(&self) -> SimResult<bool> {
        self.request(|reply| WorldCommand::AllEvacuated { reply })
            .await
    }

    pub async fn snapshot(&self) -> SimResult<Snapshot> {
        self.request(|reply| WorldCommand::Snapshot { reply }).await
    }

    pub async fn report(&self, seed: u32, outcome: RunOutcome) -> SimResult<RunReport> {
        self.request(|reply| WorldCommand::Report {
            seed,
            outcome,
            reply,
        })
        .await
    }

    pub async fn shutdown(&self) -> SimResult<()> {
        self.send(WorldCommand::Shutdown).await
    }
}
