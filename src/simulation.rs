//! Scenario construction and the run driver. The driver owns the agent task
//! set, advances the world once per tick and polls for completion.

use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::agents::{AgentContext, Management, Occupant, Responder};
use crate::building::{Layout, WorldState};
use crate::config::{BuildingConfig, SimConfig, Timings};
use crate::constants::mobility_for_index;
use crate::error::{SimError, SimResult};
use crate::hazards::HazardInjector;
use crate::mailbox::PostOffice;
use crate::rng::Rng;
use crate::types::{AgentId, Mobility, ResponderRole, RoomId, RunOutcome, RunReport, Snapshot};
use crate::world::{spawn_world, WorldHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OccupantSpec {
    pub start: RoomId,
    pub mobility: Mobility,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponderSpec {
    pub role: ResponderRole,
    pub start: RoomId,
}

/// Everything fixed at the start of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub seed: u32,
    pub layout: Layout,
    pub assembly_points: Vec<RoomId>,
    pub occupants: Vec<OccupantSpec>,
    pub responders: Vec<ResponderSpec>,
}

impl Scenario {
    /// Random building, random starting rooms, one responder per role.
    pub fn generate(seed: u32, config: &BuildingConfig) -> Self {
        let mut rng = Rng::new(seed);
        let layout = Layout::generate(&mut rng, config);
        let count = rng.range(config.min_occupants, config.max_occupants);
        let occupants = (0..count)
            .map(|index| OccupantSpec {
                start: layout.random_room(&mut rng),
                mobility: mobility_for_index(index),
            })
            .collect();
        let responders = ResponderRole::ALL
            .into_iter()
            .map(|role| ResponderSpec {
                role,
                start: layout.random_room(&mut rng),
            })
            .collect();
        Self {
            seed,
            assembly_points: layout.default_assembly_points(),
            layout,
            occupants,
            responders,
        }
    }

    /// Empty scenario on a given layout with the default assembly points.
    pub fn new(seed: u32, layout: Layout) -> Self {
        Self {
            seed,
            assembly_points: layout.default_assembly_points(),
            layout,
            occupants: Vec::new(),
            responders: Vec::new(),
        }
    }

    pub fn with_occupant(mut self, start: RoomId, mobility: Mobility) -> Self {
        self.occupants.push(OccupantSpec { start, mobility });
        self
    }

    pub fn with_responder(mut self, role: ResponderRole, start: RoomId) -> Self {
        self.responders.push(ResponderSpec { role, start });
        self
    }

    pub fn with_assembly_points(mut self, assembly_points: Vec<RoomId>) -> Self {
        self.assembly_points = assembly_points;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        let starts = self
            .occupants
            .iter()
            .map(|entry| entry.start)
            .chain(self.responders.iter().map(|entry| entry.start));
        for room in starts.chain(self.assembly_points.iter().copied()) {
            if !self.layout.contains(room) {
                return Err(SimError::InvalidLayout(format!(
                    "{room} is outside a {}x{}x{} building",
                    self.layout.floors(),
                    self.layout.rows(),
                    self.layout.cols()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FinishedRun {
    pub report: RunReport,
    pub snapshot: Snapshot,
}

type AgentExit = (AgentId, SimResult<()>);

/// A started run. Agents are already live; [`Simulation::finish`] drives the
/// tick loop to the end and tears everything down.
pub struct Simulation {
    seed: u32,
    world: WorldHandle,
    world_task: JoinHandle<WorldState>,
    agents: JoinSet<AgentExit>,
    timings: Arc<Timings>,
    max_ticks: Option<u64>,
}

impl Simulation {
    pub fn start(scenario: Scenario, config: &SimConfig) -> SimResult<Self> {
        config.validate()?;
        scenario.validate()?;
        let Scenario {
            seed,
            layout,
            assembly_points,
            occupants,
            responders,
        } = scenario;

        let layout = Arc::new(layout);
        let timings = Arc::new(config.timings.clone());
        let capacity = config.mailbox_capacity;
        let mut state = WorldState::new(layout.clone(), assembly_points);
        let mut post = PostOffice::new();

        let mut occupant_boxes = Vec::with_capacity(occupants.len());
        for (index, entry) in occupants.iter().enumerate() {
            let id = AgentId::occupant(index);
            state.register_occupant(id, entry.mobility, entry.start);
            occupant_boxes.push((id, post.register(id, capacity), *entry));
        }
        let mut responder_boxes = Vec::with_capacity(responders.len());
        for (index, entry) in responders.iter().enumerate() {
            let id = AgentId::responder(index);
            state.register_responder(id, entry.role, entry.start);
            responder_boxes.push((id, post.register(id, capacity), *entry));
        }
        let manager = AgentId::management(0);
        state.register_management(manager);
        let management_box = post.register(manager, capacity);

        let post = Arc::new(post);
        let injector = HazardInjector::new(config.hazards.clone(), Rng::new(seed).fork());
        let (world, world_task) = spawn_world(state, injector);
        let context = |id: AgentId| AgentContext {
            id,
            layout: layout.clone(),
            post: post.clone(),
            world: world.clone(),
            timings: timings.clone(),
        };

        let mut agents = JoinSet::new();
        for (id, mailbox, entry) in occupant_boxes {
            let occupant = Occupant::new(context(id), mailbox, entry.mobility, entry.start);
            agents.spawn(async move { (id, occupant.run().await) });
        }
        for (id, mailbox, entry) in responder_boxes {
            let responder = Responder::new(context(id), mailbox, entry.role, entry.start);
            agents.spawn(async move { (id, responder.run().await) });
        }
        let management = Management::new(context(manager), management_box);
        agents.spawn(async move { (manager, management.run().await) });

        info!(
            seed,
            floors = layout.floors(),
            rows = layout.rows(),
            cols = layout.cols(),
            occupants = occupants.len(),
            responders = responders.len(),
            "simulation started"
        );

        Ok(Self {
            seed,
            world,
            world_task,
            agents,
            timings,
            max_ticks: config.max_ticks,
        })
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn world(&self) -> WorldHandle {
        self.world.clone()
    }

    pub async fn finish(mut self) -> SimResult<FinishedRun> {
        let outcome = self.drive().await;
        self.agents.abort_all();
        while self.agents.join_next().await.is_some() {}

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self.world.shutdown().await;
                return Err(err);
            }
        };
        let report = self.world.report(self.seed, outcome).await?;
        let snapshot = self.world.snapshot().await?;
        self.world.shutdown().await?;
        self.world_task
            .await
            .map_err(|err| SimError::AgentPanicked(err.to_string()))?;
        info!(
            seed = self.seed,
            outcome = ?report.outcome,
            ticks = report.ticks,
            evacuated = report.evacuated,
            total = report.total_agents,
            "simulation finished"
        );
        Ok(FinishedRun { report, snapshot })
    }

    async fn drive(&mut self) -> SimResult<RunOutcome> {
        let mut ticker = interval(self.timings.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(exit) = self.agents.join_next() => return Err(agent_failure(exit)),
            }
            if self.world.all_evacuated().await? {
                return Ok(RunOutcome::Completed);
            }
            let (tick, _) = self.world.tick().await?;
            if let Some(max_ticks) = self.max_ticks {
                if tick >= max_ticks {
                    warn!(seed = self.seed, tick, "evacuation incomplete at tick limit");
                    return Ok(RunOutcome::Stalled);
                }
            }
        }
    }
}

fn agent_failure(exit: Result<AgentExit, JoinError>) -> SimError {
    match exit {
        Ok((agent, Err(err))) => SimError::AgentFailed {
            agent,
            reason: err.to_string(),
        },
        Ok((agent, Ok(()))) => SimError::AgentFailed {
            agent,
            reason: "stopped before the run ended".to_string(),
        },
        Err(err) => SimError::AgentPanicked(err.to_string()),
    }
}

/// Starts a run and drives it to the end.
pub async fn run(scenario: Scenario, config: &SimConfig) -> SimResult<RunReport> {
    let finished = Simulation::start(scenario, config)?.finish().await?;
    Ok(finished.report)
}
