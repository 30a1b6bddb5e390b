use std::sync::Arc;

use crate::building::Layout;
use crate::config::Timings;
use crate::mailbox::{Message, PostOffice};
use crate::types::AgentId;
use crate::world::WorldHandle;

pub mod management;
pub mod occupant;
pub mod responder;

pub use management::{HazardMonitor, Management};
pub use occupant::Occupant;
pub use responder::Responder;

/// What every agent task holds: its identity and handles to the shared,
/// read-only topology, the post office and the world actor.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub id: AgentId,
    pub layout: Arc<Layout>,
    pub post: Arc<PostOffice>,
    pub world: WorldHandle,
    pub timings: Arc<Timings>,
}

impl AgentContext {
    pub fn send(&self, to: AgentId, message: Message) -> bool {
        self.post.send(self.id, to, message)
    }

    pub fn broadcast(&self, recipients: &[AgentId], message: Message) -> usize {
        self.post.broadcast(self.id, recipients, message)
    }
}
