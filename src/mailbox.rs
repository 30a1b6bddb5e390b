use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::types::{AgentId, AgentKind, HazardKind, RoomId};

/// Every message an agent can receive. Dispatch is an exhaustive `match`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    Evacuate,
    AvoidRoom { room: RoomId },
    AssemblyPointBlocked { room: RoomId },
    ElevatorRequest,
    ElevatorAccessGranted,
    HazardDispatch { kind: HazardKind, room: RoomId },
    MedicsDispatch { room: RoomId },
    AllClear { room: RoomId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: AgentId,
    pub message: Message,
}

/// Address book from agent id to inbound queue. Filled before agents start and
/// shared read-only afterwards.
#[derive(Debug, Default)]
pub struct PostOffice {
    boxes: BTreeMap<AgentId, mpsc::Sender<Envelope>>,
}

impl PostOffice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, owner: AgentId, capacity: usize) -> Mailbox {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.boxes.insert(owner, tx);
        Mailbox { rx }
    }

    pub fn recipients(&self, kind: AgentKind) -> Vec<AgentId> {
        self.boxes
            .keys()
            .filter(|id| id.kind == kind)
            .copied()
            .collect()
    }

    /// Fire-and-forget. A full or closed mailbox drops the message.
    pub fn send(&self, from: AgentId, to: AgentId, message: Message) -> bool {
        let Some(tx) = self.boxes.get(&to) else {
            warn!(%from, %to, ?message, "no mailbox for recipient, dropping");
            return false;
        };
        match tx.try_send(Envelope { from, message }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%from, %to, ?message, "mailbox full, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%from, %to, ?message, "mailbox closed, dropping");
                false
            }
        }
    }

    pub fn broadcast(&self, from: AgentId, recipients: &[AgentId], message: Message) -> usize {
        recipients
            .iter()
            .filter(|to| self.send(from, **to, message))
            .count()
    }
}

pub struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    /// Waits up to `wait` for the next message.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Envelope> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(envelope)) => Some(envelope),
            Ok(None) => {
                // Closed: keep the caller's cadence instead of spinning.
                tokio::time::sleep(wait).await;
                None
            }
            Err(_) => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}
