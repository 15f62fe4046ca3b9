//! Mutation dispatcher: optimistic insert, remote call, rollback on failure.
//!
//! 1. Insert the pending entry first, so the very next view shows the move.
//!    A coordinator moving out re-keys its old zone, so entries aimed at that
//!    zone learn the new id at the same time.
//! 2. Spawn the remote call; its result comes back to the engine as an event.
//! 3. Success leaves the store alone. Convergence is decided by snapshots.
//! 4. Failure removes the entry, but only if it is still the one this call
//!    inserted. A newer move for the same device is never touched.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::EngineEvent;
use super::gesture::MoveIntent;
use super::metrics::{MOVES_DISPATCHED, MOVES_FAILED_SUPERSEDED, MOVES_ROLLED_BACK};
use super::pending_store::PendingMutationStore;
use super::reconcile::coordinator_handover;
use super::remote::{RemoteControl, RemoteError};
use super::topology::{DeviceId, Topology};

/// The remote call behind an intent. Addressed by room name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Join { room: String, target_room: String },
    Leave { room: String },
}

impl RemoteCall {
    pub fn for_intent(intent: &MoveIntent) -> Option<Self> {
        match intent {
            MoveIntent::Leave { room, .. } => Some(Self::Leave { room: room.clone() }),
            MoveIntent::Join {
                room, target_room, ..
            }
            | MoveIntent::Merge {
                room, target_room, ..
            } => Some(Self::Join {
                room: room.clone(),
                target_room: target_room.clone(),
            }),
            MoveIntent::NoOp { .. } => None,
        }
    }

    pub async fn invoke<R: RemoteControl>(&self, remote: &R) -> Result<(), RemoteError> {
        match self {
            Self::Join { room, target_room } => remote.join(room, target_room).await,
            Self::Leave { room } => remote.leave(room).await,
        }
    }
}

/// Receipt for one dispatched move. Carries the pending `seq` it inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTicket {
    pub device: DeviceId,
    pub room: String,
    pub seq: u64,
    pub call: RemoteCall,
}

/// What went wrong, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAction {
    /// Adding the device to a group failed.
    Join,
    /// Removing the device from its group failed.
    Leave,
    /// The move was never confirmed within the configured timeout.
    Expired,
}

/// A user-facing error for one move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub device: DeviceId,
    pub room: String,
    pub action: FailedAction,
    pub message: String,
    pub detail: String,
}

impl Notification {
    pub fn call_failed(ticket: &DispatchTicket, err: &RemoteError) -> Self {
        let (action, message) = match &ticket.call {
            RemoteCall::Join { .. } => (
                FailedAction::Join,
                format!("failed to add {} to group", ticket.room),
            ),
            RemoteCall::Leave { .. } => (
                FailedAction::Leave,
                format!("failed to remove {} from group", ticket.room),
            ),
        };
        Self {
            device: ticket.device.clone(),
            room: ticket.room.clone(),
            action,
            message,
            detail: err.to_string(),
        }
    }

    pub fn expired(device: DeviceId, room: String) -> Self {
        Self {
            message: format!("timed out moving {room}"),
            device,
            room,
            action: FailedAction::Expired,
            detail: "the speakers never reported the new grouping".into(),
        }
    }
}

/// Outcome of a finished remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Call succeeded. The entry stays until a snapshot confirms it.
    Acknowledged,
    /// Call failed and its entry was removed.
    RolledBack(Notification),
    /// Call failed but its entry was already replaced or retired.
    Superseded,
}

/// Issues remote calls for classified intents.
pub struct MutationDispatcher<R> {
    remote: Arc<R>,
    events: mpsc::UnboundedSender<EngineEvent>,
    cancel: CancellationToken,
}

impl<R: RemoteControl> MutationDispatcher<R> {
    pub(crate) fn new(
        remote: Arc<R>,
        events: mpsc::UnboundedSender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            events,
            cancel,
        }
    }

    /// Record `intent`, classified against `view`, as pending and fire its
    /// remote call.
    ///
    /// Returns `None` for a no-op: nothing is inserted and nothing is sent.
    pub fn dispatch(
        &self,
        store: &mut PendingMutationStore,
        view: &Topology,
        intent: &MoveIntent,
        now: Instant,
    ) -> Option<DispatchTicket> {
        let (device, room) = match intent {
            MoveIntent::Leave { device, room }
            | MoveIntent::Join { device, room, .. }
            | MoveIntent::Merge { device, room, .. } => (device, room),
            MoveIntent::NoOp { .. } => return None,
        };
        let call = RemoteCall::for_intent(intent)?;
        let target = intent.pending_target()?;

        let seq = record(store, view, intent, now)?;
        let ticket = DispatchTicket {
            device: device.clone(),
            room: room.clone(),
            seq,
            call,
        };
        info!(
            device = %device,
            room = %room,
            intent = intent.kind(),
            target = ?target,
            seq,
            "move dispatched"
        );
        counter!(MOVES_DISPATCHED, "intent" => intent.kind()).increment(1);

        self.spawn_call(ticket.clone());
        Some(ticket)
    }

    fn spawn_call(&self, ticket: DispatchTicket) {
        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let call = ticket.call.clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = call.invoke(remote.as_ref()) => result,
            };
            // Engine gone means the state this result belonged to is gone too.
            let _ = events.send(EngineEvent::MutationSettled { ticket, result });
        });
    }
}

/// Insert the pending entry for `intent`, classified against `view`.
///
/// Returns the entry's `seq`, or `None` for a no-op.
pub fn record(
    store: &mut PendingMutationStore,
    view: &Topology,
    intent: &MoveIntent,
    now: Instant,
) -> Option<u64> {
    let device = intent.device()?;
    let target = intent.pending_target()?;
    if let Some((from, to)) = coordinator_handover(view, device) {
        debug!(device = %device, from = %from, to = %to, "coordinator moving out, zone re-keyed");
        store.follow_rekey(&from, &to);
    }
    Some(store.insert(device.clone(), target, now))
}

/// Apply a finished call's result to the store.
pub fn settle(
    store: &mut PendingMutationStore,
    ticket: &DispatchTicket,
    result: Result<(), RemoteError>,
) -> Settlement {
    let err = match result {
        Ok(()) => return Settlement::Acknowledged,
        Err(e) => e,
    };

    if store.remove_if_current(&ticket.device, ticket.seq).is_some() {
        warn!(
            device = %ticket.device,
            room = %ticket.room,
            seq = ticket.seq,
            "move failed, rolled back: {err}"
        );
        counter!(MOVES_ROLLED_BACK).increment(1);
        Settlement::RolledBack(Notification::call_failed(ticket, &err))
    } else {
        warn!(
            device = %ticket.device,
            seq = ticket.seq,
            "move failed after being superseded: {err}"
        );
        counter!(MOVES_FAILED_SUPERSEDED).increment(1);
        Settlement::Superseded
    }
}
