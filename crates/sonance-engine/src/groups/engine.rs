//! Group engine: the single owner of all reconciliation state.
//!
//! Many arms, one brain: snapshot requests, remote calls, and client
//! commands all run as their own tasks, but every state transition happens
//! here, one event per loop turn. "Replace the pending entry" and "retire
//! converged entries" are therefore atomic with respect to each other.
//!
//! Each change produces a fresh `ReconciledView` on a watch channel. Rolled
//! back moves are announced on a broadcast channel.
//!
//! Shutdown cancels the refresh timer and every in-flight task. Results that
//! arrive afterwards have nowhere to go.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::convergence::retire_converged;
use super::dispatcher::{settle, DispatchTicket, MutationDispatcher, Notification, Settlement};
use super::gesture::{classify, Destination, DropTarget, MoveIntent, NoOpReason};
use super::metrics::{
    MOVES_CONVERGED, MOVES_EXPIRED, MOVES_IGNORED, MOVES_PENDING, REFRESH_APPLIED,
    REFRESH_FAILURES, REFRESH_RTT_MS,
};
use super::pending_store::PendingMutationStore;
use super::reconcile::{reconcile, ReconciledView};
use super::remote::{RemoteControl, RemoteError};
use super::snapshot_source::{FetchedSnapshot, RefreshTrigger, SnapshotSource};
use super::topology::{DeviceId, Topology, ZoneId};
use crate::config::EngineConfig;

/// Notifications buffered per subscriber before the oldest are dropped.
const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("group engine is not running")]
    Stopped,
}

/// Results flowing back from the engine's own tasks.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    SnapshotFetched(FetchedSnapshot),
    MutationSettled {
        ticket: DispatchTicket,
        result: Result<(), RemoteError>,
    },
}

/// Requests from clients of the engine.
enum EngineCommand {
    Drop {
        device: DeviceId,
        target: DropTarget,
        reply: oneshot::Sender<MoveOutcome>,
    },
    Refresh,
    Debug {
        reply: oneshot::Sender<DebugSnapshot>,
    },
}

/// What happened to a drop or move request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    Dispatched { intent: MoveIntent },
    Ignored { reason: NoOpReason },
}

/// One pending entry, for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReport {
    pub device: DeviceId,
    pub target: Option<ZoneId>,
    /// Ids the target zone was re-keyed to since the move was issued.
    pub aliases: Vec<ZoneId>,
    pub seq: u64,
    pub age_ms: u64,
}

/// Everything the engine knows, unreconciled and reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub authoritative: Option<Topology>,
    pub pending: Vec<PendingReport>,
    pub reconciled: ReconciledView,
    pub refresh_generation: u64,
    pub refresh_in_flight: bool,
    pub last_refresh_error: Option<String>,
}

/// Cloneable client handle. Dropping every handle stops the engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    view: watch::Receiver<ReconciledView>,
    notifications: broadcast::Sender<Notification>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Latest reconciled view.
    pub fn view(&self) -> ReconciledView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ReconciledView> {
        self.view.clone()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Imperative move entry point: classify and dispatch in one step.
    pub async fn request_move(
        &self,
        device: DeviceId,
        destination: Destination,
    ) -> Result<MoveOutcome, EngineError> {
        self.drop_device(device, destination.into()).await
    }

    /// A finished drag of `device` onto `target`.
    ///
    /// Resolves once the pending entry is in place and the view published;
    /// the remote call is still in flight at that point.
    pub async fn drop_device(
        &self,
        device: DeviceId,
        target: DropTarget,
    ) -> Result<MoveOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Drop {
            device,
            target,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Poll now, superseding any poll in flight.
    pub fn refresh(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Refresh)
    }

    pub async fn debug(&self) -> Result<DebugSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Debug { reply })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Commands are refused as soon as shutdown begins, even before the
    /// loop has drained.
    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        self.commands
            .send(command)
            .map_err(|_| EngineError::Stopped)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }
}

/// Start the engine on the current tokio runtime.
pub fn spawn_engine<R: RemoteControl>(
    remote: Arc<R>,
    config: EngineConfig,
) -> (EngineHandle, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(ReconciledView::default());
    let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

    let engine = GroupsEngine {
        source: SnapshotSource::new(Arc::clone(&remote), event_tx.clone(), cancel.clone()),
        dispatcher: MutationDispatcher::new(remote, event_tx, cancel.clone()),
        config,
        authoritative: None,
        store: PendingMutationStore::new(),
        view_tx,
        notify_tx: notify_tx.clone(),
        last_refresh_error: None,
    };
    let task = tokio::spawn(engine.run(command_rx, event_rx, cancel.clone()));

    let handle = EngineHandle {
        commands: command_tx,
        view: view_rx,
        notifications: notify_tx,
        cancel,
    };
    (handle, task)
}

struct GroupsEngine<R> {
    config: EngineConfig,
    /// `None` until the first snapshot lands.
    authoritative: Option<Topology>,
    store: PendingMutationStore,
    source: SnapshotSource<R>,
    dispatcher: MutationDispatcher<R>,
    view_tx: watch::Sender<ReconciledView>,
    notify_tx: broadcast::Sender<Notification>,
    last_refresh_error: Option<String>,
}

impl<R: RemoteControl> GroupsEngine<R> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            api_url = %self.config.api_url,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "group engine started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.source.request(RefreshTrigger::Timer);
                }
            }
        }

        cancel.cancel();
        self.source.stop();
        info!(pending = self.store.len(), "group engine stopped");
    }

    fn view(&self) -> ReconciledView {
        match &self.authoritative {
            Some(topology) => reconcile(topology, &self.store),
            None => ReconciledView::default(),
        }
    }

    /// Recompute and publish the view if it changed.
    fn publish(&self) {
        let view = self.view();
        gauge!(MOVES_PENDING).set(self.store.len() as f64);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine: nobody is looking.
        let _ = self.notify_tx.send(notification);
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Drop {
                device,
                target,
                reply,
            } => {
                let outcome = self.handle_drop(device, target);
                let _ = reply.send(outcome);
            }
            EngineCommand::Refresh => {
                self.source.request(RefreshTrigger::OnDemand);
            }
            EngineCommand::Debug { reply } => {
                let _ = reply.send(self.debug_snapshot());
            }
        }
    }

    fn handle_drop(&mut self, device: DeviceId, target: DropTarget) -> MoveOutcome {
        let view = self.view();
        let intent = classify(&view.topology, &device, &target);
        if let MoveIntent::NoOp { reason } = intent {
            debug!(device = %device, target = ?target, %reason, "drop ignored");
            counter!(MOVES_IGNORED, "reason" => reason.label()).increment(1);
            return MoveOutcome::Ignored { reason };
        }

        self.dispatcher
            .dispatch(&mut self.store, &view.topology, &intent, Instant::now());
        self.publish();
        MoveOutcome::Dispatched { intent }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SnapshotFetched(fetched) => self.apply_snapshot(fetched),
            EngineEvent::MutationSettled { ticket, result } => {
                match settle(&mut self.store, &ticket, result) {
                    Settlement::Acknowledged => {
                        debug!(device = %ticket.device, seq = ticket.seq, "move acknowledged");
                    }
                    Settlement::RolledBack(notification) => {
                        self.publish();
                        self.notify(notification);
                    }
                    Settlement::Superseded => {}
                }
            }
        }
    }

    fn apply_snapshot(&mut self, fetched: FetchedSnapshot) {
        if !self.source.accept(fetched.generation) {
            return;
        }
        let topology = match fetched.result {
            Ok(topology) => topology,
            Err(e) => {
                warn!(generation = fetched.generation, "refresh failed: {e}");
                counter!(REFRESH_FAILURES).increment(1);
                self.last_refresh_error = Some(e.to_string());
                return;
            }
        };

        counter!(REFRESH_APPLIED).increment(1);
        histogram!(REFRESH_RTT_MS).record(fetched.elapsed.as_secs_f64() * 1000.0);
        self.last_refresh_error = None;

        for retired in retire_converged(&mut self.store, &topology) {
            info!(device = %retired.device, target = ?retired.target, "move converged");
            counter!(MOVES_CONVERGED).increment(1);
        }

        let mut expired = Vec::new();
        if let Some(ttl) = self.config.pending_timeout {
            for mutation in self.store.expire_older_than(ttl, Instant::now()) {
                let room = topology
                    .room_name(&mutation.device)
                    .unwrap_or(mutation.device.as_str())
                    .to_string();
                warn!(device = %mutation.device, target = ?mutation.target, "move expired unconfirmed");
                counter!(MOVES_EXPIRED).increment(1);
                expired.push(Notification::expired(mutation.device, room));
            }
        }

        self.authoritative = Some(topology);
        self.publish();
        for notification in expired {
            self.notify(notification);
        }
    }

    fn debug_snapshot(&self) -> DebugSnapshot {
        let now = Instant::now();
        let pending = self
            .store
            .in_issue_order()
            .into_iter()
            .map(|m| PendingReport {
                device: m.device.clone(),
                target: m.target.clone(),
                aliases: m.aliases.clone(),
                seq: m.seq,
                age_ms: now.saturating_duration_since(m.issued_at).as_millis() as u64,
            })
            .collect();
        DebugSnapshot {
            authoritative: self.authoritative.clone(),
            pending,
            reconciled: self.view(),
            refresh_generation: self.source.generation(),
            refresh_in_flight: self.source.in_flight(),
            last_refresh_error: self.last_refresh_error.clone(),
        }
    }
}
