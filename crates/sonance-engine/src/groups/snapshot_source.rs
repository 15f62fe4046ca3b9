//! Authoritative snapshot source: polls the remote `zones` endpoint.
//!
//! At most one request is in flight. A timer tick that finds one running is
//! skipped; an on-demand refresh supersedes it instead (the old task is
//! aborted and its generation retired). Every result carries the generation
//! it was requested under, and only the current generation is accepted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::engine::EngineEvent;
use super::metrics::{REFRESH_SKIPPED, REFRESH_STALE};
use super::remote::{RemoteControl, RemoteError};
use super::topology::{Topology, TopologyError};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("snapshot request failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("snapshot rejected: {0}")]
    Invalid(#[from] TopologyError),
}

/// Why a refresh was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Periodic poll. Yields to a refresh already in flight.
    Timer,
    /// Explicit request. Supersedes a refresh already in flight.
    OnDemand,
}

/// A finished snapshot request, as delivered to the engine.
#[derive(Debug)]
pub struct FetchedSnapshot {
    pub generation: u64,
    pub result: Result<Topology, RefreshError>,
    pub elapsed: Duration,
}

pub struct SnapshotSource<R> {
    remote: Arc<R>,
    events: mpsc::UnboundedSender<EngineEvent>,
    cancel: CancellationToken,
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl<R: RemoteControl> SnapshotSource<R> {
    pub(crate) fn new(
        remote: Arc<R>,
        events: mpsc::UnboundedSender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            events,
            cancel,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a snapshot request. Returns its generation, or `None` if skipped.
    pub fn request(&mut self, trigger: RefreshTrigger) -> Option<u64> {
        if let Some(handle) = self.in_flight.take() {
            match trigger {
                RefreshTrigger::Timer => {
                    debug!(generation = self.generation, "refresh in flight, tick skipped");
                    counter!(REFRESH_SKIPPED).increment(1);
                    self.in_flight = Some(handle);
                    return None;
                }
                RefreshTrigger::OnDemand => {
                    debug!(generation = self.generation, "superseding in-flight refresh");
                    handle.abort();
                }
            }
        }

        self.generation += 1;
        let generation = self.generation;
        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        self.in_flight = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = remote.zones() => result,
            };
            let result = result
                .map_err(RefreshError::from)
                .and_then(|reports| Topology::from_reports(reports).map_err(RefreshError::from));
            let _ = events.send(EngineEvent::SnapshotFetched(FetchedSnapshot {
                generation,
                result,
                elapsed: started.elapsed(),
            }));
        }));
        Some(generation)
    }

    /// Claim a finished request. `false` means the result is stale: drop it.
    pub fn accept(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding stale snapshot"
            );
            counter!(REFRESH_STALE).increment(1);
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Abort whatever is in flight. Later results are never accepted.
    pub fn stop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        self.generation += 1;
    }
}
