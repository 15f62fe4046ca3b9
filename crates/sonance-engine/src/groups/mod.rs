//! Speaker group membership with optimistic, poll-reconciled moves.
//!
//! Leaf-first: `topology` (data model) → `pending_store` → `reconcile` /
//! `convergence` → `gesture` → `dispatcher` → `snapshot_source` → `engine`.

pub mod convergence;
pub mod dispatcher;
pub mod engine;
pub mod gesture;
pub mod metrics;
pub mod pending_store;
pub mod reconcile;
pub mod remote;
pub mod snapshot_source;
pub mod topology;

pub use dispatcher::{FailedAction, Notification};
pub use engine::{spawn_engine, DebugSnapshot, EngineError, EngineHandle, MoveOutcome};
pub use gesture::{Destination, DragGesture, DropTarget, MoveIntent, NoOpReason};
pub use reconcile::ReconciledView;
pub use remote::{HttpRemote, RemoteControl, RemoteError};
pub use topology::{Device, DeviceId, Topology, Zone, ZoneId};
