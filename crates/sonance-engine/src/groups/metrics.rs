//! Prometheus metric names for the group engine.
//!
//! Call sites use these constants rather than raw strings. The recorder is
//! installed by the binary; without one every macro call is a no-op.

// ---------------------------------------------------------------------------
// Snapshot refresh
// ---------------------------------------------------------------------------

/// Snapshots accepted into the engine (counter).
pub const REFRESH_APPLIED: &str = "sonance_refresh_applied_total";
/// Snapshot requests that failed or returned an invalid topology (counter).
pub const REFRESH_FAILURES: &str = "sonance_refresh_failures_total";
/// Snapshot results discarded because a newer request superseded them (counter).
pub const REFRESH_STALE: &str = "sonance_refresh_stale_discarded_total";
/// Timer ticks skipped because a refresh was already in flight (counter).
pub const REFRESH_SKIPPED: &str = "sonance_refresh_ticks_skipped_total";
/// Round-trip time of the snapshot call in milliseconds (histogram).
pub const REFRESH_RTT_MS: &str = "sonance_refresh_rtt_milliseconds";

// ---------------------------------------------------------------------------
// Membership moves
// ---------------------------------------------------------------------------

/// Moves dispatched to the remote, labelled by `intent` (counter).
pub const MOVES_DISPATCHED: &str = "sonance_moves_dispatched_total";
/// Drops classified as no-ops, labelled by `reason` (counter).
pub const MOVES_IGNORED: &str = "sonance_moves_ignored_total";
/// Moves rolled back after the remote call failed (counter).
pub const MOVES_ROLLED_BACK: &str = "sonance_moves_rolled_back_total";
/// Failed calls whose pending entry had already been replaced (counter).
pub const MOVES_FAILED_SUPERSEDED: &str = "sonance_moves_failed_superseded_total";
/// Pending moves retired because a snapshot confirmed them (counter).
pub const MOVES_CONVERGED: &str = "sonance_moves_converged_total";
/// Pending moves dropped by the expiry policy (counter).
pub const MOVES_EXPIRED: &str = "sonance_moves_expired_total";
/// Current number of unconfirmed moves (gauge).
pub const MOVES_PENDING: &str = "sonance_moves_pending";
