//! Pending mutation store: membership moves the user has started but the
//! remote topology does not reflect yet.
//!
//! ## Design Decisions
//!
//! - **Keyed by device**: at most one entry per device. A newer move for the
//!   same device replaces the older one outright.
//!
//! - **Sequence tokens**: every insert gets a store-wide monotonic `seq`.
//!   Whoever removes an entry on a failure path must present the `seq` it
//!   inserted, so a late failure can never delete a newer entry.
//!
//! - **Re-keyed targets**: when a zone's coordinator moves out, the speakers
//!   report what is left of the zone under the next member's id. Entries
//!   already aimed at the old id remember the new one as an alias.
//!
//! - **No timers**: entries live until convergence, rollback, or supersession.
//!   `expire_older_than()` exists for an opt-in policy and is only called by
//!   the engine when configured.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::topology::{DeviceId, ZoneId};

/// A move the user initiated that has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub device: DeviceId,
    /// Destination zone, or `None` for "move to ungrouped".
    pub target: Option<ZoneId>,
    /// Ids `target` was re-keyed to after this entry was issued.
    pub aliases: Vec<ZoneId>,
    /// Identifies this exact entry. Strictly increasing across the store.
    pub seq: u64,
    pub issued_at: Instant,
}

impl PendingMutation {
    /// Is `zone` this entry's destination, under its issued id or an alias?
    pub fn targets(&self, zone: &ZoneId) -> bool {
        self.target.as_ref() == Some(zone) || self.aliases.contains(zone)
    }
}

/// Exclusive owner of pending mutation lifetimes.
#[derive(Debug, Default)]
pub struct PendingMutationStore {
    entries: HashMap<DeviceId, PendingMutation>,
    next_seq: u64,
}

impl PendingMutationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pending move for `device`. Returns the new `seq`.
    pub fn insert(&mut self, device: DeviceId, target: Option<ZoneId>, now: Instant) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.insert(
            device.clone(),
            PendingMutation {
                device,
                target,
                aliases: Vec::new(),
                seq,
                issued_at: now,
            },
        );
        seq
    }

    /// The zone keyed `from` is about to be keyed `to`. Every entry aimed at
    /// `from`, directly or through an earlier re-key, also accepts `to`.
    pub fn follow_rekey(&mut self, from: &ZoneId, to: &ZoneId) {
        for entry in self.entries.values_mut() {
            if entry.targets(from) && !entry.targets(to) {
                entry.aliases.push(to.clone());
            }
        }
    }

    pub fn get(&self, device: &DeviceId) -> Option<&PendingMutation> {
        self.entries.get(device)
    }

    /// Remove the entry for `device` only if it is still the one with `seq`.
    ///
    /// Returns the removed entry, or `None` if it was superseded or retired.
    pub fn remove_if_current(&mut self, device: &DeviceId, seq: u64) -> Option<PendingMutation> {
        match self.entries.get(device) {
            Some(entry) if entry.seq == seq => self.entries.remove(device),
            _ => None,
        }
    }

    /// Unconditional removal (convergence path).
    pub fn remove(&mut self, device: &DeviceId) -> Option<PendingMutation> {
        self.entries.remove(device)
    }

    /// Entries in issue order (oldest first).
    pub fn in_issue_order(&self) -> Vec<&PendingMutation> {
        let mut entries: Vec<&PendingMutation> = self.entries.values().collect();
        entries.sort_by_key(|m| m.seq);
        entries
    }

    /// Remove and return every entry older than `ttl` at `now`, oldest first.
    pub fn expire_older_than(&mut self, ttl: Duration, now: Instant) -> Vec<PendingMutation> {
        let stale: Vec<DeviceId> = self
            .entries
            .values()
            .filter(|m| now.saturating_duration_since(m.issued_at) > ttl)
            .map(|m| m.device.clone())
            .collect();
        let mut expired: Vec<PendingMutation> = stale
            .iter()
            .filter_map(|device| self.entries.remove(device))
            .collect();
        expired.sort_by_key(|m| m.seq);
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
