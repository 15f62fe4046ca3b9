//! Reconciled view: authoritative topology with pending moves overlaid.
//!
//! Pure function of its two inputs. Nothing here is ever written back into
//! the authoritative snapshot; the next refresh is always the source of truth
//! for the final shape of a zone.
//!
//! Zones are keyed by their coordinator's device id, the same way the
//! speakers report them. When a coordinator moves out, the zone it leaves
//! behind is re-keyed to the member that takes over, so any drop classified
//! against the view names a zone id a later snapshot can actually contain.

use serde::Serialize;

use super::pending_store::PendingMutationStore;
use super::topology::{DeviceId, Topology, Zone, ZoneId};

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciledView {
    pub topology: Topology,
    /// Devices shown under their intended zone rather than their authoritative one.
    pub pending: Vec<DeviceId>,
    /// Zones in the view with no authoritative counterpart yet.
    pub provisional_zones: Vec<ZoneId>,
}

impl ReconciledView {
    pub fn is_pending(&self, device: &DeviceId) -> bool {
        self.pending.contains(device)
    }
}

/// Overlay every pending move onto a working copy of `authoritative`.
///
/// Moves are applied oldest first so that when two moves touch the same
/// zone, both show up. Entries for devices missing from the snapshot are
/// skipped (the device is not rendered at all).
pub fn reconcile(authoritative: &Topology, pending: &PendingMutationStore) -> ReconciledView {
    let mut zones = authoritative.zones.clone();
    let mut applied = Vec::new();

    for mutation in pending.in_issue_order() {
        let device = &mutation.device;
        if !authoritative.devices.contains_key(device) {
            continue;
        }
        detach(&mut zones, device);

        match &mutation.target {
            None => push_singleton(&mut zones, device),
            Some(target) => match zones.iter_mut().find(|z| &z.id == target) {
                Some(zone) => zone.members.push(device.clone()),
                None => zones.push(Zone {
                    id: target.clone(),
                    coordinator: device.clone(),
                    members: vec![device.clone()],
                }),
            },
        }
        applied.push(device.clone());
    }

    let mut devices = authoritative.devices.clone();
    for zone in &zones {
        for member in &zone.members {
            if let Some(d) = devices.get_mut(member) {
                d.zone_id = zone.id.clone();
                d.is_coordinator = *member == zone.coordinator;
            }
        }
    }

    let provisional_zones = zones
        .iter()
        .filter(|z| authoritative.zone(&z.id).is_none())
        .map(|z| z.id.clone())
        .collect();

    ReconciledView {
        topology: Topology { zones, devices },
        pending: applied,
        provisional_zones,
    }
}

/// The zone `device` coordinates in `view` and the id it will carry once
/// `device` moves out, or `None` if nobody would be left behind.
pub fn coordinator_handover(view: &Topology, device: &DeviceId) -> Option<(ZoneId, ZoneId)> {
    let zone = view.zone_of(device)?;
    if zone.coordinator != *device {
        return None;
    }
    let successor = zone.members.iter().find(|m| *m != device)?;
    Some((zone.id.clone(), ZoneId::new(successor.as_str())))
}

/// Remove `device` from whichever working zone holds it.
///
/// A zone left with no members is dropped. If the device was the coordinator,
/// the next remaining member takes over and the zone is re-keyed to it.
fn detach(zones: &mut Vec<Zone>, device: &DeviceId) {
    let Some(idx) = zones.iter().position(|z| z.members.contains(device)) else {
        return;
    };
    let zone = &mut zones[idx];
    zone.members.retain(|m| m != device);
    if zone.members.is_empty() {
        zones.remove(idx);
    } else if zone.coordinator == *device {
        zone.coordinator = zone.members[0].clone();
        zone.id = ZoneId::new(zone.coordinator.as_str());
    }
}

/// Give `device` a zone of its own, keyed by its id.
fn push_singleton(zones: &mut Vec<Zone>, device: &DeviceId) {
    let id = ZoneId::new(device.as_str());
    // Only a zone created for a stale target can hold this id under another
    // coordinator. Key it by its own coordinator instead.
    if let Some(taken) = zones.iter_mut().find(|z| z.id == id) {
        taken.id = ZoneId::new(taken.coordinator.as_str());
    }
    zones.push(Zone {
        id,
        coordinator: device.clone(),
        members: vec![device.clone()],
    });
}
