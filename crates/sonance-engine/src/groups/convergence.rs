//! Convergence detection: retire pending moves a fresh snapshot confirms.
//!
//! Success of the remote call is never taken as confirmation. The remote's
//! own topology can lag its acknowledgement, so only the snapshot counts.

use super::pending_store::{PendingMutation, PendingMutationStore};
use super::topology::Topology;

/// Does `snapshot` reflect the destination of `mutation`?
///
/// A join converges once the device sits in the target zone, under the id it
/// was issued with or one it was re-keyed to. A leave converges once the
/// device is alone, or once it coordinates a zone whose other members are
/// all pending moves into that very zone: they followed it after it left.
/// A device missing from the snapshot has not converged.
pub fn is_converged(
    mutation: &PendingMutation,
    snapshot: &Topology,
    pending: &PendingMutationStore,
) -> bool {
    let Some(zone) = snapshot.zone_of(&mutation.device) else {
        return false;
    };
    match &mutation.target {
        Some(_) => mutation.targets(&zone.id),
        None => {
            zone.members.len() == 1
                || (zone.coordinator == mutation.device
                    && zone
                        .members
                        .iter()
                        .filter(|m| **m != mutation.device)
                        .all(|m| pending.get(m).is_some_and(|p| p.targets(&zone.id))))
        }
    }
}

/// Remove every converged entry from `store`. Returns them oldest first.
///
/// Every entry is judged against the store as it was before this refresh,
/// so entries that confirm each other retire together.
/// Must run on each accepted refresh before the pending set is reconciled.
pub fn retire_converged(
    store: &mut PendingMutationStore,
    snapshot: &Topology,
) -> Vec<PendingMutation> {
    let current: &PendingMutationStore = store;
    let converged: Vec<_> = current
        .in_issue_order()
        .into_iter()
        .filter(|m| is_converged(m, snapshot, current))
        .map(|m| m.device.clone())
        .collect();
    converged
        .iter()
        .filter_map(|device| store.remove(device))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::groups::dispatcher::record;
    use crate::groups::gesture::{classify, DropTarget, MoveIntent};
    use crate::groups::reconcile::reconcile;
    use crate::groups::topology::fixtures::topology;
    use crate::groups::topology::{DeviceId, ZoneId};

    fn dev(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    /// Classify a drop against the current view and record it, as the engine does.
    fn drop_device(
        store: &mut PendingMutationStore,
        authoritative: &Topology,
        device: &str,
        target: DropTarget,
    ) -> MoveIntent {
        let view = reconcile(authoritative, store);
        let intent = classify(&view.topology, &dev(device), &target);
        record(store, &view.topology, &intent, Instant::now()).unwrap();
        intent
    }

    fn assert_settled(store: &mut PendingMutationStore, snapshot: &Topology) {
        retire_converged(store, snapshot);
        assert!(store.is_empty(), "still pending: {:?}", store.in_issue_order());
        assert_eq!(reconcile(snapshot, store).topology, *snapshot);
    }

    #[test]
    fn test_join_converges_when_zone_id_matches() {
        let mut store = PendingMutationStore::new();
        store.insert(dev("B"), Some(ZoneId::new("A")), Instant::now());

        // Still the old shape: nothing retired.
        let stale = topology(&[&["A"], &["B"]]);
        assert!(retire_converged(&mut store, &stale).is_empty());
        assert_eq!(store.len(), 1);

        let fresh = topology(&[&["A", "B"]]);
        let retired = retire_converged(&mut store, &fresh);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].device, dev("B"));
        assert!(store.is_empty());
        assert_eq!(reconcile(&fresh, &store).topology, fresh);
    }

    #[test]
    fn test_leave_converges_on_singleton() {
        let mut store = PendingMutationStore::new();
        store.insert(dev("C"), None, Instant::now());

        assert!(retire_converged(&mut store, &topology(&[&["A", "C"]])).is_empty());
        let retired = retire_converged(&mut store, &topology(&[&["A"], &["C"]]));
        assert_eq!(retired.len(), 1);
    }

    #[test]
    fn test_leave_converges_regardless_of_new_zone_id() {
        let mut store = PendingMutationStore::new();
        store.insert(dev("A"), None, Instant::now());
        // Coordinator left: remote re-keys its singleton under some other id.
        let snapshot = topology(&[&["C", "D"], &["A"]]);
        assert_eq!(retire_converged(&mut store, &snapshot).len(), 1);
    }

    #[test]
    fn test_missing_device_not_converged() {
        let mut store = PendingMutationStore::new();
        store.insert(dev("B"), None, Instant::now());
        assert!(retire_converged(&mut store, &topology(&[&["A"]])).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_only_converged_entries_retired() {
        let mut store = PendingMutationStore::new();
        let now = Instant::now();
        store.insert(dev("B"), Some(ZoneId::new("A")), now);
        store.insert(dev("D"), Some(ZoneId::new("A")), now);

        let snapshot = topology(&[&["A", "B"], &["D"]]);
        let retired = retire_converged(&mut store, &snapshot);
        assert_eq!(retired.len(), 1);
        assert!(store.get(&dev("D")).is_some());

        // Non-converged entries survive any number of refreshes.
        for _ in 0..5 {
            retire_converged(&mut store, &snapshot);
        }
        assert!(store.get(&dev("D")).is_some());
    }

    #[test]
    fn test_drop_on_zone_left_by_its_coordinator_converges() {
        let auth = topology(&[&["A", "C", "D"], &["B"]]);
        let mut store = PendingMutationStore::new();
        drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);

        let intent = drop_device(&mut store, &auth, "B", DropTarget::Zone(ZoneId::new("C")));
        let MoveIntent::Join { zone, target_room, .. } = &intent else {
            panic!("expected join, got {intent:?}");
        };
        assert_eq!(zone, &ZoneId::new("C"));
        assert_eq!(target_room, "C");

        // Nothing lands until the speakers report it.
        assert!(retire_converged(&mut store, &auth).is_empty());

        assert_settled(&mut store, &topology(&[&["A"], &["C", "D", "B"]]));
    }

    #[test]
    fn test_drop_on_departed_coordinator_zone_converges() {
        let auth = topology(&[&["A", "C", "D"], &["B"]]);
        let mut store = PendingMutationStore::new();
        drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);

        let intent = drop_device(&mut store, &auth, "B", DropTarget::Zone(ZoneId::new("A")));
        assert_eq!(intent.pending_target(), Some(Some(ZoneId::new("A"))));

        assert_settled(&mut store, &topology(&[&["A", "B"], &["C", "D"]]));
    }

    #[test]
    fn test_drop_on_departed_coordinator_device_converges() {
        let auth = topology(&[&["A", "C"], &["B"]]);
        let mut store = PendingMutationStore::new();
        drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);

        let intent = drop_device(&mut store, &auth, "B", DropTarget::Device(dev("A")));
        assert_eq!(intent.pending_target(), Some(Some(ZoneId::new("A"))));

        // Only the leave has landed: A retires, B is still shown with A.
        let partial = topology(&[&["A"], &["C"], &["B"]]);
        let retired = retire_converged(&mut store, &partial);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].device, dev("A"));
        let view = reconcile(&partial, &store);
        assert_eq!(view.topology.zone(&ZoneId::new("A")).unwrap().members, vec![dev("A"), dev("B")]);

        assert_settled(&mut store, &topology(&[&["C"], &["A", "B"]]));
    }

    #[test]
    fn test_leave_with_followers_converges_in_one_refresh() {
        let auth = topology(&[&["A", "C"], &["B"]]);
        let mut store = PendingMutationStore::new();
        drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);
        drop_device(&mut store, &auth, "B", DropTarget::Device(dev("A")));

        let retired = retire_converged(&mut store, &topology(&[&["C"], &["A", "B"]]));
        assert_eq!(retired.len(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_leave_not_converged_while_old_members_remain() {
        let auth = topology(&[&["A", "C", "D"], &["B"]]);
        let mut store = PendingMutationStore::new();
        drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);
        drop_device(&mut store, &auth, "B", DropTarget::Device(dev("A")));

        // B landed in A's zone before A left it.
        let snapshot = topology(&[&["A", "C", "D", "B"]]);
        let retired = retire_converged(&mut store, &snapshot);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].device, dev("B"));
        assert!(store.get(&dev("A")).is_some());
    }

    #[test]
    fn test_join_then_coordinator_leaves_converges_in_either_order() {
        let auth = topology(&[&["A", "C", "D"], &["B"]]);
        let issue = || {
            let mut store = PendingMutationStore::new();
            drop_device(&mut store, &auth, "B", DropTarget::Zone(ZoneId::new("A")));
            drop_device(&mut store, &auth, "A", DropTarget::Ungrouped);
            store
        };

        // Join handled first: B stays behind with C and D.
        let mut store = issue();
        assert_settled(&mut store, &topology(&[&["A"], &["C", "D", "B"]]));

        // Leave handled first: B follows A's room.
        let mut store = issue();
        assert_settled(&mut store, &topology(&[&["A", "B"], &["C", "D"]]));
    }
}
