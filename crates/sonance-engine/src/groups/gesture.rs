//! Drag gestures and their classification into membership intents.
//!
//! A drag is `Idle → Dragging → dropped on {ungrouped area, device, zone,
//! nothing}`. The drop is classified against the *reconciled* view, so a
//! device already shown under a pending destination is treated as if it
//! were there.
//!
//! Rules, in priority order:
//! 1. Ungrouped area, source zone has more than one member → `Leave`.
//! 2. Another device in a different zone → `Merge` into that device's zone.
//! 3. A different zone → `Join`, addressed by the zone coordinator's room.
//! 4. Everything else → `NoOp`. Nothing is dispatched for a no-op.

use serde::{Deserialize, Serialize};

use super::topology::{DeviceId, Topology, ZoneId};

/// Where a dragged device was released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DropTarget {
    /// The "ungrouped" drop area.
    Ungrouped,
    Device(DeviceId),
    Zone(ZoneId),
    /// Released outside any target.
    Nothing,
}

/// Destination argument of an imperative move request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Destination {
    Ungrouped,
    Zone(ZoneId),
    Device(DeviceId),
}

impl From<Destination> for DropTarget {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::Ungrouped => Self::Ungrouped,
            Destination::Zone(z) => Self::Zone(z),
            Destination::Device(d) => Self::Device(d),
        }
    }
}

/// Why a drop produced no mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    UnknownDevice,
    AlreadyUngrouped,
    DroppedOnSelf,
    SameZone,
    UnknownTarget,
    NoTarget,
}

impl NoOpReason {
    /// Stable snake_case name, used as a metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownDevice => "unknown_device",
            Self::AlreadyUngrouped => "already_ungrouped",
            Self::DroppedOnSelf => "dropped_on_self",
            Self::SameZone => "same_zone",
            Self::UnknownTarget => "unknown_target",
            Self::NoTarget => "no_target",
        }
    }
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDevice => write!(f, "unknown device"),
            Self::AlreadyUngrouped => write!(f, "already ungrouped"),
            Self::DroppedOnSelf => write!(f, "dropped on itself"),
            Self::SameZone => write!(f, "already in that zone"),
            Self::UnknownTarget => write!(f, "unknown drop target"),
            Self::NoTarget => write!(f, "dropped outside any target"),
        }
    }
}

/// A classified drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum MoveIntent {
    /// Take the device out of its group.
    Leave { device: DeviceId, room: String },
    /// Join an existing zone (dropped on the zone itself).
    Join {
        device: DeviceId,
        room: String,
        zone: ZoneId,
        target_room: String,
    },
    /// Dropped on another device: join that device's zone.
    Merge {
        device: DeviceId,
        room: String,
        target_device: DeviceId,
        target_room: String,
        zone: ZoneId,
    },
    NoOp { reason: NoOpReason },
}

impl MoveIntent {
    pub fn noop(reason: NoOpReason) -> Self {
        Self::NoOp { reason }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp { .. })
    }

    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Leave { device, .. } | Self::Join { device, .. } | Self::Merge { device, .. } => {
                Some(device)
            }
            Self::NoOp { .. } => None,
        }
    }

    /// Destination recorded in the pending store: `Some(None)` means ungrouped.
    pub fn pending_target(&self) -> Option<Option<ZoneId>> {
        match self {
            Self::Leave { .. } => Some(None),
            Self::Join { zone, .. } | Self::Merge { zone, .. } => Some(Some(zone.clone())),
            Self::NoOp { .. } => None,
        }
    }

    /// Short name for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Leave { .. } => "leave",
            Self::Join { .. } => "join",
            Self::Merge { .. } => "merge",
            Self::NoOp { .. } => "noop",
        }
    }
}

/// Classify a drop of `device` onto `target` against the reconciled `view`.
pub fn classify(view: &Topology, device: &DeviceId, target: &DropTarget) -> MoveIntent {
    let Some(source) = view.device(device) else {
        return MoveIntent::noop(NoOpReason::UnknownDevice);
    };

    match target {
        DropTarget::Ungrouped => {
            let members = view.zone(&source.zone_id).map_or(0, |z| z.members.len());
            if members > 1 {
                MoveIntent::Leave {
                    device: device.clone(),
                    room: source.room_name.clone(),
                }
            } else {
                MoveIntent::noop(NoOpReason::AlreadyUngrouped)
            }
        }
        DropTarget::Device(other) => {
            if other == device {
                return MoveIntent::noop(NoOpReason::DroppedOnSelf);
            }
            let Some(target_device) = view.device(other) else {
                return MoveIntent::noop(NoOpReason::UnknownTarget);
            };
            if target_device.zone_id == source.zone_id {
                return MoveIntent::noop(NoOpReason::SameZone);
            }
            MoveIntent::Merge {
                device: device.clone(),
                room: source.room_name.clone(),
                target_device: other.clone(),
                target_room: target_device.room_name.clone(),
                zone: target_device.zone_id.clone(),
            }
        }
        DropTarget::Zone(zone_id) => {
            let Some(zone) = view.zone(zone_id) else {
                return MoveIntent::noop(NoOpReason::UnknownTarget);
            };
            if source.zone_id == *zone_id {
                return MoveIntent::noop(NoOpReason::SameZone);
            }
            let Some(target_room) = view.room_name(&zone.coordinator) else {
                return MoveIntent::noop(NoOpReason::UnknownTarget);
            };
            MoveIntent::Join {
                device: device.clone(),
                room: source.room_name.clone(),
                zone: zone_id.clone(),
                target_room: target_room.to_string(),
            }
        }
        DropTarget::Nothing => MoveIntent::noop(NoOpReason::NoTarget),
    }
}

/// Per-gesture drag state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        device: DeviceId,
        /// Last target the pointer was over, for highlight only.
        hover: DropTarget,
    },
}

/// A finished drag, ready to classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDrag {
    pub device: DeviceId,
    pub target: DropTarget,
}

/// Transient state machine for one pointer's drag.
#[derive(Debug, Default)]
pub struct DragGesture {
    state: DragState,
}

impl DragGesture {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Begin dragging `device`. A drag already in progress is abandoned.
    pub fn start(&mut self, device: DeviceId) {
        self.state = DragState::Dragging {
            device,
            hover: DropTarget::Nothing,
        };
    }

    /// Pointer moved over `target`. Returns `false` when not dragging.
    pub fn hover(&mut self, target: DropTarget) -> bool {
        match &mut self.state {
            DragState::Dragging { hover, .. } => {
                *hover = target;
                true
            }
            DragState::Idle => false,
        }
    }

    /// Release over `target`. Returns to idle.
    pub fn drop_on(&mut self, target: DropTarget) -> Option<CompletedDrag> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging { device, .. } => Some(CompletedDrag { device, target }),
            DragState::Idle => None,
        }
    }

    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }
}
