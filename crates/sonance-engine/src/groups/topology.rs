//! Speaker topology: devices, zones, and the remote wire model they come from.
//!
//! A `Topology` is always a whole snapshot. The remote service owns it; we
//! only ever replace it wholesale on refresh, never patch it in place.
//!
//! ## Invariants
//!
//! - Every device belongs to exactly one zone (checked in `from_reports`).
//! - Zone ids are keyed by the coordinator's device id on the remote side,
//!   so a freshly merged zone takes the id of the device that was joined.
//! - A zone with exactly one member is an "ungrouped" device.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque device identity (the speaker's UUID on the remote side).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

/// Opaque zone identity. Stable only while the zone exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport state of a speaker. Carried through the view, never reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Transitioning,
    #[default]
    Unknown,
}

impl PlaybackState {
    /// Lenient parse of the remote's playback strings.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "PLAYING" => Self::Playing,
            "PAUSED_PLAYBACK" | "PAUSED" => Self::Paused,
            "STOPPED" => Self::Stopped,
            "TRANSITIONING" => Self::Transitioning,
            _ => Self::Unknown,
        }
    }
}

/// A single speaker as seen in a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Human-readable room name. The remote API addresses devices by this.
    pub room_name: String,
    pub zone_id: ZoneId,
    pub is_coordinator: bool,
    pub volume: u8,
    pub muted: bool,
    pub playback: PlaybackState,
}

/// A group of speakers playing in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub coordinator: DeviceId,
    /// Ordered member list. Always contains the coordinator.
    pub members: Vec<DeviceId>,
}

impl Zone {
    pub fn is_ungrouped(&self) -> bool {
        self.members.len() == 1
    }
}

/// Full membership topology: a flat zone list plus a device index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub zones: Vec<Zone>,
    pub devices: BTreeMap<DeviceId, Device>,
}

/// A snapshot that breaks the one-zone-per-device invariant.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("device {device} appears in zone {first} and zone {second}")]
    DuplicateMember {
        device: DeviceId,
        first: ZoneId,
        second: ZoneId,
    },

    #[error("zone {zone} reports coordinator {coordinator} which is not a member")]
    CoordinatorNotMember { zone: ZoneId, coordinator: DeviceId },

    #[error("zone {0} appears twice in the snapshot")]
    DuplicateZone(ZoneId),

    #[error("zone {0} has no members")]
    EmptyZone(ZoneId),
}

impl Topology {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a topology from the remote `zones` payload.
    pub fn from_reports(reports: Vec<ZoneReport>) -> Result<Self, TopologyError> {
        let mut zones = Vec::with_capacity(reports.len());
        let mut devices: BTreeMap<DeviceId, Device> = BTreeMap::new();
        let mut seen_zones = HashSet::new();

        for report in reports {
            let zone_id = ZoneId(report.uuid);
            if !seen_zones.insert(zone_id.clone()) {
                return Err(TopologyError::DuplicateZone(zone_id));
            }
            if report.members.is_empty() {
                return Err(TopologyError::EmptyZone(zone_id));
            }
            let coordinator = DeviceId(report.coordinator.uuid);
            if !report.members.iter().any(|m| m.uuid == coordinator.0) {
                return Err(TopologyError::CoordinatorNotMember {
                    zone: zone_id,
                    coordinator,
                });
            }

            let mut members = Vec::with_capacity(report.members.len());
            for member in report.members {
                let id = DeviceId(member.uuid);
                if let Some(existing) = devices.get(&id) {
                    return Err(TopologyError::DuplicateMember {
                        device: id,
                        first: existing.zone_id.clone(),
                        second: zone_id,
                    });
                }
                devices.insert(
                    id.clone(),
                    Device {
                        id: id.clone(),
                        room_name: member.room_name,
                        zone_id: zone_id.clone(),
                        is_coordinator: id == coordinator,
                        volume: member.state.volume,
                        muted: member.state.mute,
                        playback: PlaybackState::from_remote(&member.state.playback_state),
                    },
                );
                members.push(id);
            }

            zones.push(Zone {
                id: zone_id,
                coordinator,
                members,
            });
        }

        Ok(Self { zones, devices })
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| &z.id == id)
    }

    /// The zone currently containing `device`.
    pub fn zone_of(&self, device: &DeviceId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.members.contains(device))
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn room_name(&self, id: &DeviceId) -> Option<&str> {
        self.devices.get(id).map(|d| d.room_name.as_str())
    }

    pub fn is_ungrouped(&self, device: &DeviceId) -> bool {
        self.zone_of(device).is_some_and(Zone::is_ungrouped)
    }
}

// -- Wire model (remote `zones` payload) --

/// One zone as reported by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneReport {
    pub uuid: String,
    pub coordinator: MemberReport,
    pub members: Vec<MemberReport>,
}

/// One zone member as reported by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberReport {
    pub uuid: String,
    pub room_name: String,
    #[serde(default)]
    pub state: MemberState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberState {
    #[serde(default)]
    pub volume: u8,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub playback_state: String,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Member report where uuid and room name are the same string.
    pub fn member(name: &str) -> MemberReport {
        MemberReport {
            uuid: name.to_string(),
            room_name: name.to_string(),
            state: MemberState {
                volume: 20,
                mute: false,
                playback_state: "STOPPED".into(),
            },
        }
    }

    /// Zone keyed by its first member, which is also the coordinator.
    pub fn zone(members: &[&str]) -> ZoneReport {
        ZoneReport {
            uuid: members[0].to_string(),
            coordinator: member(members[0]),
            members: members.iter().map(|m| member(m)).collect(),
        }
    }

    pub fn topology(zones: &[&[&str]]) -> Topology {
        Topology::from_reports(zones.iter().map(|z| zone(z)).collect()).unwrap()
    }
}
