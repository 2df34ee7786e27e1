// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Persistent topology model.
//!
//! Discovery produces transient [`DeviceSnapshot`]s; this module turns them
//! into durable [`DeviceRecord`]s the driver can hold on to across
//! replugs. Records live in an arena indexed by [`DeviceId`] handles that
//! carry a generation counter, so a handle kept across a device's removal
//! dereferences to `None` instead of to an unrelated successor.
//!
//! A device is never destroyed synchronously with loss detection. Loss
//! marks it unplugged and queues a lost notification; the record is freed
//! only after the driver has been notified and any group membership is
//! gone.

use std::fmt::{self, Display};

use crate::address::{Address, Guid};
use crate::dsc::DscCaps;
use crate::edid::Edid;
use crate::events::PendingFlags;
use crate::link::{LinkConfiguration, LinkRate};
use crate::quirks::Quirks;
use crate::sideband::PeerType;

/// Generation-checked handle to a [`DeviceRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId {
    index: u32,
    generation: u32,
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}.{}", self.index, self.generation)
    }
}

/// Downstream port bitmasks from a LINK_ADDRESS reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortMap {
    pub valid: u16,
    pub input: u16,
    pub internal: u16,
    /// Ports a downstream device was reported behind.
    pub attached: u16,
}

impl PortMap {
    pub fn is_valid(&self, port: u8) -> bool {
        self.valid & (1 << port) != 0
    }

    /// A downstream device was reported behind `port`.
    pub fn has_attached(&self, port: u8) -> bool {
        self.attached & (1 << port) != 0
    }

    /// Output ports that can have downstream devices behind them.
    pub fn downstream(&self) -> impl Iterator<Item = u8> + '_ {
        (0..16).filter(|p| self.valid & (1 << p) != 0 && self.input & (1 << p) == 0)
    }
}

/// Transient per-node result of the discovery protocol. Consumed once by
/// [`Topology::reconcile`].
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    pub address: Address,
    pub peer_type: PeerType,
    /// The node relays sideband messages, i.e. it is a branch.
    pub branch: bool,
    pub legacy: bool,
    pub message_capable: bool,
    pub dpcd_revision: (u8, u8),
    pub guid: Guid,
    pub port_map: PortMap,
    pub video_sink: bool,
    pub num_sdp_streams: u8,
    pub num_sdp_stream_sinks: u8,
    /// Converter dongle TMDS limit, 0 when not a TMDS converter.
    pub max_tmds_clock_khz: u32,
    /// The device's own DPCD link caps, when the probe could read them.
    /// Used to infer the bandwidth of its last hop.
    pub max_link: Option<(u8, LinkRate)>,
}

/// Inferred bandwidth state of the hop feeding a device, used by
/// per-device admission checks.
#[derive(Clone, Copy, Debug)]
pub struct HopBandwidth {
    /// Link configuration of the device's last hop.
    pub link: LinkConfiguration,
    /// Total PBN the hop offers.
    pub total_pbn: u32,
}

/// Compound-query scratch state, valid only inside a query session.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryScratch {
    /// Timeslots consumed on this device's hop so far in the session.
    pub slots: u8,
    /// Attach indices that already charged this hop.
    pub attach_mask: u64,
}

/// One durable topology node.
#[derive(Clone, Debug)]
pub struct DeviceRecord {
    pub address: Address,
    pub guid: Guid,
    pub peer_type: PeerType,
    pub branch: bool,
    pub legacy: bool,
    pub message_capable: bool,
    pub dpcd_revision: (u8, u8),
    pub port_map: PortMap,
    pub video_sink: bool,
    pub num_sdp_streams: u8,
    pub num_sdp_stream_sinks: u8,
    pub max_tmds_clock_khz: u32,
    pub max_link: Option<(u8, LinkRate)>,

    pub parent: Option<DeviceId>,
    pub children: Vec<DeviceId>,

    pub plugged: bool,
    /// Lost while it still had an active stream. Kept alive until the
    /// driver tears the stream down.
    pub zombie: bool,
    pub pending: PendingFlags,

    pub edid: Option<Edid>,
    pub quirks: Quirks,

    pub dsc_caps: DscCaps,
    /// Where this device's stream gets decompressed, when not at the
    /// device itself.
    pub dsc_decompression_device: Option<DeviceId>,
    /// FEC capability of the path feeding this device, taken from the
    /// root link at discovery time.
    pub fec_path_capable: bool,

    pub hop: Option<HopBandwidth>,
    pub query: QueryScratch,

    /// Stream group currently driving this device, if any.
    pub group: Option<u8>,
}

impl DeviceRecord {
    fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        DeviceRecord {
            address: snapshot.address,
            guid: snapshot.guid,
            peer_type: snapshot.peer_type,
            branch: snapshot.branch,
            legacy: snapshot.legacy,
            message_capable: snapshot.message_capable,
            dpcd_revision: snapshot.dpcd_revision,
            port_map: snapshot.port_map,
            video_sink: snapshot.video_sink,
            num_sdp_streams: snapshot.num_sdp_streams,
            num_sdp_stream_sinks: snapshot.num_sdp_stream_sinks,
            max_tmds_clock_khz: snapshot.max_tmds_clock_khz,
            max_link: snapshot.max_link,
            parent: None,
            children: Vec::new(),
            plugged: true,
            zombie: false,
            pending: PendingFlags::NEW,
            edid: None,
            quirks: Quirks::default(),
            dsc_caps: DscCaps::default(),
            dsc_decompression_device: None,
            fec_path_capable: false,
            hop: None,
            query: QueryScratch::default(),
            group: None,
        }
    }

    pub fn has_active_stream(&self) -> bool {
        self.group.is_some()
    }
}

/// Outcome of feeding one discovery snapshot into the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// A new record was created. Any previous occupant of the address was
    /// marked lost first.
    Created(DeviceId),
    /// An equivalent plugged record already existed and was kept.
    Refreshed(DeviceId),
}

impl Reconciliation {
    pub fn id(&self) -> DeviceId {
        match self {
            Self::Created(id) | Self::Refreshed(id) => *id,
        }
    }
}

/// Arena of device records with generation-checked handles.
#[derive(Default)]
pub struct Topology {
    slots: Vec<Option<DeviceRecord>>,
    generations: Vec<u32>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: DeviceRecord) -> DeviceId {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(record);
                return DeviceId {
                    index: index as u32,
                    generation: self.generations[index],
                };
            }
        }
        self.slots.push(Some(record));
        self.generations.push(0);
        DeviceId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return None;
        }
        self.slots[index].as_ref()
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return None;
        }
        self.slots[index].as_mut()
    }

    /// Frees a record and invalidates all outstanding handles to it.
    /// Unlinks it from its parent's child list.
    pub fn remove(&mut self, id: DeviceId) -> Option<DeviceRecord> {
        let record = {
            let index = id.index as usize;
            if self.generations.get(index) != Some(&id.generation) {
                return None;
            }
            self.generations[index] += 1;
            self.slots[index].take()?
        };

        if let Some(parent) = record.parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
        Some(record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &DeviceRecord)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|record| {
                (
                    DeviceId {
                        index: index as u32,
                        generation: self.generations[index],
                    },
                    record,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the device at `address`, preferring a plugged record over an
    /// unplugged leftover at the same address.
    pub fn find_by_address(&self, address: &Address) -> Option<DeviceId> {
        let mut unplugged = None;
        for (id, record) in self.iter() {
            if record.address != *address {
                continue;
            }
            if record.plugged {
                return Some(id);
            }
            unplugged.get_or_insert(id);
        }
        unplugged
    }

    pub fn find_plugged_by_address(&self, address: &Address) -> Option<DeviceId> {
        self.iter()
            .find(|(_, r)| r.plugged && r.address == *address)
            .map(|(id, _)| id)
    }

    pub fn find_by_guid(&self, guid: &Guid) -> Option<DeviceId> {
        if guid.is_zero() {
            return None;
        }
        self.iter()
            .find(|(_, r)| r.plugged && r.guid == *guid)
            .map(|(id, _)| id)
    }

    /// Devices on the path from the root to `id`, root first, `id` last.
    pub fn path_to(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            path.push(current);
            cursor = self.get(current).and_then(|r| r.parent);
        }
        path.reverse();
        path
    }

    /// Resolves the plugged parent branch of `address`, if present.
    pub fn resolve_parent(&self, address: &Address) -> Option<DeviceId> {
        if address.is_root() {
            return None;
        }
        self.find_plugged_by_address(&address.parent())
    }

    /// Marks a device unplugged and queues its loss notification. Devices
    /// with an active stream become zombies instead of plain lost so the
    /// driver can tear the stream down first.
    pub fn mark_lost(&mut self, id: DeviceId) {
        let zombie = match self.get(id) {
            Some(record) => record.has_active_stream(),
            None => return,
        };
        // Children go first so loss notifications surface leaf-to-root.
        let children = self.get(id).map(|r| r.children.clone()).unwrap_or_default();
        for child in children {
            self.mark_lost(child);
        }
        if let Some(record) = self.get_mut(id) {
            if !record.plugged {
                return;
            }
            record.plugged = false;
            record.zombie = zombie;
            record.pending |= if zombie {
                PendingFlags::ZOMBIE
            } else {
                PendingFlags::LOST
            };
        }
    }

    /// Feeds one discovery snapshot in. Decides create-vs-update: the
    /// existing plugged record survives only when every externally
    /// observable attribute matches and its topology links are intact.
    pub fn reconcile(&mut self, snapshot: DeviceSnapshot, edid: Option<Edid>, quirks: Quirks) -> Reconciliation {
        let parent = self.resolve_parent(&snapshot.address);

        if let Some(existing) = self.find_plugged_by_address(&snapshot.address) {
            if self.matches_snapshot(existing, &snapshot, &edid, parent) {
                if let Some(record) = self.get_mut(existing) {
                    record.plugged = true;
                    record.guid = snapshot.guid;
                    record.port_map = snapshot.port_map;
                    record.quirks = quirks;
                }
                log::debug!("device at {} refreshed", snapshot.address);
                return Reconciliation::Refreshed(existing);
            }
            self.mark_lost(existing);
        }

        let mut record = DeviceRecord::from_snapshot(&snapshot);
        record.edid = edid;
        record.quirks = quirks;
        record.parent = parent;
        let id = self.insert(record);
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.push(id);
        }
        log::info!("new device at {}", snapshot.address);
        Reconciliation::Created(id)
    }

    fn matches_snapshot(
        &self,
        id: DeviceId,
        snapshot: &DeviceSnapshot,
        edid: &Option<Edid>,
        parent: Option<DeviceId>,
    ) -> bool {
        let record = match self.get(id) {
            Some(record) => record,
            None => return false,
        };

        // A non-root device whose parent can no longer be resolved is a
        // topology inconsistency and always gets replaced.
        if !record.address.is_root() && parent.is_none() {
            return false;
        }

        record.peer_type == snapshot.peer_type
            && record.branch == snapshot.branch
            && record.legacy == snapshot.legacy
            && record.message_capable == snapshot.message_capable
            && record.video_sink == snapshot.video_sink
            && record.num_sdp_streams == snapshot.num_sdp_streams
            && record.max_tmds_clock_khz == snapshot.max_tmds_clock_khz
            && record.edid == *edid
            && record.parent == parent
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot(address: Address, branch: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            address,
            peer_type: if branch { PeerType::Branch } else { PeerType::Sink },
            branch,
            legacy: false,
            message_capable: branch,
            dpcd_revision: (1, 4),
            guid: Guid::default(),
            port_map: PortMap::default(),
            video_sink: !branch,
            num_sdp_streams: 1,
            num_sdp_stream_sinks: 1,
            max_tmds_clock_khz: 0,
            max_link: None,
        }
    }

    #[test]
    fn stale_handles_dereference_to_none() {
        let mut topo = Topology::new();
        let id = topo.insert(DeviceRecord::from_snapshot(&snapshot(Address::root(), true)));
        assert!(topo.get(id).is_some());

        topo.remove(id);
        assert!(topo.get(id).is_none());

        // The slot is recycled under a new generation; the old handle
        // stays dead.
        let id2 = topo.insert(DeviceRecord::from_snapshot(&snapshot(Address::root(), true)));
        assert!(topo.get(id).is_none());
        assert!(topo.get(id2).is_some());
        assert_ne!(id, id2);
    }

    #[test]
    fn plugged_preferred_over_unplugged() {
        let mut topo = Topology::new();
        let addr = Address::new(&[1]);
        topo.reconcile(snapshot(Address::root(), true), None, Quirks::default());

        let old = topo.reconcile(snapshot(addr, false), None, Quirks::default()).id();
        topo.mark_lost(old);
        let new = topo.reconcile(snapshot(addr, false), None, Quirks::default()).id();

        assert_ne!(old, new);
        assert_eq!(topo.find_by_address(&addr), Some(new));
    }

    #[test]
    fn identical_snapshot_refreshes() {
        let mut topo = Topology::new();
        topo.reconcile(snapshot(Address::root(), true), None, Quirks::default());

        let addr = Address::new(&[2]);
        let first = topo.reconcile(snapshot(addr, false), None, Quirks::default());
        let second = topo.reconcile(snapshot(addr, false), None, Quirks::default());

        assert!(matches!(first, Reconciliation::Created(_)));
        assert_eq!(second, Reconciliation::Refreshed(first.id()));
        assert_eq!(topo.len(), 2);
    }

    #[test]
    fn changed_attribute_replaces() {
        let mut topo = Topology::new();
        topo.reconcile(snapshot(Address::root(), true), None, Quirks::default());

        let addr = Address::new(&[2]);
        let first = topo.reconcile(snapshot(addr, false), None, Quirks::default()).id();

        let mut changed = snapshot(addr, false);
        changed.max_tmds_clock_khz = 300_000;
        let second = topo.reconcile(changed, None, Quirks::default());

        assert!(matches!(second, Reconciliation::Created(_)));
        assert_ne!(second.id(), first);
        let old = topo.get(first).unwrap();
        assert!(!old.plugged);
        assert!(old.pending.contains(PendingFlags::LOST));
    }

    #[test]
    fn changed_edid_replaces() {
        let mut topo = Topology::new();
        let addr = Address::root();
        let a = crate::edid::fallback_edid(crate::edid::FallbackKind::Digital);
        let b = crate::edid::fallback_edid(crate::edid::FallbackKind::Vga);

        let first = topo.reconcile(snapshot(addr, false), Some(a.clone()), Quirks::default());
        let same = topo.reconcile(snapshot(addr, false), Some(a), Quirks::default());
        assert!(matches!(same, Reconciliation::Refreshed(_)));

        let replaced = topo.reconcile(snapshot(addr, false), Some(b), Quirks::default());
        assert!(matches!(replaced, Reconciliation::Created(_)));
        assert_ne!(replaced.id(), first.id());
    }

    #[test]
    fn loss_cascades_to_children() {
        let mut topo = Topology::new();
        let hub = topo.reconcile(snapshot(Address::new(&[1]), true), None, Quirks::default()).id();
        let sink = topo
            .reconcile(snapshot(Address::new(&[1, 2]), false), None, Quirks::default())
            .id();
        assert_eq!(topo.get(sink).unwrap().parent, Some(hub));

        topo.mark_lost(hub);
        assert!(!topo.get(hub).unwrap().plugged);
        assert!(!topo.get(sink).unwrap().plugged);
    }

    #[test]
    fn streaming_device_becomes_zombie() {
        let mut topo = Topology::new();
        let id = topo.reconcile(snapshot(Address::new(&[1]), false), None, Quirks::default()).id();
        topo.get_mut(id).unwrap().group = Some(1);

        topo.mark_lost(id);
        let record = topo.get(id).unwrap();
        assert!(record.zombie);
        assert!(record.pending.contains(PendingFlags::ZOMBIE));
        assert!(!record.pending.contains(PendingFlags::LOST));
    }
}
