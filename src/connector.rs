// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! The connector: one physical DisplayPort output and everything behind
//! it.
//!
//! [`Connector`] owns the topology, the discovery engine, the payload
//! table and the link state, and talks to the platform exclusively
//! through the collaborator traits handed to [`Connector::new`]. The
//! driver drives it with notifications (`notify_long_pulse`,
//! `notify_short_pulse`, `message_completed`, `timer_expired`,
//! `process_up_request`) and queries it with the compound query and the
//! stream add/remove calls. Driver callbacks only ever fire from
//! `timer_expired`, through the deferred event dispatcher.

use thiserror::Error;

use crate::address::{Address, Guid};
use crate::bandwidth::CompoundSession;
use crate::discovery::{DiscoveryEvent, DiscoveryManager, TAG_DISCOVERY_BASE};
use crate::dpcd::DpcdHal;
use crate::dsc::{DscCaps, DscSolver};
use crate::edid::{fallback_edid, Edid, EdidReader, FallbackKind};
use crate::events::{EventSink, PendingFlags};
use crate::link::{LinkConfiguration, Watermark};
use crate::mainlink::MainLink;
use crate::quirks::{self, QuirkFlags, Quirks};
use crate::sideband::{
    ConnectionStatusNotify, MessageManager, MessageToken, PeerType, PortInfo, SidebandRequest, SidebandResult,
};
use crate::timer::{Timer, TimerTag};
use crate::timeslot::{ActError, PayloadTable, TimeslotError};
use crate::topology::{DeviceId, DeviceRecord, DeviceSnapshot, PortMap, Reconciliation, Topology};

/// Timer tag of the deferred event dispatcher.
pub(crate) const TAG_FIRE_EVENTS: TimerTag = 1;

/// Timer tag of the CSN up-reply retry.
pub(crate) const TAG_CSN_REPLY: TimerTag = 2;

/// Blocking sideband sends retry transient NAKs this many times.
const SEND_RETRIES: u32 = 3;

/// An undeliverable CSN up-reply is retried this many times before it is
/// dropped.
const CSN_REPLY_RETRIES: u32 = 4;
const CSN_REPLY_SPACING_MS: u32 = 200;

/// A CSN acknowledgment waiting for the transport to accept it.
struct PendingUpReply {
    address: Address,
    request_id: u8,
    attempts_left: u32,
}

/// Driver-configured behavior knobs.
#[derive(Clone, Copy, Debug)]
pub struct ConnectorPolicy {
    pub enable_fast_link_training: bool,
    pub enable_no_handshake_training: bool,
    /// Admit modes with audio above 48 kHz.
    pub enable_audio_beyond_48k: bool,
    /// Retry the generic admission check once at maximum compression.
    pub enable_lower_bpp_retry: bool,
    /// SST watermark erratum: try lower configurations without FEC
    /// before resorting to DSC.
    pub watermark_erratum_war: bool,
    /// Source OUI to announce to the sink on plug.
    pub source_oui: Option<[u8; 3]>,
}

impl Default for ConnectorPolicy {
    fn default() -> Self {
        ConnectorPolicy {
            enable_fast_link_training: true,
            enable_no_handshake_training: false,
            enable_audio_beyond_48k: false,
            enable_lower_bpp_retry: true,
            watermark_erratum_war: false,
            source_oui: None,
        }
    }
}

/// Stream enable/disable failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Timeslot(#[from] TimeslotError),
    #[error(transparent)]
    Act(#[from] ActError),
    #[error("branch rejected the payload allocation")]
    AllocateRejected,
    #[error("unknown or stale device handle")]
    UnknownDevice,
}

pub struct Connector {
    pub(crate) dpcd: Box<dyn DpcdHal>,
    pub(crate) mainlink: Box<dyn MainLink>,
    pub(crate) messages: Box<dyn MessageManager>,
    pub(crate) timer: Box<dyn Timer>,
    pub(crate) event_sink: Box<dyn EventSink>,
    pub(crate) dsc_solver: Box<dyn DscSolver>,
    pub(crate) edid_reader: Box<dyn EdidReader>,
    pub(crate) policy: ConnectorPolicy,

    pub(crate) topology: Topology,
    pub(crate) discovery: DiscoveryManager,
    pub(crate) payload: PayloadTable,

    pub(crate) plugged: bool,
    pub(crate) multistream: bool,
    pub(crate) highest_assessed: LinkConfiguration,
    pub(crate) active_link: LinkConfiguration,
    pub(crate) link_guessed: bool,
    pub(crate) branch_quirks: Quirks,
    /// Source watermark computed by the last successful SST admission,
    /// programmed when its stream is enabled.
    pub(crate) sst_watermark: Option<Watermark>,

    pub(crate) pending_fire_events: bool,
    pub(crate) pending_cable_ok: Option<bool>,
    pub(crate) last_cable_ok: Option<bool>,
    pub(crate) pending_bandwidth_change: bool,
    pub(crate) detect_complete_notified: bool,
    pending_up_replies: Vec<PendingUpReply>,

    pub(crate) compound: Option<CompoundSession>,
}

impl Connector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dpcd: Box<dyn DpcdHal>,
        mainlink: Box<dyn MainLink>,
        messages: Box<dyn MessageManager>,
        timer: Box<dyn Timer>,
        event_sink: Box<dyn EventSink>,
        dsc_solver: Box<dyn DscSolver>,
        edid_reader: Box<dyn EdidReader>,
        policy: ConnectorPolicy,
    ) -> Self {
        Connector {
            dpcd,
            mainlink,
            messages,
            timer,
            event_sink,
            dsc_solver,
            edid_reader,
            policy,
            topology: Topology::new(),
            discovery: DiscoveryManager::new(),
            payload: PayloadTable::new(),
            plugged: false,
            multistream: false,
            highest_assessed: LinkConfiguration::invalid(),
            active_link: LinkConfiguration::invalid(),
            link_guessed: false,
            branch_quirks: Quirks::default(),
            sst_watermark: None,
            pending_fire_events: false,
            pending_cable_ok: None,
            last_cable_ok: None,
            pending_bandwidth_change: false,
            detect_complete_notified: false,
            pending_up_replies: Vec::new(),
            compound: None,
        }
    }

    pub fn is_plugged(&self) -> bool {
        self.plugged
    }

    pub fn is_multistream(&self) -> bool {
        self.multistream
    }

    pub fn active_link(&self) -> LinkConfiguration {
        self.active_link
    }

    pub fn highest_assessed_link(&self) -> LinkConfiguration {
        self.highest_assessed
    }

    /// The assessed configuration was assumed, not proven by training.
    pub fn link_guessed(&self) -> bool {
        self.link_guessed
    }

    pub fn device(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.topology.get(id)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.topology.ids()
    }

    pub fn find_device(&self, address: &Address) -> Option<DeviceId> {
        self.topology.find_by_address(address)
    }

    #[cfg(test)]
    pub(crate) fn payload_mut(&mut self) -> &mut PayloadTable {
        &mut self.payload
    }

    pub fn payload_table(&self) -> &PayloadTable {
        &self.payload
    }

    /// Long HPD pulse: plug or unplug of the whole connector.
    pub fn notify_long_pulse(&mut self, plugged: bool) {
        if plugged && self.plugged {
            let streams_active = self.payload.groups().iter().any(|g| g.has_slots());
            if streams_active || self.connector_quirks().has(QuirkFlags::IGNORE_REDUNDANT_HOTPLUG) {
                log::debug!("ignoring redundant long pulse");
                return;
            }
        }
        if !plugged {
            self.handle_unplug();
            return;
        }

        self.plugged = true;
        self.detect_complete_notified = false;

        if let Some(oui) = self.policy.source_oui {
            self.dpcd.set_source_oui(oui);
        }
        self.branch_quirks = self.dpcd.oui().map(quirks::branch_quirks).unwrap_or_default();

        self.assess_link();

        self.multistream = self.dpcd.supports_multistream() && self.mainlink.supports_multistream();
        self.discovery.begin();
        if self.multistream {
            log::info!("entering multistream mode");
            self.dpcd.set_multistream(true);
            self.active_link.multistream = true;
            self.highest_assessed.multistream = true;
            self.clear_payload_table();
            let revision = self.dpcd.revision();
            self.discovery.detect_branch(Address::root(), revision, &mut *self.messages);
        } else {
            self.attach_sst_sink();
        }
        self.queue_fire_events();
    }

    fn handle_unplug(&mut self) {
        if !self.plugged {
            return;
        }
        log::info!("unplugged");
        self.plugged = false;
        self.discovery.abandon(&mut *self.messages, &mut *self.timer);
        self.pending_up_replies.clear();
        self.timer.cancel(TAG_CSN_REPLY);
        for id in self.topology.ids() {
            self.topology.mark_lost(id);
        }
        self.payload.free_all();
        self.flush_timeslots();
        self.mainlink.power_down_link();
        self.active_link = LinkConfiguration::invalid();
        self.highest_assessed = LinkConfiguration::invalid();
        self.link_guessed = false;
        self.last_cable_ok = None;
        self.multistream = false;
        self.sst_watermark = None;
        self.pending_bandwidth_change = false;
        self.detect_complete_notified = false;
        self.queue_fire_events();
    }

    /// Short HPD pulse: the sink wants attention. Refreshes the cached
    /// link status and retrains if lock was lost or the sink no longer
    /// holds the programmed configuration.
    pub fn notify_short_pulse(&mut self) {
        if !self.plugged {
            return;
        }
        self.dpcd.refresh_link_status();
        let (lanes, rate) = self.dpcd.current_link();
        let forgotten = self.active_link.is_valid()
            && (lanes, rate) != (self.active_link.lanes, self.active_link.peak_rate);
        if forgotten || self.is_link_lost() {
            log::warn!("link lost, retraining at {}", self.active_link);
            let lc = self.active_link;
            self.active_link = LinkConfiguration::invalid();
            self.train(&lc, true);
        }
    }

    /// Completion of a posted sideband message.
    pub fn message_completed(&mut self, token: MessageToken, result: SidebandResult) {
        self.discovery
            .message_completed(token, result, &mut *self.messages, &mut *self.timer);
        self.drain_discovery();
    }

    pub fn timer_expired(&mut self, tag: TimerTag) {
        if tag == TAG_FIRE_EVENTS {
            self.fire_events();
            return;
        }
        if tag == TAG_CSN_REPLY {
            self.retry_csn_replies();
            return;
        }
        if tag >= TAG_DISCOVERY_BASE {
            self.discovery.retry_expired(tag, &mut *self.messages);
        }
    }

    /// CONNECTION_STATUS_NOTIFY from a branch. The up-reply is posted
    /// first so the branch retires the request and can report further
    /// changes.
    pub fn process_up_request(&mut self, request_id: u8, csn: ConnectionStatusNotify) {
        let branch_addr = self
            .topology
            .find_by_guid(&csn.guid)
            .and_then(|id| self.topology.get(id))
            .map(|r| r.address)
            .unwrap_or_else(Address::root);
        self.post_csn_reply(branch_addr, request_id);

        let child = branch_addr.child(csn.port);
        if csn.plugged {
            log::info!("CSN: plug at {child}");
            self.detect_complete_notified = false;
            if csn.peer_type == PeerType::Branch && csn.message_capable {
                self.discovery.detect_branch(child, (1, 2), &mut *self.messages);
            } else {
                let port = PortInfo {
                    port: csn.port,
                    input_port: csn.input_port,
                    internal: false,
                    peer_type: csn.peer_type,
                    message_capable: csn.message_capable,
                    dpcd_revision: (1, 2),
                    peer_guid: Guid::default(),
                    legacy: csn.legacy,
                    num_sdp_streams: 0,
                    num_sdp_stream_sinks: 0,
                };
                self.discovery.detect_sink(branch_addr, &port, &mut *self.messages);
            }
        } else {
            log::info!("CSN: unplug at {child}");
            if let Some(id) = self.topology.find_plugged_by_address(&child) {
                self.topology.mark_lost(id);
            }
            self.queue_fire_events();
        }
    }

    /// A branch keeps re-raising a CSN until its reply lands, so an
    /// undeliverable reply is retried on a timer before being dropped.
    fn post_csn_reply(&mut self, address: Address, request_id: u8) {
        if self.messages.post_up_reply(&address, request_id) {
            return;
        }
        log::warn!("CSN reply to {address} not accepted, retrying");
        self.pending_up_replies.push(PendingUpReply {
            address,
            request_id,
            attempts_left: CSN_REPLY_RETRIES,
        });
        self.timer.queue(TAG_CSN_REPLY, CSN_REPLY_SPACING_MS);
    }

    fn retry_csn_replies(&mut self) {
        let mut pending = std::mem::take(&mut self.pending_up_replies);
        pending.retain_mut(|reply| {
            if self.messages.post_up_reply(&reply.address, reply.request_id) {
                return false;
            }
            reply.attempts_left -= 1;
            if reply.attempts_left == 0 {
                log::warn!("CSN reply to {} abandoned", reply.address);
                return false;
            }
            true
        });
        self.pending_up_replies = pending;
        if !self.pending_up_replies.is_empty() {
            self.timer.queue(TAG_CSN_REPLY, CSN_REPLY_SPACING_MS);
        }
    }

    /// Driver-side HDCP probing finished for a device.
    pub fn notify_hdcp_capability_done(&mut self, id: DeviceId) {
        if let Some(record) = self.topology.get_mut(id) {
            record.pending |= PendingFlags::HDCP_CAP_DONE;
            self.queue_fire_events();
        }
    }

    /// Records DSC capabilities the driver read for a device, and where
    /// its stream gets decompressed.
    pub fn set_device_dsc(&mut self, id: DeviceId, caps: DscCaps, decompressor: Option<DeviceId>) -> bool {
        match self.topology.get_mut(id) {
            Some(record) => {
                record.dsc_caps = caps;
                record.dsc_decompression_device = decompressor;
                true
            }
            None => false,
        }
    }

    fn drain_discovery(&mut self) {
        let mut reassess = false;
        while let Some(event) = self.discovery.pop_event() {
            match event {
                DiscoveryEvent::DeviceFound(snapshot) => {
                    let (edid, device_quirks) = self.prepare_edid(&snapshot);
                    if device_quirks.has(QuirkFlags::REASSESS_MAX_LINK) {
                        reassess = true;
                    }
                    let branch_ports = snapshot.branch.then_some(snapshot.port_map);
                    let outcome = self.topology.reconcile(snapshot, edid, device_quirks);
                    let fec = self.dpcd.supports_fec();
                    if let Reconciliation::Created(id) = outcome {
                        if let Some(record) = self.topology.get_mut(id) {
                            record.fec_path_capable = fec;
                        }
                    }
                    if let Some(ports) = branch_ports {
                        self.prune_stale_children(outcome.id(), ports);
                    }
                }
                DiscoveryEvent::DetectionFailed(address) => {
                    log::warn!("giving up on {address}");
                    if let Some(id) = self.topology.find_plugged_by_address(&address) {
                        self.topology.mark_lost(id);
                    }
                }
            }
        }

        let streams_active = self.payload.groups().iter().any(|g| g.has_slots());
        if reassess && !streams_active {
            log::info!("re-assessing link after quirk application");
            self.assess_link();
        }
        self.queue_fire_events();
    }

    /// Drops plugged children the branch no longer reports a downstream
    /// device behind. Ports that still hold one are settled by their own
    /// detections from the same walk.
    fn prune_stale_children(&mut self, branch: DeviceId, ports: PortMap) {
        let children = match self.topology.get(branch) {
            Some(record) => record.children.clone(),
            None => return,
        };
        for child in children {
            let gone = self
                .topology
                .get(child)
                .map(|r| r.plugged && !ports.has_attached(r.address.tail()))
                .unwrap_or(false);
            if gone {
                self.topology.mark_lost(child);
            }
        }
    }

    /// Chooses the EDID the driver will see for a freshly found device
    /// and the quirks keyed off it. Unusable EDIDs are replaced with a
    /// synthetic fallback matching the port type.
    fn prepare_edid(&mut self, snapshot: &DeviceSnapshot) -> (Option<Edid>, Quirks) {
        if !snapshot.video_sink {
            return (None, Quirks::default());
        }
        if let Some(raw) = self.edid_reader.read_edid(&snapshot.address) {
            let edid = Edid::new(raw);
            if edid.is_valid() {
                let device_quirks = edid
                    .identity()
                    .map(|id| quirks::panel_quirks(&id))
                    .unwrap_or_default();
                if device_quirks.has(QuirkFlags::FORCE_VGA_FALLBACK_EDID) {
                    return (Some(fallback_edid(FallbackKind::Vga)), device_quirks);
                }
                return (Some(edid), device_quirks);
            }
            log::warn!("invalid EDID from {}", snapshot.address);
        }
        let kind = if snapshot.legacy && snapshot.max_tmds_clock_khz == 0 {
            FallbackKind::Vga
        } else {
            FallbackKind::Digital
        };
        (Some(fallback_edid(kind)), Quirks::default())
    }

    /// SST: the single sink on the other end of the cable becomes the one
    /// topology record, synthesized from local DPCD instead of sidebands.
    fn attach_sst_sink(&mut self) {
        // A dongle with nothing plugged downstream reports zero sinks.
        if self.dpcd.sink_count() == 0 {
            log::info!("no downstream sink");
            return;
        }
        let snapshot = DeviceSnapshot {
            address: Address::root(),
            peer_type: PeerType::Sink,
            branch: false,
            legacy: false,
            message_capable: false,
            dpcd_revision: self.dpcd.revision(),
            guid: Guid::synthesize(),
            port_map: Default::default(),
            video_sink: true,
            num_sdp_streams: 1,
            num_sdp_stream_sinks: 1,
            max_tmds_clock_khz: 0,
            max_link: Some((self.dpcd.max_lane_count(), self.dpcd.max_link_rate())),
        };
        let (edid, device_quirks) = self.prepare_edid(&snapshot);
        let reassess = device_quirks.has(QuirkFlags::REASSESS_MAX_LINK);
        let outcome = self.topology.reconcile(snapshot, edid, device_quirks);
        let fec = self.dpcd.supports_fec();
        if let Reconciliation::Created(id) = outcome {
            if let Some(record) = self.topology.get_mut(id) {
                record.fec_path_capable = fec;
            }
        }
        if reassess {
            self.assess_link();
        }
    }

    pub(crate) fn connector_quirks(&self) -> Quirks {
        let mut merged = self.branch_quirks;
        if let Some(id) = self.topology.find_plugged_by_address(&Address::root()) {
            if let Some(record) = self.topology.get(id) {
                merged.flags |= record.quirks.flags;
                merged.lt2_fec_latency_ms = merged.lt2_fec_latency_ms.max(record.quirks.lt2_fec_latency_ms);
            }
        }
        merged
    }

    /// Creates a stream group over `devices` and allocates `pbn` worth of
    /// timeslots for it. With the link down the allocation is recorded
    /// and replayed after the next successful training.
    pub fn add_stream(&mut self, stream_id: u8, devices: &[DeviceId], pbn: u32) -> Result<(), StreamError> {
        for id in devices {
            if self.topology.get(*id).is_none() {
                return Err(StreamError::UnknownDevice);
            }
        }
        if !self.multistream {
            // SST carries one stream over the whole frame; the watermark
            // computed at admission is pushed to the source now.
            if let Some(wm) = self.sst_watermark {
                self.mainlink.program_watermark(&wm);
            }
            for id in devices {
                if let Some(record) = self.topology.get_mut(*id) {
                    record.group = Some(stream_id);
                }
            }
            return Ok(());
        }

        self.payload.add_group(stream_id, devices.to_vec())?;
        for id in devices {
            if let Some(record) = self.topology.get_mut(*id) {
                record.group = Some(stream_id);
            }
        }

        if !self.active_link.is_valid() {
            log::info!("link down, deferring payload for stream {stream_id}");
            if let Some(group) = self.payload.group_mut(stream_id) {
                group.deferred = true;
                group.pbn = pbn;
            }
            return Ok(());
        }
        self.activate_stream(stream_id, pbn)
    }

    /// Adopts a stream the firmware left running on a lit head instead of
    /// blanking it. The whole frame is treated as occupied until the
    /// payload table is cleared and the stream re-added normally.
    pub fn assume_firmware_stream(&mut self, stream_id: u8, devices: &[DeviceId]) -> Result<(), StreamError> {
        for id in devices {
            if self.topology.get(*id).is_none() {
                return Err(StreamError::UnknownDevice);
            }
        }
        self.payload.add_group(stream_id, devices.to_vec())?;
        self.payload.assume_firmware_payload(stream_id)?;
        for id in devices {
            if let Some(record) = self.topology.get_mut(*id) {
                record.group = Some(stream_id);
            }
        }
        log::info!("assumed firmware payload as stream {stream_id}");
        Ok(())
    }

    fn activate_stream(&mut self, stream_id: u8, pbn: u32) -> Result<(), StreamError> {
        let slots = self
            .active_link
            .slots_for_pbn(pbn)
            .ok_or(StreamError::Timeslot(TimeslotError::InsufficientSlots))?;

        let devices = match self.payload.group(stream_id) {
            Some(group) => group.devices.clone(),
            None => return Err(StreamError::Timeslot(TimeslotError::NoSuchGroup)),
        };
        for id in devices {
            let address = match self.topology.get(id) {
                Some(record) => record.address,
                None => continue,
            };
            if address.is_root() {
                continue;
            }
            let parent = address.parent();
            let port = address.tail();
            self.send_with_retry(&parent, SidebandRequest::PowerUpPhy { port });
            if !self.send_with_retry(
                &parent,
                SidebandRequest::AllocatePayload {
                    port,
                    vc_id: stream_id,
                    pbn,
                },
            ) {
                return Err(StreamError::AllocateRejected);
            }
        }

        self.payload.allocate(stream_id, slots, pbn)?;
        if let Some(group) = self.payload.group_mut(stream_id) {
            group.head_attached = true;
            group.deferred = false;
        }
        self.flush_timeslots();
        self.complete_act()?;
        Ok(())
    }

    /// Tears a stream down and compacts the table. A zombie device freed
    /// of its last stream finally gets its lost notification.
    pub fn remove_stream(&mut self, stream_id: u8) -> Result<(), StreamError> {
        if !self.multistream {
            for id in self.topology.ids() {
                if let Some(record) = self.topology.get_mut(id) {
                    if record.group == Some(stream_id) {
                        record.group = None;
                    }
                }
            }
            self.queue_fire_events();
            return Ok(());
        }

        let (devices, had_slots) = match self.payload.group(stream_id) {
            Some(group) => (group.devices.clone(), group.has_slots()),
            None => return Err(StreamError::Timeslot(TimeslotError::NoSuchGroup)),
        };

        for id in &devices {
            let address = match self.topology.get(*id) {
                Some(record) => record.address,
                None => continue,
            };
            if address.is_root() {
                continue;
            }
            let parent = address.parent();
            let port = address.tail();
            self.send_with_retry(
                &parent,
                SidebandRequest::AllocatePayload {
                    port,
                    vc_id: stream_id,
                    pbn: 0,
                },
            );
            self.send_with_retry(&parent, SidebandRequest::PowerDownPhy { port });
        }

        self.payload.remove_group(stream_id)?;
        if had_slots {
            self.flush_timeslots();
            self.complete_act()?;
        }

        for id in devices {
            if let Some(record) = self.topology.get_mut(id) {
                record.group = None;
                if record.zombie {
                    record.zombie = false;
                    record.pending |= PendingFlags::LOST;
                }
            }
        }
        self.queue_fire_events();
        Ok(())
    }

    /// Replays payload allocations recorded while the link was down.
    pub(crate) fn replay_deferred_streams(&mut self) {
        if !self.active_link.is_valid() {
            return;
        }
        let deferred: Vec<(u8, u32)> = self
            .payload
            .groups()
            .iter()
            .filter(|g| g.deferred)
            .map(|g| (g.stream_id, g.pbn))
            .collect();
        for (stream_id, pbn) in deferred {
            log::info!("replaying deferred payload for stream {stream_id}");
            if let Err(error) = self.activate_stream(stream_id, pbn) {
                log::warn!("deferred stream {stream_id} failed: {error}");
            }
        }
    }

    /// Blocking send with bounded retry on transient NAKs.
    fn send_with_retry(&mut self, address: &Address, request: SidebandRequest) -> bool {
        for _ in 0..SEND_RETRIES {
            match self.messages.send(address, request.clone()) {
                Ok(_) => return true,
                Err(reason) if reason.is_transient() => continue,
                Err(reason) => {
                    log::warn!("sideband to {address} nacked: {reason:?}");
                    return false;
                }
            }
        }
        log::warn!("sideband to {address} timed out");
        false
    }
}
