// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Scripted collaborator fakes shared by the unit tests.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::address::{Address, Guid};
use crate::connector::{Connector, ConnectorPolicy};
use crate::dpcd::{AuxStatus, DpcdHal, DriveSetting, LaneStatus, PowerState};
use crate::dsc::{DscCaps, DscError, DscOutput, DscSolver};
use crate::edid::{fallback_edid, EdidReader, FallbackKind};
use crate::events::EventSink;
use crate::link::{LinkConfiguration, LinkRate, Watermark};
use crate::mainlink::{MainLink, TrainingKind};
use crate::sideband::{
    LinkAddressReply, MessageManager, MessageToken, PeerType, PortInfo, SidebandReply, SidebandRequest,
    SidebandResult,
};
use crate::timer::{Timer, TimerTag};
use crate::topology::DeviceId;

pub(crate) struct DpcdState {
    pub offline: bool,
    pub revision: (u8, u8),
    pub max_link_rate: LinkRate,
    pub max_lane_count: u8,
    pub enhanced_framing: bool,
    pub downspread: bool,
    pub mst_cap: bool,
    pub fec: bool,
    pub no_handshake: bool,
    pub no_link_training: bool,
    pub post_lt_adjust_supported: bool,
    pub post_lt_in_progress: bool,
    pub power: PowerState,
    pub multistream_enabled: Option<bool>,
    pub lane_status: LaneStatus,
    pub align_done: bool,
    pub current_link: (u8, LinkRate),
    pub adjust: Option<DriveSetting>,
    pub drive_writes: Vec<(u8, DriveSetting)>,
    pub sink_count: u8,
    pub oui: Option<[u8; 3]>,
    pub source_oui: Option<[u8; 3]>,
    pub payload_writes: Vec<(u8, u8, u8)>,
    pub payload_write_ok: bool,
    pub act_polls_until_ack: u32,
    pub act_fail: bool,
    pub clear_act_count: u32,
    pub refresh_count: u32,
}

impl Default for DpcdState {
    fn default() -> Self {
        DpcdState {
            offline: false,
            revision: (1, 4),
            max_link_rate: LinkRate::Hbr2,
            max_lane_count: 4,
            enhanced_framing: true,
            downspread: false,
            mst_cap: false,
            fec: true,
            no_handshake: false,
            no_link_training: false,
            post_lt_adjust_supported: false,
            post_lt_in_progress: false,
            power: PowerState::D0,
            multistream_enabled: None,
            lane_status: LaneStatus::CLOCK_RECOVERY_DONE | LaneStatus::CHANNEL_EQ_DONE | LaneStatus::SYMBOL_LOCKED,
            align_done: true,
            current_link: (0, LinkRate::Rbr),
            adjust: None,
            drive_writes: Vec::new(),
            sink_count: 1,
            oui: None,
            source_oui: None,
            payload_writes: Vec::new(),
            payload_write_ok: true,
            act_polls_until_ack: 0,
            act_fail: false,
            clear_act_count: 0,
            refresh_count: 0,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockDpcd(Rc<RefCell<DpcdState>>);

impl MockDpcd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, DpcdState> {
        self.0.borrow_mut()
    }
}

impl DpcdHal for MockDpcd {
    fn is_offline(&self) -> bool {
        self.0.borrow().offline
    }

    fn revision(&self) -> (u8, u8) {
        self.0.borrow().revision
    }

    fn max_link_rate(&self) -> LinkRate {
        self.0.borrow().max_link_rate
    }

    fn max_lane_count(&self) -> u8 {
        self.0.borrow().max_lane_count
    }

    fn enhanced_framing(&self) -> bool {
        self.0.borrow().enhanced_framing
    }

    fn downspread_supported(&self) -> bool {
        self.0.borrow().downspread
    }

    fn supports_multistream(&self) -> bool {
        self.0.borrow().mst_cap
    }

    fn supports_fec(&self) -> bool {
        self.0.borrow().fec
    }

    fn supports_no_handshake_training(&self) -> bool {
        self.0.borrow().no_handshake
    }

    fn no_link_training(&self) -> bool {
        self.0.borrow().no_link_training
    }

    fn post_lt_adjust_request_supported(&self) -> bool {
        self.0.borrow().post_lt_adjust_supported
    }

    fn power_state(&self) -> PowerState {
        self.0.borrow().power
    }

    fn set_power_state(&mut self, state: PowerState) -> AuxStatus {
        self.0.borrow_mut().power = state;
        AuxStatus::Ack
    }

    fn set_multistream(&mut self, enabled: bool) -> AuxStatus {
        self.0.borrow_mut().multistream_enabled = Some(enabled);
        AuxStatus::Ack
    }

    fn refresh_link_status(&mut self) {
        self.0.borrow_mut().refresh_count += 1;
    }

    fn lane_status(&self, _lane: u8) -> LaneStatus {
        self.0.borrow().lane_status
    }

    fn interlane_align_done(&self) -> bool {
        self.0.borrow().align_done
    }

    fn current_link(&self) -> (u8, LinkRate) {
        self.0.borrow().current_link
    }

    fn adjust_request(&self, _lane: u8) -> Option<DriveSetting> {
        self.0.borrow().adjust
    }

    fn post_lt_adjust_in_progress(&self) -> bool {
        self.0.borrow().post_lt_in_progress
    }

    fn set_lane_drive(&mut self, lane: u8, setting: DriveSetting) -> AuxStatus {
        self.0.borrow_mut().drive_writes.push((lane, setting));
        AuxStatus::Ack
    }

    fn sink_count(&self) -> u8 {
        self.0.borrow().sink_count
    }

    fn oui(&self) -> Option<[u8; 3]> {
        self.0.borrow().oui
    }

    fn set_source_oui(&mut self, oui: [u8; 3]) -> AuxStatus {
        self.0.borrow_mut().source_oui = Some(oui);
        AuxStatus::Ack
    }

    fn payload_table_clear_act(&mut self) {
        self.0.borrow_mut().clear_act_count += 1;
    }

    fn payload_allocate(&mut self, stream: u8, begin: u8, count: u8) -> bool {
        let mut state = self.0.borrow_mut();
        state.payload_writes.push((stream, begin, count));
        state.payload_write_ok
    }

    fn payload_act_received(&mut self) -> bool {
        let mut state = self.0.borrow_mut();
        if state.act_fail {
            return false;
        }
        if state.act_polls_until_ack > 0 {
            state.act_polls_until_ack -= 1;
            return false;
        }
        true
    }
}

pub(crate) struct MainLinkState {
    pub max_link_rate: LinkRate,
    pub max_lane_count: u8,
    pub unsupported_rates: Vec<LinkRate>,
    pub mst: bool,
    pub dsc: bool,
    pub fec: bool,
    /// Training succeeds only at or below this total data rate.
    pub max_trainable_bytes: u64,
    pub train_calls: Vec<(LinkConfiguration, TrainingKind)>,
    pub power_downs: u32,
    pub flush_states: Vec<bool>,
    pub streams: Vec<(u8, u8, u8)>,
    pub act_triggers: u32,
    pub watermarks: Vec<Watermark>,
    pub tunnel: Option<u64>,
}

impl Default for MainLinkState {
    fn default() -> Self {
        MainLinkState {
            max_link_rate: LinkRate::Hbr3,
            max_lane_count: 4,
            unsupported_rates: Vec::new(),
            mst: true,
            dsc: true,
            fec: true,
            max_trainable_bytes: u64::MAX,
            train_calls: Vec::new(),
            power_downs: 0,
            flush_states: Vec::new(),
            streams: Vec::new(),
            act_triggers: 0,
            watermarks: Vec::new(),
            tunnel: None,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockMainLink(Rc<RefCell<MainLinkState>>);

impl MockMainLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, MainLinkState> {
        self.0.borrow_mut()
    }
}

impl MainLink for MockMainLink {
    fn max_link_rate(&self) -> LinkRate {
        self.0.borrow().max_link_rate
    }

    fn max_lane_count(&self) -> u8 {
        self.0.borrow().max_lane_count
    }

    fn is_rate_supported(&self, rate: LinkRate) -> bool {
        !self.0.borrow().unsupported_rates.contains(&rate)
    }

    fn supports_multistream(&self) -> bool {
        self.0.borrow().mst
    }

    fn supports_dsc(&self) -> bool {
        self.0.borrow().dsc
    }

    fn supports_fec(&self) -> bool {
        self.0.borrow().fec
    }

    fn train(&mut self, lc: &LinkConfiguration, kind: TrainingKind) -> bool {
        let mut state = self.0.borrow_mut();
        state.train_calls.push((*lc, kind));
        lc.is_valid() && lc.total_data_rate() <= state.max_trainable_bytes
    }

    fn power_down_link(&mut self) {
        self.0.borrow_mut().power_downs += 1;
    }

    fn set_flush_mode(&mut self, enabled: bool) {
        self.0.borrow_mut().flush_states.push(enabled);
    }

    fn configure_stream(&mut self, stream: u8, begin: u8, count: u8) {
        self.0.borrow_mut().streams.push((stream, begin, count));
    }

    fn trigger_act(&mut self) {
        self.0.borrow_mut().act_triggers += 1;
    }

    fn program_watermark(&mut self, wm: &Watermark) {
        self.0.borrow_mut().watermarks.push(*wm);
    }

    fn tunnel_capacity(&self) -> Option<u64> {
        self.0.borrow().tunnel
    }
}

#[derive(Default)]
pub(crate) struct MessagesState {
    pub posted: Vec<(MessageToken, Address, SidebandRequest)>,
    pub cancelled: Vec<MessageToken>,
    pub sends: Vec<(Address, SidebandRequest)>,
    pub send_replies: VecDeque<SidebandResult>,
    pub up_replies: Vec<(Address, u8)>,
    /// The next this many up-reply posts are refused by the transport.
    pub up_reply_failures: u32,
}

#[derive(Clone, Default)]
pub(crate) struct MockMessages(Rc<RefCell<MessagesState>>);

impl MockMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, MessagesState> {
        self.0.borrow_mut()
    }

    pub fn take_posted(&mut self) -> Vec<(MessageToken, Address, SidebandRequest)> {
        std::mem::take(&mut self.0.borrow_mut().posted)
    }

    pub fn push_send_reply(&mut self, reply: SidebandResult) {
        self.0.borrow_mut().send_replies.push_back(reply);
    }
}

impl MessageManager for MockMessages {
    fn post(&mut self, token: MessageToken, address: &Address, request: SidebandRequest) {
        self.0.borrow_mut().posted.push((token, *address, request));
    }

    fn cancel(&mut self, token: MessageToken) {
        self.0.borrow_mut().cancelled.push(token);
    }

    fn send(&mut self, address: &Address, request: SidebandRequest) -> SidebandResult {
        let mut state = self.0.borrow_mut();
        state.sends.push((*address, request));
        state.send_replies.pop_front().unwrap_or(Ok(SidebandReply::Ack))
    }

    fn post_up_reply(&mut self, address: &Address, request_id: u8) -> bool {
        let mut state = self.0.borrow_mut();
        if state.up_reply_failures > 0 {
            state.up_reply_failures -= 1;
            return false;
        }
        state.up_replies.push((*address, request_id));
        true
    }
}

#[derive(Default)]
pub(crate) struct TimerState {
    pub queued: Vec<(TimerTag, u32)>,
    pub cancelled: Vec<TimerTag>,
    pub slept_ms: u64,
    pub now: u64,
}

#[derive(Clone, Default)]
pub(crate) struct MockTimer(Rc<RefCell<TimerState>>);

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, TimerState> {
        self.0.borrow_mut()
    }

    pub fn take_queued(&mut self) -> Vec<(TimerTag, u32)> {
        std::mem::take(&mut self.0.borrow_mut().queued)
    }
}

impl Timer for MockTimer {
    fn queue(&mut self, tag: TimerTag, delay_ms: u32) {
        let mut state = self.0.borrow_mut();
        state.queued.retain(|(t, _)| *t != tag);
        state.queued.push((tag, delay_ms));
    }

    fn cancel(&mut self, tag: TimerTag) {
        let mut state = self.0.borrow_mut();
        state.queued.retain(|(t, _)| *t != tag);
        state.cancelled.push(tag);
    }

    fn sleep_ms(&mut self, ms: u32) {
        let mut state = self.0.borrow_mut();
        state.slept_ms += ms as u64;
        state.now += ms as u64;
    }

    fn now_ms(&self) -> u64 {
        self.0.borrow().now
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EventRecord {
    New(DeviceId),
    Lost(DeviceId),
    Zombie(DeviceId, bool),
    Hdcp(DeviceId),
    MustDisconnect(DeviceId),
    Bandwidth,
    CableOk(bool),
    DetectComplete,
}

#[derive(Clone, Default)]
pub(crate) struct MockEvents(Rc<RefCell<Vec<EventRecord>>>);

impl MockEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Ref<'_, Vec<EventRecord>> {
        self.0.borrow()
    }

    pub fn take(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl EventSink for MockEvents {
    fn new_device(&mut self, id: DeviceId) {
        self.0.borrow_mut().push(EventRecord::New(id));
    }

    fn lost_device(&mut self, id: DeviceId) {
        self.0.borrow_mut().push(EventRecord::Lost(id));
    }

    fn zombie_changed(&mut self, id: DeviceId, zombie: bool) {
        self.0.borrow_mut().push(EventRecord::Zombie(id, zombie));
    }

    fn hdcp_capability_done(&mut self, id: DeviceId) {
        self.0.borrow_mut().push(EventRecord::Hdcp(id));
    }

    fn must_disconnect(&mut self, id: DeviceId) {
        self.0.borrow_mut().push(EventRecord::MustDisconnect(id));
    }

    fn bandwidth_changed(&mut self) {
        self.0.borrow_mut().push(EventRecord::Bandwidth);
    }

    fn cable_ok_changed(&mut self, ok: bool) {
        self.0.borrow_mut().push(EventRecord::CableOk(ok));
    }

    fn detect_complete(&mut self) {
        self.0.borrow_mut().push(EventRecord::DetectComplete);
    }
}

#[derive(Default)]
pub(crate) struct SolverState {
    /// Targets (in 1/16 bpp) the solver rejects.
    pub fail_at: Vec<u32>,
    pub error: Option<DscError>,
    pub solve_calls: Vec<u32>,
}

#[derive(Clone, Default)]
pub(crate) struct MockSolver(Rc<RefCell<SolverState>>);

impl MockSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, SolverState> {
        self.0.borrow_mut()
    }
}

impl DscSolver for MockSolver {
    fn solve(
        &self,
        mi: &crate::link::ModesetInfo,
        caps: &DscCaps,
        target_bpp_x16: u32,
    ) -> Result<DscOutput, DscError> {
        let mut state = self.0.borrow_mut();
        state.solve_calls.push(target_bpp_x16);
        if !caps.supported {
            return Err(DscError::ColorFormat);
        }
        if state.fail_at.contains(&target_bpp_x16) {
            return Err(state.error.unwrap_or(DscError::Throughput));
        }
        Ok(DscOutput {
            bits_per_pixel_x16: target_bpp_x16,
            slice_count: 2,
            slice_width: mi.active_width / 2,
            pps: [0; 128],
        })
    }
}

#[derive(Default)]
pub(crate) struct EdidState {
    pub by_address: HashMap<Address, Vec<u8>>,
    pub default: Option<Vec<u8>>,
}

#[derive(Clone, Default)]
pub(crate) struct MockEdid(Rc<RefCell<EdidState>>);

impl MockEdid {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.0.borrow_mut().default = Some(fallback_edid(FallbackKind::Digital).bytes().to_vec());
        mock
    }

    pub fn state(&self) -> RefMut<'_, EdidState> {
        self.0.borrow_mut()
    }
}

impl EdidReader for MockEdid {
    fn read_edid(&mut self, address: &Address) -> Option<Vec<u8>> {
        let state = self.0.borrow();
        state.by_address.get(address).cloned().or_else(|| state.default.clone())
    }
}

pub(crate) fn sink_port(port: u8, legacy: bool) -> PortInfo {
    PortInfo {
        port,
        input_port: false,
        internal: false,
        peer_type: if legacy { PeerType::LegacyConverter } else { PeerType::Sink },
        message_capable: false,
        dpcd_revision: (1, 4),
        peer_guid: Guid::default(),
        legacy,
        num_sdp_streams: 1,
        num_sdp_stream_sinks: 1,
    }
}

pub(crate) fn branch_reply(ports: &[PortInfo]) -> SidebandReply {
    SidebandReply::LinkAddress(LinkAddressReply {
        guid: Guid::default(),
        ports: ports.to_vec(),
    })
}

/// Stable nonzero GUID derived from an address, for CSN lookups.
pub(crate) fn guid_for(address: &Address) -> Guid {
    let mut bytes = [0xabu8; 16];
    bytes[0] = address.size() as u8;
    for (i, port) in address.ports().iter().enumerate() {
        bytes[1 + i] = *port + 1;
    }
    Guid::new(bytes)
}

pub(crate) struct TestRig {
    pub connector: Connector,
    pub dpcd: MockDpcd,
    pub mainlink: MockMainLink,
    pub messages: MockMessages,
    pub timer: MockTimer,
    pub events: MockEvents,
    pub solver: MockSolver,
    pub edid: MockEdid,
    pub branch_ports: HashMap<Address, Vec<PortInfo>>,
}

pub(crate) fn rig() -> TestRig {
    rig_with_policy(ConnectorPolicy::default())
}

pub(crate) fn rig_with_policy(policy: ConnectorPolicy) -> TestRig {
    let dpcd = MockDpcd::new();
    let mainlink = MockMainLink::new();
    let messages = MockMessages::new();
    let timer = MockTimer::new();
    let events = MockEvents::new();
    let solver = MockSolver::new();
    let edid = MockEdid::new();

    let connector = Connector::new(
        Box::new(dpcd.clone()),
        Box::new(mainlink.clone()),
        Box::new(messages.clone()),
        Box::new(timer.clone()),
        Box::new(events.clone()),
        Box::new(solver.clone()),
        Box::new(edid.clone()),
        policy,
    );

    TestRig {
        connector,
        dpcd,
        mainlink,
        messages,
        timer,
        events,
        solver,
        edid,
        branch_ports: HashMap::new(),
    }
}

impl TestRig {
    fn reply_for(&self, address: &Address, request: &SidebandRequest) -> SidebandResult {
        match request {
            SidebandRequest::LinkAddress => {
                let ports = self.branch_ports.get(address).cloned().unwrap_or_default();
                Ok(SidebandReply::LinkAddress(LinkAddressReply {
                    guid: guid_for(address),
                    ports,
                }))
            }
            SidebandRequest::RemoteDpcdRead { dpcd_address: 0x080, .. } => {
                // 300 MHz TMDS dongle.
                Ok(SidebandReply::RemoteDpcdRead(vec![0x00, 120]))
            }
            SidebandRequest::RemoteDpcdRead { .. } => {
                // DPCD 1.4, HBR2, 4 lanes.
                Ok(SidebandReply::RemoteDpcdRead(vec![0x14, 0x14, 0x04]))
            }
            _ => Ok(SidebandReply::Ack),
        }
    }

    /// Answers every outstanding message with the default responder and
    /// fires every queued timer until nothing is pending.
    pub fn run_until_idle(&mut self) {
        loop {
            let posted = self.messages.take_posted();
            let queued = self.timer.take_queued();
            if posted.is_empty() && queued.is_empty() {
                break;
            }
            for (token, address, request) in posted {
                let reply = self.reply_for(&address, &request);
                self.connector.message_completed(token, reply);
            }
            for (tag, _) in queued {
                self.connector.timer_expired(tag);
            }
        }
    }

    /// Plugs an MST branch exposing `ports` and runs discovery to
    /// completion.
    pub fn plug_mst(&mut self, ports: &[PortInfo]) {
        self.dpcd.state().mst_cap = true;
        self.branch_ports.insert(Address::root(), ports.to_vec());
        self.connector.notify_long_pulse(true);
        self.run_until_idle();
    }
}
