// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Topology discovery over sideband messages.
//!
//! Discovery walks the tree breadth-first: a LINK_ADDRESS to a branch
//! enumerates its downstream ports, every message-capable branch behind a
//! port gets its own LINK_ADDRESS, and every sink gets a two-step
//! power-up-then-read probe. Each in-flight step is one [`Detection`]
//! keyed by its message token; completions drive it forward, transient
//! NAKs re-arm it through a timer, and terminal completion removes it.
//! The walk is complete exactly when no detections remain outstanding.
//!
//! Detections never call back into the connector. They queue
//! [`DiscoveryEvent`]s that the connector drains after every completion.

use std::collections::{HashMap, VecDeque};

use crate::address::{Address, Guid};
use crate::dpcd::SET_POWER;
use crate::sideband::{
    LinkAddressReply, MessageManager, MessageToken, PeerType, PortInfo, SidebandReply, SidebandRequest,
    SidebandResult,
};
use crate::timer::{Timer, TimerTag};
use crate::topology::{DeviceSnapshot, PortMap};
use crate::util::RegField;

// Layout of the probed capability bytes, relative to DPCD_REV.
type RevMajor = RegField<0, 7, 4>;
type RevMinor = RegField<0, 3, 0>;
type MaxLaneCount = RegField<2, 4, 0>;

/// LINK_ADDRESS attempts per branch.
const LINK_ADDRESS_RETRIES: u32 = 7;

/// Attempts per sink-probe message.
const SINK_MESSAGE_RETRIES: u32 = 3;

/// Delay before re-posting after a transient NAK.
const RETRY_BACKOFF_MS: u32 = 100;

/// Timer tags `TAG_DISCOVERY_BASE + token` belong to discovery retries.
pub(crate) const TAG_DISCOVERY_BASE: TimerTag = 0x1000;

/// DPCD offset of the dual-mode dongle capability block.
const DONGLE_CAPS: u32 = 0x080;

pub(crate) fn timer_tag(token: MessageToken) -> TimerTag {
    TAG_DISCOVERY_BASE + token
}

/// What one completed detection step found.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    DeviceFound(DeviceSnapshot),
    /// The node at the address never answered. The walk continues without
    /// it.
    DetectionFailed(Address),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitLinkAddress,
    AwaitPowerUp,
    AwaitCaps,
}

struct Detection {
    /// Message target. For sink probes this is the parent branch; the
    /// probed sink is `snapshot.address`.
    target: Address,
    phase: Phase,
    retries_left: u32,
    request: SidebandRequest,
    /// Sink snapshot under construction; `None` for branch detections.
    snapshot: Option<DeviceSnapshot>,
    /// DPCD revision reported for this node by its parent.
    dpcd_hint: (u8, u8),
}

/// All in-flight detections plus the queue of their findings.
#[derive(Default)]
pub struct DiscoveryManager {
    detections: HashMap<MessageToken, Detection>,
    events: VecDeque<DiscoveryEvent>,
    next_token: MessageToken,
    started: bool,
}

impl DiscoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets for a fresh walk. Outstanding tokens are abandoned; late
    /// completions for them are ignored.
    pub fn begin(&mut self) {
        self.detections.clear();
        self.events.clear();
        self.started = true;
    }

    pub fn abandon(&mut self, messages: &mut dyn MessageManager, timer: &mut dyn Timer) {
        for token in self.detections.keys() {
            messages.cancel(*token);
            timer.cancel(timer_tag(*token));
        }
        self.detections.clear();
        self.events.clear();
        self.started = false;
    }

    /// The walk has started and nothing is outstanding.
    pub fn is_complete(&self) -> bool {
        self.started && self.detections.is_empty()
    }

    pub fn pop_event(&mut self) -> Option<DiscoveryEvent> {
        self.events.pop_front()
    }

    fn post(&mut self, detection: Detection, messages: &mut dyn MessageManager) {
        let token = self.next_token;
        self.next_token += 1;
        messages.post(token, &detection.target, detection.request.clone());
        self.detections.insert(token, detection);
    }

    /// Starts enumerating the branch at `address`.
    pub fn detect_branch(&mut self, address: Address, dpcd_hint: (u8, u8), messages: &mut dyn MessageManager) {
        log::debug!("LINK_ADDRESS to {address}");
        self.post(
            Detection {
                target: address,
                phase: Phase::AwaitLinkAddress,
                retries_left: LINK_ADDRESS_RETRIES,
                request: SidebandRequest::LinkAddress,
                snapshot: None,
                dpcd_hint,
            },
            messages,
        );
    }

    /// Starts probing the sink behind `port` of the branch at `parent`.
    pub fn detect_sink(&mut self, parent: Address, port: &PortInfo, messages: &mut dyn MessageManager) {
        let snapshot = DeviceSnapshot {
            address: parent.child(port.port),
            peer_type: port.peer_type,
            branch: false,
            legacy: port.legacy,
            message_capable: port.message_capable,
            dpcd_revision: port.dpcd_revision,
            guid: port.peer_guid,
            port_map: PortMap::default(),
            video_sink: true,
            num_sdp_streams: port.num_sdp_streams,
            num_sdp_stream_sinks: port.num_sdp_stream_sinks,
            max_tmds_clock_khz: 0,
            max_link: None,
        };
        self.post(
            Detection {
                target: parent,
                phase: Phase::AwaitPowerUp,
                retries_left: SINK_MESSAGE_RETRIES,
                request: SidebandRequest::RemoteDpcdWrite {
                    port: port.port,
                    dpcd_address: SET_POWER,
                    data: vec![0x01],
                },
                snapshot: Some(snapshot),
                dpcd_hint: port.dpcd_revision,
            },
            messages,
        );
    }

    /// Drives the detection owning `token` with its completion. Unknown
    /// tokens (abandoned walks) are ignored.
    pub fn message_completed(
        &mut self,
        token: MessageToken,
        result: SidebandResult,
        messages: &mut dyn MessageManager,
        timer: &mut dyn Timer,
    ) {
        let mut detection = match self.detections.remove(&token) {
            Some(detection) => detection,
            None => return,
        };

        // Transient failures re-arm the same request after a backoff.
        if let Err(reason) = &result {
            if reason.is_transient() && detection.retries_left > 0 {
                detection.retries_left -= 1;
                timer.queue(timer_tag(token), RETRY_BACKOFF_MS);
                self.detections.insert(token, detection);
                return;
            }
        }

        match detection.phase {
            Phase::AwaitLinkAddress => match result {
                Ok(SidebandReply::LinkAddress(reply)) => {
                    self.process_link_address(&detection, reply, messages)
                }
                _ => {
                    log::warn!("LINK_ADDRESS to {} failed", detection.target);
                    self.events.push_back(DiscoveryEvent::DetectionFailed(detection.target));
                }
            },
            // The power-up write may legitimately NAK on legacy sinks;
            // the probe falls through to the capability read either way.
            Phase::AwaitPowerUp => {
                let snapshot = match detection.snapshot.take() {
                    Some(snapshot) => snapshot,
                    None => return,
                };
                let port = snapshot.address.tail();
                let dpcd_address = if snapshot.legacy { DONGLE_CAPS } else { crate::dpcd::DPCD_REV };
                self.post(
                    Detection {
                        target: detection.target,
                        phase: Phase::AwaitCaps,
                        retries_left: SINK_MESSAGE_RETRIES,
                        request: SidebandRequest::RemoteDpcdRead {
                            port,
                            dpcd_address,
                            len: 16,
                        },
                        snapshot: Some(snapshot),
                        dpcd_hint: detection.dpcd_hint,
                    },
                    messages,
                );
            }
            Phase::AwaitCaps => {
                let mut snapshot = match detection.snapshot.take() {
                    Some(snapshot) => snapshot,
                    None => return,
                };
                match result {
                    Ok(SidebandReply::RemoteDpcdRead(data)) => {
                        if snapshot.legacy {
                            if data.len() >= 2 {
                                // Max TMDS clock in 2.5 MHz units.
                                snapshot.max_tmds_clock_khz = data[1] as u32 * 2500;
                            }
                        } else if !data.is_empty() {
                            snapshot.dpcd_revision = (RevMajor::get_field(&data), RevMinor::get_field(&data));
                            if data.len() >= 3 {
                                let lanes = MaxLaneCount::get_field(&data);
                                if let Some(rate) = crate::dpcd::link_rate_from_dpcd(data[1]) {
                                    snapshot.max_link = Some((lanes, rate));
                                }
                            }
                        }
                    }
                    _ => {
                        // Sinks that refuse remote reads are still real;
                        // report them with the parent-provided attributes.
                        log::warn!("capability read for {} failed", snapshot.address);
                    }
                }
                self.events.push_back(DiscoveryEvent::DeviceFound(snapshot));
            }
        }
    }

    /// Re-posts the request whose backoff expired.
    pub fn retry_expired(&mut self, tag: TimerTag, messages: &mut dyn MessageManager) {
        let token = tag - TAG_DISCOVERY_BASE;
        if let Some(detection) = self.detections.get(&token) {
            messages.post(token, &detection.target, detection.request.clone());
        }
    }

    fn process_link_address(
        &mut self,
        detection: &Detection,
        reply: LinkAddressReply,
        messages: &mut dyn MessageManager,
    ) {
        let mut port_map = PortMap::default();
        for port in &reply.ports {
            port_map.valid |= 1 << port.port;
            if port.input_port {
                port_map.input |= 1 << port.port;
            }
            if port.internal {
                port_map.internal |= 1 << port.port;
            }
            if !port.input_port && port.peer_type.is_downstream_device() {
                port_map.attached |= 1 << port.port;
            }
        }

        let guid = if reply.guid.is_zero() {
            Guid::synthesize()
        } else {
            reply.guid
        };

        self.events.push_back(DiscoveryEvent::DeviceFound(DeviceSnapshot {
            address: detection.target,
            peer_type: PeerType::Branch,
            branch: true,
            legacy: false,
            message_capable: true,
            dpcd_revision: detection.dpcd_hint,
            guid,
            port_map,
            video_sink: false,
            num_sdp_streams: 0,
            num_sdp_stream_sinks: 0,
            max_tmds_clock_khz: 0,
            max_link: None,
        }));

        for port in reply.ports.iter().filter(|p| !p.input_port) {
            if !port.peer_type.is_downstream_device() {
                continue;
            }
            if port.peer_type == PeerType::Branch && port.message_capable {
                self.detect_branch(detection.target.child(port.port), port.dpcd_revision, messages);
            } else {
                self.detect_sink(detection.target, port, messages);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sideband::NakReason;
    use crate::testutil::{branch_reply, sink_port, MockMessages, MockTimer};

    fn found_addresses(mgr: &mut DiscoveryManager) -> Vec<Address> {
        let mut found = Vec::new();
        while let Some(event) = mgr.pop_event() {
            if let DiscoveryEvent::DeviceFound(snapshot) = event {
                found.push(snapshot.address);
            }
        }
        found
    }

    #[test]
    fn single_branch_with_sinks() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        assert!(mgr.is_complete());

        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        assert!(!mgr.is_complete());

        let (token, _, _) = messages.take_posted().remove(0);
        let reply = branch_reply(&[sink_port(1, false), sink_port(2, true)]);
        mgr.message_completed(token, Ok(reply), &mut messages, &mut timer);

        // The branch is reported and two sink probes go out.
        assert_eq!(found_addresses(&mut mgr), vec![Address::root()]);
        let probes = messages.take_posted();
        assert_eq!(probes.len(), 2);
        assert!(matches!(probes[0].2, SidebandRequest::RemoteDpcdWrite { .. }));

        // Answer power-ups, then capability reads.
        for (token, _, _) in probes {
            mgr.message_completed(token, Ok(SidebandReply::Ack), &mut messages, &mut timer);
        }
        let reads = messages.take_posted();
        assert_eq!(reads.len(), 2);
        for (token, _, request) in reads {
            let data = match request {
                SidebandRequest::RemoteDpcdRead { dpcd_address: 0x080, .. } => vec![0x00, 60],
                _ => vec![0x14],
            };
            mgr.message_completed(token, Ok(SidebandReply::RemoteDpcdRead(data)), &mut messages, &mut timer);
        }

        assert!(mgr.is_complete());
        let mut found = Vec::new();
        while let Some(DiscoveryEvent::DeviceFound(s)) = mgr.pop_event() {
            found.push(s);
        }
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].address, Address::new(&[1]));
        assert_eq!(found[0].dpcd_revision, (1, 4));
        assert_eq!(found[1].address, Address::new(&[2]));
        assert_eq!(found[1].max_tmds_clock_khz, 150_000);
    }

    #[test]
    fn nested_branches_complete_leaf_last() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        let (token, _, _) = messages.take_posted().remove(0);

        let mut hub_port = sink_port(3, false);
        hub_port.peer_type = PeerType::Branch;
        hub_port.message_capable = true;
        mgr.message_completed(token, Ok(branch_reply(&[hub_port])), &mut messages, &mut timer);

        let (token, address, request) = messages.take_posted().remove(0);
        assert_eq!(address, Address::new(&[3]));
        assert_eq!(request, SidebandRequest::LinkAddress);
        assert!(!mgr.is_complete());

        mgr.message_completed(token, Ok(branch_reply(&[])), &mut messages, &mut timer);
        assert!(mgr.is_complete());
        assert_eq!(found_addresses(&mut mgr), vec![Address::root(), Address::new(&[3])]);
    }

    #[test]
    fn transient_naks_retry_with_backoff() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        let (token, _, _) = messages.take_posted().remove(0);

        mgr.message_completed(token, Err(NakReason::Defer), &mut messages, &mut timer);
        assert!(!mgr.is_complete());
        let tag = timer.take_queued().remove(0).0;
        assert_eq!(tag, timer_tag(token));

        mgr.retry_expired(tag, &mut messages);
        let reposted = messages.take_posted();
        assert_eq!(reposted[0].0, token);
        assert_eq!(reposted[0].2, SidebandRequest::LinkAddress);
    }

    #[test]
    fn retries_are_bounded() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        let (token, _, _) = messages.take_posted().remove(0);

        for _ in 0..LINK_ADDRESS_RETRIES {
            mgr.message_completed(token, Err(NakReason::Timeout), &mut messages, &mut timer);
            let tag = timer.take_queued().remove(0).0;
            mgr.retry_expired(tag, &mut messages);
            messages.take_posted();
        }

        // The budget is spent; the next failure is terminal.
        mgr.message_completed(token, Err(NakReason::Timeout), &mut messages, &mut timer);
        assert!(mgr.is_complete());
        assert!(matches!(
            mgr.pop_event(),
            Some(DiscoveryEvent::DetectionFailed(addr)) if addr == Address::root()
        ));
    }

    #[test]
    fn terminal_nak_fails_immediately() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        let (token, _, _) = messages.take_posted().remove(0);

        mgr.message_completed(token, Err(NakReason::BadParam), &mut messages, &mut timer);
        assert!(mgr.is_complete());
        assert!(matches!(mgr.pop_event(), Some(DiscoveryEvent::DetectionFailed(_))));
    }

    #[test]
    fn sink_surviving_failed_read_is_still_reported() {
        let mut messages = MockMessages::new();
        let mut timer = MockTimer::new();
        let mut mgr = DiscoveryManager::new();

        mgr.begin();
        mgr.detect_branch(Address::root(), (1, 2), &mut messages);
        let (token, _, _) = messages.take_posted().remove(0);
        mgr.message_completed(token, Ok(branch_reply(&[sink_port(1, false)])), &mut messages, &mut timer);
        mgr.pop_event();

        // Power-up NAKs terminally; the probe falls through to the read.
        let (token, _, _) = messages.take_posted().remove(0);
        mgr.message_completed(token, Err(NakReason::WriteFailure), &mut messages, &mut timer);
        let (token, _, request) = messages.take_posted().remove(0);
        assert!(matches!(request, SidebandRequest::RemoteDpcdRead { .. }));

        // So does the read; the device is reported regardless.
        mgr.message_completed(token, Err(NakReason::DpcdFail), &mut messages, &mut timer);
        assert!(mgr.is_complete());
        assert!(matches!(mgr.pop_event(), Some(DiscoveryEvent::DeviceFound(_))));
    }
}
