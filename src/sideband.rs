// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Sideband message value types and the message transport interface.
//!
//! Sideband messages are the out-of-band management channel of an MST
//! topology: they travel over DPCD mailbox registers, are relayed hop by
//! hop, and carry the discovery and payload-management protocol. The wire
//! encoding (headers, CRCs, splitting) is the platform's business; this
//! module models the decoded request and reply bodies plus the
//! [`MessageManager`] trait the connector posts them through.

use crate::address::{Address, Guid};

/// Caller-chosen identifier correlating a posted request with its
/// completion callback.
pub type MessageToken = u64;

/// Downstream peer device type reported per port by LINK_ADDRESS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerType {
    None,
    /// Upstream source or SST-only peer.
    Source,
    /// Another MST branch device.
    Branch,
    /// DisplayPort sink.
    Sink,
    /// DP-to-legacy (TMDS/VGA) converter dongle.
    LegacyConverter,
    Wireless,
}

impl PeerType {
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::Source,
            2 => Self::Branch,
            3 => Self::Sink,
            4 => Self::LegacyConverter,
            5 | 6 => Self::Wireless,
            _ => Self::None,
        }
    }

    /// Ports with these peers get their own topology node.
    pub fn is_downstream_device(&self) -> bool {
        matches!(self, Self::Branch | Self::Sink | Self::LegacyConverter | Self::Wireless)
    }
}

/// One port entry of a LINK_ADDRESS reply.
#[derive(Clone, Copy, Debug)]
pub struct PortInfo {
    pub port: u8,
    pub input_port: bool,
    pub internal: bool,
    pub peer_type: PeerType,
    /// Peer speaks sideband messages itself (branches do, sinks may not).
    pub message_capable: bool,
    pub dpcd_revision: (u8, u8),
    pub peer_guid: Guid,
    /// Legacy (TMDS/VGA) signal behind a converter.
    pub legacy: bool,
    pub num_sdp_streams: u8,
    pub num_sdp_stream_sinks: u8,
}

/// Decoded LINK_ADDRESS reply body.
#[derive(Clone, Debug)]
pub struct LinkAddressReply {
    pub guid: Guid,
    pub ports: Vec<PortInfo>,
}

/// Decoded CONNECTION_STATUS_NOTIFY up-request body.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionStatusNotify {
    /// GUID of the branch reporting the change.
    pub guid: Guid,
    pub port: u8,
    pub plugged: bool,
    pub message_capable: bool,
    pub input_port: bool,
    pub peer_type: PeerType,
    pub legacy: bool,
}

/// Sideband request bodies the connector originates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SidebandRequest {
    /// Enumerate the downstream ports of the branch at the target address.
    LinkAddress,
    RemoteDpcdRead {
        port: u8,
        dpcd_address: u32,
        len: u16,
    },
    RemoteDpcdWrite {
        port: u8,
        dpcd_address: u32,
        data: Vec<u8>,
    },
    PowerUpPhy {
        port: u8,
    },
    PowerDownPhy {
        port: u8,
    },
    AllocatePayload {
        port: u8,
        vc_id: u8,
        pbn: u32,
    },
    /// Broadcast. Resets payload accounting in every branch.
    ClearPayloadIdTable,
}

/// Reply bodies, paired with the request kinds that produce them.
#[derive(Clone, Debug)]
pub enum SidebandReply {
    LinkAddress(LinkAddressReply),
    RemoteDpcdRead(Vec<u8>),
    /// ACK without a body (writes, PHY power, payload, table clear).
    Ack,
}

/// NAK reason codes, plus a synthetic timeout for requests that never got
/// a reply at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NakReason {
    WriteFailure,
    InvalidRead,
    Crc,
    BadParam,
    Defer,
    LinkFailure,
    NoResources,
    DpcdFail,
    I2cNak,
    AllocateFail,
    Timeout,
}

impl NakReason {
    /// Only deferred and timed-out requests are worth retrying; every
    /// other reason is terminal for the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Defer | Self::Timeout)
    }
}

pub type SidebandResult = Result<SidebandReply, NakReason>;

/// Sideband message transport collaborator.
///
/// Down-requests are posted asynchronously and complete through
/// `Connector::message_completed` with the posting token, or sent
/// synchronously where the protocol is a blocking handshake (payload
/// allocation, table clear). Up-requests (CSN) arrive through
/// `Connector::process_up_request`.
pub trait MessageManager {
    /// Queues a down-request to `address`. Completion is reported exactly
    /// once per token, including after `cancel`.
    fn post(&mut self, token: MessageToken, address: &Address, request: SidebandRequest);

    /// Abandons an outstanding request. The completion still fires, with
    /// [`NakReason::Timeout`].
    fn cancel(&mut self, token: MessageToken);

    /// Sends a down-request and blocks for its reply.
    fn send(&mut self, address: &Address, request: SidebandRequest) -> SidebandResult;

    /// Acknowledges an up-request by sequence number so the branch retires
    /// it and can report further changes. Returns `false` when the reply
    /// could not be handed to the transport; the caller retries.
    fn post_up_reply(&mut self, address: &Address, request_id: u8) -> bool;
}
