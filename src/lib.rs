// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! This crate implements the source-side link management core of a
//! [DisplayPort] connector: link training with fallback, Multi-Stream
//! Transport topology discovery and payload bookkeeping, and bandwidth
//! admission control for the modes a driver wants to drive. Everything
//! platform specific (AUX transactions, GPU registers, sideband framing,
//! timers) is reached through collaborator traits, so the crate itself
//! never touches hardware.
//!
//! The entry point is [`Connector`]: one instance per physical DP output,
//! driven by hotplug and message-completion notifications and queried
//! through the compound-query admission API.
//!
//! [DisplayPort]: https://en.wikipedia.org/wiki/DisplayPort

mod bandwidth;
mod connector;
mod discovery;
mod events;
mod quirks;
mod timeslot;
mod topology;
mod training;

pub use bandwidth::{AttachInfo, DscMode, QueryError};
pub use connector::{Connector, ConnectorPolicy, StreamError};
pub use events::{EventSink, PendingFlags};
pub use quirks::{QuirkFlags, Quirks};
pub use timeslot::{ActError, Group, PayloadTable, TimeslotError};
pub use topology::{
    DeviceId, DeviceRecord, DeviceSnapshot, HopBandwidth, PortMap, QueryScratch, Reconciliation,
};

pub mod address;
pub mod dpcd;
pub mod dsc;
pub mod edid;
pub mod link;
pub mod mainlink;
pub mod sideband;
pub mod timer;
pub mod util;

#[cfg(test)]
mod testutil;
