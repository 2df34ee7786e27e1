// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Deferred event delivery to the display driver.
//!
//! Nothing is ever notified from inside a state-machine step. Work that
//! discovers a reportable change sets a pending flag and queues a zero
//! delay timer; the expiry drains every pending flag in one pass, in a
//! fixed order the driver depends on:
//!
//! 1. lost devices (leaf first)
//! 2. connector-level changes and per-device transitions
//! 3. new devices
//! 4. detection complete
//!
//! While any payload group has unflushed timeslot changes the drain is
//! deferred; it re-arms itself and runs once the table has settled.
//!
//! A lost device's record is freed only here, after its notification has
//! returned and no group references it, so the driver can still inspect
//! the device from inside the callback.

use bitflags::bitflags;

use crate::connector::{Connector, TAG_FIRE_EVENTS};
use crate::topology::DeviceId;

bitflags! {
    /// Per-device notification state, consumed by the dispatcher.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PendingFlags: u8 {
        const NEW = 1 << 0;
        const LOST = 1 << 1;
        const ZOMBIE = 1 << 2;
        const HDCP_CAP_DONE = 1 << 3;
        const MUST_DISCONNECT = 1 << 4;
    }
}

/// Display-driver notification interface. All callbacks arrive from
/// `Connector::timer_expired`, never from inside a driver-initiated call.
pub trait EventSink {
    fn new_device(&mut self, id: DeviceId);
    /// `id` is still dereferenceable during this call and is freed right
    /// after it returns unless the device holds a stream.
    fn lost_device(&mut self, id: DeviceId);
    fn zombie_changed(&mut self, id: DeviceId, zombie: bool);
    fn hdcp_capability_done(&mut self, id: DeviceId);
    /// The link can no longer carry `id`'s committed stream; the driver
    /// must disable it.
    fn must_disconnect(&mut self, id: DeviceId);
    /// The assessed link bandwidth changed while devices were connected.
    fn bandwidth_changed(&mut self);
    fn cable_ok_changed(&mut self, ok: bool);
    fn detect_complete(&mut self);
}

impl Connector {
    /// Arms the coalescing dispatcher. Any number of calls before the
    /// timer fires produce a single drain.
    pub(crate) fn queue_fire_events(&mut self) {
        if self.pending_fire_events {
            return;
        }
        self.pending_fire_events = true;
        self.timer.queue(TAG_FIRE_EVENTS, 0);
    }

    pub(crate) fn fire_events(&mut self) {
        self.pending_fire_events = false;

        // Timeslot writes still in flight; deliver once the table settles.
        if self.payload.groups().iter().any(|g| g.hardware_dirty) {
            self.queue_fire_events();
            return;
        }

        let mut lost: Vec<(usize, DeviceId)> = Vec::new();
        for id in self.topology.ids() {
            if let Some(record) = self.topology.get_mut(id) {
                if record.pending.contains(PendingFlags::LOST) {
                    record.pending.remove(PendingFlags::LOST);
                    lost.push((record.address.size(), id));
                }
            }
        }
        // Deepest first, so children are reported lost before their parent.
        lost.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in lost {
            log::debug!("lost device {id}");
            self.event_sink.lost_device(id);
            if let Some(record) = self.topology.get(id) {
                debug_assert!(record.group.is_none(), "lost device still grouped");
                if record.group.is_none() {
                    self.topology.remove(id);
                }
            }
        }

        if let Some(ok) = self.pending_cable_ok.take() {
            self.event_sink.cable_ok_changed(ok);
        }

        if self.pending_bandwidth_change {
            self.pending_bandwidth_change = false;
            self.event_sink.bandwidth_changed();
        }

        for id in self.topology.ids() {
            let mut zombie = None;
            let mut hdcp = false;
            let mut must_disconnect = false;
            if let Some(record) = self.topology.get_mut(id) {
                if record.pending.contains(PendingFlags::ZOMBIE) {
                    record.pending.remove(PendingFlags::ZOMBIE);
                    zombie = Some(record.zombie);
                }
                if record.pending.contains(PendingFlags::HDCP_CAP_DONE) {
                    record.pending.remove(PendingFlags::HDCP_CAP_DONE);
                    hdcp = true;
                }
                if record.pending.contains(PendingFlags::MUST_DISCONNECT) {
                    record.pending.remove(PendingFlags::MUST_DISCONNECT);
                    must_disconnect = true;
                }
            }
            if let Some(state) = zombie {
                self.event_sink.zombie_changed(id, state);
            }
            if hdcp {
                self.event_sink.hdcp_capability_done(id);
            }
            if must_disconnect {
                log::warn!("stream on {id} no longer fits the link");
                self.event_sink.must_disconnect(id);
            }
        }

        for id in self.topology.ids() {
            let is_new = match self.topology.get_mut(id) {
                Some(record) if record.pending.contains(PendingFlags::NEW) => {
                    record.pending.remove(PendingFlags::NEW);
                    true
                }
                _ => false,
            };
            if is_new {
                log::debug!("new device {id}");
                self.event_sink.new_device(id);
            }
        }

        if self.plugged && self.discovery.is_complete() && !self.detect_complete_notified {
            self.detect_complete_notified = true;
            log::info!("topology detection complete, {} devices", self.topology.len());
            self.event_sink.detect_complete();
        }
    }
}
