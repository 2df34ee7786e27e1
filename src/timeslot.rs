// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! MST payload timeslot accounting.
//!
//! Each stream group owns one contiguous run of timeslots out of the 63
//! usable slots per MTP frame. The table is kept left-compacted: freeing a
//! run shifts every later run down so free slots are always one contiguous
//! region at the top. Software state changes here never touch hardware by
//! themselves; changed groups are marked dirty and pushed out together by
//! `flush_timeslots`, followed by the ACT handshake.

use thiserror::Error;

use crate::connector::Connector;
use crate::link::PAYLOAD_SLOTS;
use crate::sideband::SidebandRequest;
use crate::topology::DeviceId;

/// ACT acknowledgment poll budget, 1 ms per poll.
const ACT_POLL_BUDGET: u32 = 100;

/// CLEAR_PAYLOAD_ID_TABLE broadcast attempts.
const CLEAR_PAYLOAD_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TimeslotError {
    #[error("no group with that stream id")]
    NoSuchGroup,
    #[error("stream id already in use")]
    DuplicateStream,
    #[error("not enough free timeslots")]
    InsufficientSlots,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ActError {
    #[error("sink did not acknowledge allocation change")]
    Timeout,
}

/// One stream group and its timeslot run. `count == 0` means no slots are
/// currently held.
#[derive(Clone, Debug)]
pub struct Group {
    pub stream_id: u8,
    pub devices: Vec<DeviceId>,
    pub begin: u8,
    pub count: u8,
    pub pbn: u32,
    /// Software state differs from what hardware was last told.
    pub hardware_dirty: bool,
    pub head_attached: bool,
    /// Allocation was requested while the link was down and will be
    /// replayed once the link is back.
    pub deferred: bool,
}

impl Group {
    fn new(stream_id: u8, devices: Vec<DeviceId>) -> Self {
        Group {
            stream_id,
            devices,
            begin: 0,
            count: 0,
            pbn: 0,
            hardware_dirty: false,
            head_attached: false,
            deferred: false,
        }
    }

    pub fn has_slots(&self) -> bool {
        self.count > 0
    }
}

/// The 63-slot payload table and its groups.
#[derive(Default)]
pub struct PayloadTable {
    groups: Vec<Group>,
}

impl PayloadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, stream_id: u8) -> Option<&Group> {
        self.groups.iter().find(|g| g.stream_id == stream_id)
    }

    pub fn group_mut(&mut self, stream_id: u8) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.stream_id == stream_id)
    }

    pub fn add_group(&mut self, stream_id: u8, devices: Vec<DeviceId>) -> Result<(), TimeslotError> {
        if stream_id == 0 || self.group(stream_id).is_some() {
            return Err(TimeslotError::DuplicateStream);
        }
        self.groups.push(Group::new(stream_id, devices));
        Ok(())
    }

    /// Frees the group's slots and forgets the group.
    pub fn remove_group(&mut self, stream_id: u8) -> Result<Group, TimeslotError> {
        self.free(stream_id)?;
        let pos = self
            .groups
            .iter()
            .position(|g| g.stream_id == stream_id)
            .ok_or(TimeslotError::NoSuchGroup)?;
        Ok(self.groups.remove(pos))
    }

    pub fn used_slots(&self) -> u8 {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn free_slots(&self) -> u8 {
        PAYLOAD_SLOTS - self.used_slots()
    }

    /// First slot past the highest allocated run. Slot 0 is reserved.
    fn first_free_slot(&self) -> u8 {
        self.groups
            .iter()
            .filter(|g| g.has_slots())
            .map(|g| g.begin + g.count)
            .max()
            .unwrap_or(1)
    }

    /// Gives `slots` timeslots worth `pbn` to the group. The run lands at
    /// the top of the table.
    pub fn allocate(&mut self, stream_id: u8, slots: u8, pbn: u32) -> Result<(), TimeslotError> {
        if slots > self.free_slots() {
            return Err(TimeslotError::InsufficientSlots);
        }
        let begin = self.first_free_slot();
        let group = self.group_mut(stream_id).ok_or(TimeslotError::NoSuchGroup)?;
        debug_assert!(!group.has_slots(), "group already holds slots");

        group.begin = begin;
        group.count = slots;
        group.pbn = pbn;
        group.hardware_dirty = true;
        Ok(())
    }

    /// Releases the group's slots and compacts the table, shifting every
    /// later run down by the freed count.
    pub fn free(&mut self, stream_id: u8) -> Result<(), TimeslotError> {
        let (begin, count) = {
            let group = self.group_mut(stream_id).ok_or(TimeslotError::NoSuchGroup)?;
            if !group.has_slots() {
                return Ok(());
            }
            let run = (group.begin, group.count);
            group.begin = 0;
            group.count = 0;
            group.pbn = 0;
            group.hardware_dirty = true;
            run
        };

        for group in &mut self.groups {
            if group.has_slots() && group.begin > begin {
                group.begin -= count;
                group.hardware_dirty = true;
            }
        }
        Ok(())
    }

    /// Takes over a payload the firmware left running on a lit head. Until
    /// the table is cleared the whole frame is assumed occupied.
    pub fn assume_firmware_payload(&mut self, stream_id: u8) -> Result<(), TimeslotError> {
        self.free_all();
        let group = self.group_mut(stream_id).ok_or(TimeslotError::NoSuchGroup)?;
        group.begin = 1;
        group.count = PAYLOAD_SLOTS;
        group.hardware_dirty = false;
        Ok(())
    }

    /// Zeroes every allocation, marking touched groups dirty.
    pub fn free_all(&mut self) {
        for group in &mut self.groups {
            if group.has_slots() {
                group.begin = 0;
                group.count = 0;
                group.pbn = 0;
                group.hardware_dirty = true;
            }
        }
    }

    /// Checks the structural invariants: conservation and left-compaction.
    #[cfg(test)]
    fn assert_compact(&self) {
        assert!(self.used_slots() <= PAYLOAD_SLOTS);
        let mut runs: Vec<(u8, u8)> = self
            .groups
            .iter()
            .filter(|g| g.has_slots())
            .map(|g| (g.begin, g.count))
            .collect();
        runs.sort();
        let mut next = 1;
        for (begin, count) in runs {
            assert_eq!(begin, next, "table not left-compacted");
            next += count;
        }
    }
}

impl Connector {
    /// Pushes every dirty group's run to the source payload table and the
    /// sink's DPCD payload registers.
    pub(crate) fn flush_timeslots(&mut self) {
        for i in 0..self.payload.groups.len() {
            let (stream_id, begin, count, dirty) = {
                let g = &self.payload.groups[i];
                (g.stream_id, g.begin, g.count, g.hardware_dirty)
            };
            if !dirty {
                continue;
            }
            log::debug!("stream {stream_id}: slots {begin}+{count}");
            self.mainlink.configure_stream(stream_id, begin, count);
            if !self.dpcd.payload_allocate(stream_id, begin, count) {
                log::warn!("stream {stream_id}: sink payload table write failed");
            }
            self.payload.groups[i].hardware_dirty = false;
        }
    }

    /// Triggers ACT and polls for the sink's acknowledgment. One repeat
    /// trigger is attempted before giving up.
    pub(crate) fn complete_act(&mut self) -> Result<(), ActError> {
        for attempt in 0..2 {
            self.dpcd.payload_table_clear_act();
            self.mainlink.trigger_act();
            for _ in 0..ACT_POLL_BUDGET {
                if self.dpcd.payload_act_received() {
                    return Ok(());
                }
                self.timer.sleep_ms(1);
            }
            log::warn!("ACT not acknowledged (attempt {})", attempt + 1);
        }
        Err(ActError::Timeout)
    }

    /// Broadcasts CLEAR_PAYLOAD_ID_TABLE and resets local accounting.
    /// Transient NAKs are retried a bounded number of times.
    pub(crate) fn clear_payload_table(&mut self) -> bool {
        let mut cleared = false;
        for _ in 0..CLEAR_PAYLOAD_RETRIES {
            match self
                .messages
                .send(&crate::address::Address::root(), SidebandRequest::ClearPayloadIdTable)
            {
                Ok(_) => {
                    cleared = true;
                    break;
                }
                Err(reason) if reason.is_transient() => continue,
                Err(reason) => {
                    log::warn!("CLEAR_PAYLOAD_ID_TABLE nacked: {reason:?}");
                    break;
                }
            }
        }
        self.dpcd.payload_table_clear_act();
        self.payload.free_all();
        for group in &mut self.payload.groups {
            group.hardware_dirty = false;
        }
        cleared
    }
}
