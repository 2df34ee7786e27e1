// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Link assessment and training with fallback.
//!
//! Assessment answers "what is the best configuration this sink and this
//! source can jointly run" by actually training to it; the result is the
//! highest assessed configuration all admission decisions are based on.
//! Training to a target may end below the request: the caller detects
//! fallback by comparing the requested configuration against the active
//! one afterwards. Total failure leaves the canonical invalid
//! configuration (zero lanes) active, never a stale one.

use crate::connector::Connector;
use crate::dpcd::PowerState;
use crate::events::PendingFlags;
use crate::link::{LinkConfiguration, LinkRate, PAYLOAD_SLOTS};
use crate::mainlink::TrainingKind;
use crate::quirks::QuirkFlags;
use crate::topology::DeviceId;

/// Post-LT adjustment runs at most this many rounds inside its 200 ms
/// budget.
const POST_LT_ADJUST_ROUNDS: u32 = 6;
const POST_LT_ADJUST_POLL_MS: u32 = 32;

impl Connector {
    /// Best configuration both ends advertise, before proving it works.
    pub(crate) fn max_common_config(&self) -> LinkConfiguration {
        let lanes = self.mainlink.max_lane_count().min(self.dpcd.max_lane_count());
        let sink_max = self.dpcd.max_link_rate();
        let source_max = self.mainlink.max_link_rate();
        let rate = LinkRate::ALL
            .iter()
            .rev()
            .copied()
            .find(|r| *r <= sink_max && *r <= source_max && self.mainlink.is_rate_supported(*r));

        match rate {
            Some(rate) if matches!(lanes, 1 | 2 | 4) => {
                let mut lc = LinkConfiguration::new(lanes, rate);
                lc.enhanced_framing = self.dpcd.enhanced_framing();
                lc.downspread = self.dpcd.downspread_supported();
                lc
            }
            _ => LinkConfiguration::invalid(),
        }
    }

    /// Determines the highest assessed configuration by training to the
    /// advertised maximum and falling back as needed.
    ///
    /// With streams on the air the link cannot be retrained; the
    /// advertised maximum is recorded as assessed and flagged guessed.
    pub(crate) fn assess_link(&mut self) {
        let previous = self.highest_assessed;

        if self.dpcd.is_offline() {
            self.highest_assessed = LinkConfiguration::invalid();
            self.active_link = LinkConfiguration::invalid();
            self.link_guessed = false;
            self.note_assessed_change(previous);
            return;
        }

        let target = self.max_common_config();

        if self.payload.groups().iter().any(|g| g.has_slots()) {
            log::info!("streams active, assuming {target} without training");
            self.highest_assessed = target;
            self.link_guessed = true;
            self.note_assessed_change(previous);
            return;
        }

        self.mainlink.set_flush_mode(true);
        self.train(&target, false);
        self.mainlink.set_flush_mode(false);

        self.highest_assessed = self.active_link;
        self.link_guessed = false;
        log::info!("assessed link: {}", self.highest_assessed);
        self.note_assessed_change(previous);

        // A link that assessed below what the sink advertises points at
        // the cable.
        let cable_ok = self.active_link == target;
        if self.last_cable_ok != Some(cable_ok) {
            self.last_cable_ok = Some(cable_ok);
            self.pending_cable_ok = Some(cable_ok);
            self.queue_fire_events();
        }
    }

    /// Flags a bandwidth change for the driver when assessment moved the
    /// link while devices are connected, and marks every stream the new
    /// table can no longer hold for forced disconnect.
    fn note_assessed_change(&mut self, previous: LinkConfiguration) {
        if self.topology.is_empty() {
            return;
        }
        if self.highest_assessed.usable_data_rate() == previous.usable_data_rate() {
            return;
        }
        self.pending_bandwidth_change = true;

        let mut used: u32 = 0;
        let mut doomed: Vec<DeviceId> = Vec::new();
        for group in self.payload.groups() {
            if !group.has_slots() {
                continue;
            }
            let fits = match self.highest_assessed.slots_for_pbn(group.pbn) {
                Some(slots) => {
                    used += slots as u32;
                    used <= PAYLOAD_SLOTS as u32
                }
                None => false,
            };
            if !fits {
                doomed.extend(group.devices.iter().copied());
            }
        }
        for id in doomed {
            if let Some(record) = self.topology.get_mut(id) {
                record.pending.insert(PendingFlags::MUST_DISCONNECT);
            }
        }
        self.queue_fire_events();
    }

    fn validate_config(&self, lc: &LinkConfiguration) -> bool {
        lc.is_valid()
            && lc.lanes <= self.mainlink.max_lane_count()
            && lc.lanes <= self.dpcd.max_lane_count()
            && lc.peak_rate <= self.mainlink.max_link_rate()
            && lc.peak_rate <= self.dpcd.max_link_rate()
            && self.mainlink.is_rate_supported(lc.peak_rate)
    }

    /// Trains to `lc`, falling back down the rate ladder on failure.
    ///
    /// Returns `true` only when the link came up at exactly `lc`. On
    /// fallback the achieved configuration is in `active_link()`; on
    /// total failure it is invalid.
    pub fn train(&mut self, lc: &LinkConfiguration, force: bool) -> bool {
        if !force && !self.validate_config(lc) {
            log::error!("rejecting unsupported link configuration {lc}");
            return false;
        }
        if *lc == self.active_link && !self.is_link_lost() {
            return true;
        }

        let quirks = self.connector_quirks();
        // A sink in D3 ignores the training pattern; wake it first.
        if self.dpcd.power_state() != PowerState::D0 || quirks.has(QuirkFlags::POWER_ON_BEFORE_LT) {
            self.dpcd.set_power_state(PowerState::D0);
        }

        let preferred = if self.policy.enable_no_handshake_training && self.dpcd.supports_no_handshake_training() {
            TrainingKind::NoHandshake
        } else if self.policy.enable_fast_link_training && self.dpcd.no_link_training() {
            TrainingKind::Fast
        } else {
            TrainingKind::Normal
        };

        let mut trained = self.train_once(lc, preferred);
        if !trained && preferred != TrainingKind::Normal {
            trained = self.train_once(lc, TrainingKind::Normal);
        }
        if trained {
            self.active_link = *lc;
            self.after_training();
            return true;
        }

        let mut candidate = *lc;
        while let Some(next) = candidate.fallback() {
            candidate = next;
            if self.train_once(&candidate, TrainingKind::Normal) {
                log::warn!("link fell back from {lc} to {candidate}");
                self.active_link = candidate;
                self.after_training();
                return false;
            }
        }

        log::error!("link training failed at every configuration");
        self.active_link = LinkConfiguration::invalid();
        false
    }

    fn train_once(&mut self, lc: &LinkConfiguration, kind: TrainingKind) -> bool {
        let trained = self.mainlink.train(lc, kind);
        if trained {
            self.dpcd.refresh_link_status();
        }
        trained
    }

    fn after_training(&mut self) {
        let quirks = self.connector_quirks();

        if self.dpcd.post_lt_adjust_request_supported()
            && !quirks.has(QuirkFlags::SKIP_POST_LT_ADJUST)
        {
            self.post_lt_adjust();
        }

        if self.active_link.fec_enabled && quirks.has(QuirkFlags::DEFER_FEC_ENABLE) {
            // FEC decoder settling time before pixels flow.
            self.timer.sleep_ms(quirks.lt2_fec_latency_ms);
        }

        self.replay_deferred_streams();
    }

    /// Bounded drive-setting adjustment phase after the handshake. The
    /// sink may request new swing/pre-emphasis values for a short window;
    /// a link drop during the window earns one retrain.
    fn post_lt_adjust(&mut self) {
        let lc = self.active_link;
        for _ in 0..POST_LT_ADJUST_ROUNDS {
            self.dpcd.refresh_link_status();
            if !self.dpcd.post_lt_adjust_in_progress() {
                return;
            }
            if self.is_link_lost() {
                log::warn!("link dropped during post-LT adjustment");
                self.mainlink.train(&lc, TrainingKind::Normal);
                self.dpcd.refresh_link_status();
                return;
            }
            for lane in 0..lc.lanes {
                if let Some(setting) = self.dpcd.adjust_request(lane) {
                    self.dpcd.set_lane_drive(lane, setting);
                }
            }
            self.timer.sleep_ms(POST_LT_ADJUST_POLL_MS);
        }
    }

    /// Reports loss of lock from the cached lane status. The cache is
    /// refreshed by interrupt handling, not here.
    pub fn is_link_lost(&self) -> bool {
        if !self.active_link.is_valid() {
            return false;
        }
        for lane in 0..self.active_link.lanes {
            if !self.dpcd.lane_status(lane).is_trained() {
                return true;
            }
        }
        !self.dpcd.interlane_align_done()
    }
}
