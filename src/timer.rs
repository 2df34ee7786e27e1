// DisplayPort link management library
//
// Copyright (C) 2025, Intel Corporation

//! Deferred-callback timer interface.
//!
//! The platform owns the actual clock and callback queue. Expiry is
//! delivered back through `Connector::timer_expired` with the tag the
//! callback was queued under; tags are connector-defined and a second
//! `queue` with the same tag replaces the pending one.

/// Owner-defined timer identifier.
pub type TimerTag = u64;

pub trait Timer {
    /// Schedules `tag` to expire after `delay_ms`. Re-queuing a pending
    /// tag restarts its delay.
    fn queue(&mut self, tag: TimerTag, delay_ms: u32);

    /// Drops a pending tag. Cancelling an unknown tag is a no-op.
    fn cancel(&mut self, tag: TimerTag);

    /// Busy-waits inside a blocking handshake. Bounded by the caller.
    fn sleep_ms(&mut self, ms: u32);

    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;
}
