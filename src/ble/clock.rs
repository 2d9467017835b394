//! A minimal monotonic millisecond clock, used for every timeout and the
//! 16-bit wrapping `added` timestamp on queue items (spec data model).
//!
//! Deliberately not `embedded_hal::timer` — that family targets fixed-
//! period countdown timers, where this crate just needs a free-running
//! counter to diff against. Kept as its own trait so tests can supply a
//! fake without pulling in a real systick.

pub trait Clock {
    /// Milliseconds since an arbitrary epoch, wrapping at 16 bits.
    fn now_ms(&mut self) -> u16;
}

/// Saturating-free elapsed time between two `now_ms()` readings, correct
/// across one wraparound.
pub fn elapsed_ms(since: u16, now: u16) -> u16 {
    now.wrapping_sub(since)
}
