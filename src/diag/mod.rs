//! Diagnostics: a fixed-size, debugger-readable circular log.
//!
//! Grounded on the teacher firmware's own `scan::Log` — this domain's
//! corpus never reaches for `log`/`defmt`, it just keeps a ring of
//! structured records a probe can drain. Oldest entries are overwritten
//! once the ring is full; nothing here is allowed to block or allocate.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::ps2::byte_source::Ps2BusError;

const LOG_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagEvent {
    Ps2Overrun,
    Ps2Desync { offending: u8 },
    Ps2BusError(Ps2BusError),
    SdepSendTimeout,
    SdepRecvTimeout,
    AtCommandFailed,
    ResponseRingTimeout,
}

/// A fixed-capacity circular log of [`DiagEvent`]s.
pub struct EventLog {
    head: usize,
    body: [Option<DiagEvent>; LOG_CAPACITY],
}

impl EventLog {
    pub const fn new() -> Self {
        Self {
            head: 0,
            body: [None; LOG_CAPACITY],
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::new()
    }

    fn push(&mut self, event: DiagEvent) {
        self.body[self.head] = Some(event);
        self.head = (self.head + 1) % LOG_CAPACITY;
    }

    pub fn ps2_overrun(&mut self) {
        self.push(DiagEvent::Ps2Overrun);
    }

    pub fn ps2_desync(&mut self, offending: u8) {
        self.push(DiagEvent::Ps2Desync { offending });
    }

    pub fn bus_error(&mut self, err: Ps2BusError) {
        self.push(DiagEvent::Ps2BusError(err));
    }

    pub fn sdep_send_timeout(&mut self) {
        self.push(DiagEvent::SdepSendTimeout);
    }

    pub fn sdep_recv_timeout(&mut self) {
        self.push(DiagEvent::SdepRecvTimeout);
    }

    pub fn at_command_failed(&mut self) {
        self.push(DiagEvent::AtCommandFailed);
    }

    pub fn response_ring_timeout(&mut self) {
        self.push(DiagEvent::ResponseRingTimeout);
    }

    /// The log in oldest-to-newest order, for a debug probe to drain.
    pub fn iter(&self) -> impl Iterator<Item = DiagEvent> + '_ {
        (0..LOG_CAPACITY)
            .map(move |i| self.body[(self.head + i) % LOG_CAPACITY])
            .filter_map(|e| e)
    }

    /// Takes the single firmware-wide log. Panics if called twice; there
    /// is exactly one outer loop and it owns this for the life of the
    /// program, same contract as the teacher's `Log::get()`.
    pub fn get() -> &'static mut Self {
        static TAKEN: AtomicBool = AtomicBool::new(false);
        static mut THELOG: EventLog = EventLog::new();
        if TAKEN.swap(true, Ordering::AcqRel) {
            panic!("EventLog::get() called twice");
        }
        unsafe { &mut THELOG }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_insertion_order() {
        let mut log = EventLog::for_test();
        log.ps2_overrun();
        log.ps2_desync(0xAA);
        let events: heapless::Vec<DiagEvent, heapless::consts::U4> = log.iter().collect();
        assert_eq!(events[0], DiagEvent::Ps2Overrun);
        assert_eq!(events[1], DiagEvent::Ps2Desync { offending: 0xAA });
    }

    #[test]
    fn ring_overwrites_oldest_once_full() {
        let mut log = EventLog::for_test();
        for _ in 0..LOG_CAPACITY {
            log.ps2_overrun();
        }
        log.ps2_desync(0x01);
        let events: heapless::Vec<DiagEvent, heapless::consts::U32> = log.iter().collect();
        assert_eq!(events.len(), LOG_CAPACITY);
        assert_eq!(events[LOG_CAPACITY - 1], DiagEvent::Ps2Desync { offending: 0x01 });
    }
}
