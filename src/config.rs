//! Tunables, gathered into one struct instead of scattered literals.
//!
//! Grounded on the teacher's habit of naming such numbers as `const` items
//! (`LOG_SIZE`, `PHONE_LINE_BAUD`) rather than burying them inline; here
//! they're fields so a caller can override any of them without forking the
//! crate. [`Config::default`] reproduces the numbers spec.md gives.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Delay between polls while waiting on a slave-not-ready backoff.
    pub backoff_us: u32,
    /// Ceiling on how long a send-side SDEP exchange may stay stuck
    /// waiting on the coprocessor before it's treated as failed.
    pub sdep_send_timeout_ms: u32,
    /// Ceiling on an individual SDEP receive poll.
    pub sdep_recv_timeout_ms: u32,
    /// How often the BLE task polls connection status when idle.
    pub connection_update_interval_ms: u32,
    /// How often the BLE task samples battery voltage.
    pub battery_update_interval_ms: u32,
    /// Capacity of the outbound send ring (component F).
    pub send_ring_capacity: usize,
    /// Capacity of the outstanding-response ring (component F).
    pub response_ring_capacity: usize,
    /// Advertised name, used for `AT+GAPDEVNAME`.
    pub product_name: &'static str,
    /// Whether the coprocessor is configured to push unsolicited events.
    pub using_events: bool,
}

impl Config {
    pub const fn default() -> Self {
        Self {
            backoff_us: 25,
            sdep_send_timeout_ms: 150,
            sdep_recv_timeout_ms: 10,
            connection_update_interval_ms: 1000,
            battery_update_interval_ms: 10_000,
            send_ring_capacity: 40,
            response_ring_capacity: 2,
            product_name: "Keyboard",
            using_events: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}
