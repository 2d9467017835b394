//! Component G: the BLE task and transport state, gluing D/E/F together
//! into the periodic pump the outer loop calls once per iteration.

use core::fmt::Write as _;

use heapless::consts::U64;
use heapless::String;

use crate::ble::at::at_command;
use crate::ble::clock::{elapsed_ms, Clock};
use crate::ble::queue::{QueueItem, ResponseRing, SendRing};
use crate::ble::sdep::{SdepBus, SdepFramer};
use crate::ble::TransportError;
use crate::config::Config;
use crate::diag::EventLog;

/// Mirrors spec.md's transport-state record. `vbat` is the raw millivolt
/// reading from `AT+HWVBAT`, exposed as-is per the open question on
/// whether the ~3200 mV reading is a coprocessor quirk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportState {
    pub initialized: bool,
    pub configured: bool,
    pub is_connected: bool,
    pub events_enabled: bool,
    pub last_connection_update: u16,
    pub last_battery_update: u16,
    pub vbat_mv: u16,
}

impl TransportState {
    pub fn battery_millivolts(&self) -> u16 {
        self.vbat_mv
    }
}

pub struct BleTransport<const SEND_N: usize, const RESP_N: usize> {
    pub state: TransportState,
    pub send_ring: SendRing<SEND_N>,
    pub resp_ring: ResponseRing<RESP_N>,
    framer: SdepFramer,
    config: Config,
}

impl<const SEND_N: usize, const RESP_N: usize> BleTransport<SEND_N, RESP_N> {
    pub fn new(config: Config) -> Self {
        Self {
            state: TransportState::default(),
            send_ring: SendRing::new(),
            resp_ring: ResponseRing::new(),
            framer: SdepFramer::new(config.backoff_us),
            config,
        }
    }

    pub fn enqueue(&mut self, item: QueueItem, now_ms: u16) -> Result<(), TransportError> {
        self.send_ring.enqueue(item, now_ms).map_err(TransportError::Queue)
    }

    /// Reset pulse per spec.md §4.7: high, low, wait 10ms, high, wait 1000ms.
    /// Sets `initialized` unconditionally; there is no success probe.
    pub fn hardware_reset<B: SdepBus>(&mut self, bus: &mut B) {
        bus.reset_deassert();
        bus.reset_assert();
        bus.delay_us(10_000);
        bus.reset_deassert();
        bus.delay_us(1_000_000);
        self.state.initialized = true;
    }

    /// The one-time AT init script. Any failure aborts; `configured` stays
    /// false and the whole script is retried on the next attempt.
    pub fn enable_keyboard<B: SdepBus, C: Clock>(
        &mut self,
        bus: &mut B,
        clock: &mut C,
        log: &mut EventLog,
        description: &str,
    ) -> Result<(), TransportError> {
        let mut name: String<U64> = String::new();
        let _ = write!(name, "AT+GAPDEVNAME={} {}", self.config.product_name, description);

        let script: [&str; 6] = [
            "ATE=0",
            "AT+GAPINTERVALS=10,30,,",
            name.as_str(),
            "AT+BLEHIDEN=1",
            "AT+BLEPOWERLEVEL=-12",
            "ATZ",
        ];
        for cmd in script.iter() {
            at_command(bus, clock, &self.framer, log, cmd, None, self.config.sdep_send_timeout_ms as u16)
                .map_err(TransportError::At)?;
        }
        self.state.configured = true;
        Ok(())
    }

    /// One pump step: drain responses, send one, poll connection, poll
    /// battery. Each sub-step is a no-op when its precondition isn't met.
    pub fn ble_task<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        self.drain_responses(bus, clock, log);
        self.send_one(bus, clock, log);
        self.poll_connection_events(bus, clock, log);
        self.poll_connection_periodic(bus, clock, log);
        self.poll_battery(bus, clock, log);
    }

    fn drain_responses<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        while let Some(dispatched_at) = self.resp_ring.peek() {
            if bus.irq_is_high() {
                match self.framer.recv(bus, clock, self.config.sdep_recv_timeout_ms as u16) {
                    Ok(frame) if !frame.more => {
                        self.resp_ring.pop();
                    }
                    // More fragments of the same reply: keep looping, the
                    // head of the ring hasn't changed.
                    Ok(_) => {}
                    Err(_) => break,
                }
            } else {
                let since = elapsed_ms(dispatched_at, clock.now_ms());
                if since as u32 > 2 * self.config.sdep_send_timeout_ms {
                    log.response_ring_timeout();
                    self.resp_ring.pop();
                } else {
                    break;
                }
            }
        }
    }

    fn send_one<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        if !self.resp_ring.is_empty() {
            return;
        }
        let Some(head) = self.send_ring.peek() else { return };
        let item = head.item;
        let mut cmd: String<U64> = String::new();
        format_queue_item(&item, &mut cmd);

        let now = clock.now_ms();
        match at_command(bus, clock, &self.framer, log, cmd.as_str(), None, self.config.sdep_send_timeout_ms as u16) {
            Ok(_) => {
                let _ = self.resp_ring.push(now);
            }
            Err(_) => {
                log.sdep_send_timeout();
                // left in place, retried next pump invocation
                return;
            }
        }

        // A mouse report is two AT calls that must both succeed; the
        // button command rides on the same response-ring slot pair.
        if let QueueItem::MouseMove { buttons, .. } = item {
            let mut button_cmd: String<U64> = String::new();
            format_mouse_button(buttons, &mut button_cmd);
            let now = clock.now_ms();
            match at_command(bus, clock, &self.framer, log, button_cmd.as_str(), None, self.config.sdep_send_timeout_ms as u16) {
                Ok(_) => {
                    let _ = self.resp_ring.push(now);
                }
                Err(_) => {
                    log.sdep_send_timeout();
                    return;
                }
            }
        }

        let _ = self.send_ring.pop();
    }

    fn poll_connection_events<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        if !self.config.using_events || !bus.irq_is_high() || !self.resp_ring.is_empty() {
            return;
        }
        let mut resp = [0u8; 16];
        if let Ok(n) = at_command(bus, clock, &self.framer, log, "AT+EVENTSTATUS", Some(&mut resp), self.config.sdep_recv_timeout_ms as u16) {
            if let Ok(text) = core::str::from_utf8(&resp[..n]) {
                if let Ok(mask) = u32::from_str_radix(text.trim_start_matches("0x"), 16) {
                    if mask & 0x1 != 0 {
                        self.state.is_connected = true;
                    }
                    if mask & 0x2 != 0 {
                        self.state.is_connected = false;
                    }
                }
            }
        }
    }

    fn poll_connection_periodic<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        if !self.resp_ring.is_empty() {
            return;
        }
        let now = clock.now_ms();
        let due = !self.state.events_enabled
            || elapsed_ms(self.state.last_connection_update, now) as u32 >= self.config.connection_update_interval_ms;
        if !due {
            return;
        }
        let mut resp = [0u8; 16];
        if let Ok(n) = at_command(bus, clock, &self.framer, log, "AT+GAPGETCONN", Some(&mut resp), self.config.sdep_recv_timeout_ms as u16) {
            if let Ok(text) = core::str::from_utf8(&resp[..n]) {
                if let Ok(v) = text.trim().parse::<u32>() {
                    self.state.is_connected = v != 0;
                }
            }
        }
        self.state.last_connection_update = now;
        if !self.state.events_enabled {
            if at_command(bus, clock, &self.framer, log, "AT+EVENTENABLE=0x1", None, self.config.sdep_send_timeout_ms as u16).is_ok()
                && at_command(bus, clock, &self.framer, log, "AT+EVENTENABLE=0x2", None, self.config.sdep_send_timeout_ms as u16).is_ok()
            {
                self.state.events_enabled = true;
            }
        }
    }

    fn poll_battery<B: SdepBus, C: Clock>(&mut self, bus: &mut B, clock: &mut C, log: &mut EventLog) {
        if !self.resp_ring.is_empty() {
            return;
        }
        let now = clock.now_ms();
        if elapsed_ms(self.state.last_battery_update, now) as u32 < self.config.battery_update_interval_ms {
            return;
        }
        let mut resp = [0u8; 16];
        if let Ok(n) = at_command(bus, clock, &self.framer, log, "AT+HWVBAT", Some(&mut resp), self.config.sdep_recv_timeout_ms as u16) {
            if let Ok(text) = core::str::from_utf8(&resp[..n]) {
                if let Ok(mv) = text.trim().parse::<u16>() {
                    self.state.vbat_mv = mv;
                }
            }
        }
        self.state.last_battery_update = now;
    }
}

fn format_queue_item(item: &QueueItem, out: &mut String<U64>) {
    match *item {
        QueueItem::KeyReport { modifier, keys } => {
            let _ = write!(
                out,
                "AT+BLEKEYBOARDCODE={:02x}-00-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
                modifier, keys[0], keys[1], keys[2], keys[3], keys[4], keys[5]
            );
        }
        QueueItem::Consumer { code } => {
            let _ = write!(out, "AT+BLEHIDCONTROLKEY=0x{:04x}", code);
        }
        QueueItem::MouseMove { dx, dy, scroll, pan, .. } => {
            let _ = write!(out, "AT+BLEHIDMOUSEMOVE={},{},{},{}", dx, dy, scroll, pan);
        }
    }
}

/// The companion command a `MouseMove` item always sends after its move
/// command, per spec.md §4.7. Bit 0/1/2 of `buttons` map to `L`/`R`/`M`;
/// no bits set writes `0`.
fn format_mouse_button(buttons: u8, out: &mut String<U64>) {
    let mut letters: String<heapless::consts::U3> = String::new();
    if buttons & 0x1 != 0 {
        let _ = letters.push('L');
    }
    if buttons & 0x2 != 0 {
        let _ = letters.push('R');
    }
    if buttons & 0x4 != 0 {
        let _ = letters.push('M');
    }
    if letters.is_empty() {
        let _ = write!(out, "AT+BLEHIDMOUSEBUTTON=0");
    } else {
        let _ = write!(out, "AT+BLEHIDMOUSEBUTTON={}", letters.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::sdep::test_support::{FakeBus, FakeClock};

    #[test]
    fn key_report_formats_to_the_documented_at_command() {
        let mut out: String<U64> = String::new();
        format_queue_item(
            &QueueItem::KeyReport {
                modifier: 0x02,
                keys: [0x04, 0, 0, 0, 0, 0],
            },
            &mut out,
        );
        assert_eq!(out.as_str(), "AT+BLEKEYBOARDCODE=02-00-04-00-00-00-00-00");
    }

    #[test]
    fn consumer_formats_to_the_documented_at_command() {
        let mut out: String<U64> = String::new();
        format_queue_item(&QueueItem::Consumer { code: 0x00E9 }, &mut out);
        assert_eq!(out.as_str(), "AT+BLEHIDCONTROLKEY=0x00e9");
    }

    #[test]
    fn pump_never_sends_while_response_ring_is_nonempty() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport.resp_ring.push(0).unwrap();
        transport
            .enqueue(QueueItem::Consumer { code: 1 }, 0)
            .unwrap();
        let mut bus = FakeBus::new(&[], false);
        let mut clock = FakeClock { now: 0 };
        let mut log = EventLog::for_test();
        transport.send_one(&mut bus, &mut clock, &mut log);
        assert_eq!(transport.send_ring.len(), 1);
    }

    #[test]
    fn stuck_coprocessor_response_is_abandoned_after_double_timeout() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport.resp_ring.push(0).unwrap();
        let mut bus = FakeBus::new(&[], false); // IRQ stays low
        let mut clock = FakeClock {
            now: 2 * config.sdep_send_timeout_ms as u16 + 1,
        };
        let mut log = EventLog::for_test();
        transport.drain_responses(&mut bus, &mut clock, &mut log);
        assert!(transport.resp_ring.is_empty());
    }

    #[test]
    fn mouse_move_formats_to_the_documented_at_command() {
        let mut out: String<U64> = String::new();
        format_queue_item(
            &QueueItem::MouseMove {
                dx: 5,
                dy: -3,
                scroll: 0,
                pan: 0,
                buttons: 0,
            },
            &mut out,
        );
        assert_eq!(out.as_str(), "AT+BLEHIDMOUSEMOVE=5,-3,0,0");
    }

    #[test]
    fn mouse_button_formats_letters_in_lrm_order() {
        let mut out: String<U64> = String::new();
        format_mouse_button(0b011, &mut out);
        assert_eq!(out.as_str(), "AT+BLEHIDMOUSEBUTTON=LR");
    }

    #[test]
    fn mouse_button_formats_zero_when_no_buttons_held() {
        let mut out: String<U64> = String::new();
        format_mouse_button(0, &mut out);
        assert_eq!(out.as_str(), "AT+BLEHIDMOUSEBUTTON=0");
    }

    #[test]
    fn send_one_issues_move_then_button_and_pops_only_after_both_succeed() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport
            .enqueue(
                QueueItem::MouseMove {
                    dx: 1,
                    dy: 2,
                    scroll: 0,
                    pan: 0,
                    buttons: 0x1,
                },
                0,
            )
            .unwrap();
        // Every echoed type byte is a don't-care other than SlaveNotReady,
        // so both sends ack on the first try; resp=None means neither
        // triggers a recv.
        let mut bus = FakeBus::new(&[0x00; 8], false);
        let mut clock = FakeClock { now: 0 };
        let mut log = EventLog::for_test();
        transport.send_one(&mut bus, &mut clock, &mut log);
        assert!(transport.send_ring.is_empty());
        assert_eq!(transport.resp_ring.len(), 2);
    }

    fn response_frames(text: &str) -> heapless::Vec<u8, heapless::consts::U128> {
        use crate::ble::sdep::{FrameType, SdepFrame, CMD_BLE_AT_WRAPPER, SDEP_PAYLOAD_CAPACITY};
        let mut out: heapless::Vec<u8, heapless::consts::U128> = heapless::Vec::new();
        let bytes = text.as_bytes();
        let mut offset = 0;
        while offset < bytes.len() {
            let end = core::cmp::min(offset + SDEP_PAYLOAD_CAPACITY, bytes.len());
            let more = end < bytes.len();
            let f = SdepFrame::new(FrameType::Response, CMD_BLE_AT_WRAPPER, &bytes[offset..end], more).unwrap();
            for b in f.to_bytes() {
                out.push(b).unwrap();
            }
            offset = end;
        }
        out
    }

    fn wire_for(reply_text: &str) -> heapless::Vec<u8, heapless::consts::U256> {
        use crate::ble::sdep::SDEP_FRAME_LEN;
        let mut wire: heapless::Vec<u8, heapless::consts::U256> = heapless::Vec::new();
        for _ in 0..SDEP_FRAME_LEN {
            wire.push(0x00).unwrap();
        }
        for b in response_frames(reply_text) {
            wire.push(b).unwrap();
        }
        wire
    }

    #[test]
    fn poll_connection_events_marks_connected_on_bit0() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        let wire = wire_for("0x01\r\nOK\r\n");
        let mut bus = FakeBus::new(&wire, true);
        let mut clock = FakeClock { now: 0 };
        let mut log = EventLog::for_test();
        transport.poll_connection_events(&mut bus, &mut clock, &mut log);
        assert!(transport.state.is_connected);
    }

    #[test]
    fn poll_connection_events_is_a_noop_when_irq_is_low() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        let mut bus = FakeBus::new(&[], false);
        let mut clock = FakeClock { now: 0 };
        let mut log = EventLog::for_test();
        transport.poll_connection_events(&mut bus, &mut clock, &mut log);
        assert!(bus.sent.is_empty());
        assert!(!transport.state.is_connected);
    }

    #[test]
    fn poll_connection_periodic_sets_is_connected_from_integer_reply() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport.state.events_enabled = true;
        let wire = wire_for("1\r\nOK\r\n");
        let mut bus = FakeBus::new(&wire, true);
        let mut clock = FakeClock {
            now: config.connection_update_interval_ms as u16,
        };
        let mut log = EventLog::for_test();
        transport.poll_connection_periodic(&mut bus, &mut clock, &mut log);
        assert!(transport.state.is_connected);
        assert_eq!(transport.state.last_connection_update, config.connection_update_interval_ms as u16);
    }

    #[test]
    fn poll_connection_periodic_skips_while_response_ring_is_nonempty() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport.resp_ring.push(0).unwrap();
        let mut bus = FakeBus::new(&[], true);
        let mut clock = FakeClock {
            now: config.connection_update_interval_ms as u16,
        };
        let mut log = EventLog::for_test();
        transport.poll_connection_periodic(&mut bus, &mut clock, &mut log);
        assert!(bus.sent.is_empty());
        assert_eq!(transport.state.last_connection_update, 0);
    }

    #[test]
    fn poll_battery_stores_parsed_millivolt_reading_when_due() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        let wire = wire_for("4050\r\nOK\r\n");
        let mut bus = FakeBus::new(&wire, true);
        let mut clock = FakeClock {
            now: config.battery_update_interval_ms as u16,
        };
        let mut log = EventLog::for_test();
        transport.poll_battery(&mut bus, &mut clock, &mut log);
        assert_eq!(transport.state.vbat_mv, 4050);
    }

    #[test]
    fn poll_battery_skips_while_response_ring_is_nonempty() {
        let config = Config::default();
        let mut transport: BleTransport<40, 2> = BleTransport::new(config);
        transport.resp_ring.push(0).unwrap();
        let mut bus = FakeBus::new(&[], true);
        let mut clock = FakeClock {
            now: config.battery_update_interval_ms as u16,
        };
        let mut log = EventLog::for_test();
        transport.poll_battery(&mut bus, &mut clock, &mut log);
        assert!(bus.sent.is_empty());
        assert_eq!(transport.state.vbat_mv, 0);
    }
}
