//! Component D: the SPI/SDEP framer.
//!
//! SDEP ("Simple Data Exchange Protocol") frames are a fixed 20-byte shape
//! carried over a half-duplex SPI bus with active-low chip-select and an
//! active-high IRQ line signalling "data ready". The slave NAKs busy
//! conditions by echoing a sentinel type byte rather than stalling the
//! clock, which is why sending and receiving both need a backoff loop
//! instead of a single transfer.

use packed_struct::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::ble::clock::Clock;

pub const SDEP_PAYLOAD_CAPACITY: usize = 16;
pub const SDEP_FRAME_LEN: usize = 20;

// Compile-time check that the header (4 bytes) plus payload really is the
// 20-byte frame the coprocessor expects.
const _ASSERT_FRAME_LEN: [(); SDEP_FRAME_LEN] = [(); 4 + SDEP_PAYLOAD_CAPACITY];

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Command = 0x10,
    Response = 0x20,
    Alert = 0x40,
    Error = 0x80,
    SlaveNotReady = 0xFE,
    SlaveOverflow = 0xFF,
}

/// `BleAtWrapper`, the only command id this crate emits.
pub const CMD_BLE_AT_WRAPPER: u16 = 0x0A00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unrecognized sdep frame type byte {0:#04x}")]
    UnknownType(u8),
    #[error("sdep payload length {0} exceeds the 16-byte capacity")]
    PayloadTooLong(u8),
    #[error("timed out waiting on the coprocessor")]
    Timeout,
}

#[derive(PackedStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0")]
struct SdepHeader {
    #[packed_field(bits = "0..=7")]
    frame_type: u8,
    #[packed_field(bits = "8..=15")]
    cmd_lo: u8,
    #[packed_field(bits = "16..=23")]
    cmd_hi: u8,
    #[packed_field(bits = "24..=30")]
    len: Integer<u8, packed_bits::Bits7>,
    #[packed_field(bits = "31")]
    more: bool,
}

/// One 20-byte SDEP frame: header plus up to 16 payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdepFrame {
    pub frame_type: FrameType,
    pub cmd: u16,
    pub more: bool,
    pub len: u8,
    pub payload: [u8; SDEP_PAYLOAD_CAPACITY],
}

impl SdepFrame {
    pub fn command(cmd: u16, data: &[u8], more: bool) -> Result<Self, FrameError> {
        Self::new(FrameType::Command, cmd, data, more)
    }

    pub fn new(frame_type: FrameType, cmd: u16, data: &[u8], more: bool) -> Result<Self, FrameError> {
        if data.len() > SDEP_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLong(data.len() as u8));
        }
        let mut payload = [0u8; SDEP_PAYLOAD_CAPACITY];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            frame_type,
            cmd,
            more,
            len: data.len() as u8,
            payload,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    pub fn to_bytes(&self) -> [u8; SDEP_FRAME_LEN] {
        let header = SdepHeader {
            frame_type: self.frame_type.into(),
            cmd_lo: (self.cmd & 0xFF) as u8,
            cmd_hi: (self.cmd >> 8) as u8,
            len: self.len.into(),
            more: self.more,
        };
        let packed = header.pack().expect("sdep header always packs");
        let mut out = [0u8; SDEP_FRAME_LEN];
        out[..4].copy_from_slice(&packed);
        out[4..].copy_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8; SDEP_FRAME_LEN]) -> Result<Self, FrameError> {
        let mut header_bytes = [0u8; 4];
        header_bytes.copy_from_slice(&bytes[..4]);
        let header =
            SdepHeader::unpack(&header_bytes).map_err(|_| FrameError::UnknownType(bytes[0]))?;
        let frame_type =
            FrameType::try_from(header.frame_type).map_err(|_| FrameError::UnknownType(header.frame_type))?;
        let len: u8 = header.len.into();
        if len as usize > SDEP_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLong(len));
        }
        let mut payload = [0u8; SDEP_PAYLOAD_CAPACITY];
        payload.copy_from_slice(&bytes[4..]);
        Ok(Self {
            frame_type,
            cmd: header.cmd_lo as u16 | ((header.cmd_hi as u16) << 8),
            more: header.more,
            len,
            payload,
        })
    }
}

/// The SPI transport plus the three discrete GPIOs the coprocessor needs:
/// chip-select (active low), IRQ (active high = data ready) and reset
/// (active low pulse). Physical pin wiring is an external collaborator;
/// this trait is the seam the framer talks to.
pub trait SdepBus {
    type Error;

    /// Full-duplex single-byte exchange with CS already asserted.
    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error>;
    fn cs_assert(&mut self);
    fn cs_deassert(&mut self);
    fn irq_is_high(&mut self) -> bool;
    fn reset_assert(&mut self);
    fn reset_deassert(&mut self);
    /// Busy-wait for approximately `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

/// Drives [`SdepBus`] to send and receive whole frames with slave-not-ready
/// backoff, per spec.
pub struct SdepFramer {
    pub backoff_us: u32,
}

impl SdepFramer {
    pub fn new(backoff_us: u32) -> Self {
        Self { backoff_us }
    }

    /// Sends one frame, retrying the leading type byte while the slave
    /// echoes `SlaveNotReady`, up to `timeout_ms`.
    pub fn send<B: SdepBus, C: Clock>(
        &self,
        bus: &mut B,
        clock: &mut C,
        frame: &SdepFrame,
        timeout_ms: u16,
    ) -> Result<(), FrameError> {
        let bytes = frame.to_bytes();
        let start = clock.now_ms();
        loop {
            if clock.now_ms().wrapping_sub(start) >= timeout_ms {
                return Err(FrameError::Timeout);
            }
            bus.cs_assert();
            let echoed = bus.transfer(bytes[0]).unwrap_or(FrameType::SlaveNotReady.into());
            if echoed == u8::from(FrameType::SlaveNotReady) {
                bus.cs_deassert();
                bus.delay_us(self.backoff_us);
                continue;
            }
            for &b in &bytes[1..] {
                let _ = bus.transfer(b);
            }
            bus.cs_deassert();
            return Ok(());
        }
    }

    /// Waits for IRQ, then receives one frame, retrying while the slave
    /// reports not-ready or overflow, up to `timeout_ms` total.
    pub fn recv<B: SdepBus, C: Clock>(
        &self,
        bus: &mut B,
        clock: &mut C,
        timeout_ms: u16,
    ) -> Result<SdepFrame, FrameError> {
        let start = clock.now_ms();
        while !bus.irq_is_high() {
            if clock.now_ms().wrapping_sub(start) >= timeout_ms {
                return Err(FrameError::Timeout);
            }
        }
        loop {
            if clock.now_ms().wrapping_sub(start) >= timeout_ms {
                return Err(FrameError::Timeout);
            }
            bus.cs_assert();
            let mut raw = [0u8; SDEP_FRAME_LEN];
            raw[0] = bus.transfer(0).unwrap_or(FrameType::SlaveNotReady.into());
            let ty = raw[0];
            if ty == u8::from(FrameType::SlaveNotReady) || ty == u8::from(FrameType::SlaveOverflow) {
                bus.cs_deassert();
                bus.delay_us(self.backoff_us);
                continue;
            }
            for slot in raw.iter_mut().skip(1) {
                *slot = bus.transfer(0).unwrap_or(0);
            }
            bus.cs_deassert();
            return SdepFrame::from_bytes(&raw);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FakeBus, FakeClock};
    use super::*;

    #[test]
    fn frame_round_trips_through_bytes() {
        let frame = SdepFrame::command(CMD_BLE_AT_WRAPPER, b"AT+HWVBAT", true).unwrap();
        let bytes = frame.to_bytes();
        let back = SdepFrame::from_bytes(&bytes).unwrap();
        assert_eq!(back, frame);
        assert_eq!(back.payload(), b"AT+HWVBAT");
    }

    #[test]
    fn payload_over_capacity_is_rejected() {
        let data = [0u8; SDEP_PAYLOAD_CAPACITY + 1];
        assert!(SdepFrame::command(CMD_BLE_AT_WRAPPER, &data, false).is_err());
    }

    #[test]
    fn send_succeeds_when_slave_acks_immediately() {
        let framer = SdepFramer::new(25);
        let mut bus = FakeBus::new(&[0x00], false);
        let mut clock = FakeClock { now: 0 };
        let frame = SdepFrame::command(CMD_BLE_AT_WRAPPER, b"ATZ", false).unwrap();
        assert!(framer.send(&mut bus, &mut clock, &frame, 150).is_ok());
        assert_eq!(bus.sent[0], FrameType::Command.into());
    }

    #[test]
    fn recv_retries_while_slave_not_ready_then_returns_frame() {
        let framer = SdepFramer::new(25);
        let frame = SdepFrame::new(FrameType::Response, CMD_BLE_AT_WRAPPER, b"OK", false).unwrap();
        let bytes = frame.to_bytes();
        let mut replies = [0u8; SDEP_FRAME_LEN + 1];
        replies[0] = u8::from(FrameType::SlaveNotReady);
        replies[1..].copy_from_slice(&bytes);
        let mut bus = FakeBus::new(&replies, true);
        let mut clock = FakeClock { now: 0 };
        let got = framer.recv(&mut bus, &mut clock, 150).unwrap();
        assert_eq!(got.payload(), b"OK");
    }
}
