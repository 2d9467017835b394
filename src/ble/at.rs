//! Component E: the AT command layer.
//!
//! Fragments an ASCII command across `BleAtWrapper` SDEP packets, waits
//! for and reassembles the (possibly multi-packet) reply, and reduces the
//! result to success/failure by checking the final non-empty line against
//! `"OK"`.

use thiserror::Error;

use crate::ble::clock::Clock;
use crate::ble::sdep::{FrameError, FrameType, SdepBus, SdepFramer, CMD_BLE_AT_WRAPPER, SDEP_PAYLOAD_CAPACITY};
use crate::diag::EventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtError {
    #[error("sdep framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("response buffer too small for the reply")]
    ResponseTooLong,
    #[error("coprocessor replied with something other than OK")]
    NotOk,
}

/// Sends `cmd` as one or more `BleAtWrapper` frames. With `resp` supplied,
/// blocks (bounded by `timeout_ms`) collecting the reply into `resp` and
/// returns `Ok(n)` with the byte count of the command's textual output
/// (the final `OK`/`ERROR` line stripped) only if the reply's last
/// non-empty line is `OK`.
pub fn at_command<B: SdepBus, C: Clock>(
    bus: &mut B,
    clock: &mut C,
    framer: &SdepFramer,
    log: &mut EventLog,
    cmd: &str,
    resp: Option<&mut [u8]>,
    timeout_ms: u16,
) -> Result<usize, AtError> {
    send_command_fragments(bus, clock, framer, cmd, timeout_ms)?;

    let resp = match resp {
        None => return Ok(0),
        Some(buf) => buf,
    };

    let mut written = 0usize;
    loop {
        let frame = framer.recv(bus, clock, timeout_ms).map_err(|e| {
            log.sdep_recv_timeout();
            AtError::Frame(e)
        })?;
        let payload = frame.payload();
        if written + payload.len() > resp.len() {
            return Err(AtError::ResponseTooLong);
        }
        resp[written..written + payload.len()].copy_from_slice(payload);
        written += payload.len();
        if !frame.more {
            break;
        }
    }

    while written > 0 && (resp[written - 1] == b'\r' || resp[written - 1] == b'\n') {
        written -= 1;
    }

    let text = core::str::from_utf8(&resp[..written]).unwrap_or("");
    let last_line = text.rsplit(|c| c == '\r' || c == '\n').next().unwrap_or("");
    if last_line != "OK" {
        log.at_command_failed();
        return Err(AtError::NotOk);
    }
    let output_len = written - last_line.len();
    Ok(trim_trailing_newlines(&resp[..output_len]))
}

fn trim_trailing_newlines(buf: &[u8]) -> usize {
    let mut n = buf.len();
    while n > 0 && (buf[n - 1] == b'\r' || buf[n - 1] == b'\n') {
        n -= 1;
    }
    n
}

fn send_command_fragments<B: SdepBus, C: Clock>(
    bus: &mut B,
    clock: &mut C,
    framer: &SdepFramer,
    cmd: &str,
    timeout_ms: u16,
) -> Result<(), FrameError> {
    let bytes = cmd.as_bytes();
    if bytes.is_empty() {
        let frame = crate::ble::sdep::SdepFrame::command(CMD_BLE_AT_WRAPPER, &[], false)?;
        return framer.send(bus, clock, &frame, timeout_ms);
    }
    let mut offset = 0;
    while offset < bytes.len() {
        let end = core::cmp::min(offset + SDEP_PAYLOAD_CAPACITY, bytes.len());
        let more = end < bytes.len();
        let frame = crate::ble::sdep::SdepFrame::new(FrameType::Command, CMD_BLE_AT_WRAPPER, &bytes[offset..end], more)?;
        framer.send(bus, clock, &frame, timeout_ms)?;
        offset = end;
    }
    Ok(())
}
