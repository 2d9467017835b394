//! Component A: the PS/2 byte source.
//!
//! The physical clock/data bit-banging is an external collaborator (see
//! crate-level docs); this module only defines the trait the decoder polls.
//! Modeled on `embedded_hal::serial::Read`, the same nb-based shape the
//! teacher firmware uses for its inter-half UART link.

use thiserror::Error;

/// A framing or parity failure reported alongside (or instead of) a byte.
///
/// The decoder ignores the offending byte when this is returned; state is
/// left unchanged. Resend-on-error recovery is a known, deliberate gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Ps2BusError {
    #[error("ps/2 bus framing error")]
    Framing,
    #[error("ps/2 bus parity error")]
    Parity,
}

/// One polled connection to a PS/2 device, upstream of the decoder.
///
/// `Err(nb::Error::WouldBlock)` means no byte is currently pending.
/// `Ok(0x00)` is a legitimate wire value (buffer overrun, see
/// [`crate::ps2::decoder`]) and must be distinguished from "nothing
/// pending" — that's the whole reason this isn't just `-> u8`.
pub trait Ps2Bus {
    fn recv(&mut self) -> nb::Result<u8, Ps2BusError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Feeds a fixed script of bytes/errors/not-yet-pending slots, one per
    /// `recv()` call, then reports `WouldBlock` forever.
    pub struct ScriptedBus<'a> {
        script: &'a [nb::Result<u8, Ps2BusError>],
        pos: usize,
    }

    impl<'a> ScriptedBus<'a> {
        pub fn new(script: &'a [nb::Result<u8, Ps2BusError>]) -> Self {
            Self { script, pos: 0 }
        }
    }

    impl<'a> Ps2Bus for ScriptedBus<'a> {
        fn recv(&mut self) -> nb::Result<u8, Ps2BusError> {
            if self.pos >= self.script.len() {
                return Err(nb::Error::WouldBlock);
            }
            let r = self.script[self.pos];
            self.pos += 1;
            r
        }
    }
}
