//! Component C: the PS/2 Scan-Code-Set-2 decoder.
//!
//! Scan Set 2 overloads a handful of prefix bytes (`0xE0`, `0xF0`, `0xE1`)
//! to encode break events and two-key macro-like sequences (Print Screen,
//! Pause) that don't fit the plain "one byte is one key" shape. This state
//! machine absorbs all of that so [`crate::ps2::matrix::KeyMatrix`] only
//! ever sees clean make/break calls.
//!
//! ```text
//!           0xE0              0xF0                0xE1
//!   INIT ---------> E0 ---------------> E0_F0     ----> E1 --14--> E1_14
//!    |  \                                               --77--> E1_14_77
//!    |   \-0xF0----> F0 --byte--> break(byte)            --E1--> E1_14_77_E1
//!    |                                                    --F0--> ..._F0
//!  byte<0x80                                               --14--> ..._14
//!    make(byte)                                              --F0--> ..._F0
//!                                                               --77--> make(PAUSE)
//!
//!   E0 --0x7E--> E0_7E --0xE0--> E0_7E_E0 --0xF0--> E0_7E_E0_F0 --0x7E--> make(PAUSE)
//! ```
//!
//! No state variant carries data; the whole machine is
//! `core::mem::size_of::<State>()` bytes, which is the point — it's meant
//! to sit next to an exclusively-owned [`KeyMatrix`] with no hidden globals.

use crate::diag::EventLog;
use crate::ps2::byte_source::Ps2Bus;
use crate::ps2::matrix::{KeyMatrix, KC_F7, PAUSE, PRINT_SCREEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    F0,
    E0,
    E0F0,
    E1,
    E1_14,
    E1_14_77,
    E1_14_77_E1,
    E1_14_77_E1_F0,
    E1_14_77_E1_F0_14,
    E1_14_77_E1_F0_14_F0,
    E0_7E,
    E0_7E_E0,
    E0_7E_E0_F0,
}

/// Outcome of one [`Ps2Decoder::matrix_scan`] call, for the caller to act
/// on without the decoder reaching into an out-of-scope HID layer itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Set when a buffer overrun or sync loss forced a matrix clear this
    /// call. The caller's HID layer should drop any held-key state of its
    /// own (e.g. release all layers) in response.
    pub resynced: bool,
}

impl ScanOutcome {
    fn merge(&mut self, other: ScanOutcome) {
        self.resynced |= other.resynced;
    }
}

/// The 14-state Scan-Code-Set-2 decoder.
pub struct Ps2Decoder {
    state: State,
}

impl Ps2Decoder {
    pub const fn new() -> Self {
        Self { state: State::Init }
    }

    /// Drains every byte currently pending on `bus`, feeding each into the
    /// state machine, and applies the once-per-call Pause pseudo-break:
    /// since Scan Set 2 never sends a break code for Pause, a scan that
    /// observes Pause already held releases it immediately. This runs
    /// before draining new bytes, matching the make always winning within
    /// the same call.
    pub fn matrix_scan<B: Ps2Bus>(
        &mut self,
        bus: &mut B,
        matrix: &mut KeyMatrix,
        log: &mut EventLog,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if matrix.is_on(PAUSE) {
            matrix.break_key(PAUSE);
        }
        loop {
            match bus.recv() {
                Ok(byte) => outcome.merge(self.step(byte, matrix, log)),
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    log.bus_error(e);
                }
            }
        }
        outcome
    }

    fn desync(&mut self, matrix: &mut KeyMatrix, log: &mut EventLog, offending: u8) -> ScanOutcome {
        log.ps2_desync(offending);
        matrix.clear();
        self.state = State::Init;
        ScanOutcome { resynced: true }
    }

    fn step(&mut self, byte: u8, matrix: &mut KeyMatrix, log: &mut EventLog) -> ScanOutcome {
        match self.state {
            State::Init => match byte {
                0x00 => {
                    log.ps2_overrun();
                    matrix.clear();
                    self.state = State::Init;
                    ScanOutcome { resynced: true }
                }
                0xE0 => {
                    self.state = State::E0;
                    ScanOutcome::default()
                }
                0xF0 => {
                    self.state = State::F0;
                    ScanOutcome::default()
                }
                0xE1 => {
                    self.state = State::E1;
                    ScanOutcome::default()
                }
                0xAA | 0xFC => {
                    // BAT completion code: clean slate, not a sync error.
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                KC_F7 => {
                    matrix.make(KC_F7);
                    ScanOutcome::default()
                }
                0x84 => {
                    matrix.make(PRINT_SCREEN);
                    ScanOutcome::default()
                }
                b if b < 0x80 => {
                    matrix.make(b);
                    ScanOutcome::default()
                }
                b => self.desync(matrix, log, b),
            },
            State::F0 => match byte {
                0xF0 => self.desync(matrix, log, byte),
                KC_F7 => {
                    matrix.break_key(KC_F7);
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                0x84 => {
                    matrix.break_key(PRINT_SCREEN);
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                b if b < 0x80 => {
                    matrix.break_key(b);
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                b => self.desync(matrix, log, b),
            },
            State::E0 => match byte {
                0x12 | 0x59 => {
                    // Shift-synthesis prefix around Print Screen, dropped.
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                0x7E => {
                    self.state = State::E0_7E;
                    ScanOutcome::default()
                }
                0xF0 => {
                    self.state = State::E0F0;
                    ScanOutcome::default()
                }
                b if b < 0x80 => {
                    matrix.make(b | 0x80);
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                b => self.desync(matrix, log, b),
            },
            State::E0F0 => match byte {
                0x12 | 0x59 => {
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                b if b < 0x80 => {
                    matrix.break_key(b | 0x80);
                    self.state = State::Init;
                    ScanOutcome::default()
                }
                b => self.desync(matrix, log, b),
            },
            // Pause path one: E1 14 77 E1 F0 14 F0 77. Any mismatch is
            // abandoned silently; garbage here never held a key down.
            State::E1 => {
                self.state = if byte == 0x14 { State::E1_14 } else { State::Init };
                ScanOutcome::default()
            }
            State::E1_14 => {
                self.state = if byte == 0x77 { State::E1_14_77 } else { State::Init };
                ScanOutcome::default()
            }
            State::E1_14_77 => {
                self.state = if byte == 0xE1 {
                    State::E1_14_77_E1
                } else {
                    State::Init
                };
                ScanOutcome::default()
            }
            State::E1_14_77_E1 => {
                self.state = if byte == 0xF0 {
                    State::E1_14_77_E1_F0
                } else {
                    State::Init
                };
                ScanOutcome::default()
            }
            State::E1_14_77_E1_F0 => {
                self.state = if byte == 0x14 {
                    State::E1_14_77_E1_F0_14
                } else {
                    State::Init
                };
                ScanOutcome::default()
            }
            State::E1_14_77_E1_F0_14 => {
                self.state = if byte == 0xF0 {
                    State::E1_14_77_E1_F0_14_F0
                } else {
                    State::Init
                };
                ScanOutcome::default()
            }
            State::E1_14_77_E1_F0_14_F0 => {
                if byte == 0x77 {
                    matrix.make(PAUSE);
                }
                self.state = State::Init;
                ScanOutcome::default()
            }
            // Pause path two, taken when Ctrl is held: E0 7E E0 F0 7E.
            State::E0_7E => {
                self.state = if byte == 0xE0 { State::E0_7E_E0 } else { State::Init };
                ScanOutcome::default()
            }
            State::E0_7E_E0 => {
                self.state = if byte == 0xF0 {
                    State::E0_7E_E0_F0
                } else {
                    State::Init
                };
                ScanOutcome::default()
            }
            State::E0_7E_E0_F0 => {
                if byte == 0x7E {
                    matrix.make(PAUSE);
                }
                self.state = State::Init;
                ScanOutcome::default()
            }
        }
    }
}

impl Default for Ps2Decoder {
    fn default() -> Self {
        Self::new()
    }
}
