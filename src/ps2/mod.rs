//! PS/2 side: components A, B, C — byte source, key matrix, decoder.

pub mod byte_source;
pub mod decoder;
pub mod matrix;

pub use byte_source::{Ps2Bus, Ps2BusError};
pub use decoder::{Ps2Decoder, ScanOutcome};
pub use matrix::{KeyMatrix, KC_F7, PAUSE, PRINT_SCREEN};
