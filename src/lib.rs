#![no_std]
//! Keyboard controller core: a PS/2 Scan-Code-Set-2 decoder and a BLE
//! transport built on a fixed-frame SDEP/SPI protocol.
//!
//! Two cooperating, single-threaded subsystems, each driven by a method
//! an outer firmware loop calls repeatedly:
//!
//! - [`ps2`] decodes the raw byte stream from a PS/2 keyboard into a
//!   32x8 key matrix (`Ps2Decoder::matrix_scan`).
//! - [`ble`] carries resulting HID/consumer/mouse reports to a BLE
//!   coprocessor over SPI, via SDEP frames wrapping AT commands
//!   (`BleTransport::ble_task`).
//!
//! Neither subsystem talks to hardware directly: physical SPI/GPIO
//! drivers, the HID report builder, the layer/macro engine, the key-map
//! table, USB fallback, LED feedback and the outer scheduler are all
//! external collaborators reached through the traits in [`ps2::Ps2Bus`]
//! and [`ble::sdep::SdepBus`]/[`ble::clock::Clock`].

pub mod ble;
pub mod config;
pub mod diag;
pub mod ps2;

pub use config::Config;
pub use diag::EventLog;
