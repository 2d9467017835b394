//! BLE side: components D, E, F, G — SDEP framer, AT command layer, ring
//! pair, and the transport task that drives them.

pub mod at;
pub mod clock;
pub mod queue;
pub mod sdep;
pub mod transport;

pub use at::{at_command, AtError};
pub use clock::Clock;
pub use queue::{QueueError, QueueItem, ResponseRing, SendRing};
pub use sdep::{FrameError, SdepBus, SdepFrame, SdepFramer};
pub use transport::{BleTransport, TransportState};

use thiserror::Error;

/// Composes the sub-layer errors a single `ble_task`/`enable_keyboard`
/// call can surface, per the ambient error-handling convention: one enum
/// per module boundary, composed where a call spans several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("sdep framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("at command error: {0}")]
    At(#[from] AtError),
    #[error("ring error: {0}")]
    Queue(#[from] QueueError),
}
