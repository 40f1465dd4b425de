//! The external MTC authority: a generator driven over FFI and a listener
//! fed by a MIDI input port. Both are created once per suite run and shared
//! read-only across scenarios.

pub mod listener;
pub mod sender;

pub use listener::{MtcListener, MtcListenerError};
pub use sender::{MtcSender, MtcSenderError};

use crate::timecode::Timecode;

/// Read-only view of the running timecode. The real implementation is the
/// MIDI listener; tests inject fakes so the orchestrator never needs a
/// MIDI port.
pub trait TimecodeSource: Send + Sync {
    /// Latest observed time in milliseconds since 00:00:00:00.
    fn milliseconds(&self) -> u64;

    /// Latest observed time as a timecode instant.
    fn timecode(&self) -> Timecode;
}
