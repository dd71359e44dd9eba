//! AP power sequencing for embedded controllers.
//!
//! Drives the application processor through hard-off, soft-off, suspend, on and standby,
//! based on power signals that arrive over discrete lines, analog thresholds, virtual wires
//! and board-synthesized values.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod console;
pub mod context;
pub mod counters;
pub mod event_log;
pub mod host_command;
pub mod sequencer;
pub mod signal;
pub mod sleep;
pub mod state;
pub mod timers;

#[cfg(test)]
pub mod dummy;

pub use ap_pwrseq_traits as traits;
pub use context::Context;
pub use sequencer::Sequencer;
pub use signal::registry::SignalRegistry;
pub use state::{PowerState, StateMask};
