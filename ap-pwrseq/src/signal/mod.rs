//! Logical power signals, their sources and snapshots.
use ap_pwrseq_traits::{Edge, TransportError};
use bitflags::bitflags;

pub mod adapter;
pub mod registry;

/// Maximum number of signals of a board.
pub const MAX_SIGNALS: usize = 32;

/// A bitmask with one bit per signal index.
pub type SignalMask = u32;

/// Stable index of a logical power signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalId(pub u8);

impl SignalId {
    /// The bit of this signal in a [`SignalMask`].
    pub const fn mask(self) -> SignalMask {
        1 << self.0
    }

    /// The index into the signal table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Per-signal configuration flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalFlags: u8 {
        /// The signal is asserted at a low raw level.
        const ACTIVE_LOW = 1 << 0;
        /// The signal is driven by the embedded controller.
        const OUTPUT = 1 << 1;
        /// The interrupt stays masked until the sequencer enables the signal.
        const DISABLE_AT_BOOT = 1 << 2;
        /// Transitions are never logged.
        const NO_LOG = 1 << 3;
    }
}

/// The transport a signal is carried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Source {
    /// A discrete line.
    Line {
        /// Line number.
        pin: u16,
        /// Interrupt edge.
        edge: Edge,
    },
    /// An analog input, asserted at or above a threshold.
    Analog {
        /// ADC channel.
        channel: u16,
        /// Threshold in millivolts.
        threshold_mv: u32,
    },
    /// A virtual wire over the host link.
    VirtualWire {
        /// Wire number.
        wire: u16,
    },
    /// A value synthesized by the board.
    Synthetic {
        /// Board-defined identifier.
        id: u16,
    },
}

impl Source {
    /// Whether two sources bind the same transport channel.
    pub fn same_binding(&self, other: &Source) -> bool {
        match (self, other) {
            (Source::Line { pin: a, .. }, Source::Line { pin: b, .. }) => a == b,
            (Source::Analog { channel: a, .. }, Source::Analog { channel: b, .. }) => a == b,
            (Source::VirtualWire { wire: a }, Source::VirtualWire { wire: b }) => a == b,
            (Source::Synthetic { id: a }, Source::Synthetic { id: b }) => a == b,
            _ => false,
        }
    }
}

/// Configuration of one logical power signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalConfig {
    /// Human-readable name.
    pub name: &'static str,
    /// Transport binding.
    pub source: Source,
    /// Flags.
    pub flags: SignalFlags,
}

impl SignalConfig {
    /// A signal with no flags set.
    pub const fn new(name: &'static str, source: Source) -> Self {
        Self {
            name,
            source,
            flags: SignalFlags::empty(),
        }
    }

    /// Set the flags of a signal.
    pub const fn with_flags(mut self, flags: SignalFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Signal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The signal index is out of range.
    #[error("invalid signal {0}")]
    InvalidSignal(u8),
    /// The operation is not supported by the signal's source.
    #[error("operation not supported")]
    NotSupported,
    /// The transport failed.
    #[error("transport error {0:?}")]
    Transport(TransportError),
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotSupported => Error::NotSupported,
            error => Error::Transport(error),
        }
    }
}

/// Signal table errors, detected when the registry is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The table holds no signals.
    #[error("empty signal table")]
    Empty,
    /// The table holds more than [`MAX_SIGNALS`] signals.
    #[error("{0} signals exceed the maximum")]
    TooMany(usize),
    /// Two signals share a name.
    #[error("duplicate signal name {0}")]
    DuplicateName(&'static str),
    /// Two signals are bound to the same transport channel.
    #[error("signal {0} shares its binding")]
    DuplicateBinding(&'static str),
    /// An analog signal is configured as an output.
    #[error("analog signal {0} cannot be an output")]
    AnalogOutput(&'static str),
    /// A sequencer role refers to a signal outside the table.
    #[error("role refers to unknown signal {0}")]
    UnknownSignal(u8),
    /// A sequencer role that is driven by the embedded controller refers to an input.
    #[error("signal {0} is not an output")]
    NotAnOutput(&'static str),
}

/// Signal values captured together.
///
/// Disabled and unknown signals are neither asserted nor valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    asserted: SignalMask,
    valid: SignalMask,
}

impl Snapshot {
    /// Create a snapshot. Asserted bits without validity are dropped.
    pub const fn new(asserted: SignalMask, valid: SignalMask) -> Self {
        Self {
            asserted: asserted & valid,
            valid,
        }
    }

    /// The asserted signals.
    pub const fn asserted(&self) -> SignalMask {
        self.asserted
    }

    /// The signals with a known value.
    pub const fn valid(&self) -> SignalMask {
        self.valid
    }

    /// Whether all signals of `mask` are asserted.
    pub const fn all_on(&self, mask: SignalMask) -> bool {
        self.asserted & mask == mask
    }

    /// Whether all signals of `mask` are known and de-asserted.
    pub const fn all_off(&self, mask: SignalMask) -> bool {
        self.valid & mask == mask && self.asserted & mask == 0
    }

    /// Whether no signal of `mask` is asserted, known or not.
    pub const fn none_on(&self, mask: SignalMask) -> bool {
        self.asserted & mask == 0
    }

    /// Signals of `mask` that are not asserted.
    pub const fn missing(&self, mask: SignalMask) -> SignalMask {
        mask & !self.asserted
    }

    /// Whether a signal is asserted.
    pub const fn is_on(&self, id: SignalId) -> bool {
        self.all_on(id.mask())
    }

    /// Whether a signal is known and de-asserted.
    pub const fn is_off(&self, id: SignalId) -> bool {
        self.all_off(id.mask())
    }
}
