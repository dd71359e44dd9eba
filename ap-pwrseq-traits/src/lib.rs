//! AP power-sequencing transport traits.
//!
//! Provides driver traits that connect logical power signals to the transports they are carried on:
//! discrete lines, analog comparators, virtual wires over the host link and board-synthesized values.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

/// Transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The underlying bus or peripheral reported a failure.
    Bus,

    /// The operation is not supported by this transport or channel.
    NotSupported,

    /// The channel exists but is not ready yet (e.g. the host link is down).
    NotReady,
}

/// Interrupt edge configuration of a discrete line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// No interrupt.
    #[default]
    None,
    /// Interrupt on a rising edge.
    Rising,
    /// Interrupt on a falling edge.
    Falling,
    /// Interrupt on both edges.
    Both,
}

/// Discrete input/output lines.
pub trait LineDriver {
    /// Read the raw level of a line.
    fn level(&self, pin: u16) -> Result<bool, TransportError>;

    /// Drive the raw level of an output line.
    fn set_level(&self, pin: u16, level: bool) -> Result<(), TransportError>;

    /// Mask or unmask the interrupt of a line.
    fn set_interrupt(&self, pin: u16, edge: Edge, enable: bool) -> Result<(), TransportError>;
}

/// Analog inputs, compared against a threshold by the engine.
pub trait AnalogDriver {
    /// Sample a channel, in millivolts.
    fn sample_mv(&self, channel: u16) -> Result<u32, TransportError>;

    /// Mask or unmask the threshold interrupt of a channel.
    fn set_interrupt(&self, channel: u16, threshold_mv: u32, enable: bool) -> Result<(), TransportError>;
}

/// Virtual wires, carried as messages over the host link.
pub trait VirtualWireDriver {
    /// Whether the host link has reported the wire's channel as ready.
    fn channel_ready(&self, wire: u16) -> bool;

    /// Last received level of a wire.
    fn wire(&self, wire: u16) -> Result<bool, TransportError>;

    /// Send a wire update to the host.
    fn send_wire(&self, wire: u16, level: bool) -> Result<(), TransportError>;

    /// Mask or unmask the update interrupt of a wire.
    fn set_interrupt(&self, wire: u16, enable: bool) -> Result<(), TransportError>;
}

/// Board-synthesized signals without a direct transport.
pub trait SyntheticDriver {
    /// Read a synthesized signal.
    fn get(&self, id: u16) -> Result<bool, TransportError>;

    /// Write a synthesized signal.
    ///
    /// Defaults to unsupported.
    fn set(&self, _id: u16, _level: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }

    /// Enable or disable a synthesized signal.
    fn enable(&self, _id: u16, _enable: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The set of transports of a board.
pub trait Transports {
    /// Discrete line driver.
    type Line: LineDriver;
    /// Analog input driver.
    type Analog: AnalogDriver;
    /// Virtual wire driver.
    type Wire: VirtualWireDriver;
    /// Board-synthetic driver.
    type Synthetic: SyntheticDriver;

    /// Access the discrete line driver.
    fn line(&self) -> &Self::Line;

    /// Access the analog input driver.
    fn analog(&self) -> &Self::Analog;

    /// Access the virtual wire driver.
    fn wire(&self) -> &Self::Wire;

    /// Access the board-synthetic driver.
    fn synthetic(&self) -> &Self::Synthetic;
}

/// A transport that is not present on a board.
///
/// Every operation fails with [`TransportError::NotSupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unused;

impl LineDriver for Unused {
    fn level(&self, _pin: u16) -> Result<bool, TransportError> {
        Err(TransportError::NotSupported)
    }

    fn set_level(&self, _pin: u16, _level: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }

    fn set_interrupt(&self, _pin: u16, _edge: Edge, _enable: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }
}

impl AnalogDriver for Unused {
    fn sample_mv(&self, _channel: u16) -> Result<u32, TransportError> {
        Err(TransportError::NotSupported)
    }

    fn set_interrupt(&self, _channel: u16, _threshold_mv: u32, _enable: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }
}

impl VirtualWireDriver for Unused {
    fn channel_ready(&self, _wire: u16) -> bool {
        false
    }

    fn wire(&self, _wire: u16) -> Result<bool, TransportError> {
        Err(TransportError::NotSupported)
    }

    fn send_wire(&self, _wire: u16, _level: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }

    fn set_interrupt(&self, _wire: u16, _enable: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported)
    }
}

impl SyntheticDriver for Unused {
    fn get(&self, _id: u16) -> Result<bool, TransportError> {
        Err(TransportError::NotSupported)
    }
}
