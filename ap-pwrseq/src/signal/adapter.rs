//! Signal source adapters, one per transport kind.
//!
//! An adapter turns the raw transport value into the logical value of a signal.
//! A read of `None` means the value is unknown.
use ap_pwrseq_traits::{AnalogDriver, LineDriver, SyntheticDriver, VirtualWireDriver};
use uom::si::electric_potential::millivolt;
use uom::si::f32::ElectricPotential;

use super::{Error, SignalConfig, SignalFlags, Source};

/// Read, write and enable a logical signal over its transport.
pub trait SignalAdapter {
    /// Read the logical value.
    fn read(&self, signal: &SignalConfig) -> Result<Option<bool>, Error>;

    /// Write the logical value.
    fn write(&self, signal: &SignalConfig, value: bool) -> Result<(), Error>;

    /// Mask or unmask the interrupt of the signal.
    fn enable(&self, signal: &SignalConfig, enable: bool) -> Result<(), Error>;
}

fn logical(signal: &SignalConfig, raw: bool) -> bool {
    raw ^ signal.flags.contains(SignalFlags::ACTIVE_LOW)
}

/// Discrete line adapter.
pub struct LineAdapter<'d, D: LineDriver>(pub &'d D);

impl<D: LineDriver> SignalAdapter for LineAdapter<'_, D> {
    fn read(&self, signal: &SignalConfig) -> Result<Option<bool>, Error> {
        let Source::Line { pin, .. } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(Some(logical(signal, self.0.level(pin)?)))
    }

    fn write(&self, signal: &SignalConfig, value: bool) -> Result<(), Error> {
        let Source::Line { pin, .. } = signal.source else {
            return Err(Error::NotSupported);
        };

        if !signal.flags.contains(SignalFlags::OUTPUT) {
            return Err(Error::NotSupported);
        }

        Ok(self.0.set_level(pin, logical(signal, value))?)
    }

    fn enable(&self, signal: &SignalConfig, enable: bool) -> Result<(), Error> {
        let Source::Line { pin, edge } = signal.source else {
            return Err(Error::NotSupported);
        };

        if signal.flags.contains(SignalFlags::OUTPUT) {
            // Outputs have no interrupt.
            return Ok(());
        }

        Ok(self.0.set_interrupt(pin, edge, enable)?)
    }
}

/// Analog threshold adapter.
pub struct AnalogAdapter<'d, D: AnalogDriver>(pub &'d D);

impl<D: AnalogDriver> AnalogAdapter<'_, D> {
    /// The threshold of an analog signal.
    pub fn threshold(signal: &SignalConfig) -> Option<ElectricPotential> {
        match signal.source {
            Source::Analog { threshold_mv, .. } => Some(ElectricPotential::new::<millivolt>(threshold_mv as f32)),
            _ => None,
        }
    }
}

impl<D: AnalogDriver> SignalAdapter for AnalogAdapter<'_, D> {
    fn read(&self, signal: &SignalConfig) -> Result<Option<bool>, Error> {
        let (Source::Analog { channel, .. }, Some(threshold)) = (signal.source, Self::threshold(signal)) else {
            return Err(Error::NotSupported);
        };

        let sample = ElectricPotential::new::<millivolt>(self.0.sample_mv(channel)? as f32);
        Ok(Some(logical(signal, sample >= threshold)))
    }

    fn write(&self, _signal: &SignalConfig, _value: bool) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn enable(&self, signal: &SignalConfig, enable: bool) -> Result<(), Error> {
        let Source::Analog { channel, threshold_mv } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(self.0.set_interrupt(channel, threshold_mv, enable)?)
    }
}

/// Virtual wire adapter.
pub struct WireAdapter<'d, D: VirtualWireDriver>(pub &'d D);

impl<D: VirtualWireDriver> SignalAdapter for WireAdapter<'_, D> {
    fn read(&self, signal: &SignalConfig) -> Result<Option<bool>, Error> {
        let Source::VirtualWire { wire } = signal.source else {
            return Err(Error::NotSupported);
        };

        if !self.0.channel_ready(wire) {
            return Ok(None);
        }

        Ok(Some(logical(signal, self.0.wire(wire)?)))
    }

    fn write(&self, signal: &SignalConfig, value: bool) -> Result<(), Error> {
        let Source::VirtualWire { wire } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(self.0.send_wire(wire, logical(signal, value))?)
    }

    fn enable(&self, signal: &SignalConfig, enable: bool) -> Result<(), Error> {
        let Source::VirtualWire { wire } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(self.0.set_interrupt(wire, enable)?)
    }
}

/// Board-synthetic adapter.
pub struct SyntheticAdapter<'d, D: SyntheticDriver>(pub &'d D);

impl<D: SyntheticDriver> SignalAdapter for SyntheticAdapter<'_, D> {
    fn read(&self, signal: &SignalConfig) -> Result<Option<bool>, Error> {
        let Source::Synthetic { id } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(Some(logical(signal, self.0.get(id)?)))
    }

    fn write(&self, signal: &SignalConfig, value: bool) -> Result<(), Error> {
        let Source::Synthetic { id } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(self.0.set(id, logical(signal, value))?)
    }

    fn enable(&self, signal: &SignalConfig, enable: bool) -> Result<(), Error> {
        let Source::Synthetic { id } = signal.source else {
            return Err(Error::NotSupported);
        };

        Ok(self.0.enable(id, enable)?)
    }
}

#[cfg(test)]
mod tests {
    use ap_pwrseq_traits::Edge;

    use super::*;
    use crate::dummy::DummyTransports;

    const ADC: SignalConfig = SignalConfig::new(
        "PP5000",
        Source::Analog {
            channel: 2,
            threshold_mv: 4500,
        },
    );

    #[test]
    fn analog_threshold_is_inclusive() {
        let transports = DummyTransports::new();
        let adapter = AnalogAdapter(&transports.analog);

        transports.analog.set_sample(2, 4499);
        assert_eq!(adapter.read(&ADC), Ok(Some(false)));
        transports.analog.set_sample(2, 4500);
        assert_eq!(adapter.read(&ADC), Ok(Some(true)));
        assert_eq!(adapter.write(&ADC, true), Err(Error::NotSupported));
    }

    #[test]
    fn line_applies_polarity_and_output_flag() {
        let transports = DummyTransports::new();
        let adapter = LineAdapter(&transports.line);
        let input = SignalConfig::new("SLP_S3_L", Source::Line { pin: 1, edge: Edge::Both })
            .with_flags(SignalFlags::ACTIVE_LOW);
        let output = SignalConfig::new("SYS_RST", Source::Line { pin: 2, edge: Edge::None })
            .with_flags(SignalFlags::OUTPUT);

        transports.line.set(1, false);
        assert_eq!(adapter.read(&input), Ok(Some(true)));
        assert_eq!(adapter.write(&input, true), Err(Error::NotSupported));

        assert_eq!(adapter.write(&output, true), Ok(()));
        assert_eq!(adapter.read(&output), Ok(Some(true)));
    }

    #[test]
    fn wire_is_unknown_until_channel_ready() {
        let transports = DummyTransports::new();
        let adapter = WireAdapter(&transports.wire);
        let signal = SignalConfig::new("SLP_S5", Source::VirtualWire { wire: 4 });

        transports.wire.set(4, true);
        assert_eq!(adapter.read(&signal), Ok(None));
        transports.wire.set_ready(true);
        assert_eq!(adapter.read(&signal), Ok(Some(true)));
    }
}
