//! Counters, used for bounded retry attempts of sequencing transitions.

/// Counter error.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter exceeded its maximum value and wrapped.
    #[error("counter overrun")]
    Overrun,
}

/// A wrapping counter with a maximum value.
#[derive(Debug, Clone, Copy)]
pub struct Counter {
    value: u8,
    max_value: u8,
}

impl Counter {
    /// Create a counter that may be incremented `max_value` times before it overruns.
    pub fn new(max_value: u8) -> Self {
        Self { value: 0, max_value }
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// The maximum value.
    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    /// Increment the counter.
    ///
    /// Fails with [`Error::Overrun`] once the maximum is exceeded, which resets the counter to zero.
    pub fn increment(&mut self) -> Result<(), Error> {
        if self.value >= self.max_value {
            self.value = 0;
            return Err(Error::Overrun);
        }

        self.value += 1;
        Ok(())
    }
}
