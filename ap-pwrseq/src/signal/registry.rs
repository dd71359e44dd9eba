//! The board's signal table, bound to its transports.
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use ap_pwrseq_traits::Transports;

use super::adapter::{AnalogAdapter, LineAdapter, SignalAdapter, SyntheticAdapter, WireAdapter};
use super::{ConfigError, Error, MAX_SIGNALS, SignalConfig, SignalFlags, SignalId, SignalMask, Snapshot, Source};

const OFF: u8 = 0;
const ON: u8 = 1;
const UNKNOWN: u8 = 2;

/// Run-time state of a signal.
///
/// Values are single atomic words, so concurrent readers never see a torn update.
struct Slot {
    value: AtomicU8,
    enabled: AtomicBool,
    faulted: AtomicBool,
}

impl Slot {
    const fn new() -> Self {
        Self {
            value: AtomicU8::new(UNKNOWN),
            enabled: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        }
    }

    fn store(&self, value: Option<bool>) {
        let raw = match value {
            Some(false) => OFF,
            Some(true) => ON,
            None => UNKNOWN,
        };
        self.value.store(raw, Ordering::Release);
    }

    fn load(&self) -> Option<bool> {
        match self.value.load(Ordering::Acquire) {
            OFF => Some(false),
            ON => Some(true),
            _ => None,
        }
    }
}

/// Registry of the logical power signals of a board.
pub struct SignalRegistry<'a, T: Transports> {
    transports: T,
    table: &'a [SignalConfig],
    slots: [Slot; MAX_SIGNALS],
    debug_mask: AtomicU32,
    last_asserted: AtomicU32,
    last_valid: AtomicU32,
}

impl<'a, T: Transports> SignalRegistry<'a, T> {
    /// Bind a signal table to the board's transports.
    ///
    /// Fails if the table is empty or too large, if names or transport bindings are not unique,
    /// or if an analog signal is configured as an output.
    pub fn new(transports: T, table: &'a [SignalConfig]) -> Result<Self, ConfigError> {
        if table.is_empty() {
            return Err(ConfigError::Empty);
        }

        if table.len() > MAX_SIGNALS {
            return Err(ConfigError::TooMany(table.len()));
        }

        for (index, signal) in table.iter().enumerate() {
            if matches!(signal.source, Source::Analog { .. }) && signal.flags.contains(SignalFlags::OUTPUT) {
                return Err(ConfigError::AnalogOutput(signal.name));
            }

            for other in &table[..index] {
                if other.name == signal.name {
                    return Err(ConfigError::DuplicateName(signal.name));
                }

                if other.source.same_binding(&signal.source) {
                    return Err(ConfigError::DuplicateBinding(signal.name));
                }
            }
        }

        let all = if table.len() == MAX_SIGNALS {
            SignalMask::MAX
        } else {
            (1 << table.len()) - 1
        };

        Ok(Self {
            transports,
            table,
            slots: [const { Slot::new() }; MAX_SIGNALS],
            debug_mask: AtomicU32::new(all),
            last_asserted: AtomicU32::new(0),
            last_valid: AtomicU32::new(0),
        })
    }

    /// The board's transports.
    pub fn transports(&self) -> &T {
        &self.transports
    }

    /// The number of signals.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty. Never true for a constructed registry.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Iterate over all signal ids.
    pub fn ids(&self) -> impl Iterator<Item = SignalId> + use<'a, T> {
        (0..self.table.len()).map(|index| SignalId(index as u8))
    }

    /// The configuration of a signal.
    pub fn config(&self, id: SignalId) -> Result<&SignalConfig, Error> {
        self.table.get(id.index()).ok_or(Error::InvalidSignal(id.0))
    }

    /// The name of a signal.
    pub fn name(&self, id: SignalId) -> Option<&'static str> {
        self.table.get(id.index()).map(|signal| signal.name)
    }

    /// Find a signal by name.
    pub fn find(&self, name: &str) -> Option<SignalId> {
        self.table
            .iter()
            .position(|signal| signal.name == name)
            .map(|index| SignalId(index as u8))
    }

    /// Whether a signal's interrupt is enabled.
    pub fn is_enabled(&self, id: SignalId) -> bool {
        self.config(id).is_ok() && self.slots[id.index()].enabled.load(Ordering::Acquire)
    }

    /// The last known value of a signal, without sampling it.
    pub fn value(&self, id: SignalId) -> Option<bool> {
        self.config(id).ok().and_then(|_| self.slots[id.index()].load())
    }

    /// Dispatch to the adapter of a signal's source.
    fn with_adapter<R>(&self, signal: &SignalConfig, f: impl FnOnce(&dyn SignalAdapter) -> R) -> R {
        match signal.source {
            Source::Line { .. } => f(&LineAdapter(self.transports.line())),
            Source::Analog { .. } => f(&AnalogAdapter(self.transports.analog())),
            Source::VirtualWire { .. } => f(&WireAdapter(self.transports.wire())),
            Source::Synthetic { .. } => f(&SyntheticAdapter(self.transports.synthetic())),
        }
    }

    /// Read a signal through its adapter and store the result.
    fn sample(&self, id: SignalId, signal: &SignalConfig) -> Result<Option<bool>, Error> {
        let slot = &self.slots[id.index()];

        match self.with_adapter(signal, |adapter| adapter.read(signal)) {
            Ok(value) => {
                slot.faulted.store(false, Ordering::Relaxed);
                slot.store(value);
                Ok(value)
            }
            Err(error) => {
                slot.store(None);
                Err(error)
            }
        }
    }

    /// Sample all enabled signals and report the signals that newly failed.
    pub(crate) fn capture(&self) -> (Snapshot, SignalMask) {
        let mut asserted = 0;
        let mut valid = 0;
        let mut faults = 0;

        for (index, signal) in self.table.iter().enumerate() {
            let id = SignalId(index as u8);
            if !self.slots[index].enabled.load(Ordering::Acquire) {
                continue;
            }

            match self.sample(id, signal) {
                Ok(Some(value)) => {
                    valid |= id.mask();
                    if value {
                        asserted |= id.mask();
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    let slot = &self.slots[index];
                    if !slot.faulted.load(Ordering::Relaxed) {
                        slot.faulted.store(true, Ordering::Relaxed);
                        faults |= id.mask();
                        warn!("power signal {} read failed: {:?}", signal.name, error);
                    }
                }
            }
        }

        let snapshot = Snapshot::new(asserted, valid);
        self.log_changes(snapshot);
        self.last_asserted.store(snapshot.asserted(), Ordering::Release);
        self.last_valid.store(snapshot.valid(), Ordering::Release);

        (snapshot, faults)
    }

    /// Sample all enabled signals.
    ///
    /// Disabled signals and signals with an unknown value read as de-asserted.
    pub fn snapshot(&self) -> Snapshot {
        self.capture().0
    }

    /// The most recent snapshot.
    pub fn last_snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.last_asserted.load(Ordering::Acquire),
            self.last_valid.load(Ordering::Acquire),
        )
    }

    fn log_changes(&self, snapshot: Snapshot) {
        let previous = self.last_snapshot();
        let mut changed = (previous.asserted() ^ snapshot.asserted()) | (previous.valid() ^ snapshot.valid());
        changed &= self.debug_mask.load(Ordering::Relaxed);

        for (index, signal) in self.table.iter().enumerate() {
            if signal.flags.contains(SignalFlags::NO_LOG) {
                changed &= !SignalId(index as u8).mask();
            }
        }

        if changed == 0 {
            return;
        }

        for id in self.ids().filter(|id| changed & id.mask() != 0) {
            let name = self.table[id.index()].name;
            let value = if snapshot.valid() & id.mask() != 0 {
                Some(snapshot.is_on(id))
            } else {
                None
            };
            debug!("{} = {:?}", name, value);
        }

        info!("power in 0x{:x}", snapshot.asserted());
    }

    /// Sample one signal.
    pub fn get(&self, id: SignalId) -> Result<Option<bool>, Error> {
        let signal = self.config(id)?;
        self.sample(id, signal)
    }

    /// Re-sample one signal, e.g. from its interrupt. Returns whether its value changed.
    pub fn refresh(&self, id: SignalId) -> Result<bool, Error> {
        let before = self.value(id);
        Ok(self.get(id)? != before)
    }

    /// Write one signal.
    pub fn set(&self, id: SignalId, value: bool) -> Result<(), Error> {
        let signal = self.config(id)?;
        self.with_adapter(signal, |adapter| adapter.write(signal, value))?;
        self.slots[id.index()].store(Some(value));

        Ok(())
    }

    /// Enable or disable a signal.
    ///
    /// Repeating the current setting does not touch the transport. The setting only changes once the
    /// transport accepted it, so a failed call is retried by the next one.
    pub fn enable(&self, id: SignalId, enable: bool) -> Result<(), Error> {
        let signal = self.config(id)?;
        let slot = &self.slots[id.index()];

        if slot.enabled.load(Ordering::Acquire) == enable {
            return Ok(());
        }

        self.with_adapter(signal, |adapter| adapter.enable(signal, enable))?;
        slot.enabled.store(enable, Ordering::Release);

        Ok(())
    }

    /// Enable or disable all signals of a mask.
    ///
    /// Every signal is processed, the first error is returned.
    pub fn enable_mask(&self, mask: SignalMask, enable: bool) -> Result<(), Error> {
        let mut result = Ok(());

        for id in self.ids().filter(|id| mask & id.mask() != 0) {
            if let Err(error) = self.enable(id, enable) {
                warn!("power signal {} enable failed: {:?}", self.table[id.index()].name, error);
                result = result.and(Err(error));
            }
        }

        result
    }

    /// Enable all signals that are not disabled at boot.
    pub fn enable_at_boot(&self) {
        let mask = self
            .ids()
            .filter(|id| !self.table[id.index()].flags.contains(SignalFlags::DISABLE_AT_BOOT))
            .fold(0, |mask, id| mask | id.mask());

        // Failures are logged per signal.
        let _ = self.enable_mask(mask, true);
    }

    /// Get the debug mask, or set it if `mask` is given.
    ///
    /// Only transitions of signals in the mask are logged.
    pub fn debug_mask(&self, mask: Option<SignalMask>) -> SignalMask {
        if let Some(mask) = mask {
            self.debug_mask.store(mask, Ordering::Relaxed);
        }

        self.debug_mask.load(Ordering::Relaxed)
    }
}
