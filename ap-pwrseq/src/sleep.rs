//! Host sleep/wake bookkeeping.
//!
//! The host announces a sleep before it suspends and a resume after it wakes up. In between, the sequencer
//! reports every suspend entry it observes. The first entry is the one the host asked for, every further one
//! is an unexpected cycle that is reported back to the host on resume.
use proc_bitfield::bitfield;

/// Sleep timeout value that selects the configured default.
pub const TIMEOUT_DEFAULT: u16 = 0;

/// Sleep timeout value that disables the timeout.
pub const TIMEOUT_INFINITE: u16 = 0xFFFF;

/// Kind of sleep the host requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SleepKind {
    /// Low-latency standby (S0ix).
    Standby,
    /// Suspend to RAM (S3).
    Suspend,
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// Sleep transitions reported to the host on resume.
    pub struct SleepTransitions(pub u32): Debug, FromStorage, IntoStorage {
        /// The AP did not reach the requested sleep state before the timeout.
        pub timeout: bool @ 31,
        /// Number of unexpected suspend cycles.
        pub count: u32 @ 0..=30,
    }
}

/// Sleep/wake errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepError {
    /// A resume arrived without a preceding sleep.
    #[error("resume without sleep")]
    NotAsleep,
    /// The resume does not match the announced sleep.
    #[error("resume of {resumed:?} after sleep of {requested:?}")]
    Mismatched {
        /// Announced sleep.
        requested: SleepKind,
        /// Resume kind.
        resumed: SleepKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Awake,
    Asleep { kind: SleepKind, timeout_ms: Option<u32> },
}

/// The host's sleep state, as seen by the embedded controller.
#[derive(Debug, Clone, Copy)]
pub struct SleepBridge {
    phase: Phase,
    transitions: SleepTransitions,
    entered: bool,
    deadline_ms: Option<u64>,
}

impl Default for SleepBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepBridge {
    /// A bridge for an awake host.
    pub const fn new() -> Self {
        Self {
            phase: Phase::Awake,
            transitions: SleepTransitions(0),
            entered: false,
            deadline_ms: None,
        }
    }

    fn count_cycle(&mut self) {
        let count = self.transitions.count();
        if count < 0x7FFF_FFFF {
            self.transitions.set_count(count + 1);
        }
    }

    /// The host announces a sleep.
    ///
    /// `timeout_ms` is resolved by the caller, `None` disables the timeout. A repeated announcement
    /// without a resume counts as an unexpected cycle.
    pub fn sleep(&mut self, kind: SleepKind, timeout_ms: Option<u32>) {
        match self.phase {
            Phase::Asleep { .. } => {
                warn!("sleep {:?} without resume", kind);
                self.count_cycle();
            }
            Phase::Awake => {
                self.transitions = SleepTransitions(0);
                self.entered = false;
            }
        }

        self.phase = Phase::Asleep { kind, timeout_ms };
        self.deadline_ms = None;
    }

    /// The host announces a resume.
    ///
    /// The bridge is awake afterwards, even if the resume does not match.
    pub fn resume(&mut self, kind: SleepKind) -> Result<SleepTransitions, SleepError> {
        let phase = core::mem::replace(&mut self.phase, Phase::Awake);
        let transitions = self.transitions;
        self.transitions = SleepTransitions(0);
        self.entered = false;
        self.deadline_ms = None;

        match phase {
            Phase::Awake => Err(SleepError::NotAsleep),
            Phase::Asleep { kind: requested, .. } if requested != kind => Err(SleepError::Mismatched {
                requested,
                resumed: kind,
            }),
            Phase::Asleep { .. } => Ok(transitions),
        }
    }

    /// The sequencer observed the AP entering a suspend state.
    pub fn suspend_entered(&mut self) {
        if let Phase::Asleep { .. } = self.phase {
            if self.entered {
                self.count_cycle();
            }
            self.entered = true;
        }
    }

    /// The requested sleep state was not reached in time.
    pub fn timed_out(&mut self) {
        if let Phase::Asleep { .. } = self.phase {
            self.transitions.set_timeout(true);
        }
    }

    /// The pending sleep, if any.
    pub fn pending(&self) -> Option<SleepKind> {
        match self.phase {
            Phase::Awake => None,
            Phase::Asleep { kind, .. } => Some(kind),
        }
    }

    /// The sleep timeout still to be armed, if the AP has not entered the requested state yet.
    pub fn armed_timeout(&self) -> Option<u32> {
        match self.phase {
            Phase::Asleep { timeout_ms, .. } if !self.entered && !self.transitions.timeout() => timeout_ms,
            _ => None,
        }
    }

    /// The part of the sleep timeout left at `now_ms`.
    ///
    /// The timeout runs from the first call after the announcement, so waking up early never restarts it.
    pub fn remaining_timeout(&mut self, now_ms: u64) -> Option<u32> {
        let timeout_ms = self.armed_timeout()?;
        let deadline_ms = *self.deadline_ms.get_or_insert(now_ms + timeout_ms as u64);

        Some(deadline_ms.saturating_sub(now_ms).min(timeout_ms as u64) as u32)
    }

    /// Forget a pending sleep, e.g. on the way to hard-off.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
