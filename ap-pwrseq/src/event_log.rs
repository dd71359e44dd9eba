//! Bounded log of sequencing failures.
//!
//! Every entry carries the snapshot at the time of failure, so that multi-signal gates can be debugged
//! after the fact. The oldest entry is dropped when the log is full.
use heapless::Deque;

use crate::context::ShutdownReason;
use crate::signal::{SignalId, SignalMask, Snapshot};
use crate::state::PowerState;

/// Number of entries the log holds.
pub const EVENT_LOG_SIZE: usize = 16;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// A gate did not close in time.
    GateTimeout {
        /// The transitioning state that waited.
        transition: PowerState,
        /// Signals of the gate that were not asserted.
        missing: SignalMask,
    },
    /// Power-good signals did not drop on the way to hard-off.
    DeassertTimeout {
        /// Signals still asserted.
        remaining: SignalMask,
    },
    /// A shutdown was forced.
    ForcedShutdown(ShutdownReason),
    /// Signals could not be read from their transport.
    TransportFault(SignalMask),
    /// A resume did not match the announced sleep.
    MismatchedResume,
    /// The AP did not reach the requested sleep state in time.
    SleepTimeout,
    /// A signal interrupted more often than the storm threshold within a second.
    InterruptStorm(SignalId),
}

/// A log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Entry {
    /// Running number of the entry.
    pub sequence: u32,
    /// What went wrong.
    pub kind: EventKind,
    /// Sequencing state at the time.
    pub state: PowerState,
    /// Signals at the time.
    pub snapshot: Snapshot,
}

/// The log.
#[derive(Debug)]
pub struct EventLog {
    entries: Deque<Entry, EVENT_LOG_SIZE>,
    sequence: u32,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// An empty log.
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
            sequence: 0,
        }
    }

    /// Append an entry, dropping the oldest one if the log is full.
    pub fn record(&mut self, kind: EventKind, state: PowerState, snapshot: Snapshot) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }

        let entry = Entry {
            sequence: self.sequence,
            kind,
            state,
            snapshot,
        };
        self.sequence = self.sequence.wrapping_add(1);

        // Cannot fail, room was made above.
        let _ = self.entries.push_back(entry);
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&Entry> {
        self.entries.back()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
