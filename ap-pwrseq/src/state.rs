//! Sequencing states of the AP and their classification into state masks.
use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// A set of AP power states, used to query the sequencer from other subsystems.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateMask: u8 {
        /// Hard-off (G3).
        const HARD_OFF = 1 << 0;
        /// Soft-off (S5).
        const SOFT_OFF = 1 << 1;
        /// Suspend to RAM (S3).
        const SUSPEND = 1 << 2;
        /// On (S0).
        const ON = 1 << 3;
        /// Standby (S0ix).
        const STANDBY = 1 << 4;

        /// Either of the off states.
        const ANY_OFF = Self::HARD_OFF.bits() | Self::SOFT_OFF.bits();
        /// Either of the suspend states.
        const ANY_SUSPEND = Self::SUSPEND.bits() | Self::STANDBY.bits();
    }
}

/// Sequencing state of the AP.
///
/// Steady states are named after the ACPI sleep states, transitioning states after their
/// predecessor and successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PowerState {
    /// Hard-off, all rails removed.
    #[default]
    G3 = 0,
    /// Soft-off, always-on rails present.
    S5 = 1,
    /// Suspend to RAM.
    S3 = 2,
    /// On.
    S0 = 3,
    /// Standby, low-latency suspend while on.
    S0ix = 4,
    /// Hard-off to soft-off.
    G3S5 = 5,
    /// Soft-off to suspend.
    S5S3 = 6,
    /// Suspend to on.
    S3S0 = 7,
    /// On to suspend.
    S0S3 = 8,
    /// Suspend to soft-off.
    S3S5 = 9,
    /// Soft-off to hard-off.
    S5G3 = 10,
    /// Standby to on.
    S0ixS0 = 11,
    /// On to standby.
    S0S0ix = 12,
}

impl PowerState {
    /// All states, ordered by number.
    pub const ALL: [PowerState; 13] = [
        PowerState::G3,
        PowerState::S5,
        PowerState::S3,
        PowerState::S0,
        PowerState::S0ix,
        PowerState::G3S5,
        PowerState::S5S3,
        PowerState::S3S0,
        PowerState::S0S3,
        PowerState::S3S5,
        PowerState::S5G3,
        PowerState::S0ixS0,
        PowerState::S0S0ix,
    ];

    /// The human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            PowerState::G3 => "G3",
            PowerState::S5 => "S5",
            PowerState::S3 => "S3",
            PowerState::S0 => "S0",
            PowerState::S0ix => "S0ix",
            PowerState::G3S5 => "G3->S5",
            PowerState::S5S3 => "S5->S3",
            PowerState::S3S0 => "S3->S0",
            PowerState::S0S3 => "S0->S3",
            PowerState::S3S5 => "S3->S5",
            PowerState::S5G3 => "S5->G3",
            PowerState::S0ixS0 => "S0ix->S0",
            PowerState::S0S0ix => "S0->S0ix",
        }
    }

    /// The state number shown on the console.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Whether this is a transitioning state.
    pub fn is_transition(self) -> bool {
        self.endpoints().is_some()
    }

    /// Predecessor and successor of a transitioning state.
    pub fn endpoints(self) -> Option<(PowerState, PowerState)> {
        use PowerState::*;

        match self {
            G3S5 => Some((G3, S5)),
            S5S3 => Some((S5, S3)),
            S3S0 => Some((S3, S0)),
            S0S3 => Some((S0, S3)),
            S3S5 => Some((S3, S5)),
            S5G3 => Some((S5, G3)),
            S0ixS0 => Some((S0ix, S0)),
            S0S0ix => Some((S0, S0ix)),
            G3 | S5 | S3 | S0 | S0ix => None,
        }
    }

    /// The masks that must all be queried for this state to count as "in" them.
    ///
    /// A transitioning state is in both its endpoints.
    fn required(self) -> StateMask {
        match self.endpoints() {
            Some((from, to)) => from.required() | to.required(),
            None => match self {
                PowerState::G3 => StateMask::HARD_OFF,
                PowerState::S5 => StateMask::SOFT_OFF,
                PowerState::S3 => StateMask::SUSPEND,
                PowerState::S0 => StateMask::ON,
                _ => StateMask::STANDBY,
            },
        }
    }

    /// Whether the AP is in one of the states of `mask`.
    ///
    /// A transitioning state only matches when the mask covers both of its endpoints.
    pub fn in_state(self, mask: StateMask) -> bool {
        mask.contains(self.required())
    }

    /// Whether the AP is in, or transitioning to, one of the states of `mask`.
    pub fn in_or_transitioning_to(self, mask: StateMask) -> bool {
        let target = match self.endpoints() {
            Some((_, to)) => to,
            None => self,
        };

        mask.contains(target.required())
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for PowerState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PowerState::ALL.get(value as usize).copied().ok_or(value)
    }
}
