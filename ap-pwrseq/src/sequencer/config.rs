//! Board configuration of the sequencer.
//!
//! The state graph is fixed. Which signals play which role, the gates, timeouts and retries are
//! configured per board.
use ap_pwrseq_traits::Transports;

use crate::signal::registry::SignalRegistry;
use crate::signal::{ConfigError, SignalFlags, SignalId, SignalMask};
use crate::state::PowerState;
use crate::timers::Timeouts;

/// Signals with a fixed meaning to the sequencer.
///
/// Sleep signals are asserted while the PCH requests the corresponding sleep state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalRoles {
    /// Resume well power good, from the board.
    pub rsmrst: SignalId,
    /// Resume well power good, passed through to the PCH.
    pub rsmrst_out: Option<SignalId>,
    /// S3 sleep request.
    pub slp_s3: SignalId,
    /// S5 sleep request.
    pub slp_s5: SignalId,
    /// S0ix sleep request.
    pub slp_s0: Option<SignalId>,
    /// System reset output.
    pub sys_reset: Option<SignalId>,
}

/// Power-good gates of the transitions that enable rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gates {
    /// Primary rails, in addition to RSMRST.
    pub g3s5: SignalMask,
    /// Suspend rails. Losing them while the AP is powered is a power failure.
    pub s5s3: SignalMask,
    /// Core rails.
    pub s3s0: SignalMask,
    /// Signals that must drop on the way to hard-off.
    pub power_down: SignalMask,
}

/// Bounded retries of a timed-out gate, per transition.
///
/// When retries are exhausted the AP is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Retries {
    /// Hard-off to soft-off.
    pub g3s5: u8,
    /// Soft-off to suspend.
    pub s5s3: u8,
    /// Suspend to on.
    pub s3s0: u8,
}

impl Default for Retries {
    fn default() -> Self {
        Self {
            g3s5: 1,
            s5s3: 1,
            s3s0: 1,
        }
    }
}

impl Retries {
    /// Retries of a state. Only gated transitions retry.
    pub fn of(&self, state: PowerState) -> u8 {
        match state {
            PowerState::G3S5 => self.g3s5,
            PowerState::S5S3 => self.s5s3,
            PowerState::S3S0 => self.s3s0,
            _ => 0,
        }
    }
}

/// Sequencer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Signal roles.
    pub roles: SignalRoles,
    /// Gates.
    pub gates: Gates,
    /// Signals enabled on leaving hard-off and disabled on entering it.
    pub sequencing: SignalMask,
    /// Timeouts.
    pub timeouts: Timeouts,
    /// Retries.
    pub retries: Retries,
    /// Whether standby (S0ix) is supported.
    pub standby: bool,
    /// Host sleep timeout if the host asks for the default, in milliseconds.
    pub sleep_timeout_ms: u32,
    /// Soft-off inactivity timeout in seconds, `None` to stay in soft-off.
    pub s5_inactivity_s: Option<u32>,
    /// Whether a host shutdown pauses in soft-off. Otherwise it goes on to hard-off.
    pub pause_in_s5: bool,
    /// Signal changes per second above which an interrupt storm is logged, `None` to not detect storms.
    pub interrupt_storm_threshold: Option<u32>,
}

impl Config {
    /// A configuration with default timeouts and retries.
    pub fn new(roles: SignalRoles, gates: Gates) -> Self {
        Self {
            roles,
            gates,
            sequencing: gates.g3s5 | gates.s5s3 | gates.s3s0 | roles.rsmrst.mask(),
            timeouts: Timeouts::default(),
            retries: Retries::default(),
            standby: true,
            sleep_timeout_ms: 10_000,
            s5_inactivity_s: Some(10),
            pause_in_s5: true,
            interrupt_storm_threshold: Some(100),
        }
    }

    /// The gate of the hard-off to soft-off transition.
    pub fn g3s5_gate(&self) -> SignalMask {
        self.gates.g3s5 | self.roles.rsmrst.mask()
    }

    /// Signals that must be asserted for the AP to be on.
    pub fn s0_signals(&self) -> SignalMask {
        self.gates.s5s3 | self.gates.s3s0
    }

    /// Check that all roles and gates refer to signals of the registry, and that driven roles are outputs.
    pub fn validate<T: Transports>(&self, signals: &SignalRegistry<'_, T>) -> Result<(), ConfigError> {
        let roles = self.roles;
        let ids = [
            Some(roles.rsmrst),
            roles.rsmrst_out,
            Some(roles.slp_s3),
            Some(roles.slp_s5),
            roles.slp_s0,
            roles.sys_reset,
        ];

        for id in ids.into_iter().flatten() {
            signals.config(id).map_err(|_| ConfigError::UnknownSignal(id.0))?;
        }

        for id in [roles.rsmrst_out, roles.sys_reset].into_iter().flatten() {
            let signal = signals.config(id).map_err(|_| ConfigError::UnknownSignal(id.0))?;
            if !signal.flags.contains(SignalFlags::OUTPUT) {
                return Err(ConfigError::NotAnOutput(signal.name));
            }
        }

        let masks = self.gates.g3s5 | self.gates.s5s3 | self.gates.s3s0 | self.gates.power_down | self.sequencing;
        let known = signals.ids().fold(0, |mask, id| mask | id.mask());
        if masks & !known != 0 {
            return Err(ConfigError::UnknownSignal((masks & !known).trailing_zeros() as u8));
        }

        Ok(())
    }
}
