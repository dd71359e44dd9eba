//! Timers that are used by the sequencer.
use core::future::Future;

use crate::state::PowerState;

/// The timer trait to implement by the user application.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;

    /// Milliseconds of a monotonic clock.
    fn now_millis() -> u64;
}

/// Durations of the sequencer, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeouts {
    /// Interval at which gates are re-sampled.
    pub poll_ms: u32,
    /// Gate of the hard-off to soft-off transition.
    pub g3s5_ms: u32,
    /// Gate of the soft-off to suspend transition.
    pub s5s3_ms: u32,
    /// Gate of the suspend to on transition.
    pub s3s0_ms: u32,
    /// Bounded wait for power-good signals to drop on the way to hard-off.
    pub power_down_ms: u32,
    /// Width of the system reset pulse.
    pub sys_reset_pulse_ms: u32,
    /// Delay before passing a rising RSMRST through to the PCH.
    pub rsmrst_delay_ms: u32,
    /// Step in which a delayed reboot waits in hard-off.
    pub hard_off_step_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            g3s5_ms: 1000,
            s5s3_ms: 1000,
            s3s0_ms: 1000,
            power_down_ms: 1000,
            sys_reset_pulse_ms: 32,
            rsmrst_delay_ms: 10,
            hard_off_step_ms: 100,
        }
    }
}

impl Timeouts {
    /// The gate timeout of a transitioning state.
    ///
    /// Transitions that only remove power are not gated and report zero.
    pub fn gate(&self, transition: PowerState) -> u32 {
        match transition {
            PowerState::G3S5 => self.g3s5_ms,
            PowerState::S5S3 => self.s5s3_ms,
            PowerState::S3S0 => self.s3s0_ms,
            PowerState::S5G3 => self.power_down_ms,
            _ => 0,
        }
    }
}

/// Types of timers that are used for timeouts.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    /// Re-sample a gate.
    Poll,
    /// Hold the system reset output asserted.
    SysResetPulse,
    /// Delay a rising RSMRST before passing it through.
    RsmrstDelay,
    /// One step of a delayed reboot from hard-off.
    HardOffStep,
    /// Soft-off inactivity, in seconds.
    S5Inactivity(u32),
    /// Host sleep timeout, in milliseconds.
    SleepTimeout(u32),
}

impl TimerType {
    /// Create a new timer for a given type.
    pub fn new<TIMER: Timer>(timer_type: TimerType, timeouts: &Timeouts) -> impl Future<Output = ()> {
        let milliseconds = match timer_type {
            TimerType::Poll => timeouts.poll_ms as u64,
            TimerType::SysResetPulse => timeouts.sys_reset_pulse_ms as u64,
            TimerType::RsmrstDelay => timeouts.rsmrst_delay_ms as u64,
            TimerType::HardOffStep => timeouts.hard_off_step_ms as u64,
            TimerType::S5Inactivity(seconds) => seconds as u64 * 1000,
            TimerType::SleepTimeout(milliseconds) => milliseconds as u64,
        };

        TIMER::after_millis(milliseconds)
    }
}
