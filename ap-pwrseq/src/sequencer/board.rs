//! The board allows the sequencer to drive power rails, and be informed about status changes.
//!
//! The sequencer decides when a hook runs, the board decides what it does. Hooks that enable rails run
//! before the sequencer waits for the matching power-good gate. Hooks that remove rails are not gated.
use core::future::Future;

use ap_pwrseq_traits::Transports;

use crate::context::ShutdownReason;
use crate::signal::{self, registry::SignalRegistry};

/// Power events that the board is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerEvent {
    /// The sequencer determined its initial state.
    Initialized,
    /// The AP left soft-off.
    Startup,
    /// The AP is on.
    Resume,
    /// The AP is suspending.
    Suspend,
    /// The AP is shutting down.
    Shutdown,
    /// The AP has shut down.
    ShutdownComplete,
    /// The AP is in hard-off.
    HardOff,
    /// The AP was reset.
    Reset,
    /// The AP entered standby.
    StandbySuspend,
    /// The AP left standby.
    StandbyResume,
    /// The AP did not reach the sleep state the host announced.
    SleepTimeout,
}

/// Trait for the board.
///
/// All hooks default to doing nothing.
pub trait Board<T: Transports> {
    /// Whether all rails of soft-off are confirmed enabled.
    fn power_rails_enabled(&mut self, _signals: &SignalRegistry<'_, T>) -> bool {
        true
    }

    /// Whether the firmware jumped to this image while the AP kept running.
    ///
    /// The sequencer then adopts the state the signals indicate instead of forcing hard-off.
    fn jumped_to_image(&mut self) -> bool {
        false
    }

    /// Hard-off to soft-off: enable the primary rails.
    fn hard_off_exit(&mut self, _signals: &SignalRegistry<'_, T>) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Soft-off to suspend: enable the suspend rails.
    fn soft_off_to_suspend(
        &mut self,
        _signals: &SignalRegistry<'_, T>,
    ) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Suspend to on: enable the core rails.
    fn suspend_to_on(&mut self, _signals: &SignalRegistry<'_, T>) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// The AP reached on, e.g. release the processor from reset.
    fn steady_on(&mut self, _signals: &SignalRegistry<'_, T>) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// On to suspend: remove the core rails.
    fn on_to_suspend(&mut self, _signals: &SignalRegistry<'_, T>) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Suspend to soft-off: remove the suspend rails.
    fn suspend_to_soft_off(
        &mut self,
        _signals: &SignalRegistry<'_, T>,
    ) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Force the AP off, e.g. by holding the power button or asserting RSMRST.
    fn force_shutdown(
        &mut self,
        _signals: &SignalRegistry<'_, T>,
        _reason: ShutdownReason,
    ) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Soft-off to hard-off: remove all remaining rails, in their required order.
    fn enter_hard_off(&mut self, _signals: &SignalRegistry<'_, T>) -> impl Future<Output = Result<(), signal::Error>> {
        async { Ok(()) }
    }

    /// Notify the board about a power event.
    fn notify(&mut self, _event: PowerEvent) {}
}
