//! The power sequencer, which drives the AP through its sleep states.
use core::marker::PhantomData;

use ap_pwrseq_traits::Transports;
use embassy_futures::select::{Either, select};

use crate::context::{Context, ShutdownReason};
use crate::counters::Counter;
use crate::event_log::EventKind;
use crate::signal::registry::SignalRegistry;
use crate::signal::{self, ConfigError, SignalMask, Snapshot};
use crate::sleep::SleepKind;
use crate::state::PowerState;
use crate::timers::{Timer, TimerType};

pub mod board;
pub mod config;

pub use board::{Board, PowerEvent};
pub use config::{Config, Gates, Retries, SignalRoles};


/// Errors that can occur in a sequencing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A gate did not close within the transition's timeout.
    #[error("gate of {transition:?} timed out, missing 0x{missing:x}")]
    GateTimeout {
        /// The transitioning state.
        transition: PowerState,
        /// Signals of the gate that were not asserted.
        missing: SignalMask,
        /// Signals at the time of the timeout.
        snapshot: Snapshot,
    },
    /// A shutdown request cancelled the wait.
    #[error("cancelled by shutdown request")]
    Cancelled,
    /// A signal could not be driven.
    #[error("signal error: {0}")]
    Signal(#[from] signal::Error),
}

/// The AP power sequencer.
///
/// Only one sequencing step runs at a time. Other tasks interact with it through the shared [`Context`].
pub struct Sequencer<'a, T: Transports, TIMER: Timer, BOARD: Board<T>> {
    context: &'a Context,
    signals: &'a SignalRegistry<'a, T>,
    board: BOARD,
    config: Config,
    state: PowerState,
    retry: Counter,
    shutdown_reason: ShutdownReason,
    s5_expired: bool,
    logged_inputs: Option<SignalMask>,

    _timer: PhantomData<TIMER>,
}

impl<'a, T: Transports, TIMER: Timer, BOARD: Board<T>> Sequencer<'a, T, TIMER, BOARD> {
    /// Create a new sequencer in hard-off.
    ///
    /// Fails if the configuration refers to signals outside the registry.
    pub fn new(
        context: &'a Context,
        signals: &'a SignalRegistry<'a, T>,
        board: BOARD,
        config: Config,
    ) -> Result<Self, ConfigError> {
        config.validate(signals)?;

        context.set_default_sleep_timeout(config.sleep_timeout_ms);
        context.set_s5_inactivity_timeout(config.s5_inactivity_s);
        context.set_pause_in_s5(config.pause_in_s5);
        context.set_interrupt_storm_threshold(config.interrupt_storm_threshold);
        context.set_state(PowerState::G3);

        Ok(Self {
            context,
            signals,
            board,
            config,
            state: PowerState::G3,
            retry: Counter::new(0),
            shutdown_reason: ShutdownReason::Init,
            s5_expired: false,
            logged_inputs: None,
            _timer: PhantomData,
        })
    }

    /// The current state.
    pub fn state(&self) -> PowerState {
        self.state
    }

    /// The board.
    pub fn board(&mut self) -> &mut BOARD {
        &mut self.board
    }

    /// Determine the initial state from the signals.
    ///
    /// After a jump between firmware images the AP kept running, and the sequencer adopts what the
    /// signals indicate. Otherwise, the AP is forced off.
    pub async fn initialize(&mut self) {
        self.signals.enable_at_boot();

        let jumped = self.board.jumped_to_image();
        if jumped {
            // Failures are logged per signal.
            let _ = self.signals.enable_mask(self.config.sequencing, true);
        }
        let snapshot = self.sample();

        let state = if !jumped {
            PowerState::G3
        } else if snapshot.all_on(self.config.s0_signals()) && snapshot.is_off(self.config.roles.slp_s3) {
            PowerState::S0
        } else if snapshot.all_on(self.config.g3s5_gate()) {
            PowerState::S5
        } else {
            PowerState::G3
        };

        if state == PowerState::G3 {
            if let Err(error) = self.board.force_shutdown(self.signals, ShutdownReason::Init).await {
                warn!("shutdown on init failed: {:?}", error);
            }
        }

        info!("initial power state {}", state.name());
        let before = self.state;
        self.state = state;
        self.board.notify(PowerEvent::Initialized);
        self.commit(before);
    }

    /// Run a single step of the sequencer.
    ///
    /// Waits for an event if the step did not change the state.
    pub async fn run_step(&mut self) {
        let before = self.state;
        self.evaluate().await;

        if self.state == before && !self.state.is_transition() {
            self.wait_for_event().await;
        }
    }

    /// Run the sequencer continuously.
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_step().await;
        }
    }

    /// Evaluate the current state once, serving pending requests first.
    async fn evaluate(&mut self) {
        let before = self.state;

        if self.context.take_reset() {
            self.reset().await;
        }

        if let Some(reason) = self.context.take_shutdown() {
            self.state = self.force_shutdown(reason).await;
            self.commit(before);
            return;
        }

        if self.state != PowerState::G3 {
            self.context.drop_exit_hard_off();
        }

        if let Err(error) = self.update_state().await {
            self.recover(error).await;
        }

        self.commit(before);
    }

    /// Map a failed step to the next state.
    async fn recover(&mut self, error: Error) {
        let new_state = match (self.state, error) {
            // The pending shutdown is served by the next step.
            (_, Error::Cancelled) => {
                debug!("{} cancelled", self.state.name());
                None
            }
            (transition, Error::GateTimeout { .. }) if transition.is_transition() => match self.retry.increment() {
                Ok(()) => {
                    warn!(
                        "retrying {} ({}/{})",
                        transition.name(),
                        self.retry.value(),
                        self.retry.max_value()
                    );
                    None
                }
                Err(_) => Some(self.force_shutdown(ShutdownReason::GateTimeout).await),
            },
            (_, error) => {
                error!("power sequencing error {:?} in {}", error, self.state.name());
                Some(self.force_shutdown(ShutdownReason::Error).await)
            }
        };

        if let Some(state) = new_state {
            self.state = state;
        }
    }

    /// Publish the state, and log it if the state or the inputs changed.
    fn commit(&mut self, before: PowerState) {
        self.context.set_state(self.state);

        let inputs = self.signals.last_snapshot().asserted();
        if self.state != before || self.logged_inputs != Some(inputs) {
            info!(
                "power state {} = {}, in 0x{:x}",
                self.state.number(),
                self.state.name(),
                inputs
            );
            self.logged_inputs = Some(inputs);
        }

        if self.state != before {
            self.retry = Counter::new(self.config.retries.of(self.state));
        }
    }

    /// Sample all signals, and log transport faults.
    fn sample(&self) -> Snapshot {
        let (snapshot, faults) = self.signals.capture();
        if faults != 0 {
            self.context.record(EventKind::TransportFault(faults), snapshot);
        }

        snapshot
    }

    /// Wait until all signals of `gate` are asserted.
    ///
    /// The gate is re-sampled at the polling interval, until it closes, the transition's timeout elapses or a
    /// shutdown is requested.
    async fn wait_for_gate(&self, transition: PowerState, gate: SignalMask) -> Result<Snapshot, Error> {
        let timeout = self.config.timeouts.gate(transition);
        let poll = self.config.timeouts.poll_ms.max(1);
        let mut elapsed = 0;

        loop {
            if self.context.shutdown_pending() {
                return Err(Error::Cancelled);
            }

            let snapshot = self.sample();
            if snapshot.all_on(gate) {
                return Ok(snapshot);
            }

            if elapsed >= timeout {
                let missing = snapshot.missing(gate);
                warn!(
                    "power timeout on input; wanted 0x{:x}, got 0x{:x}, missing 0x{:x}",
                    gate,
                    snapshot.asserted(),
                    missing
                );
                self.context
                    .record(EventKind::GateTimeout { transition, missing }, snapshot);

                return Err(Error::GateTimeout {
                    transition,
                    missing,
                    snapshot,
                });
            }

            TimerType::new::<TIMER>(TimerType::Poll, &self.config.timeouts).await;
            elapsed += poll;
        }
    }

    /// Wait until the power-good signals dropped.
    ///
    /// Shutdown always completes, a timeout is only logged.
    async fn wait_for_power_down(&self) {
        let mask = self.config.gates.power_down;
        let timeout = self.config.timeouts.power_down_ms;
        let poll = self.config.timeouts.poll_ms.max(1);
        let mut elapsed = 0;

        loop {
            let snapshot = self.sample();
            if snapshot.none_on(mask) {
                return;
            }

            if elapsed >= timeout {
                let remaining = snapshot.asserted() & mask;
                warn!("power down timeout; still asserted 0x{:x}", remaining);
                self.context.record(EventKind::DeassertTimeout { remaining }, snapshot);
                return;
            }

            TimerType::new::<TIMER>(TimerType::Poll, &self.config.timeouts).await;
            elapsed += poll;
        }
    }

    /// Wait in hard-off before leaving it. Returns false if a shutdown request cancelled the wait.
    async fn wait_in_hard_off(&self, delay_s: u32) -> bool {
        if delay_s > 0 {
            info!("leaving G3 in {} s", delay_s);
        }

        let step = self.config.timeouts.hard_off_step_ms.max(1) as u64;
        let mut remaining = delay_s as u64 * 1000;

        while remaining > 0 {
            if self.context.shutdown_pending() {
                info!("leaving G3 cancelled");
                return false;
            }

            TimerType::new::<TIMER>(TimerType::HardOffStep, &self.config.timeouts).await;
            remaining = remaining.saturating_sub(step);
        }

        true
    }

    /// Pass RSMRST through to the PCH. A rising edge is delayed.
    ///
    /// Not done in hard-off, or on the way there, so that a failing output cannot hold off the shutdown.
    async fn pass_through_rsmrst(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let Some(output) = self.config.roles.rsmrst_out else {
            return Ok(());
        };

        if matches!(self.state, PowerState::G3 | PowerState::S5G3) {
            return Ok(());
        }

        let level = snapshot.is_on(self.config.roles.rsmrst);
        if self.signals.value(output) == Some(level) {
            return Ok(());
        }

        if level {
            TimerType::new::<TIMER>(TimerType::RsmrstDelay, &self.config.timeouts).await;
        }

        debug!("pass through RSMRST {}", level);
        self.signals.set(output, level)?;

        Ok(())
    }

    /// Begin a shutdown toward hard-off. Returns the state to continue in.
    ///
    /// Power is removed by the board in its defined order. Failures are logged, but never stop the shutdown.
    async fn force_shutdown(&mut self, reason: ShutdownReason) -> PowerState {
        match self.state {
            PowerState::G3 => {
                debug!("already in G3, shutdown ({:?}) dropped", reason);
                return PowerState::G3;
            }
            PowerState::S5G3 => {
                debug!("already entering G3, shutdown ({:?}) merged", reason);
                return PowerState::S5G3;
            }
            _ => {}
        }

        warn!("forcing shutdown ({:?}) in {}", reason, self.state.name());
        self.context
            .record(EventKind::ForcedShutdown(reason), self.signals.last_snapshot());
        self.context.with_sleep(|sleep| sleep.reset());

        if let Err(error) = self.board.force_shutdown(self.signals, reason).await {
            warn!("forced shutdown failed: {:?}", error);
        }

        if !matches!(self.state, PowerState::S5 | PowerState::S5G3 | PowerState::G3S5) {
            self.board.notify(PowerEvent::Shutdown);
            self.board.notify(PowerEvent::ShutdownComplete);
        }

        self.shutdown_reason = reason;
        PowerState::S5G3
    }

    /// Serve a reset request.
    ///
    /// A powered AP gets a system reset pulse. Without a reset output, the AP is power cycled instead.
    async fn reset(&mut self) {
        let powered = matches!(
            self.state,
            PowerState::S0 | PowerState::S0ix | PowerState::S0S0ix | PowerState::S0ixS0
        );

        match self.config.roles.sys_reset {
            _ if self.state == PowerState::G3 => info!("AP is off, reset ignored"),
            Some(sys_reset) if powered => {
                if self.signals.value(sys_reset) == Some(true) {
                    info!("reset already in progress");
                    return;
                }

                info!("pulsing system reset");
                if let Err(error) = self.signals.set(sys_reset, true) {
                    warn!("system reset failed: {:?}", error);
                    return;
                }

                TimerType::new::<TIMER>(TimerType::SysResetPulse, &self.config.timeouts).await;

                if let Err(error) = self.signals.set(sys_reset, false) {
                    warn!("system reset release failed: {:?}", error);
                }

                self.board.notify(PowerEvent::Reset);
            }
            _ => {
                info!("cold reset");
                self.context.request_reboot_on_g3(0);
                self.context.request_shutdown(ShutdownReason::Reset);
            }
        }
    }

    /// Whether the host asked for standby and the PCH requests it.
    fn standby_requested(&self, snapshot: &Snapshot) -> bool {
        self.config.standby
            && self.context.sleep_pending() == Some(SleepKind::Standby)
            && self.config.roles.slp_s0.is_some_and(|slp_s0| snapshot.is_on(slp_s0))
    }

    async fn update_state(&mut self) -> Result<(), Error> {
        let snapshot = self.sample();
        self.pass_through_rsmrst(&snapshot).await?;

        let roles = self.config.roles;
        let gates = self.config.gates;
        let core_lost = !snapshot.all_on(gates.s5s3);

        let new_state = match self.state {
            PowerState::G3 => {
                let leave = match self.context.take_hard_off_exit() {
                    Some(delay_s) => self.wait_in_hard_off(delay_s).await,
                    None => false,
                };

                if leave {
                    PowerState::G3S5
                } else {
                    PowerState::G3
                }
            }
            PowerState::G3S5 => {
                // Failures are logged per signal.
                let _ = self.signals.enable_mask(self.config.sequencing, true);
                self.board.hard_off_exit(self.signals).await?;
                self.wait_for_gate(PowerState::G3S5, self.config.g3s5_gate()).await?;

                PowerState::S5
            }
            PowerState::S5 => {
                let rails_ok = self.board.power_rails_enabled(self.signals);

                if rails_ok && snapshot.is_on(roles.rsmrst) && snapshot.is_off(roles.slp_s5) {
                    PowerState::S5S3
                } else if self.s5_expired || self.context.s5_inactivity_timeout() == Some(0) {
                    self.shutdown_reason = ShutdownReason::Inactivity;
                    PowerState::S5G3
                } else {
                    PowerState::S5
                }
            }
            PowerState::S5S3 => {
                self.board.soft_off_to_suspend(self.signals).await?;
                self.wait_for_gate(PowerState::S5S3, gates.s5s3).await?;

                // The host starts from scratch.
                self.context.with_sleep(|sleep| sleep.reset());
                self.board.notify(PowerEvent::Startup);

                PowerState::S3
            }
            PowerState::S3 => {
                if core_lost {
                    self.force_shutdown(ShutdownReason::PowerFail).await
                } else if snapshot.is_off(roles.slp_s3) {
                    PowerState::S3S0
                } else if snapshot.is_on(roles.slp_s5) {
                    PowerState::S3S5
                } else {
                    PowerState::S3
                }
            }
            PowerState::S3S0 => {
                self.board.suspend_to_on(self.signals).await?;
                self.wait_for_gate(PowerState::S3S0, gates.s3s0).await?;
                self.board.steady_on(self.signals).await?;
                self.board.notify(PowerEvent::Resume);

                PowerState::S0
            }
            PowerState::S0 => {
                if core_lost {
                    self.force_shutdown(ShutdownReason::PowerFail).await
                } else if snapshot.is_on(roles.slp_s3) {
                    PowerState::S0S3
                } else if self.standby_requested(&snapshot) {
                    PowerState::S0S0ix
                } else {
                    PowerState::S0
                }
            }
            PowerState::S0S3 => {
                self.board.notify(PowerEvent::Suspend);
                self.board.on_to_suspend(self.signals).await?;
                self.context.with_sleep(|sleep| sleep.suspend_entered());

                PowerState::S3
            }
            PowerState::S3S5 => {
                self.board.notify(PowerEvent::Shutdown);
                self.board.suspend_to_soft_off(self.signals).await?;
                self.board.notify(PowerEvent::ShutdownComplete);

                if self.context.pause_in_s5() {
                    PowerState::S5
                } else {
                    self.shutdown_reason = ShutdownReason::HostShutdown;
                    PowerState::S5G3
                }
            }
            PowerState::S5G3 => {
                if let Err(error) = self.board.enter_hard_off(self.signals).await {
                    warn!("entering G3 failed: {:?}", error);
                }
                self.wait_for_power_down().await;

                // Failures are logged per signal.
                let _ = self.signals.enable_mask(self.config.sequencing, false);
                self.s5_expired = false;
                info!("entered G3 ({:?})", self.shutdown_reason);
                self.board.notify(PowerEvent::HardOff);

                PowerState::G3
            }
            PowerState::S0S0ix => {
                self.context.with_sleep(|sleep| sleep.suspend_entered());
                self.board.notify(PowerEvent::StandbySuspend);

                PowerState::S0ix
            }
            PowerState::S0ix => {
                let slp_s0_off = roles.slp_s0.is_none_or(|slp_s0| snapshot.is_off(slp_s0));

                if core_lost {
                    self.force_shutdown(ShutdownReason::PowerFail).await
                } else if slp_s0_off && snapshot.is_off(roles.slp_s3) {
                    PowerState::S0ixS0
                } else {
                    PowerState::S0ix
                }
            }
            PowerState::S0ixS0 => {
                self.board.notify(PowerEvent::StandbyResume);
                self.board.steady_on(self.signals).await?;

                PowerState::S0
            }
        };

        if new_state != PowerState::S5 {
            self.s5_expired = false;
        }

        self.state = new_state;
        Ok(())
    }

    /// Wait for the next event, or for the timer of the current state.
    async fn wait_for_event(&mut self) {
        let timer = match self.state {
            PowerState::S5 => self.context.s5_inactivity_timeout().map(TimerType::S5Inactivity),
            PowerState::S0 => self
                .context
                .with_sleep(|sleep| sleep.remaining_timeout(TIMER::now_millis()))
                .map(TimerType::SleepTimeout),
            _ => None,
        };

        let Some(timer) = timer else {
            let event = self.context.next_event().await;
            trace!("power event {:?}", event);
            return;
        };

        match select(
            self.context.next_event(),
            TimerType::new::<TIMER>(timer, &self.config.timeouts),
        )
        .await
        {
            Either::First(event) => trace!("power event {:?}", event),
            Either::Second(()) => match timer {
                TimerType::S5Inactivity(_) => {
                    info!("S5 inactivity timeout");
                    self.s5_expired = true;
                }
                TimerType::SleepTimeout(_) => {
                    warn!("host sleep timeout");
                    self.context.with_sleep(|sleep| sleep.timed_out());
                    self.context
                        .record(EventKind::SleepTimeout, self.signals.last_snapshot());
                    self.board.notify(PowerEvent::SleepTimeout);
                }
                _ => {}
            },
        }
    }
}
