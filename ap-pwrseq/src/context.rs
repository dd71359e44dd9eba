//! State shared between the sequencer and the rest of the firmware.
//!
//! The sequencer is the only writer of the sequencing state. Everything else (console, host commands,
//! charging or USB-PD policy) reads the state and posts requests, which the sequencer consumes on its next
//! evaluation. Requests are sticky, so a full event queue only loses wake-ups, never requests.
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::event_log::{EventKind, EventLog};
use crate::signal::{MAX_SIGNALS, SignalId, Snapshot};
use crate::sleep::{SleepBridge, SleepError, SleepKind, SleepTransitions, TIMEOUT_DEFAULT, TIMEOUT_INFINITE};
use crate::state::{PowerState, StateMask};

/// Depth of the event queue.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Events that wake the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A signal's transport reported a change.
    SignalChanged(SignalId),
    /// The host announced a sleep or resume.
    SleepRequested,
    /// A shutdown was requested.
    ForceShutdown,
    /// Leaving hard-off was requested.
    ExitHardOff,
    /// A reset was requested.
    Reset,
    /// A timer of the board expired.
    TimerExpired,
}

/// Why the AP is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShutdownReason {
    /// Console command.
    Console,
    /// Host command or other firmware subsystem.
    HostRequest,
    /// Core power was lost while the AP was powered.
    PowerFail,
    /// A gate timed out and retries were exhausted.
    GateTimeout,
    /// A signal could not be driven.
    Error,
    /// Power-on initialization.
    Init,
    /// Cold reset.
    Reset,
    /// Soft-off inactivity timeout.
    Inactivity,
    /// The host shut down, and the AP does not pause in soft-off.
    HostShutdown,
}

#[derive(Debug, Clone, Copy, Default)]
struct Requests {
    shutdown: Option<ShutdownReason>,
    reset: bool,
    exit_hard_off: bool,
    reboot_delay_s: Option<u32>,
}

/// Shared sequencing context.
///
/// Meant to live in a `static`.
pub struct Context {
    state: AtomicU8,
    requests: Mutex<CriticalSectionRawMutex, Cell<Requests>>,
    sleep: Mutex<CriticalSectionRawMutex, RefCell<SleepBridge>>,
    log: Mutex<CriticalSectionRawMutex, RefCell<EventLog>>,
    s5_inactivity_s: Mutex<CriticalSectionRawMutex, Cell<Option<u32>>>,
    default_sleep_timeout_ms: AtomicU32,
    pause_in_s5: AtomicBool,
    storm_threshold: AtomicU32,
    interrupt_counts: [AtomicU32; MAX_SIGNALS],
    events: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context in hard-off, without pending requests.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(PowerState::G3 as u8),
            requests: Mutex::new(Cell::new(Requests {
                shutdown: None,
                reset: false,
                exit_hard_off: false,
                reboot_delay_s: None,
            })),
            sleep: Mutex::new(RefCell::new(SleepBridge::new())),
            log: Mutex::new(RefCell::new(EventLog::new())),
            s5_inactivity_s: Mutex::new(Cell::new(None)),
            default_sleep_timeout_ms: AtomicU32::new(0),
            pause_in_s5: AtomicBool::new(true),
            storm_threshold: AtomicU32::new(0),
            interrupt_counts: [const { AtomicU32::new(0) }; MAX_SIGNALS],
            events: Channel::new(),
        }
    }

    fn post(&self, event: Event) {
        if self.events.try_send(event).is_err() {
            // The sequencer has wake-ups pending, requests are sticky.
            trace!("event queue full, dropped {:?}", event);
        }
    }

    fn update_requests(&self, f: impl FnOnce(&mut Requests)) {
        self.requests.lock(|requests| {
            let mut value = requests.get();
            f(&mut value);
            requests.set(value);
        })
    }

    /// The current sequencing state.
    pub fn current_state(&self) -> PowerState {
        PowerState::try_from(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn set_state(&self, state: PowerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the AP is in one of the states of `mask`.
    pub fn in_state(&self, mask: StateMask) -> bool {
        self.current_state().in_state(mask)
    }

    /// Whether the AP is in, or transitioning to, one of the states of `mask`.
    pub fn in_or_transitioning_to_state(&self, mask: StateMask) -> bool {
        self.current_state().in_or_transitioning_to(mask)
    }

    /// Request the AP to leave hard-off, e.g. on a power button press.
    ///
    /// Dropped if the AP is not in hard-off when the sequencer evaluates it.
    pub fn request_exit_hard_off(&self) {
        self.update_requests(|requests| requests.exit_hard_off = true);
        self.post(Event::ExitHardOff);
    }

    /// Request a shutdown toward hard-off.
    ///
    /// The reason of the first pending request is kept.
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        self.update_requests(|requests| {
            requests.shutdown.get_or_insert(reason);
        });
        self.post(Event::ForceShutdown);
    }

    /// Request a reset of the AP.
    pub fn request_reset(&self) {
        self.update_requests(|requests| requests.reset = true);
        self.post(Event::Reset);
    }

    /// Request the AP to boot again once it reached hard-off, after `delay_s` seconds.
    pub fn request_reboot_on_g3(&self, delay_s: u32) {
        self.update_requests(|requests| requests.reboot_delay_s = Some(delay_s));
        self.post(Event::ExitHardOff);
    }

    /// Report a change of a signal, e.g. from its interrupt.
    ///
    /// A signal that reports more changes than the storm threshold before the counts are reset is logged
    /// once as an interrupt storm.
    pub fn notify_signal(&self, id: SignalId) {
        let threshold = self.storm_threshold.load(Ordering::Relaxed);

        if let Some(count) = self.interrupt_counts.get(id.index()) {
            if threshold != 0 && count.fetch_add(1, Ordering::Relaxed) == threshold {
                warn!("interrupt storm on signal {}", id.0);
                self.record(EventKind::InterruptStorm(id), Snapshot::default());
            }
        }

        self.post(Event::SignalChanged(id));
    }

    /// Signal changes reported since the counts were last reset.
    pub fn interrupt_count(&self, id: SignalId) -> u32 {
        self.interrupt_counts
            .get(id.index())
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Reset the interrupt counts. Meant to be called once a second.
    pub fn reset_interrupt_counts(&self) {
        for count in &self.interrupt_counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    /// Set the interrupt storm threshold, `None` to disable detection.
    pub fn set_interrupt_storm_threshold(&self, threshold: Option<u32>) {
        self.storm_threshold.store(threshold.unwrap_or(0), Ordering::Relaxed);
    }

    /// Whether a host shutdown pauses in soft-off, instead of going on to hard-off.
    pub fn pause_in_s5(&self) -> bool {
        self.pause_in_s5.load(Ordering::Relaxed)
    }

    /// Set whether a host shutdown pauses in soft-off. Applies to the next shutdown.
    pub fn set_pause_in_s5(&self, pause: bool) {
        self.pause_in_s5.store(pause, Ordering::Relaxed);
    }

    /// Report the expiry of a board timer.
    pub fn notify_timer(&self) {
        self.post(Event::TimerExpired);
    }

    pub(crate) fn shutdown_pending(&self) -> bool {
        self.requests.lock(|requests| requests.get().shutdown.is_some())
    }

    pub(crate) fn take_shutdown(&self) -> Option<ShutdownReason> {
        let mut reason = None;
        self.update_requests(|requests| reason = requests.shutdown.take());
        reason
    }

    pub(crate) fn take_reset(&self) -> bool {
        let mut reset = false;
        self.update_requests(|requests| reset = core::mem::take(&mut requests.reset));
        reset
    }

    /// Consume a request to leave hard-off, returning the delay in seconds.
    pub(crate) fn take_hard_off_exit(&self) -> Option<u32> {
        let mut delay_s = None;
        self.update_requests(|requests| {
            delay_s = match (core::mem::take(&mut requests.exit_hard_off), requests.reboot_delay_s.take()) {
                (_, Some(delay_s)) => Some(delay_s),
                (true, None) => Some(0),
                (false, None) => None,
            };
        });
        delay_s
    }

    /// Drop a request to leave hard-off that arrived while the AP was not in hard-off.
    pub(crate) fn drop_exit_hard_off(&self) {
        self.update_requests(|requests| requests.exit_hard_off = false);
    }

    pub(crate) async fn next_event(&self) -> Event {
        self.events.receive().await
    }

    pub(crate) fn set_default_sleep_timeout(&self, timeout_ms: u32) {
        self.default_sleep_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    /// The host announces a sleep of `kind`.
    ///
    /// A `timeout_ms` of [`TIMEOUT_DEFAULT`] selects the configured default, [`TIMEOUT_INFINITE`] disables the
    /// timeout.
    pub fn notify_sleep(&self, kind: SleepKind, timeout_ms: u16) {
        let timeout_ms = match timeout_ms {
            TIMEOUT_DEFAULT => Some(self.default_sleep_timeout_ms.load(Ordering::Relaxed)),
            TIMEOUT_INFINITE => None,
            timeout_ms => Some(timeout_ms as u32),
        };

        info!("host sleep {:?}, timeout {:?} ms", kind, timeout_ms);
        self.sleep.lock(|sleep| sleep.borrow_mut().sleep(kind, timeout_ms));
        self.post(Event::SleepRequested);
    }

    /// The host announces a resume from `kind`.
    ///
    /// Returns the unexpected sleep transitions since the sleep was announced. A mismatched resume is an
    /// error, but still clears the pending sleep.
    pub fn notify_resume(&self, kind: SleepKind) -> Result<SleepTransitions, SleepError> {
        let result = self.sleep.lock(|sleep| sleep.borrow_mut().resume(kind));

        match result {
            Ok(transitions) => info!("host resume {:?}, transitions {:?}", kind, transitions),
            Err(error) => {
                warn!("host resume {:?} failed: {:?}", kind, error);
                self.record(EventKind::MismatchedResume, Snapshot::default());
            }
        }

        self.post(Event::SleepRequested);
        result
    }

    /// The sleep the host announced, if it did not resume yet.
    pub fn sleep_pending(&self) -> Option<SleepKind> {
        self.sleep.lock(|sleep| sleep.borrow().pending())
    }

    pub(crate) fn with_sleep<R>(&self, f: impl FnOnce(&mut SleepBridge) -> R) -> R {
        self.sleep.lock(|sleep| f(&mut sleep.borrow_mut()))
    }

    /// Add an entry to the event log, in the current state.
    pub(crate) fn record(&self, kind: EventKind, snapshot: Snapshot) {
        let state = self.current_state();
        self.log.lock(|log| log.borrow_mut().record(kind, state, snapshot));
    }

    /// Inspect the event log.
    pub fn with_event_log<R>(&self, f: impl FnOnce(&EventLog) -> R) -> R {
        self.log.lock(|log| f(&log.borrow()))
    }

    /// The soft-off inactivity timeout in seconds, `None` if soft-off is kept forever.
    pub fn s5_inactivity_timeout(&self) -> Option<u32> {
        self.s5_inactivity_s.lock(|timeout| timeout.get())
    }

    /// Set the soft-off inactivity timeout. Applies the next time the sequencer waits in soft-off.
    pub fn set_s5_inactivity_timeout(&self, timeout_s: Option<u32>) {
        self.s5_inactivity_s.lock(|timeout| timeout.set(timeout_s));
        self.post(Event::TimerExpired);
    }
}
