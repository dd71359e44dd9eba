//! Implements dummy transports, a timer and a board for testing.
use std::cell::{Cell, RefCell};
use std::future::poll_fn;
use std::task::Poll;

use ap_pwrseq_traits::{AnalogDriver, Edge, LineDriver, SyntheticDriver, TransportError, Transports, VirtualWireDriver};

use crate::context::ShutdownReason;
use crate::sequencer::{Board, Config, Gates, PowerEvent, SignalRoles};
use crate::signal::registry::SignalRegistry;
use crate::signal::{self, SignalConfig, SignalFlags, Source};
use crate::timers::Timer;

/// Signals of the dummy board, and their transport bindings.
#[allow(missing_docs)]
pub mod signals {
    use crate::signal::SignalId;

    /// Resume well power good.
    pub const RSMRST: SignalId = SignalId(0);
    /// Suspend rail power good.
    pub const PGOOD: SignalId = SignalId(1);
    /// Core rails power good.
    pub const ALL_SYS_PWRGD: SignalId = SignalId(2);
    /// S3 sleep request.
    pub const SLP_S3: SignalId = SignalId(3);
    /// S5 sleep request.
    pub const SLP_S5: SignalId = SignalId(4);
    /// S0ix sleep request.
    pub const SLP_S0: SignalId = SignalId(5);
    /// Primary 5 V rail, sensed by the ADC.
    pub const PP5000: SignalId = SignalId(6);
    /// System reset output.
    pub const SYS_RST: SignalId = SignalId(7);
    /// RSMRST passed through to the PCH.
    pub const RSMRST_OUT: SignalId = SignalId(8);
    /// Primary 5 V rail enable.
    pub const EN_PP5000: SignalId = SignalId(9);

    pub const RSMRST_PIN: u16 = 0;
    pub const PGOOD_PIN: u16 = 1;
    pub const SYS_RST_PIN: u16 = 2;
    pub const RSMRST_OUT_PIN: u16 = 3;
    pub const EN_PP5000_PIN: u16 = 4;

    pub const SLP_S3_WIRE: u16 = 0;
    pub const SLP_S5_WIRE: u16 = 1;
    pub const SLP_S0_WIRE: u16 = 2;

    pub const PP5000_CHANNEL: u16 = 0;
    pub const ALL_SYS_PWRGD_ID: u16 = 0;
}

use signals::*;

const OUTPUT: SignalFlags = SignalFlags::OUTPUT.union(SignalFlags::DISABLE_AT_BOOT);

/// Signal table of the dummy board.
pub const TABLE: [SignalConfig; 10] = [
    SignalConfig::new(
        "RSMRST_L_PGOOD",
        Source::Line {
            pin: RSMRST_PIN,
            edge: Edge::Both,
        },
    ),
    SignalConfig::new(
        "PG_PP1050",
        Source::Line {
            pin: PGOOD_PIN,
            edge: Edge::Both,
        },
    ),
    SignalConfig::new("ALL_SYS_PWRGD", Source::Synthetic { id: ALL_SYS_PWRGD_ID })
        .with_flags(SignalFlags::DISABLE_AT_BOOT),
    SignalConfig::new("SLP_S3", Source::VirtualWire { wire: SLP_S3_WIRE }),
    SignalConfig::new("SLP_S5", Source::VirtualWire { wire: SLP_S5_WIRE }),
    SignalConfig::new("SLP_S0", Source::VirtualWire { wire: SLP_S0_WIRE }).with_flags(SignalFlags::NO_LOG),
    SignalConfig::new(
        "PP5000",
        Source::Analog {
            channel: PP5000_CHANNEL,
            threshold_mv: 4500,
        },
    ),
    SignalConfig::new(
        "SYS_RST",
        Source::Line {
            pin: SYS_RST_PIN,
            edge: Edge::None,
        },
    )
    .with_flags(OUTPUT),
    SignalConfig::new(
        "PCH_RSMRST",
        Source::Line {
            pin: RSMRST_OUT_PIN,
            edge: Edge::None,
        },
    )
    .with_flags(OUTPUT),
    SignalConfig::new(
        "EN_PP5000",
        Source::Line {
            pin: EN_PP5000_PIN,
            edge: Edge::None,
        },
    )
    .with_flags(OUTPUT),
];

/// Sequencer configuration of the dummy board.
///
/// Timers expire at once, so the soft-off inactivity timeout is disabled.
pub fn config() -> Config {
    let mut config = Config::new(
        SignalRoles {
            rsmrst: RSMRST,
            rsmrst_out: Some(RSMRST_OUT),
            slp_s3: SLP_S3,
            slp_s5: SLP_S5,
            slp_s0: Some(SLP_S0),
            sys_reset: Some(SYS_RST),
        },
        Gates {
            g3s5: PP5000.mask(),
            s5s3: PGOOD.mask(),
            s3s0: ALL_SYS_PWRGD.mask(),
            power_down: PGOOD.mask() | RSMRST.mask(),
        },
    );
    config.sequencing |= SLP_S3.mask() | SLP_S5.mask() | SLP_S0.mask();
    config.s5_inactivity_s = None;
    config
}

/// A dummy timer for testing. Expires at once.
pub struct DummyTimer {}

impl Timer for DummyTimer {
    async fn after_millis(_milliseconds: u64) {
        // Expire immediately.
    }

    fn now_millis() -> u64 {
        0
    }
}

thread_local! {
    static CLOCK_MS: Cell<u64> = const { Cell::new(0) };
    static CLOCK_HELD: Cell<bool> = const { Cell::new(false) };
}

/// A dummy timer on a virtual clock of the test thread.
///
/// Timers advance the clock and expire at once. Once the clock is held, they expire when the test
/// advanced it far enough.
pub struct SteppedTimer {}

impl SteppedTimer {
    /// Restart the clock at zero, running.
    pub fn reset() {
        CLOCK_MS.set(0);
        CLOCK_HELD.set(false);
    }

    /// Hold the clock, so that only [`SteppedTimer::advance`] moves it.
    pub fn hold() {
        CLOCK_HELD.set(true);
    }

    /// Move the clock forward.
    pub fn advance(milliseconds: u64) {
        CLOCK_MS.set(CLOCK_MS.get() + milliseconds);
    }
}

impl Timer for SteppedTimer {
    async fn after_millis(milliseconds: u64) {
        let deadline = CLOCK_MS.get() + milliseconds;

        if !CLOCK_HELD.get() {
            CLOCK_MS.set(deadline);
            return;
        }

        poll_fn(|cx| {
            if CLOCK_MS.get() >= deadline {
                Poll::Ready(())
            } else {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    fn now_millis() -> u64 {
        CLOCK_MS.get()
    }
}

/// Dummy discrete lines.
#[derive(Default)]
pub struct DummyLine {
    levels: RefCell<[bool; 32]>,
    failing: RefCell<[bool; 32]>,
    interrupt_calls: Cell<usize>,
}

impl DummyLine {
    /// Set the raw level of a line.
    pub fn set(&self, pin: u16, level: bool) {
        self.levels.borrow_mut()[pin as usize] = level;
    }

    /// Set the raw level of all lines.
    pub fn set_all(&self, level: bool) {
        *self.levels.borrow_mut() = [level; 32];
    }

    /// Make reads, writes and interrupt configuration of a line fail.
    pub fn fail(&self, pin: u16, fail: bool) {
        self.failing.borrow_mut()[pin as usize] = fail;
    }

    /// Number of interrupt configuration calls.
    pub fn interrupt_calls(&self) -> usize {
        self.interrupt_calls.get()
    }

    /// Raw level of a line.
    pub fn get(&self, pin: u16) -> bool {
        self.levels.borrow()[pin as usize]
    }
}

impl LineDriver for DummyLine {
    fn level(&self, pin: u16) -> Result<bool, TransportError> {
        if self.failing.borrow()[pin as usize] {
            return Err(TransportError::Bus);
        }

        Ok(self.get(pin))
    }

    fn set_level(&self, pin: u16, level: bool) -> Result<(), TransportError> {
        if self.failing.borrow()[pin as usize] {
            return Err(TransportError::Bus);
        }

        self.set(pin, level);
        Ok(())
    }

    fn set_interrupt(&self, pin: u16, _edge: Edge, _enable: bool) -> Result<(), TransportError> {
        self.interrupt_calls.set(self.interrupt_calls.get() + 1);

        if self.failing.borrow()[pin as usize] {
            return Err(TransportError::Bus);
        }

        Ok(())
    }
}

/// Dummy analog inputs.
#[derive(Default)]
pub struct DummyAnalog {
    samples: RefCell<[u32; 8]>,
}

impl DummyAnalog {
    /// Set the sample of a channel, in millivolts.
    pub fn set_sample(&self, channel: u16, millivolts: u32) {
        self.samples.borrow_mut()[channel as usize] = millivolts;
    }
}

impl AnalogDriver for DummyAnalog {
    fn sample_mv(&self, channel: u16) -> Result<u32, TransportError> {
        Ok(self.samples.borrow()[channel as usize])
    }

    fn set_interrupt(&self, _channel: u16, _threshold_mv: u32, _enable: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Dummy virtual wires.
#[derive(Default)]
pub struct DummyWire {
    levels: RefCell<[bool; 32]>,
    ready: Cell<bool>,
}

impl DummyWire {
    /// Set the level of a wire, as sent by the host.
    pub fn set(&self, wire: u16, level: bool) {
        self.levels.borrow_mut()[wire as usize] = level;
    }

    /// Set the level of all wires.
    pub fn set_all(&self, level: bool) {
        *self.levels.borrow_mut() = [level; 32];
    }

    /// Report the channel ready, or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }
}

impl VirtualWireDriver for DummyWire {
    fn channel_ready(&self, _wire: u16) -> bool {
        self.ready.get()
    }

    fn wire(&self, wire: u16) -> Result<bool, TransportError> {
        Ok(self.levels.borrow()[wire as usize])
    }

    fn send_wire(&self, wire: u16, level: bool) -> Result<(), TransportError> {
        self.set(wire, level);
        Ok(())
    }

    fn set_interrupt(&self, _wire: u16, _enable: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Dummy board-synthesized signals.
#[derive(Default)]
pub struct DummySynthetic {
    values: RefCell<[bool; 8]>,
}

impl DummySynthetic {
    /// Set a synthesized value.
    pub fn set_value(&self, id: u16, value: bool) {
        self.values.borrow_mut()[id as usize] = value;
    }
}

impl SyntheticDriver for DummySynthetic {
    fn get(&self, id: u16) -> Result<bool, TransportError> {
        Ok(self.values.borrow()[id as usize])
    }
}

/// Dummy transports.
#[derive(Default)]
pub struct DummyTransports {
    /// Discrete lines.
    pub line: DummyLine,
    /// Analog inputs.
    pub analog: DummyAnalog,
    /// Virtual wires.
    pub wire: DummyWire,
    /// Board-synthesized signals.
    pub synthetic: DummySynthetic,
}

impl DummyTransports {
    /// Create dummy transports with all levels low and the host link down.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transports for DummyTransports {
    type Line = DummyLine;
    type Analog = DummyAnalog;
    type Wire = DummyWire;
    type Synthetic = DummySynthetic;

    fn line(&self) -> &Self::Line {
        &self.line
    }

    fn analog(&self) -> &Self::Analog {
        &self.analog
    }

    fn wire(&self) -> &Self::Wire {
        &self.wire
    }

    fn synthetic(&self) -> &Self::Synthetic {
        &self.synthetic
    }
}

/// A dummy board, which acts like the power rails of a real one.
pub struct DummyBoard {
    /// Notified power events.
    pub events: Vec<PowerEvent>,
    /// Hooks that ran, by name.
    pub hooks: Vec<&'static str>,
    /// Forced shutdowns.
    pub shutdowns: Vec<ShutdownReason>,
    /// Whether the suspend rails come up.
    pub suspend_rails: bool,
    /// Whether the core rails come up.
    pub core_rails: bool,
    /// Whether rails drop on the way to hard-off.
    pub rails_drop: bool,
    /// Whether the firmware jumped images.
    pub jumped: bool,
    /// A hook that fails, by name.
    pub failing_hook: Option<&'static str>,
}

impl DummyBoard {
    /// A board whose rails behave.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            hooks: Vec::new(),
            shutdowns: Vec::new(),
            suspend_rails: true,
            core_rails: true,
            rails_drop: true,
            jumped: false,
            failing_hook: None,
        }
    }

    fn hook(&mut self, name: &'static str) -> Result<(), signal::Error> {
        self.hooks.push(name);

        if self.failing_hook == Some(name) {
            Err(signal::Error::Transport(TransportError::Bus))
        } else {
            Ok(())
        }
    }
}

impl Board<DummyTransports> for DummyBoard {
    fn jumped_to_image(&mut self) -> bool {
        self.jumped
    }

    async fn hard_off_exit(&mut self, signals: &SignalRegistry<'_, DummyTransports>) -> Result<(), signal::Error> {
        self.hook("hard_off_exit")?;
        signals.set(EN_PP5000, true)?;

        let transports = signals.transports();
        transports.analog.set_sample(PP5000_CHANNEL, 5000);
        transports.line.set(RSMRST_PIN, true);
        Ok(())
    }

    async fn soft_off_to_suspend(
        &mut self,
        signals: &SignalRegistry<'_, DummyTransports>,
    ) -> Result<(), signal::Error> {
        self.hook("soft_off_to_suspend")?;
        if self.suspend_rails {
            signals.transports().line.set(PGOOD_PIN, true);
        }
        Ok(())
    }

    async fn suspend_to_on(&mut self, signals: &SignalRegistry<'_, DummyTransports>) -> Result<(), signal::Error> {
        self.hook("suspend_to_on")?;
        if self.core_rails {
            signals.transports().synthetic.set_value(ALL_SYS_PWRGD_ID, true);
        }
        Ok(())
    }

    async fn steady_on(&mut self, _signals: &SignalRegistry<'_, DummyTransports>) -> Result<(), signal::Error> {
        self.hook("steady_on")
    }

    async fn on_to_suspend(&mut self, signals: &SignalRegistry<'_, DummyTransports>) -> Result<(), signal::Error> {
        self.hook("on_to_suspend")?;
        signals.transports().synthetic.set_value(ALL_SYS_PWRGD_ID, false);
        Ok(())
    }

    async fn suspend_to_soft_off(
        &mut self,
        signals: &SignalRegistry<'_, DummyTransports>,
    ) -> Result<(), signal::Error> {
        self.hook("suspend_to_soft_off")?;
        signals.transports().line.set(PGOOD_PIN, false);
        Ok(())
    }

    async fn force_shutdown(
        &mut self,
        _signals: &SignalRegistry<'_, DummyTransports>,
        reason: ShutdownReason,
    ) -> Result<(), signal::Error> {
        self.shutdowns.push(reason);
        Ok(())
    }

    async fn enter_hard_off(&mut self, signals: &SignalRegistry<'_, DummyTransports>) -> Result<(), signal::Error> {
        // Power is removed even if the hook reports a failure.
        let result = self.hook("enter_hard_off");

        if self.rails_drop {
            let transports = signals.transports();
            transports.synthetic.set_value(ALL_SYS_PWRGD_ID, false);
            transports.line.set(PGOOD_PIN, false);
            transports.line.set(RSMRST_PIN, false);
            transports.analog.set_sample(PP5000_CHANNEL, 0);
        }

        signals.set(EN_PP5000, false)?;
        result
    }

    fn notify(&mut self, event: PowerEvent) {
        self.events.push(event);
    }
}
