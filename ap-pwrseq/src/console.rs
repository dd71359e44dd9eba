//! Console commands for power debugging.
//!
//! Commands only read state or post requests, so they never block on hardware. The output format of
//! `powerinfo` is relied upon by test tooling and must not change.
use core::fmt::Write;

use ap_pwrseq_traits::Transports;
use heapless::Vec;

use crate::context::{Context, ShutdownReason};
use crate::signal::registry::SignalRegistry;

/// Maximum number of words on a command line.
pub const MAX_WORDS: usize = 4;

/// Console errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsoleError {
    /// The command does not exist.
    #[error("unknown command")]
    UnknownCommand,
    /// Too many or too few parameters.
    #[error("wrong number of parameters")]
    ParamCount,
    /// A parameter could not be parsed, counting from one.
    #[error("parameter {0} invalid")]
    Param(u8),
    /// Writing the output failed.
    #[error("output failed")]
    Output,
}

impl From<core::fmt::Error> for ConsoleError {
    fn from(_: core::fmt::Error) -> Self {
        ConsoleError::Output
    }
}

/// Parse an integer with C-style base detection: `0x` for hexadecimal, a leading `0` for octal.
pub fn parse_int(word: &str) -> Option<i64> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, word),
    };

    if !digits.bytes().all(|byte| byte.is_ascii_alphanumeric()) {
        return None;
    }

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    }
    .ok()?;

    Some(if negative { -value } else { value })
}

/// The power console.
pub struct Console<'a, T: Transports> {
    context: &'a Context,
    signals: &'a SignalRegistry<'a, T>,
}

impl<'a, T: Transports> Console<'a, T> {
    /// Create a console for the sequencer that shares `context` and `signals`.
    pub fn new(context: &'a Context, signals: &'a SignalRegistry<'a, T>) -> Self {
        Self { context, signals }
    }

    /// Execute a command line, writing its output to `out`.
    ///
    /// An empty line does nothing.
    pub fn execute(&self, line: &str, out: &mut impl Write) -> Result<(), ConsoleError> {
        let mut words: Vec<&str, MAX_WORDS> = Vec::new();
        for word in line.split_whitespace() {
            words.push(word).map_err(|_| ConsoleError::ParamCount)?;
        }

        let Some((&command, args)) = words.split_first() else {
            return Ok(());
        };

        match command {
            "powerinfo" => self.powerinfo(args, out),
            "powerindebug" => self.powerindebug(args, out),
            "apshutdown" => {
                no_args(args)?;
                self.context.request_shutdown(ShutdownReason::Console);
                Ok(())
            }
            "apreset" => {
                no_args(args)?;
                self.context.request_reset();
                Ok(())
            }
            "s5_timeout" => self.s5_timeout(args, out),
            "pause_in_s5" => self.pause_in_s5(args, out),
            "pwrlog" => self.pwrlog(args, out),
            _ => Err(ConsoleError::UnknownCommand),
        }
    }

    fn powerinfo(&self, args: &[&str], out: &mut impl Write) -> Result<(), ConsoleError> {
        no_args(args)?;

        let state = self.context.current_state();
        writeln!(
            out,
            "power state {} = {}, in 0x{:04x}",
            state.number(),
            state.name(),
            self.signals.last_snapshot().asserted()
        )?;

        Ok(())
    }

    fn powerindebug(&self, args: &[&str], out: &mut impl Write) -> Result<(), ConsoleError> {
        let mask = match args {
            [] => None,
            [mask] => {
                let mask = parse_int(mask)
                    .and_then(|mask| u32::try_from(mask).ok())
                    .ok_or(ConsoleError::Param(1))?;
                Some(mask)
            }
            _ => return Err(ConsoleError::ParamCount),
        };

        let debug_mask = self.signals.debug_mask(mask);
        let snapshot = self.signals.last_snapshot();

        writeln!(out, "power in:   0x{:04x}", snapshot.asserted())?;
        writeln!(out, "debug mask: 0x{:04x}", debug_mask)?;
        writeln!(out, "bit meanings:")?;

        for id in self.signals.ids() {
            let value = match (snapshot.valid() & id.mask() != 0, snapshot.is_on(id)) {
                (false, _) => 'x',
                (true, true) => '1',
                (true, false) => '0',
            };

            writeln!(
                out,
                "  0x{:04x} {} {}",
                id.mask(),
                value,
                self.signals.name(id).unwrap_or("?")
            )?;
        }

        Ok(())
    }

    fn s5_timeout(&self, args: &[&str], out: &mut impl Write) -> Result<(), ConsoleError> {
        match args {
            [] => {}
            [seconds] => {
                let timeout = match parse_int(seconds) {
                    Some(-1) => None,
                    Some(seconds) => Some(u32::try_from(seconds).map_err(|_| ConsoleError::Param(1))?),
                    None => return Err(ConsoleError::Param(1)),
                };
                self.context.set_s5_inactivity_timeout(timeout);
            }
            _ => return Err(ConsoleError::ParamCount),
        }

        match self.context.s5_inactivity_timeout() {
            Some(seconds) => writeln!(out, "S5 inactivity timeout: {} s", seconds)?,
            None => writeln!(out, "S5 inactivity timeout: -1 s")?,
        }

        Ok(())
    }

    fn pause_in_s5(&self, args: &[&str], out: &mut impl Write) -> Result<(), ConsoleError> {
        match args {
            [] => {}
            [enable] => {
                let enable = parse_bool(enable).ok_or(ConsoleError::Param(1))?;
                self.context.set_pause_in_s5(enable);
            }
            _ => return Err(ConsoleError::ParamCount),
        }

        let value = if self.context.pause_in_s5() { "on" } else { "off" };
        writeln!(out, "pause_in_s5 = {}", value)?;

        Ok(())
    }

    fn pwrlog(&self, args: &[&str], out: &mut impl Write) -> Result<(), ConsoleError> {
        no_args(args)?;

        self.context.with_event_log(|log| -> Result<(), ConsoleError> {
            if log.is_empty() {
                writeln!(out, "power log empty")?;
            }

            for entry in log.iter() {
                writeln!(
                    out,
                    "{:5} {:7} in 0x{:04x} valid 0x{:04x} {:?}",
                    entry.sequence,
                    entry.state.name(),
                    entry.snapshot.asserted(),
                    entry.snapshot.valid(),
                    entry.kind
                )?;
            }

            Ok(())
        })
    }
}

/// Parse a console boolean such as `on`, `off`, `yes` or `0`.
pub fn parse_bool(word: &str) -> Option<bool> {
    const TRUE: [&str; 5] = ["on", "true", "yes", "enable", "1"];
    const FALSE: [&str; 5] = ["off", "false", "no", "disable", "0"];

    if TRUE.iter().any(|name| name.eq_ignore_ascii_case(word)) {
        Some(true)
    } else if FALSE.iter().any(|name| name.eq_ignore_ascii_case(word)) {
        Some(false)
    } else {
        None
    }
}

fn no_args(args: &[&str]) -> Result<(), ConsoleError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ConsoleError::ParamCount)
    }
}
