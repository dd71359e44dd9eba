//! Host commands that the sequencer serves.
//!
//! Parameters and responses are little-endian and versioned. Handlers only post requests to the shared
//! [`Context`] or read from it, they never wait for the sequencer.
use core::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::context::Context;
use crate::sleep::{SleepKind, TIMEOUT_DEFAULT};

/// Inform the EC about host sleep state changes.
pub const EC_CMD_HOST_SLEEP_EVENT: u16 = 0x00A9;

/// Reboot the AP once it reached hard-off.
pub const EC_CMD_REBOOT_AP_ON_G3: u16 = 0x0127;

/// Get or set whether a host shutdown pauses in soft-off.
pub const EC_CMD_GSV_PAUSE_IN_S5: u16 = 0x000C;

/// Set the value of a get/set-value command instead of only reading it.
pub const EC_GSV_SET: u32 = 0x8000_0000;

/// Host command result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Status {
    Success = 0,
    InvalidCommand = 1,
    Error = 2,
    InvalidParam = 3,
    AccessDenied = 4,
    InvalidResponse = 5,
    InvalidVersion = 6,
    InvalidChecksum = 7,
    InProgress = 8,
    Unavailable = 9,
    Timeout = 10,
    Overflow = 11,
    InvalidHeader = 12,
    RequestTruncated = 13,
    ResponseTooBig = 14,
    BusError = 15,
    Busy = 16,
}

/// Sleep events the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum HostSleepEvent {
    /// Suspend to RAM.
    S3Suspend = 1,
    /// Resume from suspend to RAM.
    S3Resume = 2,
    /// Enter standby.
    S0ixSuspend = 3,
    /// Leave standby.
    S0ixResume = 4,
    /// Suspend to RAM, with additional wake sources.
    S3WakeableSuspend = 5,
}

impl TryFrom<u8> for HostSleepEvent {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::S3Suspend),
            2 => Ok(Self::S3Resume),
            3 => Ok(Self::S0ixSuspend),
            4 => Ok(Self::S0ixResume),
            5 => Ok(Self::S3WakeableSuspend),
            _ => Err(value),
        }
    }
}

impl From<HostSleepEvent> for u8 {
    fn from(value: HostSleepEvent) -> Self {
        value as u8
    }
}

impl HostSleepEvent {
    /// The kind of sleep the event refers to.
    pub fn kind(self) -> SleepKind {
        match self {
            Self::S0ixSuspend | Self::S0ixResume => SleepKind::Standby,
            Self::S3Suspend | Self::S3Resume | Self::S3WakeableSuspend => SleepKind::Suspend,
        }
    }

    /// Whether the host is about to sleep, as opposed to having resumed.
    pub fn is_suspend(self) -> bool {
        matches!(self, Self::S3Suspend | Self::S0ixSuspend | Self::S3WakeableSuspend)
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Parameters of the host sleep event, version 1.
    pub struct HostSleepEventParams(pub u32): Debug, FromStorage, IntoStorage {
        /// Timeout until the AP must have reached the sleep state, for suspend events.
        pub sleep_timeout_ms: u16 @ 16..=31,
        /// Padding.
        pub reserved: u8 @ 8..=15,
        /// The event.
        pub event: u8 [try_get HostSleepEvent, set HostSleepEvent] @ 0..=7,
    }
}

/// Serves the sequencer's host commands.
pub struct HostCommands<'a> {
    context: &'a Context,
}

impl<'a> HostCommands<'a> {
    /// Create a handler that posts to `context`.
    pub fn new(context: &'a Context) -> Self {
        Self { context }
    }

    /// Handle a host command. Returns the length of the response written to `response`.
    pub fn handle(&self, command: u16, version: u8, params: &[u8], response: &mut [u8]) -> Result<usize, Status> {
        let result = match command {
            EC_CMD_REBOOT_AP_ON_G3 => self.reboot_ap_on_g3(version, params),
            EC_CMD_HOST_SLEEP_EVENT => self.host_sleep_event(version, params, response),
            EC_CMD_GSV_PAUSE_IN_S5 => self.pause_in_s5(version, params, response),
            _ => Err(Status::InvalidCommand),
        };

        if let Err(status) = result {
            debug!("host command 0x{:04x} v{} failed: {:?}", command, version, status);
        }

        result
    }

    fn reboot_ap_on_g3(&self, version: u8, params: &[u8]) -> Result<usize, Status> {
        let delay_s = match version {
            0 => 0,
            1 => {
                if params.len() < 4 {
                    return Err(Status::InvalidParam);
                }

                LittleEndian::read_u32(&params[..4])
            }
            _ => return Err(Status::InvalidParam),
        };

        info!("reboot AP on G3, delay {} s", delay_s);
        self.context.request_reboot_on_g3(delay_s);
        Ok(0)
    }

    /// Parameters and response are both `flags: u32, value: u32`.
    fn pause_in_s5(&self, version: u8, params: &[u8], response: &mut [u8]) -> Result<usize, Status> {
        if version != 0 {
            return Err(Status::InvalidVersion);
        }

        if params.len() < 8 {
            return Err(Status::InvalidParam);
        }

        if response.len() < 8 {
            return Err(Status::ResponseTooBig);
        }

        let flags = LittleEndian::read_u32(&params[..4]);
        if flags & EC_GSV_SET != 0 {
            let pause = LittleEndian::read_u32(&params[4..8]) != 0;
            info!("pause in S5: {}", pause);
            self.context.set_pause_in_s5(pause);
        }

        LittleEndian::write_u32(&mut response[..4], flags);
        LittleEndian::write_u32(&mut response[4..8], self.context.pause_in_s5() as u32);
        Ok(8)
    }

    fn host_sleep_event(&self, version: u8, params: &[u8], response: &mut [u8]) -> Result<usize, Status> {
        let (event, timeout_ms) = match version {
            0 => {
                let raw = *params.first().ok_or(Status::InvalidParam)?;
                (HostSleepEvent::try_from(raw), TIMEOUT_DEFAULT)
            }
            1 => {
                if params.len() < 4 {
                    return Err(Status::InvalidParam);
                }

                let params = HostSleepEventParams(LittleEndian::read_u32(&params[..4]));
                (params.event(), params.sleep_timeout_ms())
            }
            _ => return Err(Status::InvalidVersion),
        };

        let event = event.map_err(|_| Status::InvalidParam)?;
        debug!("host sleep event {:?}", event);

        if event.is_suspend() {
            self.context.notify_sleep(event.kind(), timeout_ms);
            return Ok(0);
        }

        // Check before the resume consumes the sleep state.
        if version == 1 && response.len() < 4 {
            return Err(Status::ResponseTooBig);
        }

        let transitions = self.context.notify_resume(event.kind()).map_err(|_| Status::Error)?;

        if version == 1 {
            LittleEndian::write_u32(response, transitions.0);
            Ok(4)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::TIMEOUT_INFINITE;

    fn sleep_params(event: HostSleepEvent, timeout_ms: u16) -> [u8; 4] {
        let params = HostSleepEventParams(0)
            .with_event(event)
            .with_sleep_timeout_ms(timeout_ms);

        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, params.0);
        buf
    }

    #[test]
    fn reboot_on_g3_versions() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let mut response = [0u8; 4];

        assert_eq!(commands.handle(EC_CMD_REBOOT_AP_ON_G3, 0, &[], &mut response), Ok(0));
        assert_eq!(context.take_hard_off_exit(), Some(0));

        assert_eq!(
            commands.handle(EC_CMD_REBOOT_AP_ON_G3, 1, &[3, 0, 0, 0], &mut response),
            Ok(0)
        );
        assert_eq!(context.take_hard_off_exit(), Some(3));

        assert_eq!(
            commands.handle(EC_CMD_REBOOT_AP_ON_G3, 1, &[3, 0], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            commands.handle(EC_CMD_REBOOT_AP_ON_G3, 2, &[3, 0, 0, 0], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(context.take_hard_off_exit(), None);
    }

    #[test]
    fn pause_in_s5_get_and_set() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let mut response = [0u8; 8];

        assert_eq!(commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 0, &[0; 8], &mut response), Ok(8));
        assert_eq!(LittleEndian::read_u32(&response[4..]), 1);

        let mut params = [0u8; 8];
        LittleEndian::write_u32(&mut params[..4], EC_GSV_SET);
        assert_eq!(commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 0, &params, &mut response), Ok(8));
        assert_eq!(LittleEndian::read_u32(&response[..4]), EC_GSV_SET);
        assert_eq!(LittleEndian::read_u32(&response[4..]), 0);
        assert!(!context.pause_in_s5());

        // Without the set flag the value is ignored.
        LittleEndian::write_u32(&mut params[..4], 0);
        LittleEndian::write_u32(&mut params[4..], 1);
        assert_eq!(commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 0, &params, &mut response), Ok(8));
        assert_eq!(LittleEndian::read_u32(&response[4..]), 0);
    }

    #[test]
    fn pause_in_s5_rejects_bad_requests() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let mut response = [0u8; 8];

        let mut params = [0u8; 8];
        LittleEndian::write_u32(&mut params[..4], EC_GSV_SET);

        assert_eq!(
            commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 1, &params, &mut response),
            Err(Status::InvalidVersion)
        );
        assert_eq!(
            commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 0, &params[..4], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            commands.handle(EC_CMD_GSV_PAUSE_IN_S5, 0, &params, &mut response[..4]),
            Err(Status::ResponseTooBig)
        );
        assert!(context.pause_in_s5());
    }

    #[test]
    fn unknown_command() {
        let context = Context::new();
        let commands = HostCommands::new(&context);

        assert_eq!(commands.handle(0x0001, 0, &[], &mut []), Err(Status::InvalidCommand));
    }

    #[test]
    fn sleep_event_rejects_bad_requests() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let mut response = [0u8; 4];

        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 2, &[1], &mut response),
            Err(Status::InvalidVersion)
        );
        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 0, &[], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 0, &[9], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &[1, 0], &mut response),
            Err(Status::InvalidParam)
        );
        assert_eq!(context.sleep_pending(), None);
    }

    #[test]
    fn sleep_event_v0() {
        let context = Context::new();
        let commands = HostCommands::new(&context);

        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 0, &[1], &mut []), Ok(0));
        assert_eq!(context.sleep_pending(), Some(SleepKind::Suspend));

        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 0, &[2], &mut []), Ok(0));
        assert_eq!(context.sleep_pending(), None);
    }

    #[test]
    fn suspend_timeout_is_passed_on() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let params = sleep_params(HostSleepEvent::S0ixSuspend, 500);

        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &params, &mut []), Ok(0));
        assert_eq!(context.with_sleep(|sleep| sleep.armed_timeout()), Some(500));

        let params = sleep_params(HostSleepEvent::S3WakeableSuspend, TIMEOUT_INFINITE);
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &params, &mut []), Ok(0));
        assert_eq!(context.sleep_pending(), Some(SleepKind::Suspend));
        assert_eq!(context.with_sleep(|sleep| sleep.armed_timeout()), None);
    }

    #[test]
    fn repeated_standby_reports_one_transition() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let mut response = [0u8; 4];

        let suspend = sleep_params(HostSleepEvent::S0ixSuspend, 0);
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &suspend, &mut response), Ok(0));
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &suspend, &mut response), Ok(0));

        let resume = sleep_params(HostSleepEvent::S0ixResume, 0);
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &resume, &mut response), Ok(4));
        assert_eq!(LittleEndian::read_u32(&response), 1);
    }

    #[test]
    fn resume_errors() {
        let context = Context::new();
        let commands = HostCommands::new(&context);
        let resume = sleep_params(HostSleepEvent::S3Resume, 0);

        // Nothing to resume from.
        let mut response = [0u8; 4];
        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &resume, &mut response),
            Err(Status::Error)
        );

        // No room for the response, the sleep stays pending.
        let suspend = sleep_params(HostSleepEvent::S3Suspend, 0);
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &suspend, &mut response), Ok(0));
        assert_eq!(
            commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &resume, &mut response[..2]),
            Err(Status::ResponseTooBig)
        );
        assert_eq!(context.sleep_pending(), Some(SleepKind::Suspend));
        assert_eq!(commands.handle(EC_CMD_HOST_SLEEP_EVENT, 1, &resume, &mut response), Ok(4));
        assert_eq!(LittleEndian::read_u32(&response), 0);
    }
}
