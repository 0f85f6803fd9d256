//! # DShot Special Commands
//!
//! Command values 0-47 are not throttle. ESCs act on them only while the
//! motor is stopped, and most configuration commands must be repeated before
//! the ESC accepts them.

use super::protocol::ThrottleCommand;

/// Number of consecutive frames required by configuration commands
pub const DSHOT_COMMAND_REPEAT: u32 = 6;

/// Special DShot commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DshotCommand {
    MotorStop = 0,
    Beep1 = 1,
    Beep2 = 2,
    Beep3 = 3,
    Beep4 = 4,
    Beep5 = 5,
    EscInfo = 6,
    /// Forced normal direction, regardless of ESC configuration
    SpinDirection1 = 7,
    /// Forced reversed direction, regardless of ESC configuration
    SpinDirection2 = 8,
    ThreeDModeOff = 9,
    ThreeDModeOn = 10,
    SettingsRequest = 11,
    /// ESC needs about 35 ms before the next command
    SaveSettings = 12,
    ExtendedTelemetryEnable = 13,
    ExtendedTelemetryDisable = 14,
    /// Normal direction relative to ESC configuration
    SpinDirectionNormal = 20,
    /// Reversed direction relative to ESC configuration
    SpinDirectionReversed = 21,
    Led0On = 22,
    Led1On = 23,
    Led2On = 24,
    Led3On = 25,
    Led0Off = 26,
    Led1Off = 27,
    Led2Off = 28,
    Led3Off = 29,
    AudioStreamModeToggle = 30,
    SilentModeToggle = 31,
    SignalLineTelemetryDisable = 32,
    SignalLineTelemetryEnable = 33,
    SignalLineContinuousErpmTelemetry = 34,
    SignalLineContinuousErpmPeriodTelemetry = 35,
    /// 1 °C per LSB
    SignalLineTemperatureTelemetry = 42,
    /// 10 mV per LSB
    SignalLineVoltageTelemetry = 43,
    /// 100 mA per LSB
    SignalLineCurrentTelemetry = 44,
    /// 10 mAh per LSB
    SignalLineConsumptionTelemetry = 45,
    /// 100 eRPM per LSB
    SignalLineErpmTelemetry = 46,
    /// 16 µs per LSB
    SignalLineErpmPeriodTelemetry = 47,
}

impl DshotCommand {
    /// Raw command value (0-47)
    pub fn value(self) -> u16 {
        self as u16
    }

    /// Whether the frame must carry the telemetry bit for the ESC to act
    pub fn requires_telemetry(self) -> bool {
        use DshotCommand::*;
        matches!(
            self,
            SpinDirection1
                | SpinDirection2
                | ThreeDModeOff
                | ThreeDModeOn
                | SettingsRequest
                | SaveSettings
                | ExtendedTelemetryEnable
                | ExtendedTelemetryDisable
                | SpinDirectionNormal
                | SpinDirectionReversed
                | SignalLineTelemetryDisable
                | SignalLineTelemetryEnable
                | SignalLineContinuousErpmTelemetry
                | SignalLineContinuousErpmPeriodTelemetry
        )
    }

    /// How many consecutive frames the ESC expects
    pub fn repeat_count(self) -> u32 {
        if self.requires_telemetry() {
            DSHOT_COMMAND_REPEAT
        } else {
            1
        }
    }
}

impl From<DshotCommand> for ThrottleCommand {
    fn from(command: DshotCommand) -> Self {
        // Every variant is below 48, well inside the 11-bit range
        ThrottleCommand(command.value())
    }
}
