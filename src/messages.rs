//! A useful collection of pre-recorded SCPI messages.
//!
//! Command strings are opaque payloads owned by the instruments; only the
//! handful shared between drivers and the scan engine live here.

/// Reset the instrument to its power-on defaults.
pub const RESET: &str = "*RST";

/// Trigger a measurement cycle.
pub const INITIALISE: &str = "INIT";

/// Request a reading from the display buffer.
pub const READ: &str = ":READ?";

/// Request the identification string.
pub const BOARD_ID: &str = "*IDN?";

/// Enable the source output.
pub const ENABLE_OUTPUT: &str = ":OUTP ON";

/// Disable the source output.
pub const DISABLE_OUTPUT: &str = ":OUTP OFF";

/// Build the command setting the source voltage level.
pub fn source_level(volts: f64) -> String {
    format!(":SOUR:VOLT:LEV {volts}")
}
