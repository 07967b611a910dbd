//! Instrument role wrapper.
//!
//! A [`Device`] binds one configured role (ammeter or vsource) to the shared
//! bus transport: it owns the instrument's address and command sequences and
//! exposes the operations the scan engine needs. Command strings are passed
//! through opaquely; only reply shapes are interpreted here.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::{InstrumentConfig, Role};
use crate::error::{AppResult, ScanError};
use crate::instrument::transport::ScpiTransport;
use crate::measurement::Reading;
use crate::messages;

/// Ampere readings come back with a unit suffix, e.g. `-1.234567E-12A`.
#[allow(clippy::expect_used)]
static READING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)A$").expect("reading regex"));

/// One instrument on the bus.
pub struct Device {
    role: Role,
    address: u8,
    transport: Arc<dyn ScpiTransport>,
    setup_commands: Vec<String>,
    operation_commands: Vec<String>,
    closing_commands: Vec<String>,
    expect_idn: Vec<String>,
}

impl Device {
    /// Build a device from its configuration record.
    ///
    /// Profile references are expanded here, so an unknown profile fails
    /// before anything is sent to the bus.
    pub fn from_config(
        role: Role,
        config: &InstrumentConfig,
        compliance: Option<f64>,
        transport: Arc<dyn ScpiTransport>,
    ) -> AppResult<Self> {
        Ok(Self {
            role,
            address: config.address,
            transport,
            setup_commands: config.setup_commands(compliance)?,
            operation_commands: config.operation_commands.clone(),
            closing_commands: config.closing_commands.clone(),
            expect_idn: config.expect_idn.clone(),
        })
    }

    /// Role this device plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// GPIB primary address.
    pub fn address(&self) -> u8 {
        self.address
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        debug!(role = %self.role, address = self.address, command, "send");
        self.transport
            .command(self.address, command)
            .await
            .map_err(|e| ScanError::Instrument(format!("{}: {e:#}", self.role)))
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        debug!(role = %self.role, address = self.address, command, "query");
        self.transport
            .query(self.address, command)
            .await
            .map_err(|e| ScanError::Instrument(format!("{}: {e:#}", self.role)))
    }

    /// Send a command sequence, skipping the empty placeholders the
    /// historical cards carry (`('',)`).
    async fn send_sequence(&self, commands: &[String]) -> AppResult<()> {
        for command in commands {
            if command.trim().is_empty() {
                continue;
            }
            self.send(command).await?;
        }
        Ok(())
    }

    /// Query the identification string and check it against the configured
    /// `expectIdn` substrings.
    pub async fn identify(&self) -> AppResult<String> {
        let idn = self.ask(messages::BOARD_ID).await?;
        if !self.expect_idn.is_empty() && !self.expect_idn.iter().any(|m| idn.contains(m)) {
            return Err(ScanError::Instrument(format!(
                "{}: expecting one of {:?}, found \"{idn}\" instead",
                self.role, self.expect_idn
            )));
        }
        Ok(idn)
    }

    /// Reset and run the setup command sequence.
    pub async fn initialise(&self) -> AppResult<()> {
        self.send(messages::RESET).await?;
        self.send_sequence(&self.setup_commands).await
    }

    /// Run the activation command sequence.
    pub async fn activate(&self) -> AppResult<()> {
        self.send_sequence(&self.operation_commands).await
    }

    /// Run the closing command sequence.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.send_sequence(&self.closing_commands).await
    }

    /// Set the source voltage level.
    pub async fn set_voltage(&self, volts: f64) -> AppResult<()> {
        self.send(&messages::source_level(volts)).await
    }

    /// Disable the source output.
    pub async fn disable_output(&self) -> AppResult<()> {
        self.send(messages::DISABLE_OUTPUT).await
    }

    /// Take one current reading.
    pub async fn read_current(&self) -> AppResult<Reading> {
        let reply = self.ask(messages::READ).await?;
        let (current_a, device_time_s) = parse_reading(&reply)?;
        Ok(Reading {
            taken_at: Utc::now(),
            device_time_s,
            current_a,
        })
    }
}

/// Parse a `<reading>A,<timestamp>,<status>` reply triple.
fn parse_reading(reply: &str) -> AppResult<(f64, f64)> {
    let fields: Vec<&str> = reply.trim().split(',').collect();
    if fields.len() < 3 {
        return Err(ScanError::MalformedReply(reply.to_string()));
    }
    let caps = READING_RE
        .captures(fields[0].trim())
        .ok_or_else(|| ScanError::MalformedReply(reply.to_string()))?;
    let current_a: f64 = caps[1]
        .parse()
        .map_err(|_| ScanError::MalformedReply(reply.to_string()))?;
    let device_time_s: f64 = fields[1]
        .trim()
        .parse()
        .map_err(|_| ScanError::MalformedReply(reply.to_string()))?;
    Ok((current_a, device_time_s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockBus, AMMETER_IDN};

    fn ammeter_config() -> InstrumentConfig {
        InstrumentConfig {
            address: 22,
            config_commands: vec![
                "SYST:ZCOR OFF".into(),
                "SYST:ZCH OFF".into(),
                "RANG:AUTO ON".into(),
            ],
            operation_commands: vec![String::new()],
            closing_commands: vec![String::new()],
            pre_configuration: vec![],
            expect_idn: vec!["KEITHLEY".into(), "MODEL 6487".into()],
            extra: None,
        }
    }

    #[test]
    fn parse_reading_accepts_keithley_triple() {
        let (current, stamp) = parse_reading("-1.234567E-12A,+2.345E+3,+0.000000E+0").unwrap();
        assert_eq!(current, -1.234567e-12);
        assert_eq!(stamp, 2345.0);
    }

    #[test]
    fn parse_reading_accepts_plain_decimal() {
        let (current, stamp) = parse_reading("0.002A,12.5,0").unwrap();
        assert_eq!(current, 0.002);
        assert_eq!(stamp, 12.5);
    }

    #[test]
    fn parse_reading_rejects_short_reply() {
        assert!(matches!(
            parse_reading("-1.2E-12A,+2.3E+3"),
            Err(ScanError::MalformedReply(_))
        ));
    }

    #[test]
    fn parse_reading_rejects_missing_unit_suffix() {
        assert!(parse_reading("-1.2E-12,+2.3E+3,+0.0E+0").is_err());
    }

    #[test]
    fn parse_reading_rejects_garbage() {
        assert!(parse_reading("GARBAGE").is_err());
    }

    #[tokio::test]
    async fn initialise_sends_reset_then_setup() {
        let bus = Arc::new(MockBus::new().with_device(22, AMMETER_IDN));
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus.clone())
            .unwrap();
        device.initialise().await.unwrap();
        assert_eq!(
            bus.sent_to(22).await,
            vec!["*RST", "SYST:ZCOR OFF", "SYST:ZCH OFF", "RANG:AUTO ON"]
        );
    }

    #[tokio::test]
    async fn empty_placeholder_commands_are_skipped() {
        let bus = Arc::new(MockBus::new().with_device(22, AMMETER_IDN));
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus.clone())
            .unwrap();
        device.activate().await.unwrap();
        device.shutdown().await.unwrap();
        assert!(bus.sent_to(22).await.is_empty());
    }

    #[tokio::test]
    async fn identify_rejects_wrong_model() {
        let bus = Arc::new(MockBus::new().with_device(22, "ACME,MODEL 1,0,0"));
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus).unwrap();
        let err = device.identify().await.unwrap_err();
        assert!(err.to_string().contains("expecting"));
    }

    #[tokio::test]
    async fn identify_accepts_matching_model() {
        let bus = Arc::new(MockBus::new().with_device(22, AMMETER_IDN));
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus).unwrap();
        assert_eq!(device.identify().await.unwrap(), AMMETER_IDN);
    }

    #[tokio::test]
    async fn read_current_parses_mock_triple() {
        let bus = Arc::new(
            MockBus::new()
                .with_device(22, AMMETER_IDN)
                .with_device(24, "unused"),
        );
        bus.command(24, ":SOUR:VOLT:LEV 1000").await.unwrap();
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus).unwrap();
        let reading = device.read_current().await.unwrap();
        assert!((reading.current_a - 1e-9).abs() < 1e-15);
        assert!(reading.device_time_s > 0.0);
    }

    #[tokio::test]
    async fn malformed_reply_surfaces_as_error() {
        let bus = Arc::new(MockBus::new().with_device(22, AMMETER_IDN));
        bus.inject_reply(22, "GARBAGE").await;
        let device = Device::from_config(Role::Ammeter, &ammeter_config(), None, bus).unwrap();
        assert!(matches!(
            device.read_current().await,
            Err(ScanError::MalformedReply(_))
        ));
    }
}
