//! Mock bus and instruments.
//!
//! Simulates a GPIB bus with SCPI instruments for testing without hardware.
//! The mock keeps one shared bias voltage: whatever level the last
//! `:SOUR:VOLT:LEV` command set, reads on any instrument report the leakage
//! current that bias would drive through a configurable resistance, plus
//! optional noise.
//!
//! Every command sent is recorded per address so tests can assert on exact
//! command sequences and ordering.

use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::instrument::transport::ScpiTransport;
use crate::messages;

/// Identification string of the simulated picoammeter.
pub const AMMETER_IDN: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 6487,4123456,A05";

/// Identification string of the simulated source meter.
pub const VSOURCE_IDN: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2410,1373541,C30";

struct MockDevice {
    idn: String,
    /// Canned replies consumed before any computed one.
    canned: VecDeque<String>,
    /// Instrument elapsed-time stamp, advanced per reading.
    clock_s: f64,
}

struct BusState {
    devices: HashMap<u8, MockDevice>,
    sent: Vec<(u8, String)>,
    /// Bias applied by the last `:SOUR:VOLT:LEV` seen on the bus.
    bias_v: f64,
}

/// Simulated GPIB bus.
pub struct MockBus {
    state: Mutex<BusState>,
    /// Leakage model: `I = V / resistance`.
    resistance_ohm: f64,
    /// Peak noise added to each reading, in amperes.
    noise_a: f64,
    /// Simulated integration time per reading.
    read_delay: Duration,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// Create an empty bus (1 TΩ leakage model, no noise, instant reads).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                devices: HashMap::new(),
                sent: Vec::new(),
                bias_v: 0.0,
            }),
            resistance_ohm: 1e12,
            noise_a: 0.0,
            read_delay: Duration::ZERO,
        }
    }

    /// Attach an instrument at `address` answering `idn` to `*IDN?`.
    pub fn with_device(mut self, address: u8, idn: &str) -> Self {
        self.state.get_mut().devices.insert(
            address,
            MockDevice {
                idn: idn.to_string(),
                canned: VecDeque::new(),
                clock_s: 0.0,
            },
        );
        self
    }

    /// Set the peak reading noise in amperes.
    pub fn with_noise(mut self, noise_a: f64) -> Self {
        self.noise_a = noise_a;
        self
    }

    /// Set the simulated per-reading integration time.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Queue a canned reply for the next query at `address`.
    pub async fn inject_reply(&self, address: u8, reply: &str) {
        let mut state = self.state.lock().await;
        if let Some(device) = state.devices.get_mut(&address) {
            device.canned.push_back(reply.to_string());
        }
    }

    /// Commands recorded for one address, in send order.
    pub async fn sent_to(&self, address: u8) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .sent
            .iter()
            .filter(|(addr, _)| *addr == address)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Bias currently applied on the bus.
    pub async fn bias(&self) -> f64 {
        self.state.lock().await.bias_v
    }

    fn reading(&self, bias_v: f64, clock_s: f64) -> String {
        let mut current = bias_v / self.resistance_ohm;
        if self.noise_a > 0.0 {
            current += rand::thread_rng().gen_range(-self.noise_a..=self.noise_a);
        }
        format!("{current:+.6E}A,{clock_s:+.2E},+0.000000E+0")
    }

    fn record(state: &mut BusState, address: u8, command: &str) {
        state.sent.push((address, command.to_string()));
        if let Some(level) = command.strip_prefix(":SOUR:VOLT:LEV ") {
            if let Ok(volts) = level.trim().parse::<f64>() {
                state.bias_v = volts;
            }
        } else if command == messages::RESET {
            state.bias_v = 0.0;
        }
    }
}

#[async_trait]
impl ScpiTransport for MockBus {
    async fn command(&self, address: u8, command: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.devices.contains_key(&address) {
            return Err(anyhow!("no listener at bus address {address}"));
        }
        Self::record(&mut state, address, command);
        Ok(())
    }

    async fn query(&self, address: u8, command: &str) -> Result<String> {
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }
        let mut state = self.state.lock().await;
        if !state.devices.contains_key(&address) {
            return Err(anyhow!("no listener at bus address {address}"));
        }
        Self::record(&mut state, address, command);

        let bias_v = state.bias_v;
        let device = state
            .devices
            .get_mut(&address)
            .ok_or_else(|| anyhow!("no listener at bus address {address}"))?;
        if let Some(reply) = device.canned.pop_front() {
            return Ok(reply);
        }
        match command {
            messages::BOARD_ID => Ok(device.idn.clone()),
            messages::READ => {
                device.clock_s += 0.1;
                Ok(self.reading(bias_v, device.clock_s))
            }
            other => Err(anyhow!("unsupported query {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idn_reply_per_address() {
        let bus = MockBus::new()
            .with_device(22, AMMETER_IDN)
            .with_device(24, VSOURCE_IDN);
        assert_eq!(bus.query(22, "*IDN?").await.unwrap(), AMMETER_IDN);
        assert_eq!(bus.query(24, "*IDN?").await.unwrap(), VSOURCE_IDN);
    }

    #[tokio::test]
    async fn read_reflects_bus_bias() {
        let bus = MockBus::new()
            .with_device(22, AMMETER_IDN)
            .with_device(24, VSOURCE_IDN);
        bus.command(24, ":SOUR:VOLT:LEV 1000").await.unwrap();
        let reply = bus.query(22, ":READ?").await.unwrap();
        let value: f64 = reply
            .split(',')
            .next()
            .and_then(|field| field.strip_suffix('A'))
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert!((value - 1e-9).abs() < 1e-15);
    }

    #[tokio::test]
    async fn reset_zeroes_bias() {
        let bus = MockBus::new().with_device(24, VSOURCE_IDN);
        bus.command(24, ":SOUR:VOLT:LEV 500").await.unwrap();
        assert_eq!(bus.bias().await, 500.0);
        bus.command(24, "*RST").await.unwrap();
        assert_eq!(bus.bias().await, 0.0);
    }

    #[tokio::test]
    async fn unknown_address_is_rejected() {
        let bus = MockBus::new().with_device(22, AMMETER_IDN);
        assert!(bus.command(7, "*RST").await.is_err());
        assert!(bus.query(7, "*IDN?").await.is_err());
    }

    #[tokio::test]
    async fn canned_replies_take_precedence() {
        let bus = MockBus::new().with_device(22, AMMETER_IDN);
        bus.inject_reply(22, "GARBAGE").await;
        assert_eq!(bus.query(22, ":READ?").await.unwrap(), "GARBAGE");
        // Queue drained, back to computed readings.
        assert!(bus.query(22, ":READ?").await.unwrap().ends_with("E+0"));
    }

    #[tokio::test]
    async fn commands_are_recorded_in_order() {
        let bus = MockBus::new().with_device(24, VSOURCE_IDN);
        bus.command(24, ":SOUR:VOLT:LEV 0").await.unwrap();
        bus.command(24, ":OUTP ON").await.unwrap();
        assert_eq!(bus.sent_to(24).await, vec![":SOUR:VOLT:LEV 0", ":OUTP ON"]);
    }
}
