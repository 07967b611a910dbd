//! GPIB bus access through a Prologix-style USB adapter.
//!
//! The adapter enumerates as a serial port and is driven with `++` control
//! commands:
//! - `++mode 1` puts it in controller mode
//! - `++auto 0` disables read-after-write (queries read explicitly)
//! - `++eoi 1` asserts EOI on the last byte of each command
//! - `++addr N` selects the target instrument
//! - `++read eoi` fetches the reply of the addressed instrument
//!
//! Everything after the `++` layer is plain SCPI owned by the instruments.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::instrument::transport::ScpiTransport;

/// Default baud rate of Prologix GPIB-USB adapters.
pub const DEFAULT_BAUD: u32 = 115_200;

struct PortState {
    port: BufReader<SerialStream>,
    /// Address last selected with `++addr`; avoids re-addressing on every
    /// exchange with the same instrument.
    current_address: Option<u8>,
}

/// GPIB-over-serial transport.
///
/// The serial port is protected by a `Mutex` for exclusive access; address
/// selection and the subsequent exchange happen under one lock so
/// interleaved calls cannot target the wrong instrument.
pub struct PrologixTransport {
    state: Mutex<PortState>,
    timeout: Duration,
}

impl PrologixTransport {
    /// Open the adapter's serial port and put it in controller mode.
    ///
    /// # Errors
    /// Returns an error if the port cannot be opened or the adapter rejects
    /// the initialization writes.
    pub async fn open(port_path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(port_path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open GPIB adapter port {port_path}"))?;

        let transport = Self {
            state: Mutex::new(PortState {
                port: BufReader::new(port),
                current_address: None,
            }),
            timeout,
        };

        {
            let mut state = transport.state.lock().await;
            for setup in ["++mode 1", "++auto 0", "++eoi 1"] {
                Self::write_line(&mut state, setup).await?;
            }
        }

        Ok(transport)
    }

    async fn write_line(state: &mut PortState, line: &str) -> Result<()> {
        let framed = format!("{line}\n");
        state
            .port
            .get_mut()
            .write_all(framed.as_bytes())
            .await
            .context("GPIB adapter write failed")?;
        Ok(())
    }

    async fn select(state: &mut PortState, address: u8) -> Result<()> {
        if state.current_address != Some(address) {
            Self::write_line(state, &format!("++addr {address}")).await?;
            state.current_address = Some(address);
        }
        Ok(())
    }

    async fn read_reply(&self, state: &mut PortState, address: u8) -> Result<String> {
        Self::write_line(state, "++read eoi").await?;
        let mut reply = String::new();
        tokio::time::timeout(self.timeout, state.port.read_line(&mut reply))
            .await
            .with_context(|| {
                format!(
                    "No reply from address {address} within {} ms",
                    self.timeout.as_millis()
                )
            })??;
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl ScpiTransport for PrologixTransport {
    async fn command(&self, address: u8, command: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::select(&mut state, address).await?;
        Self::write_line(&mut state, command).await
    }

    async fn query(&self, address: u8, command: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        Self::select(&mut state, address).await?;
        Self::write_line(&mut state, command).await?;
        self.read_reply(&mut state, address).await
    }
}
