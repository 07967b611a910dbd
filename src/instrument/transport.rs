//! SCPI bus transport abstraction.
//!
//! Abstracts the underlying communication mechanism so the device layer and
//! the scan engine stay hardware-agnostic. One transport serves the whole
//! bus; instruments are selected per call by their primary address.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for SCPI communication transports.
///
/// # Contract
/// - `command` transmits without waiting for a reply.
/// - `query` transmits and returns the reply with terminators stripped.
/// - Implementations serialize bus access internally; methods take `&self`
///   and interior mutability guards the shared line.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command to the instrument at `address` without expecting a
    /// reply.
    async fn command(&self, address: u8, command: &str) -> Result<()>;

    /// Send a query to the instrument at `address` and return its reply.
    async fn query(&self, address: u8, command: &str) -> Result<String>;
}
