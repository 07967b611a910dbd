//! Bus transports and instrument wrappers.

pub mod device;
pub mod mock;
pub mod profiles;
pub mod transport;

#[cfg(feature = "instrument_serial")]
pub mod prologix;

pub use device::Device;
pub use transport::ScpiTransport;
