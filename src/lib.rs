//! # ivscan
//!
//! Configuration-driven IV (current-voltage) scan control for high-voltage
//! detector qualification. A source meter ramps a bias voltage through a
//! configured stage plan while a picoammeter reads the leakage current; at a
//! designated test voltage the scan holds for a sustained stability test.
//! Both instruments are driven with SCPI command strings taken from the
//! configuration card, over a GPIB bus reached through a Prologix-style
//! serial adapter.
//!
//! ## Crate Structure
//!
//! - **`config`**: the scan configuration record (TOML via figment), its
//!   validation, and the instrument sub-records.
//! - **`error`**: the custom `ScanError` enum for centralized error handling.
//! - **`instrument`**: bus transports (`prologix`, `mock`), the `Device`
//!   role wrapper, and the named pre-configuration `profiles`.
//! - **`logging`**: tracing subscriber setup.
//! - **`measurement`**: record types shared by the scan engine and storage.
//! - **`messages`**: the handful of SCPI command strings shared between
//!   modules.
//! - **`params`**: typed access to free-form instrument parameter tables.
//! - **`scan`**: the `IvScanner` procedure engine.
//! - **`stats`**: sample statistics helpers.
//! - **`storage`**: CSV writers for scan results.

pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod messages;
pub mod params;
pub mod scan;
pub mod stats;

#[cfg(feature = "storage_csv")]
pub mod storage;
