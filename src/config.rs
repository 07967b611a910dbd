//! Scan configuration loading and validation.
//!
//! The configuration record is the external interface of this program: an
//! unseen operator writes one TOML file per measurement campaign and every
//! run is driven from it. Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `IVSCAN_`)
//!
//! The serialized key names (`Vramp`, `bothPolarities`, `configCommands`,
//! ...) follow the historical card format, so existing cards translate
//! one-to-one.
//!
//! # Example
//! ```no_run
//! use ivscan::config::ScanConfig;
//!
//! # fn main() -> Result<(), ivscan::error::ScanError> {
//! let config = ScanConfig::load("config/scan.toml")?;
//! config.validate()?;
//! println!("{} ramp stages", config.ramp.stages().len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};
use crate::instrument::profiles;
use crate::params::ParamTable;

/// Highest primary address on a GPIB bus.
pub const GPIB_ADDRESS_MAX: u8 = 30;

/// Logical instrument roles on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Current-measuring instrument (picoammeter).
    Ammeter,
    /// Voltage-sourcing instrument (source meter).
    Vsource,
}

impl Role {
    /// Role name as it appears in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Ammeter => "ammeter",
            Role::Vsource => "vsource",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ammeter" => Ok(Role::Ammeter),
            "vsource" => Ok(Role::Vsource),
            other => Err(ScanError::Configuration(format!(
                "unknown instrument role {other:?} (expected \"ammeter\" or \"vsource\")"
            ))),
        }
    }
}

/// Voltage stages to ramp through.
///
/// Either an explicit stage list or a half-open `start..stop` walk in `step`
/// increments, matching the `range(start, stop, step)` form of the
/// historical cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RampSpec {
    /// Explicit list of voltages.
    Stages(Vec<f64>),
    /// `start`, `start + step`, ... up to but excluding `stop`.
    Range {
        /// First stage.
        start: f64,
        /// Exclusive upper bound.
        stop: f64,
        /// Stage increment; its sign must walk from `start` towards `stop`.
        step: f64,
    },
}

impl RampSpec {
    /// Materialize the stage list.
    pub fn stages(&self) -> Vec<f64> {
        match *self {
            RampSpec::Stages(ref stages) => stages.clone(),
            RampSpec::Range { start, stop, step } => {
                if step == 0.0 || !step.is_finite() {
                    return Vec::new();
                }
                let count = ((stop - start) / step).ceil();
                if !count.is_finite() || count <= 0.0 {
                    return Vec::new();
                }
                (0..count as usize).map(|i| start + i as f64 * step).collect()
            }
        }
    }
}

/// Per-instrument configuration record.
///
/// An instrument is set up either from free-form command tuples
/// (`configCommands` / `operationCommands` / `closingCommands`) or from named
/// `preConfiguration` profile references; both styles may be combined, in
/// which case profiles are expanded first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// GPIB primary address.
    pub address: u8,

    /// Setup commands sent during configuration.
    #[serde(rename = "configCommands", default)]
    pub config_commands: Vec<String>,

    /// Activation commands sent right before the scan (e.g. `:OUTP ON`).
    #[serde(rename = "operationCommands", default)]
    pub operation_commands: Vec<String>,

    /// Shutdown commands sent after the scan.
    #[serde(rename = "closingCommands", default)]
    pub closing_commands: Vec<String>,

    /// Named pre-configuration profile references.
    #[serde(rename = "preConfiguration", default)]
    pub pre_configuration: Vec<String>,

    /// Accepted `*IDN?` substrings; empty disables the model check.
    #[serde(rename = "expectIdn", default)]
    pub expect_idn: Vec<String>,

    /// Free-form extra keys (see [`ParamTable`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<toml::Value>,
}

impl InstrumentConfig {
    /// Setup command sequence: expanded profiles followed by the explicit
    /// `configCommands` tuple.
    pub fn setup_commands(&self, compliance: Option<f64>) -> AppResult<Vec<String>> {
        let mut out = Vec::new();
        for name in &self.pre_configuration {
            out.extend(profiles::expand(name, compliance)?);
        }
        out.extend(self.config_commands.iter().cloned());
        Ok(out)
    }

    /// Typed view over the free-form extra keys.
    pub fn params(&self) -> ParamTable {
        ParamTable::new(self.extra.clone())
    }
}

/// Top-level scan configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Picoammeter record, when the role is wired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ammeter: Option<InstrumentConfig>,

    /// Source meter record, when the role is wired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsource: Option<InstrumentConfig>,

    /// Voltages to ramp through.
    #[serde(rename = "Vramp")]
    pub ramp: RampSpec,

    /// Execute the stage list in both polarities.
    #[serde(rename = "bothPolarities", default)]
    pub both_polarities: bool,

    /// Walk the stages back down to the first one after the scan.
    #[serde(rename = "rampDown", default)]
    pub ramp_down: bool,

    /// Voltage to test stability at (absolute value).
    #[serde(rename = "Vtest")]
    pub v_test: f64,

    /// Current readings averaged per stage.
    #[serde(rename = "numRepetitions")]
    pub num_repetitions: usize,

    /// Settling wait after changing voltage, in seconds.
    #[serde(rename = "stableTime")]
    pub stable_time_s: u64,

    /// Sustained hold duration at `Vtest`, in seconds.
    #[serde(rename = "timeAtTest")]
    pub time_at_test_s: u64,

    /// Compliance current limit in amperes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compl: Option<f64>,

    /// Active instrument roles; absent means every configured role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<Role>>,
}

impl ScanConfig {
    /// Load configuration from a TOML file merged with `IVSCAN_` environment
    /// overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IVSCAN_").split("_"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML string (tests, tooling).
    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let config = Figment::new().merge(Toml::string(raw)).extract()?;
        Ok(config)
    }

    /// Sub-record for a role, if present in the file.
    pub fn instrument(&self, role: Role) -> Option<&InstrumentConfig> {
        match role {
            Role::Ammeter => self.ammeter.as_ref(),
            Role::Vsource => self.vsource.as_ref(),
        }
    }

    /// Roles the scan drives: the `modules` list when given, otherwise every
    /// role with a sub-record.
    pub fn active_roles(&self) -> Vec<Role> {
        match &self.modules {
            Some(modules) => modules.clone(),
            None => [Role::Ammeter, Role::Vsource]
                .into_iter()
                .filter(|role| self.instrument(*role).is_some())
                .collect(),
        }
    }

    /// Settling wait after each voltage change.
    pub fn settling_wait(&self) -> Duration {
        Duration::from_secs(self.stable_time_s)
    }

    /// Sustained hold duration at the test voltage.
    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.time_at_test_s)
    }

    /// Validate the record after loading.
    ///
    /// The historical cards enforced nothing; here basic type/range sanity is
    /// checked before any instrument is touched.
    pub fn validate(&self) -> AppResult<()> {
        if let RampSpec::Range { step, .. } = self.ramp {
            if step == 0.0 || !step.is_finite() {
                return Err(ScanError::Configuration(
                    "Vramp step must be non-zero and finite".into(),
                ));
            }
        }
        let stages = self.ramp.stages();
        if stages.is_empty() {
            return Err(ScanError::Configuration(
                "Vramp must produce at least one stage".into(),
            ));
        }
        if stages.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::Configuration(
                "Vramp stages must all be finite".into(),
            ));
        }
        if self.num_repetitions == 0 {
            return Err(ScanError::Configuration(
                "numRepetitions must be greater than 0".into(),
            ));
        }
        if !self.v_test.is_finite() || self.v_test < 0.0 {
            return Err(ScanError::Configuration(
                "Vtest must be a non-negative, finite voltage".into(),
            ));
        }
        if let Some(compl) = self.compl {
            if !compl.is_finite() || compl <= 0.0 {
                return Err(ScanError::Configuration(format!(
                    "compl must be positive and finite, got {compl}"
                )));
            }
        }

        if let Some(modules) = &self.modules {
            if modules.is_empty() {
                return Err(ScanError::Configuration(
                    "modules must name at least one role when present".into(),
                ));
            }
            let mut seen = HashSet::new();
            for role in modules {
                if !seen.insert(*role) {
                    return Err(ScanError::Configuration(format!(
                        "duplicate module entry: {role}"
                    )));
                }
            }
        }

        let active = self.active_roles();
        if active.is_empty() {
            return Err(ScanError::Configuration(
                "at least one instrument role must be configured".into(),
            ));
        }

        let mut addresses = HashSet::new();
        for role in active {
            let inst = self.instrument(role).ok_or_else(|| {
                ScanError::Configuration(format!("module {role} has no configuration record"))
            })?;
            if inst.address == 0 || inst.address > GPIB_ADDRESS_MAX {
                return Err(ScanError::Configuration(format!(
                    "address {} for {role} is outside the GPIB range 1..={GPIB_ADDRESS_MAX}",
                    inst.address
                )));
            }
            if !addresses.insert(inst.address) {
                return Err(ScanError::Configuration(format!(
                    "duplicate bus address {} ({role})",
                    inst.address
                )));
            }
            // Surfaces unknown profile names before anything is sent.
            inst.setup_commands(self.compl)?;
        }

        Ok(())
    }
}
