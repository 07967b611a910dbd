//! Named pre-configuration profiles.
//!
//! Later configuration cards replaced free-form `configCommands` tuples with
//! named `preConfiguration` references; the profiles themselves are the
//! well-known setup sequences of the supported instruments. A profile is a
//! canned command list, optionally parameterized by the configured
//! compliance current.

use crate::error::{AppResult, ScanError};

/// Compliance limit substituted when the card carries no `compl` key.
pub const DEFAULT_COMPLIANCE_A: f64 = 2e-6;

/// Names of every known profile.
pub const KNOWN: &[&str] = &[
    "picoammeter",
    "zero_check",
    "autorange",
    "sourcemeter_hv",
    "rear_outputs",
];

/// Expand a profile reference into its command sequence.
///
/// # Errors
/// Returns [`ScanError::UnknownProfile`] for names not in [`KNOWN`].
pub fn expand(name: &str, compliance: Option<f64>) -> AppResult<Vec<String>> {
    let compliance = compliance.unwrap_or(DEFAULT_COMPLIANCE_A);
    let commands: Vec<String> = match name {
        // Picoammeter baseline: zero correction off, zero check off,
        // autoranging on.
        "picoammeter" => ["SYST:ZCOR OFF", "SYST:ZCH OFF", "RANG:AUTO ON"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        // Acquire a fresh zero correction before measuring.
        "zero_check" => [
            "SYST:ZCH ON",
            "INIT",
            "SYST:ZCOR:ACQ",
            "SYST:ZCH OFF",
            "SYST:ZCOR ON",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        "autorange" => vec!["RANG:AUTO ON".to_string()],
        // Source meter as a fixed high-voltage source with current sensing
        // limited at the compliance value.
        "sourcemeter_hv" => vec![
            ":ROUT:TERM REAR".to_string(),
            ":SOUR:FUNC VOLT".to_string(),
            ":SOUR:VOLT:MODE FIX".to_string(),
            ":SOUR:VOLT:RANG 1000".to_string(),
            ":SENS:FUNC \"CURR\"".to_string(),
            format!(":SENS:CURR:PROT {compliance}"),
            ":SENS:CURR:RANG:AUTO ON".to_string(),
            ":SOUR:VOLT:LEV 0".to_string(),
        ],
        "rear_outputs" => vec![":ROUT:TERM REAR".to_string()],
        other => return Err(ScanError::UnknownProfile(other.to_string())),
    };
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_profile_expands() {
        for name in KNOWN {
            assert!(expand(name, None).is_ok(), "profile {name} failed");
        }
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = expand("warp_drive", None).unwrap_err();
        assert!(matches!(err, ScanError::UnknownProfile(_)));
    }

    #[test]
    fn compliance_is_substituted() {
        let commands = expand("sourcemeter_hv", Some(1e-5)).unwrap();
        assert!(commands.iter().any(|c| c == ":SENS:CURR:PROT 0.00001"));
    }

    #[test]
    fn default_compliance_applies_without_compl_key() {
        let commands = expand("sourcemeter_hv", None).unwrap();
        assert!(commands.iter().any(|c| c.starts_with(":SENS:CURR:PROT")));
        assert!(commands.iter().any(|c| c.contains("0.000002")));
    }
}
