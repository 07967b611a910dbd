//! Measurement record types shared by the scan engine and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One current reading as returned by the picoammeter.
///
/// The reading carries the instrument's own elapsed-time stamp next to the
/// host wall-clock time; both are kept because the instrument clock is the
/// one aligned with its integration windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Host wall-clock time of the query.
    pub taken_at: DateTime<Utc>,
    /// Instrument elapsed time, in seconds.
    pub device_time_s: f64,
    /// Measured current in amperes.
    pub current_a: f64,
}

/// Which part of the procedure a raw sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePhase {
    /// Settled repetition block taken at a ramp stage.
    Ramp,
    /// Sustained hold at the test voltage.
    Stable,
    /// Fixed-voltage soak acquisition.
    Soak,
}

/// One raw current sample with its context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Host wall-clock time of the query.
    pub taken_at: DateTime<Utc>,
    /// Bias voltage applied when the sample was taken.
    pub voltage_v: f64,
    /// Measured current in amperes.
    pub current_a: f64,
    /// Instrument elapsed time, in seconds.
    pub device_time_s: f64,
    /// Procedure phase.
    pub phase: SamplePhase,
}

impl Sample {
    /// Attach stage context to a raw reading.
    pub fn from_reading(reading: Reading, voltage_v: f64, phase: SamplePhase) -> Self {
        Self {
            taken_at: reading.taken_at,
            voltage_v,
            current_a: reading.current_a,
            device_time_s: reading.device_time_s,
            phase,
        }
    }
}

/// Per-stage current statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Completion time of the stage.
    pub taken_at: DateTime<Utc>,
    /// Bias voltage of the stage.
    pub voltage_v: f64,
    /// Number of readings averaged.
    pub samples: usize,
    /// Mean current in amperes.
    pub mean_a: f64,
    /// Population standard deviation in amperes.
    pub stdev_a: f64,
}

/// Everything a scan run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Per-stage summaries, in execution order.
    pub stages: Vec<StageRecord>,
    /// Raw samples across every phase.
    pub samples: Vec<Sample>,
}

impl ScanOutcome {
    /// Number of raw samples recorded in a given phase.
    pub fn samples_in_phase(&self, phase: SamplePhase) -> usize {
        self.samples.iter().filter(|s| s.phase == phase).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_inherits_reading_fields() {
        let reading = Reading {
            taken_at: Utc::now(),
            device_time_s: 12.5,
            current_a: 3.2e-12,
        };
        let sample = Sample::from_reading(reading, 400.0, SamplePhase::Ramp);
        assert_eq!(sample.current_a, reading.current_a);
        assert_eq!(sample.device_time_s, reading.device_time_s);
        assert_eq!(sample.voltage_v, 400.0);
    }

    #[test]
    fn phase_counting() {
        let reading = Reading {
            taken_at: Utc::now(),
            device_time_s: 0.0,
            current_a: 0.0,
        };
        let outcome = ScanOutcome {
            stages: vec![],
            samples: vec![
                Sample::from_reading(reading, 0.0, SamplePhase::Ramp),
                Sample::from_reading(reading, 0.0, SamplePhase::Stable),
                Sample::from_reading(reading, 0.0, SamplePhase::Stable),
            ],
        };
        assert_eq!(outcome.samples_in_phase(SamplePhase::Ramp), 1);
        assert_eq!(outcome.samples_in_phase(SamplePhase::Stable), 2);
        assert_eq!(outcome.samples_in_phase(SamplePhase::Soak), 0);
    }
}
