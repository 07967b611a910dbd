//! IV scan engine.
//!
//! Drives the configured instruments through the ramp procedure: step the
//! bias voltage through the stage plan, let it settle, average a block of
//! current readings per stage, and hold for a sustained stability test at
//! the designated test voltage. The bias is sourced by the `vsource` role
//! when it is active; otherwise the picoammeter's internal source drives it
//! (the single-instrument setup the hardware supports).

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::config::{Role, ScanConfig};
use crate::error::{AppResult, ScanError};
use crate::instrument::{Device, ScpiTransport};
use crate::measurement::{Reading, Sample, SamplePhase, ScanOutcome, StageRecord};
use crate::stats;

/// Tolerance when matching a ramp stage against `Vtest`.
const V_TEST_TOLERANCE: f64 = 1e-6;

/// Configured scan procedure bound to a bus transport.
pub struct IvScanner {
    config: ScanConfig,
    ammeter: Option<Device>,
    vsource: Option<Device>,
}

impl IvScanner {
    /// Validate the configuration and build one device per active role.
    pub fn from_config(config: ScanConfig, transport: Arc<dyn ScpiTransport>) -> AppResult<Self> {
        config.validate()?;
        let mut ammeter = None;
        let mut vsource = None;
        for role in config.active_roles() {
            let record = config.instrument(role).ok_or_else(|| {
                ScanError::Configuration(format!("module {role} has no configuration record"))
            })?;
            let device = Device::from_config(role, record, config.compl, transport.clone())?;
            match role {
                Role::Ammeter => ammeter = Some(device),
                Role::Vsource => vsource = Some(device),
            }
        }
        Ok(Self {
            config,
            ammeter,
            vsource,
        })
    }

    /// The configuration this scanner runs.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn active_devices(&self) -> impl Iterator<Item = &Device> {
        self.ammeter.iter().chain(self.vsource.iter())
    }

    /// Device whose source drives the bias.
    fn source_device(&self) -> Option<&Device> {
        self.vsource.as_ref().or(self.ammeter.as_ref())
    }

    /// Identify and initialise every active device.
    pub async fn configure(&self) -> AppResult<()> {
        for device in self.active_devices() {
            let idn = device.identify().await?;
            info!(role = %device.role(), address = device.address(), idn, "instrument identified");
            device.initialise().await?;
        }
        Ok(())
    }

    /// Materialized stage plan: the configured ramp, the negated replay when
    /// `bothPolarities` is set, and the walk back to the first stage when
    /// `rampDown` is set.
    pub fn stages(&self) -> Vec<f64> {
        let mut stages = self.config.ramp.stages();
        if self.config.both_polarities {
            let negated: Vec<f64> = stages.iter().map(|v| -v).collect();
            stages.extend(negated);
        }
        if self.config.ramp_down {
            let down: Vec<f64> = stages.iter().rev().skip(1).copied().collect();
            stages.extend(down);
        }
        stages
    }

    /// Run the full ramp procedure.
    ///
    /// The closing sequences always run, even when a stage fails; the first
    /// stage error wins over any shutdown error.
    pub async fn scan(&self) -> AppResult<ScanOutcome> {
        let stages = self.stages();
        let mut outcome = ScanOutcome::default();

        for device in self.active_devices() {
            device.activate().await?;
        }

        let run = self.run_stages(&stages, &mut outcome).await;
        let shutdown = self.finish().await;
        run?;
        shutdown?;
        Ok(outcome)
    }

    async fn run_stages(&self, stages: &[f64], outcome: &mut ScanOutcome) -> AppResult<()> {
        let total = stages.len();
        for (index, &stage_v) in stages.iter().enumerate() {
            info!("ramping: currently at {stage_v} V");
            if let Some(source) = self.source_device() {
                source.set_voltage(stage_v).await?;
            }

            let at_test = (stage_v.abs() - self.config.v_test).abs() < V_TEST_TOLERANCE;
            let readings = if at_test {
                self.stability_test(stage_v, outcome).await?
            } else {
                self.settled_block(stage_v, outcome).await?
            };

            if !readings.is_empty() {
                let currents: Vec<f64> = readings.iter().map(|r| r.current_a).collect();
                let mean_a = stats::mean(&currents);
                let stdev_a = stats::stdev(&currents, mean_a);
                info!(
                    "measurement {}/{total}: {stage_v} V, current = {mean_a:.3e} +- {stdev_a:.3e} A",
                    index + 1
                );
                outcome.stages.push(StageRecord {
                    taken_at: Utc::now(),
                    voltage_v: stage_v,
                    samples: currents.len(),
                    mean_a,
                    stdev_a,
                });
            }
        }
        Ok(())
    }

    /// Settle, then take the per-stage repetition block.
    async fn settled_block(
        &self,
        stage_v: f64,
        outcome: &mut ScanOutcome,
    ) -> AppResult<Vec<Reading>> {
        sleep(self.config.settling_wait()).await;
        let Some(ammeter) = &self.ammeter else {
            return Ok(Vec::new());
        };
        let mut readings = Vec::with_capacity(self.config.num_repetitions);
        for _ in 0..self.config.num_repetitions {
            let reading = ammeter.read_current().await?;
            outcome
                .samples
                .push(Sample::from_reading(reading, stage_v, SamplePhase::Ramp));
            readings.push(reading);
        }
        Ok(readings)
    }

    /// Sustained hold at the test voltage: the settled repetition block
    /// first, then continuous sampling until the hold duration elapses.
    async fn stability_test(
        &self,
        stage_v: f64,
        outcome: &mut ScanOutcome,
    ) -> AppResult<Vec<Reading>> {
        info!("stability test ongoing, please wait");
        let hold_start = Instant::now();
        let readings = self.settled_block(stage_v, outcome).await?;

        match &self.ammeter {
            Some(ammeter) => {
                while hold_start.elapsed() < self.config.hold_duration() {
                    let reading = ammeter.read_current().await?;
                    outcome
                        .samples
                        .push(Sample::from_reading(reading, stage_v, SamplePhase::Stable));
                }
            }
            None => {
                if let Some(remaining) =
                    self.config.hold_duration().checked_sub(hold_start.elapsed())
                {
                    sleep(remaining).await;
                }
            }
        }
        info!("stability test finished");
        Ok(readings)
    }

    /// Fixed-voltage soak acquisition: set the bias, stream `samples`
    /// readings, return the bias to zero.
    pub async fn soak(&self, volts: f64, samples: usize) -> AppResult<ScanOutcome> {
        let Some(ammeter) = &self.ammeter else {
            return Err(ScanError::Configuration(
                "soak requires the ammeter module".into(),
            ));
        };
        for device in self.active_devices() {
            device.activate().await?;
        }

        let mut outcome = ScanOutcome::default();
        let run: AppResult<()> = async {
            if let Some(source) = self.source_device() {
                source.set_voltage(volts).await?;
            }
            sleep(self.config.settling_wait()).await;
            for _ in 0..samples {
                let reading = ammeter.read_current().await?;
                outcome
                    .samples
                    .push(Sample::from_reading(reading, volts, SamplePhase::Soak));
            }
            Ok(())
        }
        .await;

        let shutdown = self.finish().await;
        run?;
        shutdown?;
        Ok(outcome)
    }

    /// Return the bias to zero, disable the output and run every closing
    /// sequence, collecting all failures.
    async fn finish(&self) -> AppResult<()> {
        let mut errors = Vec::new();
        if let Some(source) = self.source_device() {
            if let Err(e) = source.set_voltage(0.0).await {
                errors.push(e);
            }
        }
        if let Some(vsource) = &self.vsource {
            if let Err(e) = vsource.disable_output().await {
                errors.push(e);
            }
        }
        for device in self.active_devices() {
            if let Err(e) = device.shutdown().await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScanError::ShutdownFailed(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstrumentConfig, RampSpec};
    use crate::instrument::mock::{MockBus, AMMETER_IDN, VSOURCE_IDN};

    fn test_config() -> ScanConfig {
        ScanConfig {
            ammeter: Some(InstrumentConfig {
                address: 22,
                config_commands: vec!["SYST:ZCH OFF".into()],
                operation_commands: vec![String::new()],
                closing_commands: vec![String::new()],
                pre_configuration: vec![],
                expect_idn: vec![],
                extra: None,
            }),
            vsource: Some(InstrumentConfig {
                address: 24,
                config_commands: vec![],
                operation_commands: vec![":OUTP ON".into()],
                closing_commands: vec![],
                pre_configuration: vec!["sourcemeter_hv".into()],
                expect_idn: vec![],
                extra: None,
            }),
            ramp: RampSpec::Stages(vec![0.0, 100.0, 200.0]),
            both_polarities: false,
            ramp_down: false,
            v_test: 200.0,
            num_repetitions: 3,
            stable_time_s: 0,
            time_at_test_s: 0,
            compl: Some(2e-6),
            modules: None,
        }
    }

    fn bus() -> Arc<MockBus> {
        Arc::new(
            MockBus::new()
                .with_device(22, AMMETER_IDN)
                .with_device(24, VSOURCE_IDN),
        )
    }

    #[test]
    fn stage_plan_single_polarity() {
        let scanner = IvScanner::from_config(test_config(), bus()).unwrap();
        assert_eq!(scanner.stages(), vec![0.0, 100.0, 200.0]);
    }

    #[test]
    fn stage_plan_both_polarities() {
        let mut config = test_config();
        config.both_polarities = true;
        let scanner = IvScanner::from_config(config, bus()).unwrap();
        assert_eq!(scanner.stages(), vec![0.0, 100.0, 200.0, -0.0, -100.0, -200.0]);
    }

    #[test]
    fn stage_plan_ramp_down_walks_back() {
        let mut config = test_config();
        config.ramp_down = true;
        let scanner = IvScanner::from_config(config, bus()).unwrap();
        assert_eq!(scanner.stages(), vec![0.0, 100.0, 200.0, 100.0, 0.0]);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = test_config();
        config.num_repetitions = 0;
        assert!(IvScanner::from_config(config, bus()).is_err());
    }

    #[tokio::test]
    async fn vsource_sources_the_bias_when_active() {
        let bus = bus();
        let scanner = IvScanner::from_config(test_config(), bus.clone()).unwrap();
        scanner.scan().await.unwrap();
        let vsource_cmds = bus.sent_to(24).await;
        assert!(vsource_cmds.contains(&":SOUR:VOLT:LEV 100".to_string()));
        let ammeter_cmds = bus.sent_to(22).await;
        assert!(!ammeter_cmds.iter().any(|c| c.starts_with(":SOUR:VOLT:LEV")));
    }

    #[tokio::test]
    async fn ammeter_sources_the_bias_without_vsource() {
        let mut config = test_config();
        config.modules = Some(vec![Role::Ammeter]);
        let bus = bus();
        let scanner = IvScanner::from_config(config, bus.clone()).unwrap();
        scanner.scan().await.unwrap();
        let ammeter_cmds = bus.sent_to(22).await;
        assert!(ammeter_cmds.contains(&":SOUR:VOLT:LEV 200".to_string()));
        assert!(bus.sent_to(24).await.is_empty());
    }
}
