//! Builds the mitigation sweep, runs every scenario and collects the outcomes.
//!
//! A sweep is made of batches. Each batch applies one death rate to a list of mitigation
//! fractions; every fraction `m` becomes a scenario whose contact rate is
//! `β_baseline × (1 − m)`. For each scenario the [`ScenarioRunner`] integrates the SIR model,
//! splits the recovered compartment into survivors and deaths with [`derive_dead`], and hands
//! the resulting [`ScenarioResult`] to a [`Renderer`].
//!
//! Scenarios are independent. A scenario that fails (bad parameters, a solver failure, an
//! unwritable chart) is recorded in the [`SweepReport`] and the sweep moves on to the next one.

use std::path::{Path, PathBuf};

use log::{error, info, trace, warn};

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::integrator::{integrate, SirParameters};
use crate::render::Renderer;

/// One group of scenarios sharing a death rate.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchSpec {
    /// Leads every chart title in the batch.
    pub label: String,
    pub death_rate: f64,
    pub mitigation_fractions: Vec<f64>,
    /// Index of the batch's first scenario.
    pub index_offset: usize,
}

impl BatchSpec {
    /// Expands the batch into scenarios against `baseline_contact_rate`.
    #[must_use]
    pub fn scenarios(&self, baseline_contact_rate: f64) -> Vec<Scenario> {
        contact_rates(baseline_contact_rate, &self.mitigation_fractions)
            .into_iter()
            .zip(&self.mitigation_fractions)
            .enumerate()
            .map(|(i, (contact_rate, &mitigation))| Scenario {
                index: self.index_offset + i,
                label: self.label.clone(),
                mitigation,
                contact_rate,
                death_rate: self.death_rate,
            })
            .collect()
    }
}

/// A single point of the sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    /// Unique across the whole sweep; names the chart.
    pub index: usize,
    pub label: String,
    pub mitigation: f64,
    pub contact_rate: f64,
    pub death_rate: f64,
}

impl Scenario {
    fn validate(&self) -> Result<(), SweepError> {
        if !(self.mitigation.is_finite() && (0.0..1.0).contains(&self.mitigation)) {
            return Err(SweepError::InvalidParameters(format!(
                "mitigation fraction must lie in [0, 1), got {}",
                self.mitigation
            )));
        }
        if !(self.death_rate.is_finite() && (0.0..=1.0).contains(&self.death_rate)) {
            return Err(SweepError::InvalidParameters(format!(
                "death rate must lie in [0, 1], got {}",
                self.death_rate
            )));
        }
        Ok(())
    }
}

/// Applies each mitigation fraction to the baseline contact rate.
#[must_use]
pub fn contact_rates(baseline: f64, mitigation_fractions: &[f64]) -> Vec<f64> {
    let rates: Vec<f64> = mitigation_fractions
        .iter()
        .map(|mitigation| baseline * (1.0 - mitigation))
        .collect();
    trace!("contact rates for mitigation {mitigation_fractions:?}: {rates:?}");
    rates
}

/// `samples` evenly spaced points from 0 to `horizon`, both ends included.
#[must_use]
pub fn time_grid(horizon: f64, samples: usize) -> Vec<f64> {
    match samples {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            #[allow(clippy::cast_precision_loss)]
            let step = horizon / (samples - 1) as f64;
            #[allow(clippy::cast_precision_loss)]
            let mut grid: Vec<f64> = (0..samples).map(|i| i as f64 * step).collect();
            grid[samples - 1] = horizon;
            grid
        }
    }
}

/// Splits the recovered trajectory into survivors and deaths: `D = R × death_rate` and the
/// survivors are `R − D`. Returns `(recovered_alive, dead)`.
#[must_use]
pub fn derive_dead(recovered: &[f64], death_rate: f64) -> (Vec<f64>, Vec<f64>) {
    recovered
        .iter()
        .map(|&r| {
            let dead = r * death_rate;
            (r - dead, dead)
        })
        .unzip()
}

/// Everything the renderer needs to chart one scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioResult<'a> {
    pub time: &'a [f64],
    pub susceptible: Vec<f64>,
    pub infected: Vec<f64>,
    /// Recovered and alive.
    pub recovered: Vec<f64>,
    pub dead: Vec<f64>,
    pub population: f64,
    pub index: usize,
    pub title: String,
    pub contact_rate: f64,
    pub recovery_rate: f64,
    pub mitigation: f64,
    pub death_rate: f64,
}

impl ScenarioResult<'_> {
    /// `β/γ` for this scenario.
    #[must_use]
    pub fn basic_reproduction_number(&self) -> f64 {
        self.contact_rate / self.recovery_rate
    }

    /// Cumulative deaths at the end of the horizon.
    #[must_use]
    pub fn final_deaths(&self) -> f64 {
        self.dead.last().copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn summary(&self) -> ScenarioSummary {
        let (peak_index, peak_infected) = self
            .infected
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, value)| {
                if value > best.1 {
                    (k, value)
                } else {
                    best
                }
            });
        ScenarioSummary {
            index: self.index,
            title: self.title.clone(),
            mitigation: self.mitigation,
            contact_rate: self.contact_rate,
            basic_reproduction_number: self.basic_reproduction_number(),
            peak_infected,
            peak_time: self.time.get(peak_index).copied().unwrap_or(0.0),
            final_deaths: self.final_deaths(),
            final_susceptible_fraction: self.susceptible.last().copied().unwrap_or(0.0)
                / self.population,
        }
    }
}

/// Headline numbers of a completed scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioSummary {
    pub index: usize,
    pub title: String,
    pub mitigation: f64,
    pub contact_rate: f64,
    pub basic_reproduction_number: f64,
    pub peak_infected: f64,
    pub peak_time: f64,
    pub final_deaths: f64,
    pub final_susceptible_fraction: f64,
}

/// A scenario that did not produce a chart, and why.
#[derive(Debug)]
pub struct ScenarioFailure {
    pub index: usize,
    pub label: String,
    pub mitigation: f64,
    pub contact_rate: f64,
    pub error: SweepError,
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    Completed {
        summary: ScenarioSummary,
        artifact: PathBuf,
    },
    Failed(ScenarioFailure),
}

/// The outcome of every scenario in sweep order.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SweepReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ScenarioOutcome::Completed { artifact, .. } => Some(artifact.as_path()),
            ScenarioOutcome::Failed(_) => None,
        })
    }

    pub fn summaries(&self) -> impl Iterator<Item = &ScenarioSummary> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ScenarioOutcome::Completed { summary, .. } => Some(summary),
            ScenarioOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioFailure> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ScenarioOutcome::Failed(failure) => Some(failure),
            ScenarioOutcome::Completed { .. } => None,
        })
    }
}

/// Runs a [`SweepConfig`] scenario by scenario.
pub struct ScenarioRunner {
    config: SweepConfig,
    time: Vec<f64>,
}

impl ScenarioRunner {
    /// Validates `config` and builds the time grid shared by every scenario.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::InvalidParameters` if the configuration cannot support any scenario.
    pub fn new(config: SweepConfig) -> Result<Self, SweepError> {
        config.validate()?;
        let time = time_grid(config.time_horizon_days, config.sample_count);
        Ok(ScenarioRunner { config, time })
    }

    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    #[must_use]
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Every scenario of every batch, in index order.
    #[must_use]
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.config
            .batches()
            .iter()
            .flat_map(|batch| batch.scenarios(self.config.baseline_contact_rate))
            .collect()
    }

    /// Integrates one scenario and derives its dead compartment.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::InvalidParameters` for an out-of-range mitigation fraction, death
    /// rate or contact rate, and `SweepError::NumericalFailure` if the solver fails.
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioResult<'_>, SweepError> {
        scenario.validate()?;
        let parameters: SirParameters = self.config.sir_parameters(scenario.contact_rate);
        let solution = integrate(
            &self.config.initial_compartments(),
            &self.time,
            &parameters,
            &self.config.solver_options(),
        )?;
        let (recovered, dead) = derive_dead(&solution.recovered, scenario.death_rate);
        Ok(ScenarioResult {
            time: &self.time,
            susceptible: solution.susceptible,
            infected: solution.infected,
            recovered,
            dead,
            population: parameters.population,
            index: scenario.index,
            title: scenario.label.clone(),
            contact_rate: scenario.contact_rate,
            recovery_rate: parameters.recovery_rate,
            mitigation: scenario.mitigation,
            death_rate: scenario.death_rate,
        })
    }

    /// Runs and renders every scenario. Failures are logged and recorded; they never stop the
    /// sweep.
    pub fn run<R: Renderer + ?Sized>(&self, renderer: &mut R) -> SweepReport {
        let mut report = SweepReport::default();
        for batch in self.config.batches() {
            info!(
                "running {} scenarios for `{}` (death rate {})",
                batch.mitigation_fractions.len(),
                batch.label,
                batch.death_rate
            );
            for scenario in batch.scenarios(self.config.baseline_contact_rate) {
                let outcome = match self.run_and_render(&scenario, renderer) {
                    Ok((summary, artifact)) => {
                        info!(
                            "scenario {:02}: mitigation {} peak infected {:.0} at day {:.0}, {:.0} deaths -> {}",
                            scenario.index,
                            scenario.mitigation,
                            summary.peak_infected,
                            summary.peak_time,
                            summary.final_deaths,
                            artifact.display()
                        );
                        ScenarioOutcome::Completed { summary, artifact }
                    }
                    Err(error) => {
                        warn!(
                            "scenario {:02} (mitigation {}, contact rate {}) failed: {error}",
                            scenario.index, scenario.mitigation, scenario.contact_rate
                        );
                        ScenarioOutcome::Failed(ScenarioFailure {
                            index: scenario.index,
                            label: scenario.label,
                            mitigation: scenario.mitigation,
                            contact_rate: scenario.contact_rate,
                            error,
                        })
                    }
                };
                report.outcomes.push(outcome);
            }
        }

        let failed = report.failures().count();
        if failed > 0 {
            error!("{failed} of {} scenarios failed", report.outcomes.len());
        }
        report
    }

    fn run_and_render<R: Renderer + ?Sized>(
        &self,
        scenario: &Scenario,
        renderer: &mut R,
    ) -> Result<(ScenarioSummary, PathBuf), SweepError> {
        let result = self.run_scenario(scenario)?;
        let artifact = renderer.render(&result)?;
        Ok((result.summary(), artifact))
    }
}
