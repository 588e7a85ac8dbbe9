//! The immutable configuration of a mitigation sweep.
//!
//! Every field has a default matching the reference analysis, so a JSON file only needs to name
//! the values it overrides:
//!
//! ```json
//! {
//!     "population_total": 1000000.0,
//!     "mitigation_fractions_general": [0.0, 0.25, 0.5],
//!     "output_directory": "charts"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::integrator::{Compartments, SirParameters, SolverOptions};
use crate::scenario::BatchSpec;

/// File format of the rendered charts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Svg,
}

impl ImageFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub population_total: f64,
    pub initial_infected: f64,
    pub initial_recovered: f64,
    /// Contact rate before any mitigation is applied.
    pub baseline_contact_rate: f64,
    /// Shared by both batches.
    pub recovery_rate: f64,
    pub death_rate_general: f64,
    pub death_rate_at_risk: f64,
    pub mitigation_fractions_general: Vec<f64>,
    pub mitigation_fractions_at_risk: Vec<f64>,
    pub time_horizon_days: f64,
    pub sample_count: usize,
    pub output_directory: PathBuf,
    pub batch_label_general: String,
    pub batch_label_at_risk: String,
    /// Chart files are named `<file_prefix>_<index>.<ext>`.
    pub file_prefix: String,
    pub image_format: ImageFormat,
    pub image_width: u32,
    pub image_height: u32,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Attempted solver steps allowed between two consecutive samples.
    pub solver_max_steps: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            population_total: 1.25e7,
            initial_infected: 100.0,
            initial_recovered: 0.0,
            baseline_contact_rate: 0.25,
            recovery_rate: 1.0 / 12.0,
            death_rate_general: 0.034,
            death_rate_at_risk: 0.2,
            mitigation_fractions_general: vec![0.0, 0.2, 0.3, 0.4, 0.5, 0.6],
            mitigation_fractions_at_risk: vec![0.0, 0.05, 0.4, 0.5, 0.6, 0.7],
            time_horizon_days: 800.0,
            sample_count: 800,
            output_directory: PathBuf::from("SIR_graphs"),
            batch_label_general: "General population SIR model for COVID-19".to_string(),
            batch_label_at_risk: "At-Risk population SIR model for COVID-19".to_string(),
            file_prefix: "reg_pop".to_string(),
            image_format: ImageFormat::Png,
            image_width: 640,
            image_height: 480,
            relative_tolerance: 1e-6,
            absolute_tolerance: 1e-6,
            solver_max_steps: 100_000,
        }
    }
}

impl SweepConfig {
    /// Reads a configuration from a JSON file. Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::IoError` if the file cannot be read and `SweepError::JsonError` if
    /// it is not a valid configuration.
    pub fn from_json_file(path: &Path) -> Result<Self, SweepError> {
        trace!("loading sweep configuration from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Checks the values every scenario depends on. Per-batch and per-scenario values (death
    /// rates, mitigation fractions, the resulting contact rates) are checked when each scenario
    /// runs so that one bad value only costs that scenario.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::InvalidParameters` describing the first problem found.
    pub fn validate(&self) -> Result<(), SweepError> {
        let invalid = |message: String| Err(SweepError::InvalidParameters(message));

        if !(self.population_total.is_finite() && self.population_total > 0.0) {
            return invalid(format!(
                "population_total must be positive, got {}",
                self.population_total
            ));
        }
        for (name, value) in [
            ("initial_infected", self.initial_infected),
            ("initial_recovered", self.initial_recovered),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        if self.initial_infected + self.initial_recovered > self.population_total {
            return invalid(format!(
                "initial_infected + initial_recovered ({}) exceeds population_total ({})",
                self.initial_infected + self.initial_recovered,
                self.population_total
            ));
        }
        if !(self.recovery_rate.is_finite() && self.recovery_rate > 0.0) {
            return invalid(format!(
                "recovery_rate must be positive, got {}",
                self.recovery_rate
            ));
        }
        if !(self.time_horizon_days.is_finite() && self.time_horizon_days > 0.0) {
            return invalid(format!(
                "time_horizon_days must be positive, got {}",
                self.time_horizon_days
            ));
        }
        if self.sample_count < 2 {
            return invalid(format!(
                "sample_count must be at least 2, got {}",
                self.sample_count
            ));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return invalid(format!(
                "image size must be non-zero, got {}x{}",
                self.image_width, self.image_height
            ));
        }
        for (name, value) in [
            ("relative_tolerance", self.relative_tolerance),
            ("absolute_tolerance", self.absolute_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if self.solver_max_steps == 0 {
            return invalid("solver_max_steps must be positive".to_string());
        }
        Ok(())
    }

    /// The compartments every scenario starts from.
    #[must_use]
    pub fn initial_compartments(&self) -> Compartments {
        Compartments::seeded(
            self.population_total,
            self.initial_infected,
            self.initial_recovered,
        )
    }

    /// The integrator parameters for a scenario with the given contact rate.
    #[must_use]
    pub fn sir_parameters(&self, contact_rate: f64) -> SirParameters {
        SirParameters {
            population: self.population_total,
            contact_rate,
            recovery_rate: self.recovery_rate,
        }
    }

    #[must_use]
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            relative_tolerance: self.relative_tolerance,
            absolute_tolerance: self.absolute_tolerance,
            max_steps: self.solver_max_steps,
        }
    }

    /// The general population batch followed by the at-risk batch. Scenario indices run on from
    /// one batch into the next so chart names never collide.
    #[must_use]
    pub fn batches(&self) -> Vec<BatchSpec> {
        let general = BatchSpec {
            label: self.batch_label_general.clone(),
            death_rate: self.death_rate_general,
            mitigation_fractions: self.mitigation_fractions_general.clone(),
            index_offset: 0,
        };
        let at_risk = BatchSpec {
            label: self.batch_label_at_risk.clone(),
            death_rate: self.death_rate_at_risk,
            mitigation_fractions: self.mitigation_fractions_at_risk.clone(),
            index_offset: self.mitigation_fractions_general.len(),
        };
        vec![general, at_risk]
    }
}
