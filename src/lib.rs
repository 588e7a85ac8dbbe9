//! Explore how mitigation changes an epidemic.
//!
//! `sir-sweep` integrates a Susceptible-Infected-Recovered model for a range of contact rates and
//! charts every trajectory. A run is made of two batches of scenarios, one for the general
//! population and one for an at-risk population, which differ only in the fraction of recovered
//! people who are counted as dead. Within a batch each scenario reduces the baseline contact rate
//! by a mitigation fraction, so the charts show how much stronger mitigation flattens the curve.
//!
//! The crate is organised as a small pipeline:
//! * [`config`] holds the immutable [`SweepConfig`](config::SweepConfig) for a run, loadable from
//!   JSON.
//! * [`integrator`] solves the SIR equations with an adaptive Runge-Kutta scheme.
//! * [`scenario`] builds the sweep, derives the dead compartment and isolates failures so that
//!   one bad scenario does not cost the others.
//! * [`render`] writes one chart per scenario.
//! * [`runner`] wires the pieces to the command line.
//!
//! ```no_run
//! use sir_sweep::prelude::*;
//!
//! let config = SweepConfig::default();
//! let mut renderer = ChartRenderer::from_config(&config);
//! let runner = ScenarioRunner::new(config).unwrap();
//! let report = runner.run(&mut renderer);
//! assert!(report.is_success());
//! ```
pub mod config;
pub mod error;
pub mod integrator;
pub mod log;
pub mod numeric;
pub mod prelude;
pub mod render;
pub mod runner;
pub mod scenario;

pub use error::SweepError;
