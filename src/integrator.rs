//! Numerical integration of the SIR model.
//!
//! The model partitions a population of size `N` into susceptible, infected and recovered
//! compartments that evolve as
//!
//! ```text
//! dS/dt = -(β · S · I) / N
//! dI/dt =  (β · S · I) / N − γ · I
//! dR/dt =  γ · I
//! ```
//!
//! where `β` is the contact rate and `γ` the recovery rate. [`integrate`] solves this
//! initial-value problem with an adaptive Dormand-Prince 5(4) Runge-Kutta scheme and samples the
//! solution at each requested time point. Death is not modeled here; see
//! [`crate::scenario::derive_dead`].

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::numeric::{relative_eq, POPULATION_ACC};

/// A system of ordinary differential equations with `N` state variables.
pub trait OdeSystem<const N: usize> {
    /// Returns `dy/dt` at time `t` and state `y`.
    fn derivative(&self, t: f64, y: &[f64; N]) -> [f64; N];
}

/// The scalar rates of one SIR run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SirParameters {
    /// Total population `N`.
    pub population: f64,
    /// Contact rate `β`.
    pub contact_rate: f64,
    /// Recovery rate `γ`, the inverse of the mean infectious duration.
    pub recovery_rate: f64,
}

impl SirParameters {
    /// The basic reproduction number `β/γ`.
    #[must_use]
    pub fn basic_reproduction_number(&self) -> f64 {
        self.contact_rate / self.recovery_rate
    }

    /// Checks that the rates and the initial compartments describe a physical population.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::InvalidParameters` naming the first inconsistency found.
    pub fn validate(&self, initial: &Compartments) -> Result<(), SweepError> {
        if !(self.population.is_finite() && self.population > 0.0) {
            return Err(SweepError::InvalidParameters(format!(
                "population must be positive, got {}",
                self.population
            )));
        }
        if !(self.contact_rate.is_finite() && self.contact_rate >= 0.0) {
            return Err(SweepError::InvalidParameters(format!(
                "contact rate must be non-negative, got {}",
                self.contact_rate
            )));
        }
        if !(self.recovery_rate.is_finite() && self.recovery_rate > 0.0) {
            return Err(SweepError::InvalidParameters(format!(
                "recovery rate must be positive, got {}",
                self.recovery_rate
            )));
        }
        for (name, value) in initial.named() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SweepError::InvalidParameters(format!(
                    "initial {name} count must be non-negative, got {value}"
                )));
            }
        }
        if !relative_eq(initial.total(), self.population, POPULATION_ACC) {
            return Err(SweepError::InvalidParameters(format!(
                "initial compartments sum to {} but the population is {}",
                initial.total(),
                self.population
            )));
        }
        Ok(())
    }
}

/// Sizes of the three compartments at a single instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Compartments {
    pub susceptible: f64,
    pub infected: f64,
    pub recovered: f64,
}

impl Compartments {
    /// Everyone not initially infected or recovered is susceptible.
    #[must_use]
    pub fn seeded(population: f64, infected: f64, recovered: f64) -> Self {
        Compartments {
            susceptible: population - infected - recovered,
            infected,
            recovered,
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.susceptible + self.infected + self.recovered
    }

    fn named(&self) -> [(&'static str, f64); 3] {
        [
            ("susceptible", self.susceptible),
            ("infected", self.infected),
            ("recovered", self.recovered),
        ]
    }

    fn to_array(self) -> [f64; 3] {
        [self.susceptible, self.infected, self.recovered]
    }
}

impl OdeSystem<3> for SirParameters {
    #[allow(clippy::many_single_char_names)]
    fn derivative(&self, _t: f64, y: &[f64; 3]) -> [f64; 3] {
        let [s, i, _r] = *y;
        let infection = self.contact_rate * s * i / self.population;
        let recovery = self.recovery_rate * i;
        [-infection, infection - recovery, recovery]
    }
}

/// Error control and step budget for the adaptive solver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverOptions {
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Upper bound on attempted steps between two consecutive samples.
    pub max_steps: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            relative_tolerance: 1e-6,
            absolute_tolerance: 1e-6,
            max_steps: 100_000,
        }
    }
}

/// Step counters reported by the solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub evaluations: usize,
}

/// Compartment trajectories sampled on the requested time grid.
#[derive(Clone, Debug, PartialEq)]
pub struct SirSolution {
    pub susceptible: Vec<f64>,
    pub infected: Vec<f64>,
    pub recovered: Vec<f64>,
    pub stats: SolverStats,
}

impl SirSolution {
    #[must_use]
    pub fn len(&self) -> usize {
        self.susceptible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.susceptible.is_empty()
    }

    fn push(&mut self, y: &[f64; 3]) {
        self.susceptible.push(y[0]);
        self.infected.push(y[1]);
        self.recovered.push(y[2]);
    }
}

/// Solves the SIR initial-value problem and samples the solution at every point of `time`.
///
/// `time[0]` is the reference start and the initial compartments are reported there verbatim.
///
/// # Errors
///
/// - `SweepError::InvalidParameters` if the parameters, the initial compartments or the time
///   grid are inconsistent.
/// - `SweepError::NumericalFailure` if the solver produces non-finite values, its step size
///   underflows, or it needs more than `options.max_steps` attempts to reach the next sample.
pub fn integrate(
    initial: &Compartments,
    time: &[f64],
    parameters: &SirParameters,
    options: &SolverOptions,
) -> Result<SirSolution, SweepError> {
    parameters.validate(initial)?;
    validate_time_grid(time)?;
    validate_options(options)?;

    let mut solution = SirSolution {
        susceptible: Vec::with_capacity(time.len()),
        infected: Vec::with_capacity(time.len()),
        recovered: Vec::with_capacity(time.len()),
        stats: SolverStats::default(),
    };

    let mut solver = DormandPrince::new(parameters, *options, time[0], initial.to_array());
    solution.push(&solver.y);
    for &t_next in &time[1..] {
        solver
            .advance_to(t_next)
            .map_err(|(t, reason)| SweepError::NumericalFailure {
                parameters: *parameters,
                time: t,
                reason,
            })?;
        solution.push(&solver.y);
    }
    solution.stats = solver.stats;
    debug!(
        "integrated β={} γ={} over {} samples: {} accepted, {} rejected steps, {} evaluations",
        parameters.contact_rate,
        parameters.recovery_rate,
        time.len(),
        solution.stats.accepted_steps,
        solution.stats.rejected_steps,
        solution.stats.evaluations
    );
    Ok(solution)
}

fn validate_time_grid(time: &[f64]) -> Result<(), SweepError> {
    if time.is_empty() {
        return Err(SweepError::InvalidParameters(
            "time grid must contain at least one sample".to_string(),
        ));
    }
    if let Some(bad) = time.iter().find(|t| !t.is_finite()) {
        return Err(SweepError::InvalidParameters(format!(
            "time grid contains a non-finite sample {bad}"
        )));
    }
    if let Some(pair) = time.windows(2).find(|pair| pair[1] <= pair[0]) {
        return Err(SweepError::InvalidParameters(format!(
            "time grid must be strictly increasing, found {} followed by {}",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

fn validate_options(options: &SolverOptions) -> Result<(), SweepError> {
    let tolerances = [options.relative_tolerance, options.absolute_tolerance];
    if tolerances.iter().any(|tol| !(tol.is_finite() && *tol > 0.0)) {
        return Err(SweepError::InvalidParameters(format!(
            "solver tolerances must be positive, got rtol={} atol={}",
            options.relative_tolerance, options.absolute_tolerance
        )));
    }
    if options.max_steps == 0 {
        return Err(SweepError::InvalidParameters(
            "solver step budget must be positive".to_string(),
        ));
    }
    Ok(())
}

// Dormand-Prince 5(4) tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
/// Fifth order weights; identical to the last row of `A` so the final stage is reused.
const B: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
/// Embedded fourth order weights.
const B_STAR: [f64; 7] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339_200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

type StepFailure = (f64, String);

/// An adaptive explicit Runge-Kutta integrator that tracks a single state forward in time.
struct DormandPrince<'a, S: OdeSystem<N>, const N: usize> {
    system: &'a S,
    options: SolverOptions,
    t: f64,
    y: [f64; N],
    /// Derivative at `(t, y)`, carried between steps (first same as last).
    dydt: [f64; N],
    /// Proposed size of the next step, independent of where the next sample falls.
    h: Option<f64>,
    stats: SolverStats,
}

impl<'a, S: OdeSystem<N>, const N: usize> DormandPrince<'a, S, N> {
    fn new(system: &'a S, options: SolverOptions, t0: f64, y0: [f64; N]) -> Self {
        let dydt = system.derivative(t0, &y0);
        DormandPrince {
            system,
            options,
            t: t0,
            y: y0,
            dydt,
            h: None,
            stats: SolverStats {
                evaluations: 1,
                ..SolverStats::default()
            },
        }
    }

    /// Takes as many adaptive steps as needed to land exactly on `t_end`.
    fn advance_to(&mut self, t_end: f64) -> Result<(), StepFailure> {
        let mut h = match self.h {
            Some(h) => h,
            None => self.initial_step(t_end - self.t),
        };

        let attempted = |stats: &SolverStats| stats.accepted_steps + stats.rejected_steps;
        let start = attempted(&self.stats);
        while self.t < t_end {
            if attempted(&self.stats) - start >= self.options.max_steps {
                return Err((
                    self.t,
                    format!(
                        "exceeded the budget of {} steps before t={t_end}",
                        self.options.max_steps
                    ),
                ));
            }
            let min_step = 16.0 * f64::EPSILON * self.t.abs().max(1.0);
            if h < min_step {
                return Err((self.t, format!("step size {h:e} underflowed")));
            }

            let remaining = t_end - self.t;
            let lands = h >= remaining;
            let step = if lands { remaining } else { h };

            let (y_new, dydt_new, error) = self.trial_step(step);
            if error.is_finite() && error <= 1.0 && y_new.iter().all(|v| v.is_finite()) {
                self.t = if lands { t_end } else { self.t + step };
                self.y = y_new;
                self.dydt = dydt_new;
                self.stats.accepted_steps += 1;
                let factor = if error == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * error.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                };
                // A step shortened to hit a sample should not shrink the next proposal.
                h = if lands { h.max(step * factor) } else { step * factor };
            } else {
                self.stats.rejected_steps += 1;
                let factor = if error.is_finite() {
                    (SAFETY * error.powf(-0.2)).clamp(MIN_FACTOR, 1.0)
                } else {
                    MIN_FACTOR
                };
                trace!("rejected step of {step:e} at t={} (error {error:e})", self.t);
                h = step * factor;
            }
        }
        self.h = Some(h);
        Ok(())
    }

    /// Computes a candidate step of size `h` from the current state. Returns the fifth order
    /// solution, its derivative and the scaled RMS norm of the local error estimate.
    fn trial_step(&mut self, h: f64) -> ([f64; N], [f64; N], f64) {
        let mut k = [[0.0; N]; 7];
        k[0] = self.dydt;
        for stage in 1..7 {
            let mut y_stage = self.y;
            for (j, k_j) in k.iter().enumerate().take(stage) {
                let a = A[stage][j];
                if a != 0.0 {
                    for (value, slope) in y_stage.iter_mut().zip(k_j) {
                        *value += h * a * slope;
                    }
                }
            }
            k[stage] = self.system.derivative(self.t + C[stage] * h, &y_stage);
            self.stats.evaluations += 1;
        }

        // The seventh stage is evaluated at the fifth order solution itself.
        let mut y_new = self.y;
        for (j, k_j) in k.iter().enumerate().take(6) {
            for (value, slope) in y_new.iter_mut().zip(k_j) {
                *value += h * B[j] * slope;
            }
        }

        let mut sum = 0.0;
        for i in 0..N {
            let estimate: f64 = (0..7).map(|j| (B[j] - B_STAR[j]) * k[j][i]).sum::<f64>() * h;
            let scale = self.options.absolute_tolerance
                + self.options.relative_tolerance * self.y[i].abs().max(y_new[i].abs());
            sum += (estimate / scale).powi(2);
        }
        #[allow(clippy::cast_precision_loss)]
        let error = (sum / N as f64).sqrt();
        (y_new, k[6], error)
    }

    /// Starting step size heuristic from Hairer, Nørsett & Wanner, capped by the first interval.
    fn initial_step(&mut self, span: f64) -> f64 {
        let options = self.options;
        let scale =
            |y: &[f64; N], i: usize| options.absolute_tolerance + options.relative_tolerance * y[i].abs();
        #[allow(clippy::cast_precision_loss)]
        let rms = |values: [f64; N]| (values.iter().map(|v| v * v).sum::<f64>() / N as f64).sqrt();

        let d0 = rms(std::array::from_fn(|i| self.y[i] / scale(&self.y, i)));
        let d1 = rms(std::array::from_fn(|i| self.dydt[i] / scale(&self.y, i)));
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        let h0 = h0.min(span);

        let y1: [f64; N] = std::array::from_fn(|i| self.y[i] + h0 * self.dydt[i]);
        let f1 = self.system.derivative(self.t + h0, &y1);
        self.stats.evaluations += 1;
        let d2 = rms(std::array::from_fn(|i| {
            (f1[i] - self.dydt[i]) / scale(&self.y, i)
        })) / h0;

        let h1 = if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(0.2)
        };
        (100.0 * h0).min(h1).min(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use approx::assert_relative_eq;

    const N: f64 = 1.25e7;

    fn linspace(end: f64, samples: usize) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        (0..samples)
            .map(|i| end * i as f64 / (samples - 1) as f64)
            .collect()
    }

    fn reference_parameters(contact_rate: f64) -> SirParameters {
        SirParameters {
            population: N,
            contact_rate,
            recovery_rate: 1.0 / 12.0,
        }
    }

    /// Exponential decay `dy/dt = -λy` with a closed form solution.
    struct Decay(f64);

    impl OdeSystem<1> for Decay {
        fn derivative(&self, _t: f64, y: &[f64; 1]) -> [f64; 1] {
            [-self.0 * y[0]]
        }
    }

    #[test]
    fn dormand_prince_matches_closed_form_decay() {
        let system = Decay(0.3);
        let options = SolverOptions {
            relative_tolerance: 1e-9,
            absolute_tolerance: 1e-12,
            ..SolverOptions::default()
        };
        let mut solver = DormandPrince::new(&system, options, 0.0, [2.0]);
        for t in [0.5, 1.0, 5.0, 20.0] {
            solver.advance_to(t).unwrap();
            assert_eq!(solver.t, t);
            assert_relative_eq!(solver.y[0], 2.0 * (-0.3 * t).exp(), max_relative = 1e-7);
        }
    }

    #[test]
    fn initial_values_are_reported_verbatim() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(800.0, 800);
        let solution =
            integrate(&initial, &time, &reference_parameters(0.25), &SolverOptions::default())
                .unwrap();
        assert_eq!(solution.len(), time.len());
        assert_eq!(solution.susceptible[0], N - 100.0);
        assert_eq!(solution.infected[0], 100.0);
        assert_eq!(solution.recovered[0], 0.0);
    }

    #[test]
    fn population_is_conserved() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(800.0, 800);
        let solution =
            integrate(&initial, &time, &reference_parameters(0.25), &SolverOptions::default())
                .unwrap();
        for k in 0..solution.len() {
            let total = solution.susceptible[k] + solution.infected[k] + solution.recovered[k];
            assert_almost_eq!(total, N, 1e-3);
        }
    }

    #[test]
    fn susceptible_never_grows() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(800.0, 800);
        let solution =
            integrate(&initial, &time, &reference_parameters(0.25), &SolverOptions::default())
                .unwrap();
        for pair in solution.susceptible.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "{} grew to {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn zero_contact_rate_means_no_transmission() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(50.0, 51);
        let parameters = reference_parameters(0.0);
        let options = SolverOptions {
            relative_tolerance: 1e-9,
            absolute_tolerance: 1e-9,
            ..SolverOptions::default()
        };
        let solution = integrate(&initial, &time, &parameters, &options).unwrap();
        for (k, &t) in time.iter().enumerate() {
            assert_eq!(solution.susceptible[k], initial.susceptible);
            let expected = 100.0 * (-parameters.recovery_rate * t).exp();
            assert_relative_eq!(solution.infected[k], expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn epidemic_rises_to_a_single_peak_and_burns_out() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(800.0, 800);
        let solution =
            integrate(&initial, &time, &reference_parameters(0.25), &SolverOptions::default())
                .unwrap();
        let infected = &solution.infected;
        let (peak, _) = infected
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (k, &v)| if v > best.1 { (k, v) } else { best });
        assert!(peak > 0 && peak < infected.len() - 1);
        assert!(infected[1] > infected[0]);
        assert!(infected[..=peak].windows(2).all(|w| w[1] >= w[0]));
        assert!(infected[peak..].windows(2).all(|w| w[1] <= w[0]));
        assert!(infected[infected.len() - 1] < 1.0);
    }

    #[test]
    fn rejects_inconsistent_initial_compartments() {
        let initial = Compartments {
            susceptible: N,
            infected: 100.0,
            recovered: 0.0,
        };
        let result = integrate(
            &initial,
            &[0.0, 1.0],
            &reference_parameters(0.25),
            &SolverOptions::default(),
        );
        assert!(matches!(result, Err(SweepError::InvalidParameters(_))));
    }

    #[test]
    fn rejects_invalid_rates_and_population() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = [0.0, 1.0];
        let options = SolverOptions::default();
        for parameters in [
            SirParameters {
                population: 0.0,
                ..reference_parameters(0.25)
            },
            reference_parameters(-0.1),
            SirParameters {
                recovery_rate: 0.0,
                ..reference_parameters(0.25)
            },
        ] {
            let result = integrate(&initial, &time, &parameters, &options);
            assert!(
                matches!(result, Err(SweepError::InvalidParameters(_))),
                "{parameters:?} was accepted"
            );
        }
    }

    #[test]
    fn rejects_unordered_time_grid() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let result = integrate(
            &initial,
            &[0.0, 2.0, 2.0],
            &reference_parameters(0.25),
            &SolverOptions::default(),
        );
        assert!(matches!(result, Err(SweepError::InvalidParameters(_))));
    }

    #[test]
    fn exhausted_step_budget_is_a_numerical_failure() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        // A single interval spanning the whole horizon cannot be crossed in one step.
        let time = [0.0, 800.0];
        let options = SolverOptions {
            max_steps: 1,
            ..SolverOptions::default()
        };
        let result = integrate(&initial, &time, &reference_parameters(0.25), &options);
        match result {
            Err(SweepError::NumericalFailure { parameters, .. }) => {
                assert_eq!(parameters.contact_rate, 0.25);
            }
            other => panic!("expected a numerical failure, got {other:?}"),
        }
    }

    #[test]
    fn step_budget_applies_to_each_sample_interval() {
        let initial = Compartments::seeded(N, 100.0, 0.0);
        let time = linspace(800.0, 250_000);
        let solution =
            integrate(&initial, &time, &reference_parameters(0.25), &SolverOptions::default())
                .unwrap();
        assert_eq!(solution.len(), 250_000);
        assert!(solution.stats.accepted_steps >= 249_999);
        assert!(solution.stats.accepted_steps > SolverOptions::default().max_steps);
        assert!(solution.infected[249_999] < 1.0);
    }

    #[test]
    fn basic_reproduction_number_is_contact_over_recovery() {
        assert_relative_eq!(reference_parameters(0.25).basic_reproduction_number(), 3.0);
    }
}
