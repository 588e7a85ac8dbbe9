pub use crate::config::{ImageFormat, SweepConfig};
pub use crate::error::SweepError;
pub use crate::integrator::{integrate, Compartments, SirParameters, SolverOptions};
pub use crate::log::{debug, error, info, trace, warn};
pub use crate::render::{ChartRenderer, Renderer};
pub use crate::scenario::{ScenarioResult, ScenarioRunner, SweepReport};
