//! Charts a scenario's trajectories and writes them to disk.
//!
//! [`ChartRenderer`] draws the four compartments as fractions of the population on a fixed
//! `[0, 1.2]` axis so charts from different scenarios can be compared side by side. Each chart is
//! written to `<output_dir>/<prefix>_<index:02>.<png|svg>`; running the sweep again overwrites the
//! previous run's charts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};

use crate::config::{ImageFormat, SweepConfig};
use crate::error::SweepError;
use crate::scenario::ScenarioResult;

/// Upper bound of the y axis, in population fractions.
pub const Y_AXIS_MAX: f64 = 1.2;

const FONT_FAMILY: &str = "sans-serif";
static DEJAVU_SANS: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const PLOT_BACKGROUND: RGBColor = RGBColor(0xdd, 0xdd, 0xdd);
const DEAD_COLOR: RGBColor = RGBColor(0x00, 0x00, 0x00);

/// Consumes one scenario result at a time and persists it.
pub trait Renderer {
    /// Writes a chart for `result` and returns where it went.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::OutputWriteFailure` if the chart cannot be written.
    fn render(&mut self, result: &ScenarioResult<'_>) -> Result<PathBuf, SweepError>;
}

/// Renders charts with `plotters`.
#[derive(Clone, Debug)]
pub struct ChartRenderer {
    output_directory: PathBuf,
    file_prefix: String,
    format: ImageFormat,
    size: (u32, u32),
    horizon: f64,
}

impl ChartRenderer {
    #[must_use]
    pub fn new(
        output_directory: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
        format: ImageFormat,
        size: (u32, u32),
        horizon: f64,
    ) -> Self {
        ChartRenderer {
            output_directory: output_directory.into(),
            file_prefix: file_prefix.into(),
            format,
            size,
            horizon,
        }
    }

    #[must_use]
    pub fn from_config(config: &SweepConfig) -> Self {
        ChartRenderer::new(
            &config.output_directory,
            &config.file_prefix,
            config.image_format,
            (config.image_width, config.image_height),
            config.time_horizon_days,
        )
    }

    /// The file a scenario's chart is written to.
    #[must_use]
    pub fn artifact_path(&self, index: usize) -> PathBuf {
        artifact_path(&self.output_directory, &self.file_prefix, index, self.format)
    }
}

impl Renderer for ChartRenderer {
    fn render(&mut self, result: &ScenarioResult<'_>) -> Result<PathBuf, SweepError> {
        let path = self.artifact_path(result.index);
        register_fonts(&path)?;
        fs::create_dir_all(&self.output_directory)
            .map_err(|e| SweepError::output_write_failure(&path, e))?;

        let chart = Chart::new(result, self.horizon);
        let drawn = match self.format {
            ImageFormat::Png => chart
                .draw(BitMapBackend::new(&path, self.size).into_drawing_area())
                .map_err(|e| e.to_string()),
            ImageFormat::Svg => chart
                .draw(SVGBackend::new(&path, self.size).into_drawing_area())
                .map_err(|e| e.to_string()),
        };
        drawn.map_err(|reason| SweepError::output_write_failure(&path, reason))?;
        info!("wrote {}", path.display());
        Ok(path)
    }
}

/// `<dir>/<prefix>_<index:02>.<ext>`
#[must_use]
pub fn artifact_path(dir: &Path, prefix: &str, index: usize, format: ImageFormat) -> PathBuf {
    dir.join(format!("{prefix}_{index:02}.{}", format.extension()))
}

/// The chart title: the batch label with the contact rate and the basic reproduction number it
/// implies, each under its own name.
#[must_use]
pub fn chart_title(result: &ScenarioResult<'_>) -> String {
    format!(
        "{}; β = {:.2}, R0 = {:.2}",
        result.title,
        result.contact_rate,
        result.basic_reproduction_number()
    )
}

#[must_use]
pub fn deaths_annotation(result: &ScenarioResult<'_>) -> String {
    format!("Total deaths: {:.0}", result.final_deaths())
}

/// Registers the embedded font once per process. A failure is reported against `path`, the chart
/// that could not be drawn.
fn register_fonts(path: &Path) -> Result<(), SweepError> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();
    let registered = REGISTERED.get_or_init(|| {
        debug!("registering embedded chart font");
        load_font(FONT_FAMILY, DEJAVU_SANS)
    });
    font_status(path, registered)
}

fn load_font(family: &str, bytes: &'static [u8]) -> Result<(), String> {
    register_font(family, FontStyle::Normal, bytes)
        .map_err(|_| format!("could not load font `{family}`"))
}

fn font_status(path: &Path, registered: &Result<(), String>) -> Result<(), SweepError> {
    registered
        .clone()
        .map_err(|reason| SweepError::output_write_failure(path, reason))
}

/// Normalised series ready to draw.
struct Chart {
    title: String,
    annotation: String,
    horizon: f64,
    series: [(&'static str, RGBColor, Vec<(f64, f64)>); 4],
}

impl Chart {
    fn new(result: &ScenarioResult<'_>, horizon: f64) -> Self {
        let normalise = |values: &[f64]| -> Vec<(f64, f64)> {
            result
                .time
                .iter()
                .zip(values)
                .map(|(&t, &v)| (t, v / result.population))
                .collect()
        };
        Chart {
            title: chart_title(result),
            annotation: deaths_annotation(result),
            horizon,
            series: [
                ("Susceptible", BLUE, normalise(&result.susceptible)),
                ("Infected", RED, normalise(&result.infected)),
                ("Recovered", GREEN, normalise(&result.recovered)),
                ("Dead", DEAD_COLOR, normalise(&result.dead)),
            ],
        }
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: DrawingArea<DB, Shift>,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, (FONT_FAMILY, 16))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(45)
            .build_cartesian_2d(0f64..self.horizon, 0f64..Y_AXIS_MAX)?;

        chart.plotting_area().fill(&PLOT_BACKGROUND)?;
        chart
            .configure_mesh()
            .x_desc("Time /days")
            .y_desc("Fraction of population")
            .light_line_style(WHITE.mix(0.3))
            .bold_line_style(WHITE.stroke_width(2))
            .label_style((FONT_FAMILY, 12))
            .draw()?;

        for (label, color, points) in &self.series {
            let style = color.mix(0.5).stroke_width(2);
            chart
                .draw_series(LineSeries::new(points.iter().copied(), style))?
                .label(*label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
        }

        chart.draw_series(std::iter::once(Text::new(
            self.annotation.clone(),
            (self.horizon * 0.1375, 0.4),
            (FONT_FAMILY, 14),
        )))?;

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.5))
            .border_style(BLACK.mix(0.3))
            .label_font((FONT_FAMILY, 12))
            .draw()?;

        root.present()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioRunner;
    use tempfile::tempdir;

    fn small_config(dir: &Path, format: ImageFormat) -> SweepConfig {
        SweepConfig {
            mitigation_fractions_general: vec![0.0, 0.5],
            mitigation_fractions_at_risk: vec![0.3],
            time_horizon_days: 200.0,
            sample_count: 200,
            output_directory: dir.join("charts"),
            image_format: format,
            ..SweepConfig::default()
        }
    }

    #[test]
    fn artifact_names_are_zero_padded() {
        let path = artifact_path(Path::new("out"), "reg_pop", 7, ImageFormat::Png);
        assert_eq!(path, PathBuf::from("out").join("reg_pop_07.png"));
        let path = artifact_path(Path::new("out"), "reg_pop", 11, ImageFormat::Svg);
        assert_eq!(path, PathBuf::from("out").join("reg_pop_11.svg"));
    }

    #[test]
    fn title_labels_contact_rate_and_reproduction_number() {
        let runner = ScenarioRunner::new(SweepConfig::default()).unwrap();
        let scenario = &runner.scenarios()[0];
        let result = runner.run_scenario(scenario).unwrap();
        assert_eq!(
            chart_title(&result),
            "General population SIR model for COVID-19; β = 0.25, R0 = 3.00"
        );
        assert!(deaths_annotation(&result).starts_with("Total deaths: "));
    }

    #[test]
    fn writes_png_charts_into_a_new_directory() {
        let temp_dir = tempdir().unwrap();
        let config = small_config(temp_dir.path(), ImageFormat::Png);
        let runner = ScenarioRunner::new(config).unwrap();
        let mut renderer = ChartRenderer::from_config(runner.config());

        let report = runner.run(&mut renderer);
        assert!(report.is_success(), "{report:?}");
        for index in 0..3 {
            let path = temp_dir
                .path()
                .join("charts")
                .join(format!("reg_pop_{index:02}.png"));
            let bytes = fs::read(&path).unwrap();
            assert!(bytes.starts_with(b"\x89PNG"), "{} is not a PNG", path.display());
        }
    }

    #[test]
    fn writes_svg_charts_with_title_and_deaths() {
        let temp_dir = tempdir().unwrap();
        let config = small_config(temp_dir.path(), ImageFormat::Svg);
        let runner = ScenarioRunner::new(config).unwrap();
        let mut renderer = ChartRenderer::from_config(runner.config());

        let report = runner.run(&mut renderer);
        assert!(report.is_success(), "{report:?}");
        let svg = fs::read_to_string(renderer.artifact_path(2)).unwrap();
        assert!(svg.contains("At-Risk population SIR model for COVID-19"));
        assert!(svg.contains("Total deaths: "));
        for label in ["Susceptible", "Infected", "Recovered", "Dead"] {
            assert!(svg.contains(label), "legend is missing {label}");
        }
    }

    #[test]
    fn unloadable_font_is_an_output_write_failure() {
        let path = PathBuf::from("charts").join("reg_pop_03.png");
        let loaded = load_font("sir-sweep-unregistered", b"not a font");
        assert!(loaded.is_err());

        match font_status(&path, &loaded) {
            Err(SweepError::OutputWriteFailure {
                path: failed,
                reason,
            }) => {
                assert_eq!(failed, path);
                assert!(reason.contains("sir-sweep-unregistered"), "{reason}");
            }
            other => panic!("expected an output write failure, got {other:?}"),
        }
        assert!(font_status(&path, &Ok(())).is_ok());
    }

    #[test]
    fn unwritable_output_is_an_output_write_failure() {
        let temp_dir = tempdir().unwrap();
        // A regular file where the output directory should be.
        let blocker = temp_dir.path().join("charts");
        fs::write(&blocker, b"not a directory").unwrap();

        let config = small_config(temp_dir.path(), ImageFormat::Png);
        let runner = ScenarioRunner::new(config).unwrap();
        let mut renderer = ChartRenderer::from_config(runner.config());
        let result = runner.run_scenario(&runner.scenarios()[0]).unwrap();

        match renderer.render(&result) {
            Err(SweepError::OutputWriteFailure { path, .. }) => {
                assert_eq!(path, blocker.join("reg_pop_00.png"));
            }
            other => panic!("expected an output write failure, got {other:?}"),
        }
    }
}
