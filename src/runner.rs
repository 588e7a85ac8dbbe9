use std::io::Write;
use std::path::PathBuf;

use crate::config::{ImageFormat, SweepConfig};
use crate::error::SweepError;
use crate::log::{apply_log_level_spec, info, LevelFilter, LogLevelSpec};
use crate::render::ChartRenderer;
use crate::scenario::{ScenarioRunner, SweepReport};
use clap::{Args, Command, FromArgMatches as _};

/// Default log level when `--log-level` names none.
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

/// Default cli arguments for the sweep runner
#[derive(Args, Debug, Default)]
pub struct BaseArgs {
    /// Optional path for a sweep configuration JSON file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory the charts are written to (overrides the config file)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Chart file format (overrides the config file)
    #[arg(short, long, value_enum)]
    pub format: Option<ImageFormat>,

    /// Log level, e.g. `info` or `warn,sir_sweep::integrator=trace`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Print the effective configuration as JSON and exit without running
    #[arg(long)]
    pub print_config: bool,
}

fn create_sweep_cli() -> Command {
    let cli = Command::new("sir-sweep").about(
        "Integrates an SIR epidemic model across a sweep of mitigation scenarios and charts each \
         trajectory",
    );
    BaseArgs::augment_args(cli)
}

/// Runs the sweep with arguments parsed from the command line.
///
/// Returns `None` when `--print-config` was given, otherwise the report of every scenario.
///
/// # Errors
/// Returns an error if argument parsing fails, the configuration cannot be loaded, or the
/// configuration is invalid as a whole. Failures of individual scenarios are reported in the
/// `SweepReport` instead.
pub fn run_with_args() -> Result<Option<SweepReport>, Box<dyn std::error::Error>> {
    let matches = create_sweep_cli().get_matches();
    let args = BaseArgs::from_arg_matches(&matches)?;
    Ok(run_with_args_internal(args, &mut std::io::stdout())?)
}

/// Builds the effective configuration: defaults, then the config file, then command line
/// overrides.
///
/// # Errors
/// Returns an error if the config file cannot be read or parsed.
pub fn resolve_config(args: &BaseArgs) -> Result<SweepConfig, SweepError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("loading sweep configuration from {}", path.display());
            SweepConfig::from_json_file(path)?
        }
        None => SweepConfig::default(),
    };
    if let Some(output_dir) = &args.output_dir {
        config.output_directory.clone_from(output_dir);
    }
    if let Some(format) = args.format {
        config.image_format = format;
    }
    Ok(config)
}

fn run_with_args_internal(
    args: BaseArgs,
    out: &mut dyn Write,
) -> Result<Option<SweepReport>, SweepError> {
    let log_spec = match &args.log_level {
        Some(spec) => spec.parse()?,
        None => LogLevelSpec::default(),
    };
    apply_log_level_spec(&log_spec, DEFAULT_LOG_LEVEL);

    let config = resolve_config(&args)?;
    if args.print_config {
        serde_json::to_writer_pretty(&mut *out, &config)?;
        writeln!(out)?;
        return Ok(None);
    }

    let mut renderer = ChartRenderer::from_config(&config);
    let runner = ScenarioRunner::new(config)?;
    let report = runner.run(&mut renderer);
    write_summary(&report, out)?;
    Ok(Some(report))
}

/// One line for the run, then one line per failed scenario.
fn write_summary(report: &SweepReport, out: &mut dyn Write) -> Result<(), SweepError> {
    writeln!(
        out,
        "{} of {} scenarios rendered",
        report.artifacts().count(),
        report.outcomes.len()
    )?;
    for failure in report.failures() {
        writeln!(
            out,
            "scenario {:02} ({}, mitigation {}, contact rate {}) failed: {}",
            failure.index, failure.label, failure.mitigation, failure.contact_rate, failure.error
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::TEST_MUTEX;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn command_line_overrides_the_config_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("sweep.json");
        fs::write(
            &config_path,
            r#"{"output_directory": "from_file", "image_format": "png", "sample_count": 400}"#,
        )
        .unwrap();

        let args = BaseArgs {
            config: Some(config_path),
            output_dir: Some(PathBuf::from("from_cli")),
            format: Some(ImageFormat::Svg),
            ..BaseArgs::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.output_directory, PathBuf::from("from_cli"));
        assert_eq!(config.image_format, ImageFormat::Svg);
        assert_eq!(config.sample_count, 400);
    }

    #[test]
    fn print_config_writes_json_and_skips_the_run() {
        let _guard = TEST_MUTEX.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = tempdir().unwrap();
        let args = BaseArgs {
            output_dir: Some(temp_dir.path().join("charts")),
            print_config: true,
            ..BaseArgs::default()
        };
        let mut out = Vec::new();
        let report = run_with_args_internal(args, &mut out).unwrap();
        assert!(report.is_none());

        let printed: SweepConfig = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed.output_directory, temp_dir.path().join("charts"));
        assert!(!temp_dir.path().join("charts").exists());
    }

    #[test]
    fn bad_log_level_is_an_error() {
        let _guard = TEST_MUTEX.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let args = BaseArgs {
            log_level: Some("shouty".to_string()),
            print_config: true,
            ..BaseArgs::default()
        };
        assert!(run_with_args_internal(args, &mut Vec::new()).is_err());
    }

    #[test]
    fn invalid_config_stops_the_run() {
        let _guard = TEST_MUTEX.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("sweep.json");
        fs::write(&config_path, r#"{"sample_count": 1}"#).unwrap();
        let args = BaseArgs {
            config: Some(config_path),
            output_dir: Some(temp_dir.path().join("charts")),
            ..BaseArgs::default()
        };
        let result = run_with_args_internal(args, &mut Vec::new());
        assert!(matches!(result, Err(SweepError::InvalidParameters(_))));
    }

    #[test]
    fn summary_lists_failed_scenarios() {
        let _guard = TEST_MUTEX.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("sweep.json");
        fs::write(
            &config_path,
            r#"{
                "mitigation_fractions_general": [0.0, 1.5],
                "mitigation_fractions_at_risk": [],
                "sample_count": 100,
                "time_horizon_days": 100.0,
                "image_format": "svg"
            }"#,
        )
        .unwrap();
        let args = BaseArgs {
            config: Some(config_path),
            output_dir: Some(temp_dir.path().join("charts")),
            ..BaseArgs::default()
        };
        let mut out = Vec::new();
        let report = run_with_args_internal(args, &mut out).unwrap().unwrap();
        assert!(!report.is_success());

        let summary = String::from_utf8(out).unwrap();
        let mut lines = summary.lines();
        assert_eq!(lines.next(), Some("1 of 2 scenarios rendered"));
        let failure = lines.next().unwrap();
        assert!(failure.starts_with("scenario 01 (General population"));
        assert!(failure.contains("mitigation 1.5"));
        assert!(temp_dir.path().join("charts").join("reg_pop_00.svg").exists());
    }
}
