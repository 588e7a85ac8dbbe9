use std::process::ExitCode;

use sir_sweep::runner::run_with_args;

fn main() -> ExitCode {
    match run_with_args() {
        Ok(Some(report)) if !report.is_success() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::from(2)
        }
    }
}
