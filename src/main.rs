//! Main entry point for the s3zip CLI.
//!
//! Exit code 0 on success, 1 on any failure including usage errors.
//! Diagnostics go to stderr.

use std::process::ExitCode;

use clap::Parser;

use s3zip::Cli;

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version are not failures
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match s3zip::create_archive(&cli.archive, &cli.databases) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}
