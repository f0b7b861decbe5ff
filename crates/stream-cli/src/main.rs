//! tunnel-stream: pull encoded camera samples through a vendor tunnel library.
//!
//! This is the main entry point. It loads the vendor library named on the
//! command line, drives it against the camera address and writes the raw
//! samples to the configured sink.

mod config;
mod orchestrator;
mod output;

use anyhow::Result;
use clap::Parser;
use config::{OutputTarget, StreamConfig};
use lib_types::CameraUrl;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tunnel-stream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the vendor tunnel library (e.g. libBambuSource.so)
    library: PathBuf,

    /// Camera address, passed verbatim to the library
    camera_url: String,

    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write samples to this file instead of the configured sink
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = resolve_config(&cli);

    // Samples on stdout push every diagnostic to stderr.
    let diagnostics_to_stderr = config
        .as_ref()
        .map_or(false, StreamConfig::samples_on_stdout);
    init_tracing(cli.verbose, cli.quiet, diagnostics_to_stderr);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(orchestrator::EXIT_SETUP);
        }
    };

    let orchestrator = orchestrator::Orchestrator::new(config);
    match orchestrator.run(&cli.library, CameraUrl::from(cli.camera_url)) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(orchestrator::exit_code(&e))
        }
    }
}

/// Load the configuration file, if any, and apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<StreamConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => StreamConfig::default(),
    };

    if let Some(path) = &cli.output {
        config.output.target = OutputTarget::File { path: path.clone() };
    }

    config::validate_config(&config)?;
    Ok(config)
}

fn init_tracing(verbose: u8, quiet: bool, to_stderr: bool) {
    let filter = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_two_positionals_are_required() {
        assert!(Cli::try_parse_from(["tunnel-stream"]).is_err());
        assert!(Cli::try_parse_from(["tunnel-stream", "libBambuSource.so"]).is_err());
        assert!(Cli::try_parse_from(["tunnel-stream", "a.so", "url", "extra"]).is_err());

        let cli = Cli::try_parse_from(["tunnel-stream", "libBambuSource.so", "bambu:///local/x"])
            .unwrap();
        assert_eq!(cli.library, PathBuf::from("libBambuSource.so"));
        assert_eq!(cli.camera_url, "bambu:///local/x");
    }

    #[test]
    fn test_usage_error_exit_code_matches() {
        let err = Cli::try_parse_from(["tunnel-stream"]).err().unwrap();
        assert_eq!(err.exit_code(), i32::from(orchestrator::EXIT_USAGE));
    }

    #[test]
    fn test_output_flag_overrides_config() {
        let cli = Cli::try_parse_from(["tunnel-stream", "lib.so", "url", "-o", "cam.h264"]).unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(
            config.output.target,
            OutputTarget::File { path: PathBuf::from("cam.h264") }
        );
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["tunnel-stream", "lib.so", "url", "-q", "-v"]).is_err());
    }
}
