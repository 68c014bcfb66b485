//! CLI dispatch for the `initrd-pack` binary.

use std::io::{self, Write};

use tracing_subscriber::EnvFilter;

use crate::build::{build_image, BuildConfig};
use crate::cli::{self, Commands};
use crate::extract::{self, ImageReader};
use crate::verify::verify_image;

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    init_logging(args.verbose);

    match &args.command {
        Commands::Build { source, output, no_descend, skip_check } => {
            let config = BuildConfig {
                source: source.clone(),
                output: output.clone(),
                collect: cli::collect_options_from_opt_or_env(no_descend),
                verify: !*skip_check, // verify by default
            };
            let summary = build_image(&config)?;
            if !summary.diagnostics.is_empty() {
                println!("{} warning(s), see the log above.", summary.diagnostics.len());
            }
            println!(
                "Done creating {}! Wrote {} bytes ({} entries, {} payload bytes).",
                config.output.display(),
                summary.total_bytes,
                summary.entry_count,
                summary.payload_bytes
            );
        }
        Commands::List { image, json } => {
            let reader = ImageReader::open(image)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            extract::list_image(&reader, *json, &mut out)?;
            out.flush()?;
        }
        Commands::Extract { image, output } => {
            let reader = ImageReader::open(image)?;
            let files = extract::extract_to_dir(&reader, output)?;
            println!("Extracted {} files to {}", files, output.display());
        }
        Commands::Verify { image } => {
            let report = verify_image(image)?;
            println!(
                "OK: {} entries ({} directories, {} files), {} payload bytes, {} bytes total",
                report.entries, report.directories, report.files, report.payload_bytes, report.total_bytes
            );
        }
    }

    Ok(())
}

/// Installs a stderr `tracing` subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
