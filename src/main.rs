//! Main entry point for the initrd-pack CLI app

fn main() -> std::process::ExitCode {
    if let Err(e) = initrd_pack::cli_runner::run_cli_app() {
        // clap prints usage and help itself, with its own exit codes
        if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
            clap_err.exit();
        }
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
