mod cli;
mod launcher;
mod logging;

use clap::Parser;
use cli::Cli;
use launcher::ShellLauncher;
use serve_core::{compute_mproc, driver, Supervisor};
use serve_net::Listener;
use std::process::ExitCode;

const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = match logging::LogLevel::parse(&cli.log_level) {
        Ok(level) => level,
        Err(err) => {
            eprintln!("serve: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let log = logging::build(log_level);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("serve: {err:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let listener = match Listener::bind(&config.address, config.backlog, config.socket_type) {
        Ok(listener) => listener,
        Err(err) => {
            slog::error!(log, "failed to bind listener"; "error" => %err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = driver::install_interrupt_handler() {
        slog::error!(log, "failed to install interrupt handler"; "error" => %err);
        return ExitCode::FAILURE;
    }

    let mproc = compute_mproc(usize::MAX);
    slog::info!(log, "starting"; "mproc" => mproc, "command" => %config.command);

    let launcher = ShellLauncher::new(config.command);
    let mut supervisor = Supervisor::new(listener, launcher, mproc);
    driver::run(&mut supervisor, &log);

    slog::info!(log, "graceful shutdown");
    ExitCode::SUCCESS
}
