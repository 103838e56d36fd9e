mod cli;
mod commands;
mod config;
mod progress;
mod recipe;
mod ui;

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use plan::CancelToken;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Cancelled on Ctrl-C; running commands are killed and no new ones start
    pub cancel: CancelToken,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let cancel = CancelToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupted, cancelling");
        token.cancel();
    })
    .context("Could not install the Ctrl-C handler")?;

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        cancel,
    };
    log::trace!("verbosity {}", ctx.verbose);

    match cli.command {
        Command::Plan(cmd) => commands::plan::run(&ctx, cmd),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "wksctl", &mut io::stdout());
            Ok(())
        }
    }
}
