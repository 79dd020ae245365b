//! dirpush - mirror a local directory onto a dirpushd server
//!
//! Exit code 0 on a complete run, 1 on any fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use dirpush::cli::ClientOpts;
use dirpush::logger::{ConsoleLogger, Logger, NoopLogger, TextLogger};
use dirpush::net::client::client_push;

fn run(opts: &ClientOpts) -> Result<()> {
    if !opts.root.is_dir() {
        anyhow::bail!("root is not a directory: {}", opts.root.display());
    }

    // Choose logger once; zero overhead in hot paths with NoopLogger
    let logger: Arc<dyn Logger> = if let Some(ref p) = opts.log_file {
        Arc::new(TextLogger::new(p).with_context(|| format!("open log file {}", p.display()))?)
    } else if opts.verbose {
        Arc::new(ConsoleLogger)
    } else {
        Arc::new(NoopLogger)
    };

    let cfg = opts.to_config();
    if cfg.host.is_none() {
        println!("Waiting for a dirpushd beacon on udp port {}...", cfg.discovery_port);
    }
    let stats = client_push(&cfg, logger.as_ref()).context("sync failed")?;
    println!(
        "{} dirs, {} files checked, {} updated ({} bytes sent)",
        stats.dirs, stats.files, stats.updated, stats.bytes_sent
    );
    Ok(())
}

fn main() -> ExitCode {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .ok();

    let opts = ClientOpts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dirpush: {:#}", e);
            ExitCode::from(1)
        }
    }
}
