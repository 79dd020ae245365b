use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dirpush::cli::DaemonOpts;
use dirpush::logger::{ConsoleLogger, Logger, NoopLogger, TextLogger};
use dirpush::service::ServiceHandle;

fn run(opts: &DaemonOpts) -> Result<()> {
    let cfg = opts.resolve()?;

    // Validate root directory exists and is a directory
    if !cfg.root.is_dir() {
        anyhow::bail!("root directory does not exist: {}", cfg.root.display());
    }

    let logger: Arc<dyn Logger> = if let Some(ref p) = cfg.log_file {
        Arc::new(TextLogger::new(p).with_context(|| format!("open log file {}", p.display()))?)
    } else if opts.verbose {
        Arc::new(ConsoleLogger)
    } else {
        Arc::new(NoopLogger)
    };

    println!("Starting dirpush daemon:");
    println!("  Root: {}", cfg.root.display());
    println!("  Bind: {}", cfg.bind);
    println!("  Mode: {:?}", cfg.mode);

    if cfg.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: no authentication; any host on this network can write under the root");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("install Ctrl-C handler")?;

    let mut service = ServiceHandle::new();
    service
        .start(&cfg, logger)
        .with_context(|| format!("start service on {}", cfg.bind))?;

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    eprintln!("\nShutting down...");
    service.stop();
    Ok(())
}

fn main() -> ExitCode {
    let opts = DaemonOpts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dirpushd: {:#}", e);
            ExitCode::from(1)
        }
    }
}
