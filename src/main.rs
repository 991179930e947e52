mod cli;

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use trafficlens::config::{Config, ConfigError};
use trafficlens::engine::ExtractError;
use trafficlens::features::engineer_features;
use trafficlens::sink::write_json_array;
use trafficlens::source::SourceError;

fn main() {
    // clap itself exits 2 on usage errors.
    let args = cli::Cli::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = cancel.clone();
    ctrlc::set_handler(move || {
        cancel_flag.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping extraction...");
    })
    .expect("failed to set Ctrl-C handler");

    if let Err(err) = run(&args, &config, &cancel) {
        eprintln!("error: {}", err);
        std::process::exit(exit_code(&err));
    }
}

fn run(args: &cli::Cli, config: &Config, cancel: &AtomicBool) -> Result<(), ExtractError> {
    let started = Instant::now();

    let (windows, stats) = trafficlens::extract_file(&args.input, config, cancel)?;
    write_json_array(&args.output, &windows).map_err(ExtractError::Sink)?;

    if let Some(features_path) = &args.features_out {
        let rows = engineer_features(&windows, &config.features);
        write_json_array(features_path, &rows).map_err(ExtractError::Sink)?;
        tracing::info!(rows = rows.len(), path = %features_path.display(), "wrote feature rows");
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!("{}", "=".repeat(50));
    println!("Extraction complete.");
    println!("  Packets processed: {}", stats.packets);
    println!("  Windows emitted:   {}", stats.windows);
    println!("  Decode errors:     {}", stats.decode_errors);
    if stats.clamped_timestamps > 0 {
        println!("  Clamped timestamps: {}", stats.clamped_timestamps);
    }
    println!("  Elapsed:           {:.2}s", elapsed);
    println!("  Output:            {}", args.output.display());
    println!("{}", "=".repeat(50));

    Ok(())
}

fn load_config(args: &cli::Cli) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(value) = args.window_seconds {
        config.engine.window_seconds = value;
    }
    if let Some(value) = args.top_k_flows {
        config.engine.top_k_flows = value;
    }
    if let Some(value) = args.top_k_ports {
        config.engine.top_k_ports = value;
    }

    config.validate()?;
    Ok(config)
}

fn exit_code(err: &ExtractError) -> i32 {
    match err {
        ExtractError::Source(SourceError::UnsupportedContainer) => 3,
        ExtractError::Source(_) => 4,
        ExtractError::EmptyCapture => 5,
        _ => 1,
    }
}
