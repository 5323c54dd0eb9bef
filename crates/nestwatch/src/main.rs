//! `nestwatch` - CLI for the no-drone-zone violation monitor.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use nestwatch::cli::{
    CheckCommand, ClearCommand, Cli, Command, ConfigCommand, RunCommand, SnapshotCommand,
    StatusCommand,
};
use nestwatch::{init_logging, Config, Event, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match cli.command {
        // Config commands load (and report on) configuration themselves.
        Command::Config(cmd) => handle_config(cli.config, cmd),
        command => {
            let config =
                Config::load_from(cli.config).context("failed to load configuration")?;
            dispatch(config, command).await
        }
    }
}

async fn dispatch(config: Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(cmd) => handle_run(config, &cmd).await,
        Command::Snapshot(cmd) => handle_snapshot(config, &cmd),
        Command::Status(cmd) => handle_status(config, &cmd),
        Command::Check(cmd) => {
            handle_check(&config, &cmd);
            Ok(())
        }
        Command::Clear(cmd) => handle_clear(config, &cmd),
        Command::Config(cmd) => handle_config(None, cmd),
    }
}

fn print_event(event: &Event) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

async fn handle_run(config: Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let service = Service::build(config).context("failed to start monitor")?;
    let mut events = service.subscribe();

    if !cmd.no_backlog {
        for detected in service.cached_violations()? {
            print_event(&Event::ViolationDetected(detected))?;
        }
    }

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = print_event(&event) {
                        error!(error = %e, "Failed to write event");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event output fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await?;

    printer.abort();
    Ok(())
}

fn handle_snapshot(config: Config, cmd: &SnapshotCommand) -> anyhow::Result<()> {
    let service = Service::build(config)?;
    let violations = service.store().fetch_snapshot()?;

    if cmd.json {
        let payloads: Vec<_> = violations
            .iter()
            .map(nestwatch::ViolationDetected::from)
            .collect();
        println!("{}", serde_json::to_string_pretty(&payloads)?);
        return Ok(());
    }

    if violations.is_empty() {
        println!("No active violations.");
        return Ok(());
    }

    println!(
        "{:<16} {:>10} {:>8}  {:<24} {:<20}",
        "SERIAL", "DISTANCE", "TTL", "PILOT", "DETECTED"
    );
    for violation in &violations {
        let ttl = violation
            .ttl_remaining
            .map_or_else(|| "-".to_string(), |ttl| format!("{}s", ttl.num_seconds()));
        println!(
            "{:<16} {:>10.2} {:>8}  {:<24} {:<20}",
            violation.serial_number,
            violation.distance,
            ttl,
            violation.pilot_or_unknown().full_name(),
            violation.detected_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn handle_status(config: Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let database = if config.storage.in_memory {
        ":memory:".to_string()
    } else {
        config.database_path().display().to_string()
    };
    let zone = config.zone();
    let ttl_secs = config.ttl().num_seconds();

    let service = Service::build(config)?;
    let stats = service.store().stats()?;

    if cmd.json {
        let status = serde_json::json!({
            "database_path": database,
            "zone": zone,
            "ttl_secs": ttl_secs,
            "active_violations": stats.total_violations,
            "identified_pilots": stats.identified_pilots,
            "oldest_detection": stats.oldest_detection,
            "newest_detection": stats.newest_detection,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("nestwatch status");
        println!("----------------");
        println!("Database:          {database}");
        println!(
            "Zone:              ({}, {}) radius {}",
            zone.origin_x, zone.origin_y, zone.radius
        );
        println!("Retention:         {ttl_secs}s");
        println!("Active violations: {}", stats.total_violations);
        println!("Identified pilots: {}", stats.identified_pilots);
        if let Some(oldest) = stats.oldest_detection {
            println!("Oldest detection:  {oldest}");
        }
        if let Some(newest) = stats.newest_detection {
            println!("Newest detection:  {newest}");
        }
    }
    Ok(())
}

fn handle_check(config: &Config, cmd: &CheckCommand) {
    let zone = config.zone();
    let distance = zone.distance_to(cmd.x, cmd.y);
    let verdict = if zone.contains(cmd.x, cmd.y) {
        "inside"
    } else {
        "outside"
    };
    println!(
        "({}, {}) is {verdict} the zone: distance {distance:.2}, radius {}",
        cmd.x, cmd.y, zone.radius
    );
}

fn handle_clear(config: Config, cmd: &ClearCommand) -> anyhow::Result<()> {
    if !cmd.yes {
        println!("This removes every stored violation. Use --yes to confirm.");
        return Ok(());
    }
    let service = Service::build(config)?;
    let removed = service.store().clear()?;
    println!("Removed {removed} violations.");
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Zone]");
                println!("  Origin:             ({}, {})", config.zone.origin_x, config.zone.origin_y);
                println!("  Radius:             {}", config.zone.radius);
                println!();
                println!("[Monitor]");
                println!("  Poll interval (ms): {}", config.monitor.poll_interval_ms);
                println!();
                println!("[Retention]");
                println!("  TTL (s):            {}", config.retention.ttl_secs);
                println!();
                println!("[Sources]");
                println!("  Drones:             {}", config.sources.drones_url);
                println!("  Pilots:             {}", config.sources.pilots_url);
                println!("  Timeout (ms):       {}", config.sources.request_timeout_ms);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  In memory:          {}", config.storage.in_memory);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => anyhow::bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
