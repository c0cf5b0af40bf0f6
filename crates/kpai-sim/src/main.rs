//! # kpai-sim
//!
//! Replays a scripted scenario of host events against the KP AI team
//! controller and reports every order the AI gave.
//!
//! ## Usage
//!
//! ```text
//! kpai-sim --scenario crates/kpai-sim/scenarios/skirmish.toml
//! kpai-sim --scenario my.toml --config ai.toml --frames 3000 --events-log events.jsonl
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the default filter); the
//! summary goes to stdout.

mod replay;
mod scenario;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use kpai_agent::AiConfig;
use kpai_goal::Frame;
use tracing_subscriber::EnvFilter;

use replay::Replay;
use scenario::Scenario;

/// KP AI scenario replay.
#[derive(Parser)]
#[command(name = "kpai-sim", version, about = "Replay a scenario against the KP AI")]
struct Cli {
    /// Scenario file (TOML) with [[event]] and [[goal]] entries.
    #[arg(long)]
    scenario: PathBuf,

    /// AI configuration (defaults apply when absent).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to run (defaults to one update interval past the
    /// last scripted entry).
    #[arg(long)]
    frames: Option<Frame>,

    /// Append every goal lifecycle event to this JSONL file.
    #[arg(long)]
    events_log: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kpai_goal=info".parse()?)
                .add_directive("kpai_agent=info".parse()?)
                .add_directive("kpai_sim=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AiConfig::load(path)?,
        None => AiConfig::default(),
    };
    let scenario = Scenario::load(&cli.scenario)?;

    tracing::info!(
        "Replaying scenario {} ({})",
        scenario.name.as_deref().unwrap_or("unnamed"),
        cli.scenario.display()
    );

    let mut replay = Replay::new(config, cli.events_log.as_deref());
    let frames = cli
        .frames
        .unwrap_or_else(|| replay.default_frames(&scenario));
    let summary = replay.run(&scenario, frames);

    println!("Frames run:       {}", summary.frames + 1);
    println!("Commands issued:  {}", summary.commands.len());
    for (unit, command) in &summary.commands {
        println!("  unit {}: {}", unit, command);
    }
    println!("Goals remaining:  {}", summary.goals_remaining);
    println!("Units alive:      {}", summary.units_alive);
    println!("Rejected entries: {}", summary.rejected);
    println!("Lifecycle events:");
    for (event_type, count) in &summary.events_by_type {
        println!("  {:<18} {}", event_type, count);
    }
    if let Some(path) = &cli.events_log {
        println!("Event log:        {}", path.display());
    }

    tracing::info!("Replay finished");
    Ok(())
}
