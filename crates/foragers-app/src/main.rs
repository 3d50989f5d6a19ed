use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use foragers_core::{ForagersConfig, World, WorldEvent, WorldSnapshot};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "foragers", version, about = "Run a headless foraging colony")]
struct Cli {
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 1_000)]
    ticks: u64,

    /// RNG seed for a reproducible world.
    #[arg(long)]
    seed: Option<u64>,

    /// Initial agent population override.
    #[arg(long)]
    agents: Option<u32>,

    /// Restore the world from a snapshot document instead of seeding fresh.
    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Write the final world state to a snapshot document.
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Ticks between progress log lines.
    #[arg(long, default_value_t = 100)]
    log_interval: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ForagersConfig {
        rng_seed: cli.seed,
        ..ForagersConfig::default()
    };
    if let Some(agents) = cli.agents {
        config.initial_agents = agents;
    }

    let mut world = bootstrap_world(&cli, config)?;
    info!(
        agents = world.agent_count(),
        resources = world.resources().len(),
        warehouses = world.warehouses().len(),
        "colony ready"
    );

    run(&mut world, cli.ticks, cli.log_interval.max(1));

    if let Some(path) = &cli.save {
        let json = world
            .snapshot()
            .to_json()
            .context("serializing snapshot")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!(path = %path.display(), "snapshot saved");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world(cli: &Cli, config: ForagersConfig) -> Result<World> {
    if let Some(path) = &cli.load {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading snapshot from {}", path.display()))?;
        let snapshot = WorldSnapshot::from_json(&text);
        let mut world = World::from_snapshot(config, snapshot)?;
        world.drain_events();
        info!(path = %path.display(), "world restored from snapshot");
        Ok(world)
    } else {
        let mut world = World::new(config)?;
        world.start();
        world.drain_events();
        Ok(world)
    }
}

/// Drive the colony for `ticks` ticks. Each tick's events are consumed
/// before the next tick is issued.
fn run(world: &mut World, ticks: u64, log_interval: u64) {
    let mut deaths: u64 = 0;
    let mut births: u64 = 0;
    let mut exchanges: u64 = 0;
    for step in 1..=ticks {
        if world.stop_requested() {
            info!(step, "stop requested, halting");
            break;
        }
        world.tick();
        for event in world.drain_events() {
            match event {
                WorldEvent::AgentCreated(_) => births += 1,
                WorldEvent::AgentDied(_) => deaths += 1,
                WorldEvent::AgentsCommunicated(..) => exchanges += 1,
                WorldEvent::ResourceDepleted(id) => debug!(?id, "resource exhausted"),
                _ => {}
            }
        }
        if step % log_interval == 0 {
            info!(
                tick = world.current_tick().0,
                agents = world.agent_count(),
                carried = world.carried_volume_total(),
                stored = world.deposit_volume_total(),
                births,
                deaths,
                exchanges,
                "progress"
            );
        }
    }
    info!(
        tick = world.current_tick().0,
        agents = world.agent_count(),
        births,
        deaths,
        exchanges,
        "run complete"
    );
}
