use anyhow::Context;
use arena_common::{BloodState, BloodTypeId, ItemId, ItemStack, PlatformId, UnlockId, category};
use arena_kernel::{MemoryWorld, Providers};
use arena_persist::SNAPSHOT_DIR;
use arena_plugin::{ArenaConfig, ArenaPlugin, LifecycleManager};
use arena_transition::TransitionMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arena-cli", about = "CLI tool for arena transition operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file
    #[arg(short, long, default_value = "arena.yaml")]
    config: PathBuf,

    /// Override the storage root from the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and effective configuration
    Info,
    /// Run a scripted enter/leave cycle against an in-memory world
    Demo {
        /// Transition strategy to exercise
        #[arg(short, long)]
        mode: Option<TransitionMode>,
        /// Platform id of the demo player
        #[arg(short, long, default_value = "1001")]
        player: u64,
    },
    /// List stored snapshots of a player, newest first
    Snapshots {
        #[arg(short, long)]
        player: u64,
    },
    /// Delete every snapshot of every player
    ClearSnapshots,
    /// Show arena progress records
    Status {
        /// Only this player
        #[arg(short, long)]
        player: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = ArenaConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.storage.root = dir;
    }
    info!(root = %config.storage.root.display(), mode = %config.transition.mode, "config loaded");

    match cli.command {
        Commands::Info => {
            println!("arena-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("storage root: {}", config.storage.root.display());
            println!(
                "snapshots: {}",
                config.storage.root.join(SNAPSHOT_DIR).display()
            );
            println!("transition mode: {}", config.transition.mode);
            println!("name prefix: {:?}", config.transition.name_prefix);
            println!("auto enter: {}", config.triggers.auto_enter);
            println!(
                "loadout: items={}, unlocks={}, achievements={}",
                config.loadout.items.len(),
                config.loadout.unlocks.len(),
                config.loadout.achievements.len()
            );
            for (name, zone) in &config.zones {
                println!("zone {name}: spawn={:?}, radius={}", zone.spawn, zone.radius);
            }
            println!("categories: {}", category::ALL.join(", "));
        }
        Commands::Demo { mode, player } => {
            if let Some(mode) = mode {
                config.transition.mode = mode;
            }
            demo(config, PlatformId(player))?;
        }
        Commands::Snapshots { player } => {
            let (_world, manager) = start(config)?;
            let snapshots = manager
                .hooks()
                .snapshots()
                .context("snapshot store not initialized")?;
            let list = snapshots.snapshots(PlatformId(player));
            println!("Player {player}: {} snapshot(s)", list.len());
            for snap in list {
                println!(
                    "  {} created={} arena={} categories={} valid={} {}",
                    snap.id,
                    snap.created_at.to_rfc3339(),
                    snap.is_arena,
                    snap.state.len(),
                    snap.verify(),
                    snap.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::ClearSnapshots => {
            let (_world, manager) = start(config)?;
            let snapshots = manager
                .hooks()
                .snapshots()
                .context("snapshot store not initialized")?;
            let players = snapshots.players().len();
            if snapshots.clear_all() {
                println!("Cleared snapshots of {players} player(s)");
            } else {
                anyhow::bail!("snapshot directory could not be removed");
            }
        }
        Commands::Status { player } => {
            let (_world, manager) = start(config)?;
            let arena = manager.hooks().arena().context("arena not initialized")?;
            let tables = arena.machine().tables();
            let records: Vec<_> = arena
                .machine()
                .records()
                .into_iter()
                .filter(|(id, _)| player.is_none_or(|p| id.0 == p))
                .collect();
            if records.is_empty() {
                println!("No players in transition");
            }
            for (id, record) in records {
                println!(
                    "{id}: {} mode={} since={} snapshot={} bind={} zone={}",
                    record.state,
                    record.mode,
                    record.entered_at.to_rfc3339(),
                    record.snapshot,
                    tables.bind(id).unwrap_or_else(|| "-".into()),
                    tables.zone(id).unwrap_or_else(|| "-".into())
                );
            }
        }
    }

    Ok(())
}

/// Start the plugin against an empty in-memory world.
fn start(config: ArenaConfig) -> anyhow::Result<(Arc<MemoryWorld>, LifecycleManager<ArenaPlugin>)> {
    let world = Arc::new(MemoryWorld::new());
    let providers = Providers::uniform(world.clone()).with_achievements(world.clone());
    let manager = ArenaPlugin::start(config, providers).context("starting arena plugin")?;
    if let Some(guard) = manager.hooks().guard() {
        world.set_save_gate(guard);
    }
    Ok((world, manager))
}

fn demo(config: ArenaConfig, platform_id: PlatformId) -> anyhow::Result<()> {
    let mode = config.transition.mode;
    let zone = config.zones.keys().next().cloned();
    println!("Arena demo: mode={mode}, player={platform_id}, zone={zone:?}");

    let (world, mut manager) = start(config)?;
    let player = world.connect(platform_id, "OldName");
    world.edit(platform_id, |s| {
        s.experience = 1200.0;
        s.inventory = vec![ItemStack {
            item: ItemId(10),
            amount: 20,
        }];
        s.unlocks.insert(UnlockId(1));
        s.blood = BloodState {
            blood_type: BloodTypeId(2),
            quality: 55.0,
        };
        s.position = glam::Vec3::new(-20.0, 5.0, 12.0);
    });
    let before = world
        .state(platform_id)
        .context("demo player missing")?
        .progression();

    let arena = manager
        .hooks()
        .arena()
        .context("arena not initialized")?
        .clone();
    arena.enter_arena(&player, zone.as_deref())?;
    println!("Entered: state={}", arena.state(platform_id));

    let player = match mode {
        TransitionMode::Synchronous => player,
        TransitionMode::Reconnect => {
            manager.hooks().on_player_disconnected(platform_id);
            println!("Kicked: state={}", arena.state(platform_id));
            let relogged = world.connect(platform_id, "OldName");
            manager.hooks().on_player_connected(&relogged);
            relogged
        }
    };
    let in_arena = world.state(platform_id).context("demo player missing")?;
    println!(
        "In arena: name={:?}, items={}, position={:?}, in_arena={}",
        in_arena.name,
        in_arena.inventory.len(),
        in_arena.position,
        arena.is_in_arena(platform_id)
    );

    let mut report = arena.leave_arena(&player)?;
    if mode == TransitionMode::Reconnect {
        println!("Leaving: state={}", arena.state(platform_id));
        let relogged = world.connect(platform_id, "OldName");
        report = arena.on_reconnected(&relogged)?.unwrap_or_default();
    }
    println!(
        "Left: state={}, applied={}, failed={}",
        arena.state(platform_id),
        report.applied.len(),
        report.failed.len()
    );

    let after = world
        .state(platform_id)
        .context("demo player missing")?
        .progression();
    println!(
        "Restore: {}",
        if after == before { "OK" } else { "MISMATCH" }
    );
    println!("Host saves: {}", world.autosave_count());

    drop(arena);
    manager.stop()?;
    Ok(())
}
