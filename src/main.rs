use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tidewater::game::config::{read_initial_config, FluidInitialConfig, INITIAL_CONFIG_PATH};
use tidewater::game::fluid::{FluidCoordinator, FluidSet, FluidSource, FluidSources, FluidTypeId, LastFluidTick, SimTick};
use tidewater::game::grid::VoxelGrid;
use tidewater::game::TidewaterPlugin;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TICKS: u64 = 600;
const DEFAULT_SEED: u64 = 42;

const LOG_PREFIX: &str = "tidewater";
const KEEP_LOGS: usize = 25;

/// Log to stdout and, when the `logs` directory is usable, to a file per run.
/// Returns the log file path.
fn setup_logging() -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bevy_ecs=info,bevy_app=info,tidewater=info"));
    let log_dir = PathBuf::from("logs");
    if let Err(e) = fs::create_dir_all(&log_dir) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
            .init();
        warn!("Cannot create {}: {}; logging to stdout only", log_dir.display(), e);
        return None;
    }
    cleanup_old_logs(&log_dir, KEEP_LOGS);

    let log_filename = format!("{}_{}.log", LOG_PREFIX, chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, &log_filename);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
        .init();

    Some(log_dir.join(log_filename))
}

/// Delete the oldest run logs beyond `keep_count`.
fn cleanup_old_logs(log_dir: &Path, keep_count: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else { return };
    let mut logs: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_PREFIX) && name.ends_with(".log"))
        })
        .collect();
    if logs.len() <= keep_count {
        return;
    }

    logs.sort_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));
    for stale in &logs[..logs.len() - keep_count] {
        let _ = fs::remove_file(stale.path());
    }
}

/// Stop the headless run after this many fixed ticks.
#[derive(Resource)]
struct RunLimit(u64);

/// A walled basin with random rock pillars, a water spring, an oil seep and
/// a drain in the far corner.
fn build_basin(config: &FluidInitialConfig, seed: u64) -> (VoxelGrid, FluidSources) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut grid = VoxelGrid::new(
        config.grid_width,
        config.grid_length,
        config.grid_height,
        config.ambient_temperature,
    );
    grid.wall_in();

    let (w, l, h) = (config.grid_width, config.grid_length, config.grid_height);
    if w < 6 || l < 6 || h < 3 {
        warn!("Grid {}x{}x{} too small for a basin, running it empty", w, l, h);
        return (grid, FluidSources::default());
    }

    let pillars = (w * l / 40).max(1);
    for _ in 0..pillars {
        let x = rng.random_range(2..w - 2);
        let y = rng.random_range(2..l - 2);
        let top = rng.random_range(1..h);
        for z in 1..top {
            if let Some(cell) = grid.cell(x, y, z) {
                grid.set_solid(cell, true);
            }
        }
    }

    let fluid_named = |name: &str| {
        let found = config.fluids.iter().position(|f| f.name == name).map(|i| FluidTypeId(i as u8));
        if found.is_none() {
            warn!("No fluid named {} in the config, skipping its sources", name);
        }
        found
    };
    let water = fluid_named("water");
    let oil = fluid_named("oil");

    let mut sources = FluidSources::default();
    let mut place = |grid: &mut VoxelGrid, x: u32, y: u32, z: u32, fluid: Option<FluidTypeId>, level: u32| {
        let (Some(cell), Some(fluid)) = (grid.cell(x, y, z), fluid) else { return };
        grid.set_solid(cell, false);
        sources.add(FluidSource { cell, fluid, level });
    };
    place(&mut grid, 1, 1, h - 1, water, config.max_cell_volume);
    place(&mut grid, w / 2, 1, h - 1, oil, config.max_cell_volume / 2);
    place(&mut grid, w - 2, l - 2, 1, water, 0);

    (grid, sources)
}

fn stop_after_limit(
    tick: Res<SimTick>,
    limit: Res<RunLimit>,
    fluids: Res<FluidCoordinator>,
    last: Res<LastFluidTick>,
    mut exit: MessageWriter<AppExit>,
) {
    if tick.0 % 100 == 0 {
        info!(
            "Tick {}: {} groups, {} unstable, volume {}, changed cells {}",
            tick.0,
            fluids.active_groups().count(),
            fluids.unstable().len(),
            fluids.total_volume(),
            last.0.changed_cells.len()
        );
    }
    if tick.0 >= limit.0 {
        info!("Reached {} ticks, settled: {}", tick.0, fluids.is_settled());
        exit.write(AppExit::Success);
    }
}

fn main() {
    let log_file = setup_logging()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "stdout only".to_string());

    let mut args = std::env::args().skip(1);
    let ticks = args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_TICKS);
    let seed = args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_SEED);

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  Tidewater - headless fluid run                          ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  Log file: {:<45} ║", log_file);
    println!("║  Ticks: {:<8} Seed: {:<29} ║", ticks, seed);
    println!("╚══════════════════════════════════════════════════════════╝");

    let config = read_initial_config(INITIAL_CONFIG_PATH).unwrap_or_else(|e| {
        error!("Failed to load {}: {}", INITIAL_CONFIG_PATH, e);
        FluidInitialConfig::default()
    });
    let (grid, sources) = build_basin(&config, seed);
    info!("Basin seeded with {} sources", sources.len());

    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(1.0 / 240.0))))
        .insert_resource(config)
        .insert_resource(grid)
        .insert_resource(sources)
        .insert_resource(RunLimit(ticks))
        .add_plugins(TidewaterPlugin)
        .add_systems(FixedUpdate, stop_after_limit.after(FluidSet::Effects))
        .run();
}
