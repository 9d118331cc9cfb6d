use bevy::prelude::*;

use super::coordinator::{FluidCoordinator, TickReport};
use super::effects::{Buoyant, Floating};
use super::events::*;
use super::source::FluidSources;
use crate::game::config::{FluidInitialConfig, FluidSimConfig};
use crate::game::grid::VoxelGrid;
use crate::game::profiling::profile;

/// Fixed ticks elapsed since startup.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq, Reflect)]
#[reflect(Resource)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Report of the most recent fluid tick.
#[derive(Resource, Default, Debug)]
pub struct LastFluidTick(pub TickReport);

pub fn increment_sim_tick(mut tick: ResMut<SimTick>) {
    tick.increment();
}

/// Build the runtime config, the grid (unless the app brought one) and the
/// coordinator from the loaded [`FluidInitialConfig`].
pub fn init_fluid_coordinator(
    mut commands: Commands,
    initial: Option<Res<FluidInitialConfig>>,
    grid: Option<Res<VoxelGrid>>,
    mut fixed_time: ResMut<Time<Fixed>>,
) {
    let initial = initial.map(|c| c.clone()).unwrap_or_else(|| {
        warn!("FluidInitialConfig missing at startup, using defaults");
        FluidInitialConfig::default()
    });
    let config = FluidSimConfig::from(&initial);

    let grid = match grid {
        Some(grid) => grid.clone(),
        None => {
            let mut grid = VoxelGrid::new(
                initial.grid_width,
                initial.grid_length,
                initial.grid_height,
                initial.ambient_temperature,
            );
            grid.wall_in();
            commands.insert_resource(grid.clone());
            grid
        }
    };

    fixed_time.set_timestep_hz(initial.tick_rate);
    info!(
        "Fluid simulation ready: {}x{}x{} cells, {} fluids, {} Hz",
        grid.width(),
        grid.length(),
        grid.height(),
        config.fluids.len(),
        initial.tick_rate
    );
    commands.insert_resource(FluidCoordinator::new(config.clone(), &grid));
    commands.insert_resource(config);
}

/// Apply queued gameplay commands before the tick reads the world.
pub fn apply_fluid_commands(
    mut grid: ResMut<VoxelGrid>,
    mut fluids: ResMut<FluidCoordinator>,
    mut adds: MessageReader<AddFluid>,
    mut removes: MessageReader<RemoveFluid>,
    mut solids: MessageReader<SetCellSolid>,
) {
    for cmd in solids.read() {
        if cmd.cell.index() >= grid.cell_count() || grid.is_solid(cmd.cell) == cmd.solid {
            continue;
        }
        grid.set_solid(cmd.cell, cmd.solid);
        let mut cell = fluids.at(&grid, cmd.cell);
        if cmd.solid {
            cell.on_cell_became_solid();
        } else {
            cell.on_cell_became_not_solid();
        }
    }

    for cmd in adds.read() {
        if cmd.cell.index() >= grid.cell_count() {
            warn!("AddFluid for {:?} outside the grid", cmd.cell);
            continue;
        }
        if !fluids.config().fluids.contains(cmd.fluid) {
            warn!("AddFluid of unknown fluid {:?}", cmd.fluid);
            continue;
        }
        fluids.at(&grid, cmd.cell).add_fluid(cmd.volume, cmd.fluid);
    }

    for cmd in removes.read() {
        if cmd.cell.index() >= grid.cell_count() {
            warn!("RemoveFluid for {:?} outside the grid", cmd.cell);
            continue;
        }
        if !fluids.config().fluids.contains(cmd.fluid) {
            warn!("RemoveFluid of unknown fluid {:?}", cmd.fluid);
            continue;
        }
        fluids.at(&grid, cmd.cell).remove_fluid(cmd.volume, cmd.fluid);
    }
}

#[profile(8)]
pub fn step_fluids(
    tick: Res<SimTick>,
    grid: Res<VoxelGrid>,
    mut fluids: ResMut<FluidCoordinator>,
    mut last: ResMut<LastFluidTick>,
) {
    use crate::profile_log;

    let report = fluids.tick(&grid);
    profile_log!(tick, "[FLUID] Tick: {} | read {} | stabilized {} | merges {} | splits {} | unstable {}",
        tick.0, report.groups_read, report.groups_stabilized, report.merges, report.splits, fluids.unstable().len());
    if !report.resynced_after.is_empty() {
        warn!("Fluid tick {} resynced after {:?}", tick.0, report.resynced_after);
    }
    last.0 = report;
}

#[profile(4)]
pub fn step_fluid_sources(
    tick: Res<SimTick>,
    grid: Res<VoxelGrid>,
    sources: Res<FluidSources>,
    mut fluids: ResMut<FluidCoordinator>,
) {
    if sources.is_empty() {
        return;
    }
    let flow = sources.step(&mut fluids, &grid);
    if flow.added > 0 || flow.removed > 0 {
        debug!("Tick {}: sources added {} removed {}", tick.0, flow.added, flow.removed);
    }
}

pub fn emit_fluid_messages(
    fluids: Res<FluidCoordinator>,
    last: Res<LastFluidTick>,
    mut changed: MessageWriter<CellFluidChanged>,
    mut mist: MessageWriter<MistSpawned>,
) {
    for &cell in &last.0.changed_cells {
        changed.write(CellFluidChanged { cell, total_volume: fluids.store().total_volume(cell) });
    }
    for &(cell, fluid) in &last.0.mist_spawned {
        mist.write(MistSpawned { cell, fluid });
    }
}

/// Turn frozen cells solid and push out whatever else was in them.
pub fn apply_freezing(
    mut grid: ResMut<VoxelGrid>,
    mut fluids: ResMut<FluidCoordinator>,
    mut last: ResMut<LastFluidTick>,
    mut froze: MessageWriter<FluidFroze>,
) {
    for frozen in std::mem::take(&mut last.0.frozen) {
        grid.set_solid(frozen.cell, true);
        fluids.at(&grid, frozen.cell).on_cell_became_solid();
        froze.write(FluidFroze { cell: frozen.cell, fluid: frozen.fluid, volume: frozen.volume });
    }
}

pub fn update_floating(
    mut commands: Commands,
    fluids: Res<FluidCoordinator>,
    query: Query<(Entity, &Buoyant, Has<Floating>)>,
) {
    for (entity, buoyant, floating) in query.iter() {
        let floats = fluids.floats(buoyant.cell, buoyant.density);
        if floats && !floating {
            commands.entity(entity).insert(Floating);
        } else if !floats && floating {
            commands.entity(entity).remove::<Floating>();
        }
    }
}
