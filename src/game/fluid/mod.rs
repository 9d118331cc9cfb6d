/// Fluid simulation - liquids flowing through the voxel grid.
///
/// This module is organized into:
/// - **types**: Identifiers, fluid definitions and group states
/// - **store**: Per-cell fluid inventory
/// - **queue**: Fill and drain flow queues with batched deltas
/// - **group**: Fluid groups and the parallel read step
/// - **coordinator**: Group arena and the per-tick pipeline
/// - **steps**: Sequential write, after-write, split and merge phases
/// - **mutation**: `CellFluids`, the entry point for external changes
/// - **effects**: Mist, freezing and floating
/// - **source**: Springs and drains
/// - **invariants**: Ownership validation and resync
/// - **persistence**: Snapshots and save files
/// - **events** / **systems**: Bevy messages and systems

use bevy::prelude::*;

pub mod coordinator;
pub mod effects;
pub mod events;
pub mod group;
pub mod invariants;
pub mod mutation;
pub mod persistence;
pub mod queue;
pub mod source;
pub mod steps;
pub mod store;
pub mod systems;
pub mod types;

pub use coordinator::{FluidCoordinator, TickReport};
pub use effects::{Buoyant, Floating, FrozenCell, MistCloud};
pub use events::*;
pub use group::FluidGroup;
pub use invariants::FluidError;
pub use mutation::CellFluids;
pub use persistence::{load_fluids, save_fluids, FluidSnapshot};
pub use source::{FluidSource, FluidSources};
pub use store::{CellFluidStore, FluidEntry};
pub use systems::{LastFluidTick, SimTick};
pub use types::{FluidType, FluidTypeId, FluidTypes, GroupId, GroupState, Volume};

#[cfg(test)]
mod tests;

#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum FluidSet {
    Commands, // Gameplay commands into the world
    Tick,     // Coordinator pipeline and sources
    Effects,  // Messages, freezing, floating
}

pub struct FluidPlugin;

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SimTick>();
        app.init_resource::<FluidSources>();
        app.init_resource::<LastFluidTick>();
        app.register_type::<SimTick>();

        app.add_message::<AddFluid>();
        app.add_message::<RemoveFluid>();
        app.add_message::<SetCellSolid>();
        app.add_message::<CellFluidChanged>();
        app.add_message::<MistSpawned>();
        app.add_message::<FluidFroze>();

        app.configure_sets(FixedUpdate, (
            FluidSet::Commands,
            FluidSet::Tick,
            FluidSet::Effects,
        ).chain());

        app.add_systems(Startup, systems::init_fluid_coordinator);

        app.add_systems(FixedUpdate, (
            (systems::increment_sim_tick, systems::apply_fluid_commands)
                .chain()
                .in_set(FluidSet::Commands),
            (systems::step_fluids, systems::step_fluid_sources)
                .chain()
                .in_set(FluidSet::Tick),
            (systems::emit_fluid_messages, systems::apply_freezing, systems::update_floating)
                .chain()
                .in_set(FluidSet::Effects),
        ));
    }
}
