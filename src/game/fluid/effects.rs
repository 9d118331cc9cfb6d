use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::coordinator::FluidCoordinator;
use super::types::{FluidTypeId, GroupId, Volume};
use crate::game::fixed_math::FixedNum;
use crate::game::grid::{CellId, VoxelGrid};

/// Short-lived spray above a freshly wetted open surface. Not conserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistCloud {
    pub fluid: FluidTypeId,
    pub ticks_left: u16,
}

/// Fluid removed from the simulation because it froze in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrozenCell {
    pub cell: CellId,
    pub fluid: FluidTypeId,
    pub volume: Volume,
}

/// An actor or item that can float. `density` is compared against the fluids
/// in `cell`.
#[derive(Component, Debug, Clone, Copy, Reflect)]
pub struct Buoyant {
    pub cell: CellId,
    #[reflect(ignore)]
    pub density: FixedNum,
}

/// Marker present while a [`Buoyant`] entity floats.
#[derive(Component, Debug, Clone, Copy, Default, Reflect)]
pub struct Floating;

impl FluidCoordinator {
    pub(crate) fn decay_mist(&mut self) {
        let store = &self.store;
        self.mist.retain(|&cell, cloud| {
            cloud.ticks_left = cloud.ticks_left.saturating_sub(1);
            cloud.ticks_left > 0 && store.is_empty(cell)
        });
    }

    pub(crate) fn spawn_mist(&mut self, grid: &VoxelGrid) {
        for (cell, fluid) in std::mem::take(&mut self.wetted) {
            let duration = self.config.fluids.get(fluid).mist_duration;
            if duration == 0 || self.store.is_empty(cell) {
                continue;
            }
            let Some(above) = grid.above(cell) else { continue };
            if grid.is_solid(above) || !self.store.is_empty(above) {
                continue;
            }
            self.mist.insert(above, MistCloud { fluid, ticks_left: duration });
            self.report.mist_spawned.push((above, fluid));
        }
    }

    /// Freeze full surface cells of a group that are colder than its fluid's
    /// freezing point. The frozen volume leaves the simulation.
    pub(crate) fn freeze_surface(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get(&id) else { return };
        if !group.state.is_active() {
            return;
        }
        let fluid = group.fluid;
        let Some(freezing_point) = self.config.fluids.get(fluid).freezing_point else { return };
        let max = self.config.max_cell_volume;

        let freezing: Vec<CellId> = group
            .drain
            .cells()
            .iter()
            .copied()
            .filter(|&cell| {
                grid.temperature(cell) < freezing_point
                    && self.store.total_volume(cell) >= max
                    && grid.above(cell).is_some_and(|above| !grid.is_solid(above) && self.store.is_empty(above))
            })
            .collect();

        for cell in freezing {
            let Some(entry) = self.store.take_entry(cell, fluid) else { continue };
            self.unbind(cell, id);
            self.refresh_fill_around(grid, id, cell);
            self.mark_unstable(id);
            self.dirty.insert(cell);
            self.report.frozen.push(FrozenCell { cell, fluid, volume: entry.volume });
        }
    }

    /// Whether something of `density` floats in `cell`.
    pub fn floats(&self, cell: CellId, density: FixedNum) -> bool {
        self.store.denser_volume(cell, density, &self.config.fluids) >= self.config.float_threshold
    }
}
