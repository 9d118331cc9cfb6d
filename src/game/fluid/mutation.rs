use bevy::prelude::*;

use super::coordinator::FluidCoordinator;
use super::store::FluidEntry;
use super::types::{FluidTypeId, GroupId, GroupState, Volume};
use crate::game::grid::{CellId, VoxelGrid};

/// Mutation handle for the fluids of one cell, obtained from
/// [`FluidCoordinator::at`].
///
/// Every external change to fluid goes through here so that entry ownership,
/// group membership and fill sets stay consistent.
pub struct CellFluids<'a> {
    coordinator: &'a mut FluidCoordinator,
    grid: &'a VoxelGrid,
    cell: CellId,
}

impl<'a> CellFluids<'a> {
    pub(crate) fn new(coordinator: &'a mut FluidCoordinator, grid: &'a VoxelGrid, cell: CellId) -> Self {
        Self { coordinator, grid, cell }
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn entries(&self) -> &[FluidEntry] {
        self.coordinator.store.entries(self.cell)
    }

    pub fn volume_of(&self, fluid: FluidTypeId) -> Volume {
        self.coordinator.store.volume_of(self.cell, fluid)
    }

    pub fn total_volume(&self) -> Volume {
        self.coordinator.store.total_volume(self.cell)
    }

    /// Add fluid, joining the largest adjacent group of the same fluid or
    /// starting a new one. Returns the owning group, or `None` when the cell
    /// is solid, the fluid is unknown or `volume` is zero.
    pub fn add_fluid(&mut self, volume: Volume, fluid: FluidTypeId) -> Option<GroupId> {
        self.coordinator.add_fluid_at(self.grid, self.cell, fluid, volume)
    }

    /// Remove up to `volume`. Split detection for the owner is deferred to
    /// the next tick's split phase. Returns what was removed.
    pub fn remove_fluid(&mut self, volume: Volume, fluid: FluidTypeId) -> Volume {
        self.coordinator.remove_fluid_at(self.grid, self.cell, fluid, volume)
    }

    /// Like [`CellFluids::remove_fluid`] but splits or destroys the owner
    /// right away. For callers running outside the tick pipeline.
    pub fn remove_fluid_synchronous(&mut self, volume: Volume, fluid: FluidTypeId) -> Volume {
        let owner = self.coordinator.store.owner(self.cell, fluid);
        let removed = self.coordinator.remove_fluid_at(self.grid, self.cell, fluid, volume);
        if let Some(owner) = owner {
            self.coordinator.split_group(self.grid, owner);
            self.coordinator.destroy_if_empty(owner);
        }
        removed
    }

    pub fn resolve_overfull(&mut self) {
        self.coordinator.resolve_overfull_at(self.grid, self.cell);
    }

    /// Call after the grid marked the cell solid.
    pub fn on_cell_became_solid(&mut self) {
        self.coordinator.evict_from_solid(self.grid, self.cell);
    }

    /// Call after the grid marked the cell open.
    pub fn on_cell_became_not_solid(&mut self) {
        self.coordinator.dirty.insert(self.cell);
        self.coordinator.wake_around(self.grid, self.cell);
    }
}

impl FluidCoordinator {
    pub(crate) fn add_fluid_at(&mut self, grid: &VoxelGrid, cell: CellId, fluid: FluidTypeId, volume: Volume) -> Option<GroupId> {
        if volume == 0 {
            return None;
        }
        if !self.config.fluids.contains(fluid) {
            warn!("Ignoring {} of unknown fluid {:?} added to {:?}", volume, fluid, cell);
            return None;
        }
        if grid.is_solid(cell) {
            warn!("Ignoring {} of {:?} added to solid {:?}", volume, fluid, cell);
            return None;
        }

        self.dirty.insert(cell);
        self.mist.remove(&cell);

        if let Some(owner) = self.store.owner(cell, fluid) {
            self.store.add_volume(cell, fluid, volume, owner);
            self.refresh_fill_around(grid, owner, cell);
            self.mark_unstable(owner);
            self.wake_around(grid, cell);
            return Some(owner);
        }

        let mut adjacent: Vec<GroupId> = grid
            .adjacent(cell)
            .iter()
            .filter_map(|&n| self.store.owner(n, fluid))
            .collect();
        adjacent.sort_unstable();
        adjacent.dedup();

        let joined = adjacent
            .iter()
            .copied()
            .max_by(|a, b| {
                let size = |id: &GroupId| self.groups.get(id).map_or(0, |g| g.drain.len());
                size(a).cmp(&size(b)).then(b.cmp(a))
            });
        let target = match joined {
            Some(id) => id,
            None => self.create_group(fluid),
        };

        self.store.add_volume(cell, fluid, volume, target);
        self.bind(cell, target);
        self.wetted.push((cell, fluid));

        let mut survivor = target;
        for other in adjacent {
            if other != target {
                survivor = self.merge_groups(grid, survivor, other);
            }
        }
        self.refresh_fill_around(grid, survivor, cell);
        self.mark_unstable(survivor);
        self.wake_around(grid, cell);
        Some(survivor)
    }

    pub(crate) fn remove_fluid_at(&mut self, grid: &VoxelGrid, cell: CellId, fluid: FluidTypeId, volume: Volume) -> Volume {
        let Some(entry) = self.store.entry(cell, fluid).copied() else { return 0 };
        let owner = entry.group;
        let removal = self.store.remove_volume(cell, fluid, volume.min(entry.volume));
        if removal.removed == 0 {
            return 0;
        }

        if removal.emptied.is_some() {
            self.unbind(cell, owner);
        }
        self.dirty.insert(cell);
        self.refresh_fill_around(grid, owner, cell);
        self.mark_unstable(owner);
        self.wake_around(grid, cell);

        if let Some(group) = self.groups.get(&owner) {
            if group.drain.len() == 0 && group.held_volume() <= 0 {
                self.destroy_if_empty(owner);
            }
        }
        removal.removed
    }

    /// Resolve every cell scheduled as overfull.
    pub(crate) fn resolve_pending_overfull(&mut self, grid: &VoxelGrid) {
        // Displacement can push other cells over, so keep going until quiet
        loop {
            let pending = self.store.take_overfull();
            if pending.is_empty() {
                break;
            }
            for cell in pending {
                self.resolve_overfull_at(grid, cell);
            }
        }
    }

    /// Displace lighter fluids out of an overfull cell into their groups'
    /// excess, lightest first, until the cell fits.
    pub(crate) fn resolve_overfull_at(&mut self, grid: &VoxelGrid, cell: CellId) {
        self.store.unschedule_overfull(cell);
        let max = self.config.max_cell_volume;
        let total = self.store.total_volume(cell);
        if total <= max {
            return;
        }
        let mut over = total - max;

        let mut entries: Vec<FluidEntry> = self.store.entries(cell).to_vec();
        entries.sort_by(|a, b| {
            let (da, db) = (self.config.fluids.density(a.fluid), self.config.fluids.density(b.fluid));
            da.cmp(&db).then(a.fluid.cmp(&b.fluid))
        });

        for entry in entries {
            if over == 0 {
                break;
            }
            let displaced = entry.volume.min(over);
            let removal = self.store.remove_volume(cell, entry.fluid, displaced);
            over -= removal.removed;

            if let Some(group) = self.groups.get_mut(&entry.group) {
                group.excess += removal.removed as i64;
            }
            if removal.emptied.is_some() {
                self.unbind(cell, entry.group);
            }
            self.refresh_fill_around(grid, entry.group, cell);
            self.mark_unstable(entry.group);
            self.dirty.insert(cell);

            let stranded = self
                .groups
                .get(&entry.group)
                .is_some_and(|g| g.drain.len() == 0 && g.fill.len() == 0);
            if stranded {
                self.dissolve_or_destroy(cell, entry.group);
            }
        }
    }

    /// A group with no cells and nowhere to flow folds into the lightest
    /// denser group still present in `cell`.
    fn dissolve_or_destroy(&mut self, cell: CellId, id: GroupId) {
        let Some(group) = self.groups.get(&id) else { return };
        let (fluid, density, held) = (group.fluid, group.density, group.excess.max(0) as Volume);

        let host = self
            .store
            .entries(cell)
            .iter()
            .filter(|e| self.config.fluids.density(e.fluid) > density)
            .min_by(|a, b| {
                self.config
                    .fluids
                    .density(a.fluid)
                    .cmp(&self.config.fluids.density(b.fluid))
                    .then(a.fluid.cmp(&b.fluid))
            })
            .map(|e| e.group);

        match host {
            Some(host) if self.is_active(host) => {
                let dissolved: Vec<_> = self
                    .groups
                    .get_mut(&id)
                    .map(|g| {
                        g.excess = 0;
                        g.state = GroupState::Dissolved(host);
                        std::mem::take(&mut g.dissolved).into_iter().collect()
                    })
                    .unwrap_or_default();
                if let Some(host_group) = self.groups.get_mut(&host) {
                    *host_group.dissolved.entry(fluid).or_insert(0) += held;
                    for (other, volume) in dissolved {
                        *host_group.dissolved.entry(other).or_insert(0) += volume;
                    }
                }
                self.unstable.remove(&id);
                self.mark_unstable(host);
                self.report.dissolved += 1;
                debug!("{:?} dissolved {} into {:?}", id, held, host);
            }
            _ => {
                if let Some(group) = self.groups.get_mut(&id) {
                    group.state = GroupState::Destroyed;
                    group.excess = 0;
                }
                self.unstable.remove(&id);
                self.report.destroyed += 1;
                debug!("{:?} destroyed with {} displaced and nowhere to go", id, held);
            }
        }
    }

    /// Push every fluid out of a cell that just turned solid. With the piston
    /// enabled the fluid becomes excess of its group, otherwise it is deleted.
    pub(crate) fn evict_from_solid(&mut self, grid: &VoxelGrid, cell: CellId) {
        let entries: Vec<FluidEntry> = self.store.entries(cell).to_vec();
        self.store.unschedule_overfull(cell);
        self.mist.remove(&cell);
        self.dirty.insert(cell);

        for entry in entries {
            if self.store.take_entry(cell, entry.fluid).is_none() {
                continue;
            }
            self.unbind(cell, entry.group);
            if self.config.fluid_piston_enabled {
                if let Some(group) = self.groups.get_mut(&entry.group) {
                    group.excess += entry.volume as i64;
                }
            }
            self.refresh_fill_around(grid, entry.group, cell);
            self.mark_unstable(entry.group);
            if !self.config.fluid_piston_enabled {
                self.destroy_if_empty(entry.group);
            }
        }
        self.wake_around(grid, cell);
    }
}
