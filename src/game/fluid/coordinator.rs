use bevy::prelude::*;
use bevy::tasks::{ComputeTaskPool, TaskPool};
use std::collections::{BTreeMap, BTreeSet};

use super::effects::{FrozenCell, MistCloud};
use super::group::{FluidGroup, ReadContext};
use super::mutation::CellFluids;
use super::store::CellFluidStore;
use super::types::{FluidTypeId, GroupId, GroupState, Volume};
use crate::game::config::FluidSimConfig;
use crate::game::grid::{CellId, VoxelGrid};

/// Summary of one [`FluidCoordinator::tick`].
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub groups_read: usize,
    pub groups_stabilized: usize,
    pub groups_created: usize,
    pub splits: usize,
    pub merges: usize,
    pub destroyed: usize,
    pub dissolved: usize,
    pub seeped: Volume,
    /// Phases after which ownership had to be rebuilt, in order.
    pub resynced_after: Vec<&'static str>,
    /// Cells whose fluid content changed since the previous tick, ascending.
    pub changed_cells: Vec<CellId>,
    pub mist_spawned: Vec<(CellId, FluidTypeId)>,
    pub frozen: Vec<FrozenCell>,
}

/// Area-level owner of every fluid group and of the cell store.
///
/// Drives the per-tick pipeline: the read phase runs on the compute task pool,
/// everything that mutates cells runs sequentially on the calling thread.
/// Groups are kept in a `BTreeMap` so every phase visits them in the same
/// order on every machine.
#[derive(Resource, Debug)]
pub struct FluidCoordinator {
    pub(crate) config: FluidSimConfig,
    pub(crate) store: CellFluidStore,
    pub(crate) groups: BTreeMap<GroupId, FluidGroup>,
    pub(crate) unstable: BTreeSet<GroupId>,
    pub(crate) next_group_id: u32,
    pub(crate) dirty: BTreeSet<CellId>,
    pub(crate) wetted: Vec<(CellId, FluidTypeId)>,
    pub(crate) mist: BTreeMap<CellId, MistCloud>,
    pub(crate) report: TickReport,
}

impl FluidCoordinator {
    pub fn new(config: FluidSimConfig, grid: &VoxelGrid) -> Self {
        let store = CellFluidStore::new(grid.cell_count(), config.max_cell_volume);
        Self {
            config,
            store,
            groups: BTreeMap::new(),
            unstable: BTreeSet::new(),
            next_group_id: 1,
            dirty: BTreeSet::new(),
            wetted: Vec::new(),
            mist: BTreeMap::new(),
            report: TickReport::default(),
        }
    }

    /// Mutation handle for one cell.
    pub fn at<'a>(&'a mut self, grid: &'a VoxelGrid, cell: CellId) -> CellFluids<'a> {
        CellFluids::new(self, grid, cell)
    }

    pub fn config(&self) -> &FluidSimConfig {
        &self.config
    }

    pub fn store(&self) -> &CellFluidStore {
        &self.store
    }

    pub fn group(&self, id: GroupId) -> Option<&FluidGroup> {
        self.groups.get(&id)
    }

    /// Every resident group, including terminal ones not yet purged.
    pub fn groups(&self) -> impl Iterator<Item = &FluidGroup> + '_ {
        self.groups.values()
    }

    pub fn active_groups(&self) -> impl Iterator<Item = &FluidGroup> + '_ {
        self.groups.values().filter(|g| g.state.is_active())
    }

    pub fn group_at(&self, cell: CellId, fluid: FluidTypeId) -> Option<&FluidGroup> {
        self.store.owner(cell, fluid).and_then(|id| self.groups.get(&id))
    }

    pub fn unstable(&self) -> &BTreeSet<GroupId> {
        &self.unstable
    }

    pub fn is_settled(&self) -> bool {
        self.unstable.is_empty() && self.store.pending_overfull().is_empty()
    }

    /// Fluid in cells plus every active group's excess and dissolved volume.
    pub fn total_volume(&self) -> i64 {
        self.store.stored_volume() as i64
            + self.active_groups().map(FluidGroup::held_volume).sum::<i64>()
    }

    pub fn total_volume_of(&self, fluid: FluidTypeId) -> i64 {
        let stored: i64 = self
            .store
            .occupied()
            .flat_map(|(_, entries)| entries.iter())
            .filter(|e| e.fluid == fluid)
            .map(|e| e.volume as i64)
            .sum();
        let held: i64 = self
            .active_groups()
            .map(|g| {
                let excess = if g.fluid == fluid { g.excess } else { 0 };
                excess + g.dissolved.get(&fluid).map_or(0, |&v| v as i64)
            })
            .sum();
        stored + held
    }

    /// Advance every unstable group by one tick.
    pub fn tick(&mut self, grid: &VoxelGrid) -> TickReport {
        self.report = TickReport::default();
        self.decay_mist();

        self.resolve_pending_overfull(grid);
        for id in &self.unstable {
            if let Some(group) = self.groups.get_mut(id) {
                group.woken = false;
            }
        }

        self.read_phase(grid);

        let order: Vec<GroupId> = self.unstable.iter().copied().collect();
        for &id in &order {
            self.write_step(grid, id);
        }

        // Drop groups that died during the write before anything else touches them
        let destroyed: Vec<GroupId> = self
            .unstable
            .iter()
            .copied()
            .filter(|id| self.groups.get(id).is_none_or(|g| g.state == GroupState::Destroyed))
            .collect();
        for id in destroyed {
            self.unstable.remove(&id);
        }

        self.check_invariants(grid, "write");

        self.after_write_phase(grid, &order);
        self.check_invariants(grid, "after-write");
        self.split_phase(grid, &order);
        self.check_invariants(grid, "split");
        self.merge_phase(grid, &order);
        self.check_invariants(grid, "merge");

        self.settle(grid);
        std::mem::take(&mut self.report)
    }

    fn read_phase(&mut self, grid: &VoxelGrid) {
        let Self { store, groups, unstable, config, report, .. } = self;
        let (store, config) = (&*store, &*config);
        let ctx = ReadContext { store, grid, config };

        let mut batch: Vec<&mut FluidGroup> = groups
            .iter_mut()
            .filter(|(id, group)| unstable.contains(*id) && group.state.is_active())
            .map(|(_, group)| group)
            .collect();
        report.groups_read = batch.len();

        if batch.len() <= config.read_batch_size {
            for group in batch.iter_mut() {
                group.read_step(&ctx);
            }
            return;
        }

        let pool = ComputeTaskPool::get_or_init(TaskPool::default);
        pool.scope(|scope| {
            for chunk in batch.chunks_mut(config.read_batch_size) {
                let ctx = &ctx;
                scope.spawn(async move {
                    for group in chunk.iter_mut() {
                        group.read_step(ctx);
                    }
                });
            }
        });
    }

    /// Purge terminal groups, put quiet groups to sleep and wake whatever
    /// sits next to cells that changed.
    fn settle(&mut self, grid: &VoxelGrid) {
        self.cleanup_merged();

        let quiet: Vec<GroupId> = self
            .unstable
            .iter()
            .copied()
            .filter(|id| {
                self.groups.get(id).is_some_and(|g| {
                    !g.woken
                        && !g.plan.moved()
                        && g.plan.new_empty_adjacents.is_empty()
                        && g.departed.is_empty()
                        && g.contacts.is_empty()
                })
            })
            .collect();
        for id in quiet {
            if let Some(group) = self.groups.get_mut(&id) {
                group.state = GroupState::Stable;
            }
            self.unstable.remove(&id);
            self.report.groups_stabilized += 1;
        }

        let dirty = std::mem::take(&mut self.dirty);
        for &cell in &dirty {
            self.wake_around(grid, cell);
        }
        self.report.changed_cells = dirty.into_iter().collect();
    }

    /// Remove every merged, dissolved or destroyed group from the collection.
    pub fn cleanup_merged(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, group| group.state.is_active());
        self.unstable.retain(|id| self.groups.contains_key(id));
        before - self.groups.len()
    }

    pub(crate) fn create_group(&mut self, fluid: FluidTypeId) -> GroupId {
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.groups.insert(id, FluidGroup::new(id, fluid, &self.config));
        self.unstable.insert(id);
        self.report.groups_created += 1;
        id
    }

    pub(crate) fn mark_unstable(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(&id) {
            if group.state.is_active() {
                group.state = GroupState::Unstable;
                group.woken = true;
                self.unstable.insert(id);
            }
        }
    }

    /// Make `id` the owner of the cell's entry and a member of its drain set.
    /// The entry must already exist.
    pub(crate) fn bind(&mut self, cell: CellId, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else { return };
        self.store.set_owner(cell, group.fluid, id);
        group.drain.add_cell(cell);
        group.departed.remove(&cell);
    }

    /// Drop a cell from the drain set once its entry is gone or handed over.
    pub(crate) fn unbind(&mut self, cell: CellId, id: GroupId) {
        if let Some(group) = self.groups.get_mut(&id) {
            if group.drain.remove_cell(cell) {
                group.departed.insert(cell);
            }
        }
    }

    fn fill_qualifies(&self, grid: &VoxelGrid, group: &FluidGroup, cell: CellId) -> bool {
        if grid.is_solid(cell) {
            return false;
        }
        let level = self.store.level_for(cell, group.density, &self.config.fluids);
        if level >= self.config.max_cell_volume {
            return false;
        }
        if group.drain.len() == 0 {
            // A group without members keeps what it had and never grows.
            // Filling a cell of another group of the same fluid merges into it.
            return group.fill.contains(cell);
        }
        if self.store.owner(cell, group.fluid).is_some_and(|owner| owner != group.id) {
            return false;
        }
        group.drain.contains(cell) || grid.adjacent(cell).iter().any(|&n| group.drain.contains(n))
    }

    pub(crate) fn refresh_fill_cell(&mut self, grid: &VoxelGrid, id: GroupId, cell: CellId) {
        let Some(group) = self.groups.get(&id) else { return };
        if !group.state.is_active() {
            return;
        }
        let qualifies = self.fill_qualifies(grid, group, cell);
        if let Some(group) = self.groups.get_mut(&id) {
            if qualifies {
                group.fill.add_cell(cell);
            } else {
                group.fill.remove_cell(cell);
            }
        }
    }

    pub(crate) fn refresh_fill_around(&mut self, grid: &VoxelGrid, id: GroupId, cell: CellId) {
        self.refresh_fill_cell(grid, id, cell);
        for neighbour in grid.adjacent(cell) {
            self.refresh_fill_cell(grid, id, neighbour);
        }
    }

    /// Recompute the whole fill set from the members.
    pub(crate) fn rebuild_fill(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else { return };
        let mut candidates: BTreeSet<CellId> = group.fill.cells().clone();
        if group.drain.len() > 0 {
            group.fill.clear();
            for &cell in group.drain.cells() {
                candidates.insert(cell);
                candidates.extend(grid.adjacent(cell));
            }
        }
        for cell in candidates {
            self.refresh_fill_cell(grid, id, cell);
        }
    }

    /// Refresh and wake every group present in or next to `cell`.
    pub(crate) fn wake_around(&mut self, grid: &VoxelGrid, cell: CellId) {
        let mut nearby: BTreeSet<GroupId> = BTreeSet::new();
        for neighbour in std::iter::once(cell).chain(grid.adjacent(cell)) {
            nearby.extend(self.store.entries(neighbour).iter().map(|e| e.group));
        }
        for id in nearby {
            self.refresh_fill_cell(grid, id, cell);
            self.mark_unstable(id);
        }
    }

    /// Follow merge links to the group that finally absorbed `id`.
    pub(crate) fn resolve(&self, mut id: GroupId) -> GroupId {
        while let Some(GroupState::Merged(survivor)) = self.groups.get(&id).map(|g| g.state) {
            id = survivor;
        }
        id
    }

    pub(crate) fn check_invariants(&mut self, grid: &VoxelGrid, phase: &'static str) {
        if let Err(err) = self.validate() {
            if self.config.strict_invariants {
                panic!("fluid invariant broken after {phase}: {err}");
            }
            error!("Fluid invariant broken after {}: {}; resyncing", phase, err);
            self.resync(grid);
            self.report.resynced_after.push(phase);
        }
    }

    /// Mist clouds currently hanging over a cell.
    pub fn mist_at(&self, cell: CellId) -> Option<&MistCloud> {
        self.mist.get(&cell)
    }

    pub fn mist(&self) -> impl Iterator<Item = (CellId, &MistCloud)> + '_ {
        self.mist.iter().map(|(&cell, cloud)| (cell, cloud))
    }
}
