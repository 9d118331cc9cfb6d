//! Sequential phases of a fluid tick.
//!
//! Everything here mutates the shared cell store, so it runs on the
//! coordinating thread only, one group at a time, in group id order.

use bevy::prelude::*;
use std::collections::BTreeSet;

use super::coordinator::FluidCoordinator;
use super::group::connected_components;
use super::types::{GroupId, GroupState, Volume};
use crate::game::fixed_math::scale_volume;
use crate::game::grid::{CellId, VoxelGrid};

impl FluidCoordinator {
    /// Commit one group's staged deltas and update ownership and fill sets.
    pub(crate) fn write_step(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else { return };
        if !group.state.is_active() {
            group.fill.reset_snapshot();
            group.drain.reset_snapshot();
            return;
        }

        let fluid = group.fluid;
        let filled = group.fill.apply_delta(&mut self.store, fluid, id);
        let drained = group.drain.apply_delta(&mut self.store, fluid);
        group.excess += group.plan.excess_delta;

        let mut touched: BTreeSet<CellId> = BTreeSet::new();
        for fill in &filled {
            touched.insert(fill.cell);
            if fill.owner == id {
                if fill.created {
                    group.drain.add_cell(fill.cell);
                    group.departed.remove(&fill.cell);
                    self.wetted.push((fill.cell, fluid));
                }
            } else {
                group.plan.merge_candidates.insert(fill.cell);
            }
        }

        let mut orphaned = Vec::new();
        for (cell, removal) in drained {
            touched.insert(cell);
            match removal.emptied {
                Some(owner) if owner == id => {
                    group.drain.remove_cell(cell);
                    group.departed.insert(cell);
                }
                Some(owner) => orphaned.push((cell, owner)),
                None => {}
            }
        }
        for (cell, owner) in orphaned {
            warn!("Group {:?} drained {:?} owned by {:?}", id, cell, owner);
            self.unbind(cell, owner);
            self.mark_unstable(owner);
        }

        let mut refresh: BTreeSet<CellId> = group_adjacents(self, id);
        for &cell in &touched {
            refresh.insert(cell);
            refresh.extend(grid.adjacent(cell));
            self.mist.remove(&cell);
        }
        for cell in refresh {
            self.refresh_fill_cell(grid, id, cell);
        }
        self.dirty.extend(touched);
    }

    pub(crate) fn after_write_phase(&mut self, grid: &VoxelGrid, order: &[GroupId]) {
        if self.config.diagonal_seep_enabled {
            for &id in order {
                self.seep(grid, id);
            }
        }
        self.resolve_pending_overfull(grid);
        self.spawn_mist(grid);
        for &id in order {
            self.freeze_surface(grid, id);
        }
    }

    /// Trickle fluid from the group's highest cell through a diagonal pinch,
    /// a diagonal neighbour whose two bridging face neighbours are solid.
    fn seep(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get(&id) else { return };
        if !group.state.is_active() {
            return;
        }
        let Some(source) = group.plan.highest_drain else { return };
        if !group.drain.contains(source) {
            return;
        }
        let (fluid, density, viscosity) = (group.fluid, group.density, group.viscosity);

        let own = self.store.volume_of(source, fluid);
        let max = self.config.max_cell_volume;
        let types = &self.config.fluids;
        let source_level = self.store.level_for(source, density, types);
        let Some(factor) = self.config.diagonal_seep_modifier.checked_div(density) else { return };
        let seep_cap = scale_volume(max, factor);

        let target = grid.horizontal_diagonals(source).into_iter().find_map(|(diagonal, bridges)| {
            if grid.is_solid(diagonal) || !bridges.iter().all(|&b| grid.is_solid(b)) {
                return None;
            }
            let target_level = self.store.level_for(diagonal, density, types);
            if target_level >= source_level {
                return None;
            }
            let amount = viscosity
                .min((source_level - target_level) / 2)
                .min(max.saturating_sub(target_level))
                .min(seep_cap)
                .min(own);
            (amount > 0).then_some((diagonal, amount))
        });

        if let Some((diagonal, amount)) = target {
            let removed = self.remove_fluid_at(grid, source, fluid, amount);
            self.add_fluid_at(grid, diagonal, fluid, removed);
            self.report.seeped += removed;
        }
    }

    pub(crate) fn split_phase(&mut self, grid: &VoxelGrid, order: &[GroupId]) {
        for &id in order {
            if !self.is_active(id) {
                continue;
            }
            self.reemerge_dissolved(grid, id);
            self.split_group(grid, id);
            self.destroy_if_empty(id);
        }
        // Re-emerged fluid only counts denser layers when it picks a cell
        self.resolve_pending_overfull(grid);
    }

    /// Put dissolved lighter fluids back into the world wherever the group's
    /// cells, or the cells right above them, have room.
    fn reemerge_dissolved(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get(&id) else { return };
        if group.dissolved.is_empty() {
            return;
        }
        let mut members: Vec<CellId> = group.drain.cells().iter().copied().collect();
        members.sort_by(|a, b| grid.elevation(*b).cmp(&grid.elevation(*a)).then(a.cmp(b)));
        let dissolved: Vec<(_, Volume)> = group.dissolved.iter().map(|(&f, &v)| (f, v)).collect();

        for (fluid, mut volume) in dissolved {
            let density = self.config.fluids.density(fluid);
            'members: for &member in &members {
                for cell in std::iter::once(member).chain(grid.above(member)) {
                    if volume == 0 {
                        break 'members;
                    }
                    if grid.is_solid(cell) {
                        continue;
                    }
                    let level = self.store.level_for(cell, density, &self.config.fluids);
                    let amount = volume.min(self.config.max_cell_volume.saturating_sub(level));
                    if amount > 0 && self.add_fluid_at(grid, cell, fluid, amount).is_some() {
                        volume -= amount;
                    }
                }
            }

            if let Some(group) = self.groups.get_mut(&id) {
                if volume == 0 {
                    group.dissolved.remove(&fluid);
                } else {
                    group.dissolved.insert(fluid, volume);
                }
            }
        }
    }

    /// Split off every component but the largest. The retained group keeps
    /// the excess and any dissolved fluid.
    ///
    /// Cells wetted this tick that were left out of the planned components
    /// join the first component they touch; the other components they touch
    /// are remembered as contacts and merged back on the next tick.
    pub(crate) fn split_group(&mut self, grid: &VoxelGrid, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else { return };
        let departed = std::mem::take(&mut group.departed);
        let planned = std::mem::take(&mut group.plan.future_groups);
        if departed.is_empty() && planned.is_empty() {
            return;
        }

        let members = group.drain.cells();
        let still_valid = !planned.is_empty() && planned.iter().flatten().all(|cell| members.contains(cell));
        let mut contacts: Vec<(usize, CellId)> = Vec::new();
        let mut components = if still_valid {
            let mut components = planned;
            let leftover: Vec<CellId> = members
                .iter()
                .copied()
                .filter(|cell| !components.iter().any(|c| c.contains(cell)))
                .collect();
            for cell in leftover {
                let touching: Vec<usize> = (0..components.len())
                    .filter(|&i| grid.adjacent(cell).iter().any(|n| components[i].contains(n)))
                    .collect();
                let Some(&home) = touching.first() else {
                    components.push(BTreeSet::from([cell]));
                    continue;
                };
                for &other in &touching[1..] {
                    for neighbour in grid.adjacent(cell) {
                        if components[other].contains(&neighbour) {
                            contacts.push((home, neighbour));
                        }
                    }
                }
                components[home].insert(cell);
            }
            components
        } else {
            connected_components(grid, departed.iter().copied(), |cell| members.contains(&cell))
        };
        if components.len() <= 1 {
            return;
        }

        let fluid = group.fluid;
        debug!("Splitting {:?} into {} groups", id, components.len());
        let mut ids = vec![id];
        for component in components.drain(1..) {
            let new_id = self.create_group(fluid);
            for &cell in &component {
                if let Some(group) = self.groups.get_mut(&id) {
                    group.drain.remove_cell(cell);
                    group.fill.remove_cell(cell);
                }
                self.bind(cell, new_id);
            }
            self.rebuild_fill(grid, new_id);
            self.report.splits += 1;
            ids.push(new_id);
        }
        for (home, cell) in contacts {
            if let Some(group) = self.groups.get_mut(&ids[home]) {
                group.contacts.insert(cell);
            }
        }
        self.rebuild_fill(grid, id);
        self.mark_unstable(id);
    }

    /// Destroy a group that has no members and nothing left to place.
    pub(crate) fn destroy_if_empty(&mut self, id: GroupId) {
        let Some(group) = self.groups.get_mut(&id) else { return };
        if !group.state.is_active() || group.drain.len() > 0 {
            return;
        }
        if group.excess > 0 && group.fill.len() > 0 {
            return;
        }
        if group.held_volume() != 0 {
            debug!("Destroying {:?} with {} unplaceable volume", id, group.held_volume());
        }
        group.state = GroupState::Destroyed;
        group.fill.clear();
        group.excess = 0;
        group.dissolved.clear();
        self.unstable.remove(&id);
        self.report.destroyed += 1;
    }

    pub(crate) fn merge_phase(&mut self, grid: &VoxelGrid, order: &[GroupId]) {
        for &id in order {
            let mut current = self.resolve(id);
            if !self.is_active(current) {
                continue;
            }

            let mut seen: BTreeSet<CellId> = BTreeSet::new();
            loop {
                let Some(group) = self.groups.get(&current) else { break };
                let fluid = group.fluid;
                let pending: Vec<CellId> = group
                    .plan
                    .new_empty_adjacents
                    .iter()
                    .chain(&group.plan.merge_candidates)
                    .copied()
                    .filter(|cell| !seen.contains(cell))
                    .collect();
                if pending.is_empty() {
                    break;
                }

                for cell in pending {
                    seen.insert(cell);
                    current = self.resolve(current);
                    let Some(owner) = self.store.owner(cell, fluid) else { continue };
                    if owner != current && self.is_active(owner) {
                        current = self.merge_groups(grid, current, owner);
                    }
                }
            }
        }
    }

    /// Merge two groups of the same fluid; the one with more member cells
    /// absorbs the other, ties going to the lower id. Returns the survivor.
    ///
    /// The absorbed group is left behind as `Merged(survivor)` until the next
    /// purge, so stale handles can still find where their cells went.
    pub fn merge_groups(&mut self, grid: &VoxelGrid, a: GroupId, b: GroupId) -> GroupId {
        let (Some(group_a), Some(group_b)) = (self.groups.get(&a), self.groups.get(&b)) else {
            return a;
        };
        if a == b || !group_a.state.is_active() || !group_b.state.is_active() || group_a.fluid != group_b.fluid {
            warn!("Refusing to merge {:?} ({:?}) with {:?} ({:?})", a, group_a.state, b, group_b.state);
            return a;
        }
        let (survivor, absorbed) = match group_a.drain.len().cmp(&group_b.drain.len()) {
            std::cmp::Ordering::Greater => (a, b),
            std::cmp::Ordering::Less => (b, a),
            std::cmp::Ordering::Equal => (a.min(b), a.max(b)),
        };

        let Some(mut gone) = self.groups.remove(&absorbed) else { return survivor };
        let fluid = gone.fluid;
        let gone_cells: Vec<CellId> = gone.drain.cells().iter().copied().collect();
        let gone_fill: Vec<CellId> = gone.fill.cells().iter().copied().collect();
        for &cell in &gone_cells {
            self.store.set_owner(cell, fluid, survivor);
        }

        if let Some(keeper) = self.groups.get_mut(&survivor) {
            for &cell in &gone_cells {
                keeper.drain.add_cell(cell);
            }
            keeper.excess += gone.excess;
            for (&dissolved, &volume) in &gone.dissolved {
                *keeper.dissolved.entry(dissolved).or_insert(0) += volume;
            }
            keeper.departed.append(&mut gone.departed);
            keeper.contacts.append(&mut gone.contacts);
            keeper.plan.new_empty_adjacents.append(&mut gone.plan.new_empty_adjacents);
            keeper.plan.merge_candidates.append(&mut gone.plan.merge_candidates);
            keeper.plan.future_groups.clear();
        }

        gone.drain.clear();
        gone.fill.clear();
        gone.excess = 0;
        gone.dissolved.clear();
        gone.state = GroupState::Merged(survivor);
        self.groups.insert(absorbed, gone);
        self.unstable.remove(&absorbed);

        for cell in gone_cells.iter().chain(&gone_fill) {
            self.refresh_fill_around(grid, survivor, *cell);
        }
        self.mark_unstable(survivor);
        self.report.merges += 1;
        survivor
    }

    pub(crate) fn is_active(&self, id: GroupId) -> bool {
        self.groups.get(&id).is_some_and(|g| g.state.is_active())
    }
}

/// New neighbours the read step found for a group.
fn group_adjacents(coordinator: &FluidCoordinator, id: GroupId) -> BTreeSet<CellId> {
    coordinator
        .groups
        .get(&id)
        .map(|g| g.plan.new_empty_adjacents.clone())
        .unwrap_or_default()
}
