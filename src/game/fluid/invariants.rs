use bevy::prelude::*;
use std::collections::BTreeSet;
use thiserror::Error;

use super::coordinator::FluidCoordinator;
use super::types::{FluidTypeId, GroupId, GroupState};
use crate::game::grid::{CellId, VoxelGrid};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FluidError {
    #[error("{cell:?} holds {fluid:?} owned by unknown group {owner:?}")]
    UnknownOwner { cell: CellId, fluid: FluidTypeId, owner: GroupId },

    #[error("{cell:?} holds {fluid:?} owned by {owner:?} which is {state:?}")]
    InactiveOwner { cell: CellId, fluid: FluidTypeId, owner: GroupId, state: GroupState },

    #[error("{cell:?} holds {fluid:?} owned by {owner:?} but the group does not list the cell")]
    MissingMember { cell: CellId, fluid: FluidTypeId, owner: GroupId },

    #[error("group {group:?} lists {cell:?} but the cell's entry is owned by {owner:?}")]
    StrayMember { group: GroupId, cell: CellId, owner: Option<GroupId> },

    #[error("group {group:?} of {fluid:?} owns an entry of {found:?} in {cell:?}")]
    FluidMismatch { group: GroupId, cell: CellId, fluid: FluidTypeId, found: FluidTypeId },

    #[error("unsupported fluid snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("snapshot refers to {cell:?} outside a grid of {cells} cells")]
    CellOutOfRange { cell: CellId, cells: usize },

    #[error("snapshot refers to unknown fluid {0:?}")]
    UnknownFluid(FluidTypeId),

    #[error("snapshot lists group {0:?} twice")]
    DuplicateGroup(GroupId),
}

impl FluidCoordinator {
    /// Check that every entry's owner lists the cell and every group's
    /// members are owned by it.
    pub fn validate(&self) -> Result<(), FluidError> {
        for (cell, entries) in self.store.occupied() {
            for entry in entries {
                let Some(group) = self.groups.get(&entry.group) else {
                    return Err(FluidError::UnknownOwner { cell, fluid: entry.fluid, owner: entry.group });
                };
                if !group.state.is_active() {
                    return Err(FluidError::InactiveOwner {
                        cell,
                        fluid: entry.fluid,
                        owner: entry.group,
                        state: group.state,
                    });
                }
                if group.fluid != entry.fluid {
                    return Err(FluidError::FluidMismatch {
                        group: group.id,
                        cell,
                        fluid: group.fluid,
                        found: entry.fluid,
                    });
                }
                if !group.drain.contains(cell) {
                    return Err(FluidError::MissingMember { cell, fluid: entry.fluid, owner: entry.group });
                }
            }
        }

        for group in self.groups.values() {
            for &cell in group.drain.cells() {
                let owner = self.store.owner(cell, group.fluid);
                if owner != Some(group.id) {
                    return Err(FluidError::StrayMember { group: group.id, cell, owner });
                }
            }
        }
        Ok(())
    }

    /// Rebuild ownership from the cell store.
    ///
    /// Entries keep their owner when it is an active group of the same fluid;
    /// anything else is adopted by a fresh group, and adjacent groups of one
    /// fluid are merged afterwards. Every group is woken.
    pub fn resync(&mut self, grid: &VoxelGrid) {
        warn!("Resyncing fluid ownership for {} groups", self.groups.len());
        for group in self.groups.values_mut() {
            group.drain.clear();
            group.departed.clear();
            group.plan = Default::default();
        }

        let occupied: Vec<(CellId, FluidTypeId, GroupId)> = self
            .store
            .occupied()
            .flat_map(|(cell, entries)| entries.iter().map(move |e| (cell, e.fluid, e.group)))
            .collect();

        let mut adopted: BTreeSet<CellId> = BTreeSet::new();
        for (cell, fluid, owner) in occupied {
            let keeps_owner = self
                .groups
                .get(&owner)
                .is_some_and(|g| g.state.is_active() && g.fluid == fluid);
            let owner = if keeps_owner {
                owner
            } else {
                adopted.insert(cell);
                self.create_group(fluid)
            };
            self.bind(cell, owner);
        }

        // Owners were kept as found, so one group may now cover several islands
        let ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for &id in &ids {
            if let Some(group) = self.groups.get_mut(&id) {
                group.departed = group.drain.cells().clone();
            }
            self.split_group(grid, id);
        }

        for cell in adopted {
            for neighbour in grid.adjacent(cell) {
                for entry in self.store.entries(neighbour).to_vec() {
                    let here = self.store.owner(cell, entry.fluid);
                    if let Some(here) = here {
                        let (a, b) = (self.resolve(here), self.resolve(entry.group));
                        if a != b && self.is_active(a) && self.is_active(b) {
                            self.merge_groups(grid, a, b);
                        }
                    }
                }
            }
        }

        let ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for id in ids {
            self.rebuild_fill(grid, id);
            self.destroy_if_empty(id);
            self.mark_unstable(id);
        }
    }
}
