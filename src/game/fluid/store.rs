use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;

use super::types::{FluidTypeId, FluidTypes, GroupId, Volume};
use crate::game::fixed_math::FixedNum;
use crate::game::grid::CellId;

/// One fluid present in one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluidEntry {
    pub fluid: FluidTypeId,
    pub volume: Volume,
    pub group: GroupId,
}

/// Per-cell fluid inventory.
///
/// Knows nothing about neighbours or groups beyond the owner recorded in each
/// entry. Group bookkeeping goes through the coordinator, which keeps entry
/// ownership and group membership in step.
#[derive(Clone, Debug, Default)]
pub struct CellFluidStore {
    cells: Vec<SmallVec<[FluidEntry; 2]>>,
    max_cell_volume: Volume,
    overfull: BTreeSet<CellId>,
}

/// Result of removing volume from an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Removal {
    pub removed: Volume,
    /// The entry reached zero and was dropped; its owner must unbind the cell.
    pub emptied: Option<GroupId>,
}

impl CellFluidStore {
    pub fn new(cell_count: usize, max_cell_volume: Volume) -> Self {
        Self {
            cells: vec![SmallVec::new(); cell_count],
            max_cell_volume,
            overfull: BTreeSet::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn max_cell_volume(&self) -> Volume {
        self.max_cell_volume
    }

    pub fn entries(&self, cell: CellId) -> &[FluidEntry] {
        &self.cells[cell.index()]
    }

    pub fn entry(&self, cell: CellId, fluid: FluidTypeId) -> Option<&FluidEntry> {
        self.cells[cell.index()].iter().find(|e| e.fluid == fluid)
    }

    pub fn volume_of(&self, cell: CellId, fluid: FluidTypeId) -> Volume {
        self.entry(cell, fluid).map_or(0, |e| e.volume)
    }

    pub fn owner(&self, cell: CellId, fluid: FluidTypeId) -> Option<GroupId> {
        self.entry(cell, fluid).map(|e| e.group)
    }

    pub fn total_volume(&self, cell: CellId) -> Volume {
        self.cells[cell.index()].iter().map(|e| e.volume).sum()
    }

    pub fn is_empty(&self, cell: CellId) -> bool {
        self.cells[cell.index()].is_empty()
    }

    /// Volume a fluid of `density` has to sit on top of: itself plus every
    /// fluid at least as dense. Lighter fluids are displaced, not stacked on.
    pub fn level_for(&self, cell: CellId, density: FixedNum, types: &FluidTypes) -> Volume {
        self.cells[cell.index()]
            .iter()
            .filter(|e| types.density(e.fluid) >= density)
            .map(|e| e.volume)
            .sum()
    }

    /// Volume of fluids strictly denser than `density`.
    pub fn denser_volume(&self, cell: CellId, density: FixedNum, types: &FluidTypes) -> Volume {
        self.cells[cell.index()]
            .iter()
            .filter(|e| types.density(e.fluid) > density)
            .map(|e| e.volume)
            .sum()
    }

    pub fn is_overfull(&self, cell: CellId) -> bool {
        self.total_volume(cell) > self.max_cell_volume
    }

    /// Cells scheduled for overfill resolution.
    pub fn pending_overfull(&self) -> &BTreeSet<CellId> {
        &self.overfull
    }

    pub(crate) fn take_overfull(&mut self) -> BTreeSet<CellId> {
        std::mem::take(&mut self.overfull)
    }

    pub(crate) fn unschedule_overfull(&mut self, cell: CellId) {
        self.overfull.remove(&cell);
    }

    /// Add volume to the cell's entry for `fluid`, creating it owned by `group`
    /// when absent. An existing entry keeps its owner. Returns the owner and
    /// whether the entry was created. Overflowing an entry is a logic error:
    /// fatal in debug builds, clamped and logged otherwise.
    pub(crate) fn add_volume(&mut self, cell: CellId, fluid: FluidTypeId, volume: Volume, group: GroupId) -> (GroupId, bool) {
        let entries = &mut self.cells[cell.index()];
        let (owner, created) = match entries.iter_mut().find(|e| e.fluid == fluid) {
            Some(entry) => {
                if entry.volume.checked_add(volume).is_none() {
                    debug_assert!(false, "volume of {fluid:?} in {cell:?} overflows ({} + {volume})", entry.volume);
                    warn!("Clamping {} {:?} added to {:?} holding {}", volume, fluid, cell, entry.volume);
                }
                entry.volume = entry.volume.saturating_add(volume);
                (entry.group, false)
            }
            None => {
                entries.push(FluidEntry { fluid, volume, group });
                (group, true)
            }
        };
        if self.total_volume(cell) > self.max_cell_volume {
            self.overfull.insert(cell);
        }
        (owner, created)
    }

    /// Remove up to `volume` of `fluid`. Asking for more than the cell holds is
    /// a logic error: fatal in debug builds, clamped and logged otherwise.
    pub(crate) fn remove_volume(&mut self, cell: CellId, fluid: FluidTypeId, volume: Volume) -> Removal {
        let entries = &mut self.cells[cell.index()];
        let Some(position) = entries.iter().position(|e| e.fluid == fluid) else {
            if volume > 0 {
                debug_assert!(false, "removing {volume} of {fluid:?} from {cell:?} which holds none");
                warn!("Removing {} of {:?} from {:?} which holds none", volume, fluid, cell);
            }
            return Removal { removed: 0, emptied: None };
        };

        let entry = &mut entries[position];
        if volume > entry.volume {
            debug_assert!(false, "volume of {fluid:?} in {cell:?} would go negative ({} - {volume})", entry.volume);
            warn!("Clamping removal of {} {:?} from {:?} holding {}", volume, fluid, cell, entry.volume);
        }
        let removed = volume.min(entry.volume);
        entry.volume -= removed;

        if entry.volume == 0 {
            let group = entry.group;
            entries.remove(position);
            Removal { removed, emptied: Some(group) }
        } else {
            Removal { removed, emptied: None }
        }
    }

    /// Drop the whole entry for `fluid`, returning it.
    pub(crate) fn take_entry(&mut self, cell: CellId, fluid: FluidTypeId) -> Option<FluidEntry> {
        let entries = &mut self.cells[cell.index()];
        let position = entries.iter().position(|e| e.fluid == fluid)?;
        Some(entries.remove(position))
    }

    pub(crate) fn set_owner(&mut self, cell: CellId, fluid: FluidTypeId, group: GroupId) {
        if let Some(entry) = self.cells[cell.index()].iter_mut().find(|e| e.fluid == fluid) {
            entry.group = group;
        }
    }

    /// Iterate every non-empty cell with its entries.
    pub fn occupied(&self) -> impl Iterator<Item = (CellId, &[FluidEntry])> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(i, entries)| (CellId(i as u32), entries.as_slice()))
    }

    /// Sum of every entry in every cell.
    pub fn stored_volume(&self) -> u64 {
        self.cells
            .iter()
            .flat_map(|entries| entries.iter())
            .map(|e| e.volume as u64)
            .sum()
    }
}
