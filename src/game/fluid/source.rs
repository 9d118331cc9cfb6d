use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::coordinator::FluidCoordinator;
use super::types::{FluidTypeId, Volume};
use crate::game::grid::{CellId, VoxelGrid};

/// Spring or drain holding one cell at a target volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluidSource {
    pub cell: CellId,
    pub fluid: FluidTypeId,
    /// Target total volume of the cell. 0 makes a drain.
    pub level: Volume,
}

/// Net volume sources put into or took out of the world in one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceFlow {
    pub added: Volume,
    pub removed: Volume,
}

#[derive(Resource, Clone, Debug, Default, Serialize, Deserialize)]
pub struct FluidSources {
    sources: Vec<FluidSource>,
}

impl FluidSources {
    pub fn new(sources: Vec<FluidSource>) -> Self {
        Self { sources }
    }

    pub fn add(&mut self, source: FluidSource) {
        self.sources.push(source);
    }

    /// Remove every source on `cell`; returns how many were removed.
    pub fn remove_at(&mut self, cell: CellId) -> usize {
        let before = self.sources.len();
        self.sources.retain(|s| s.cell != cell);
        before - self.sources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FluidSource> + '_ {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Move every source cell toward its target. Runs after the coordinator's
    /// tick; removals are synchronous, and merged groups are purged at the end.
    pub fn step(&self, coordinator: &mut FluidCoordinator, grid: &VoxelGrid) -> SourceFlow {
        let mut flow = SourceFlow::default();
        for source in &self.sources {
            if grid.is_solid(source.cell) {
                continue;
            }
            let mut cell = coordinator.at(grid, source.cell);
            let current = cell.total_volume();
            match current.cmp(&source.level) {
                Ordering::Less => {
                    let amount = source.level - current;
                    if cell.add_fluid(amount, source.fluid).is_some() {
                        flow.added += amount;
                    }
                }
                Ordering::Greater => {
                    let present = cell.volume_of(source.fluid);
                    flow.removed += cell.remove_fluid_synchronous((current - source.level).min(present), source.fluid);
                }
                Ordering::Equal => {}
            }
        }
        let purged = coordinator.cleanup_merged();
        if purged > 0 {
            debug!("Sources purged {} finished groups", purged);
        }
        flow
    }
}
