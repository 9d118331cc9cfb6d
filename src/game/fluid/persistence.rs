use bevy::prelude::*;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};

use super::coordinator::FluidCoordinator;
use super::group::FluidGroup;
use super::invariants::FluidError;
use super::source::{FluidSource, FluidSources};
use super::store::FluidEntry;
use super::types::{FluidTypeId, GroupId, GroupState, Volume};
use crate::game::config::FluidSimConfig;
use crate::game::grid::{CellId, VoxelGrid};

pub const FLUID_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub fluid: FluidTypeId,
    pub excess: i64,
    pub members: Vec<CellId>,
    pub dissolved: Vec<(FluidTypeId, Volume)>,
    /// Sibling cells still waiting to merge back after a split.
    #[serde(default)]
    pub contacts: Vec<CellId>,
    pub stable: bool,
}

/// Saved state of every fluid in an area, keyed by stable group handles.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FluidSnapshot {
    pub version: u32,
    pub next_group_id: u32,
    pub cells: Vec<(CellId, Vec<FluidEntry>)>,
    pub groups: Vec<GroupSnapshot>,
    pub sources: Vec<FluidSource>,
}

impl FluidSnapshot {
    pub fn capture(coordinator: &FluidCoordinator, sources: &FluidSources) -> Self {
        let cells = coordinator
            .store
            .occupied()
            .map(|(cell, entries)| (cell, entries.to_vec()))
            .collect();
        let groups = coordinator
            .active_groups()
            .map(|group| GroupSnapshot {
                id: group.id,
                fluid: group.fluid,
                excess: group.excess,
                members: group.drain.cells().iter().copied().collect(),
                dissolved: group.dissolved.iter().map(|(&f, &v)| (f, v)).collect(),
                contacts: group.contacts.iter().copied().collect(),
                stable: group.state == GroupState::Stable,
            })
            .collect();

        Self {
            version: FLUID_SNAPSHOT_VERSION,
            next_group_id: coordinator.next_group_id,
            cells,
            groups,
            sources: sources.iter().copied().collect(),
        }
    }

    /// Rebuild a coordinator and its sources. Fill sets are recomputed from
    /// the grid; ownership is validated and resynced if the file disagrees
    /// with itself.
    pub fn restore(&self, config: FluidSimConfig, grid: &VoxelGrid) -> Result<(FluidCoordinator, FluidSources), FluidError> {
        if self.version != FLUID_SNAPSHOT_VERSION {
            return Err(FluidError::UnsupportedVersion { found: self.version, expected: FLUID_SNAPSHOT_VERSION });
        }
        let cell_count = grid.cell_count();
        let check_cell = |cell: CellId| {
            if cell.index() < cell_count {
                Ok(())
            } else {
                Err(FluidError::CellOutOfRange { cell, cells: cell_count })
            }
        };
        let fluid_count = config.fluids.len();
        let check_fluid = |fluid: FluidTypeId| {
            if (fluid.0 as usize) < fluid_count {
                Ok(())
            } else {
                Err(FluidError::UnknownFluid(fluid))
            }
        };

        let mut groups: BTreeMap<GroupId, FluidGroup> = BTreeMap::new();
        for saved in &self.groups {
            check_fluid(saved.fluid)?;
            let mut group = FluidGroup::new(saved.id, saved.fluid, &config);
            group.excess = saved.excess;
            group.state = if saved.stable { GroupState::Stable } else { GroupState::Unstable };
            for &cell in &saved.members {
                check_cell(cell)?;
                group.drain.add_cell(cell);
            }
            for &(fluid, volume) in &saved.dissolved {
                check_fluid(fluid)?;
                group.dissolved.insert(fluid, volume);
            }
            for &cell in &saved.contacts {
                check_cell(cell)?;
                group.contacts.insert(cell);
            }
            if groups.insert(saved.id, group).is_some() {
                return Err(FluidError::DuplicateGroup(saved.id));
            }
        }

        let mut coordinator = FluidCoordinator::new(config, grid);
        for (cell, entries) in &self.cells {
            check_cell(*cell)?;
            for entry in entries {
                check_fluid(entry.fluid)?;
                coordinator.store.add_volume(*cell, entry.fluid, entry.volume, entry.group);
            }
        }
        let highest = groups.keys().next_back().map_or(0, |id| id.0);
        coordinator.next_group_id = self.next_group_id.max(highest + 1);
        coordinator.unstable = groups
            .values()
            .filter(|g| g.state == GroupState::Unstable)
            .map(|g| g.id)
            .collect();
        coordinator.groups = groups;

        if let Err(err) = coordinator.validate() {
            warn!("Fluid snapshot is inconsistent ({}); resyncing", err);
            coordinator.resync(grid);
        } else {
            let ids: Vec<GroupId> = coordinator.groups.keys().copied().collect();
            for id in ids {
                coordinator.rebuild_fill(grid, id);
            }
        }

        Ok((coordinator, FluidSources::new(self.sources.clone())))
    }
}

pub fn save_fluids(path: &str, snapshot: &FluidSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let mut encoder = ZlibEncoder::new(writer, Compression::default());
    bincode::serialize_into(&mut encoder, snapshot)?;
    encoder.finish()?;
    Ok(())
}

pub fn load_fluids(path: &str) -> Result<FluidSnapshot, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut decoder = ZlibDecoder::new(reader);
    let snapshot: FluidSnapshot = bincode::deserialize_from(&mut decoder)?;
    Ok(snapshot)
}
