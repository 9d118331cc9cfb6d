/// Core identifiers and fluid definitions shared by every fluid module.
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::game::fixed_math::FixedNum;

/// Amount of fluid. A full cell holds `max_cell_volume` of it.
pub type Volume = u32;

/// Index into [`FluidTypes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Reflect)]
pub struct FluidTypeId(pub u8);

/// Stable handle of a fluid group. Handles are never reused, so a stale
/// handle can only ever resolve to the group it was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Reflect)]
pub struct GroupId(pub u32);

/// Static description of one fluid.
#[derive(Clone, Debug)]
pub struct FluidType {
    pub name: String,
    /// Denser fluids sink below lighter ones in the same cell.
    pub density: FixedNum,
    /// Per-tick budget for moving surplus from drain cells to fill cells.
    pub viscosity: Volume,
    /// Ticks a mist cloud lingers after this fluid wets a cell under open air. 0 disables mist.
    pub mist_duration: u16,
    pub freezing_point: Option<i16>,
}

/// Table of fluid definitions indexed by [`FluidTypeId`].
#[derive(Clone, Debug, Default)]
pub struct FluidTypes {
    types: Vec<FluidType>,
}

impl FluidTypes {
    pub fn new(types: Vec<FluidType>) -> Self {
        assert!(types.len() <= u8::MAX as usize, "at most 255 fluid types");
        Self { types }
    }

    pub fn get(&self, id: FluidTypeId) -> &FluidType {
        &self.types[id.0 as usize]
    }

    pub fn contains(&self, id: FluidTypeId) -> bool {
        (id.0 as usize) < self.types.len()
    }

    pub fn density(&self, id: FluidTypeId) -> FixedNum {
        self.get(id).density
    }

    pub fn by_name(&self, name: &str) -> Option<FluidTypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| FluidTypeId(i as u8))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FluidTypeId> + '_ {
        (0..self.types.len()).map(|i| FluidTypeId(i as u8))
    }
}

/// Lifecycle of a fluid group.
///
/// `Merged`, `Dissolved` and `Destroyed` are terminal: the group is purged at
/// the end of the tick and every holder of its id must check [`GroupState::is_active`]
/// before touching it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Stable,
    Unstable,
    /// Absorbed by the given group.
    Merged(GroupId),
    /// Displaced out of its last cell; its volume lives on inside the given denser group.
    Dissolved(GroupId),
    Destroyed,
}

impl GroupState {
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, GroupState::Stable | GroupState::Unstable)
    }
}
