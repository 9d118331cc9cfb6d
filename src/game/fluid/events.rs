/// Messages into and out of the fluid simulation.
///
/// Commands are queued by gameplay code and applied at the start of the next
/// fixed tick; notifications are written after the tick for whoever listens.

use bevy::prelude::*;

use super::types::{FluidTypeId, Volume};
use crate::game::grid::CellId;

// ============================================================================
// Commands
// ============================================================================

/// Pour fluid into a cell
#[derive(Event, Message, Debug, Clone)]
pub struct AddFluid {
    pub cell: CellId,
    pub fluid: FluidTypeId,
    pub volume: Volume,
}

/// Take fluid out of a cell (pumps, buckets)
#[derive(Event, Message, Debug, Clone)]
pub struct RemoveFluid {
    pub cell: CellId,
    pub fluid: FluidTypeId,
    pub volume: Volume,
}

/// Build or dig out a cell
#[derive(Event, Message, Debug, Clone)]
pub struct SetCellSolid {
    pub cell: CellId,
    pub solid: bool,
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Event, Message, Debug, Clone)]
pub struct CellFluidChanged {
    pub cell: CellId,
    pub total_volume: Volume,
}

#[derive(Event, Message, Debug, Clone)]
pub struct MistSpawned {
    pub cell: CellId,
    pub fluid: FluidTypeId,
}

/// Fluid froze solid; the cell has been turned solid in the grid
#[derive(Event, Message, Debug, Clone)]
pub struct FluidFroze {
    pub cell: CellId,
    pub fluid: FluidTypeId,
    pub volume: Volume,
}
