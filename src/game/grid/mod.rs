use bevy::prelude::*;
use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;


/// Index of one lattice position in a [`VoxelGrid`].
///
/// Cells are laid out x-major, then y, then z, so ids grow with elevation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Reflect)]
pub struct CellId(pub u32);

impl CellId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The six face directions, in the order [`VoxelGrid::adjacent`] reports them.
pub const FACE_OFFSETS: [(i32, i32, i32); 6] = [
    (0, 0, -1),
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, 1),
];

const HORIZONTAL_DIAGONALS: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Dense three dimensional cell lattice: solidity, elevation and temperature.
///
/// This is the grid collaborator of the fluid engine. The engine only reads
/// from it; whoever changes solidity afterwards tells the fluids through
/// [`crate::game::fluid::CellFluids::on_cell_became_solid`] and
/// [`crate::game::fluid::CellFluids::on_cell_became_not_solid`].
///
/// # Example
///
/// ```rust
/// use tidewater::game::grid::VoxelGrid;
///
/// let mut grid = VoxelGrid::new(4, 4, 2, 20);
/// let floor = grid.cell(1, 1, 0).unwrap();
/// grid.set_solid(floor, true);
/// assert!(grid.is_solid(floor));
/// assert_eq!(grid.elevation(grid.cell(1, 1, 1).unwrap()), 1);
/// ```
#[derive(Resource, Clone, Debug)]
pub struct VoxelGrid {
    width: u32,
    length: u32,
    height: u32,
    solid: FixedBitSet,
    temperature: Vec<i16>,
}

impl VoxelGrid {
    pub fn new(width: u32, length: u32, height: u32, ambient_temperature: i16) -> Self {
        let count = (width as usize) * (length as usize) * (height as usize);
        Self {
            width,
            length,
            height,
            solid: FixedBitSet::with_capacity(count),
            temperature: vec![ambient_temperature; count],
        }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn length(&self) -> u32 { self.length }
    pub fn height(&self) -> u32 { self.height }

    pub fn cell_count(&self) -> usize {
        self.temperature.len()
    }

    pub fn cell(&self, x: u32, y: u32, z: u32) -> Option<CellId> {
        if x >= self.width || y >= self.length || z >= self.height {
            return None;
        }
        Some(CellId(x + y * self.width + z * self.width * self.length))
    }

    pub fn coords(&self, cell: CellId) -> (u32, u32, u32) {
        let layer = self.width * self.length;
        let z = cell.0 / layer;
        let rest = cell.0 % layer;
        (rest % self.width, rest / self.width, z)
    }

    fn offset(&self, cell: CellId, dx: i32, dy: i32, dz: i32) -> Option<CellId> {
        let (x, y, z) = self.coords(cell);
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        let nz = z.checked_add_signed(dz)?;
        self.cell(nx, ny, nz)
    }

    /// Elevation of a cell; fluid only falls toward lower values.
    #[inline]
    pub fn elevation(&self, cell: CellId) -> u32 {
        cell.0 / (self.width * self.length)
    }

    #[inline]
    pub fn is_solid(&self, cell: CellId) -> bool {
        self.solid.contains(cell.index())
    }

    pub fn set_solid(&mut self, cell: CellId, solid: bool) {
        self.solid.set(cell.index(), solid);
    }

    pub fn temperature(&self, cell: CellId) -> i16 {
        self.temperature[cell.index()]
    }

    pub fn set_temperature(&mut self, cell: CellId, temperature: i16) {
        self.temperature[cell.index()] = temperature;
    }

    /// Face neighbours (6-connected) that exist inside the grid.
    pub fn adjacent(&self, cell: CellId) -> SmallVec<[CellId; 6]> {
        FACE_OFFSETS
            .iter()
            .filter_map(|&(dx, dy, dz)| self.offset(cell, dx, dy, dz))
            .collect()
    }

    pub fn above(&self, cell: CellId) -> Option<CellId> {
        self.offset(cell, 0, 0, 1)
    }

    pub fn below(&self, cell: CellId) -> Option<CellId> {
        self.offset(cell, 0, 0, -1)
    }

    /// Diagonal neighbours on the same level, each paired with the two face
    /// neighbours that sit between it and `cell`.
    ///
    /// A diagonal is a pinch when both bridging cells are solid.
    pub fn horizontal_diagonals(&self, cell: CellId) -> SmallVec<[(CellId, [CellId; 2]); 4]> {
        HORIZONTAL_DIAGONALS
            .iter()
            .filter_map(|&(dx, dy)| {
                let diagonal = self.offset(cell, dx, dy, 0)?;
                let across_x = self.offset(cell, dx, 0, 0)?;
                let across_y = self.offset(cell, 0, dy, 0)?;
                Some((diagonal, [across_x, across_y]))
            })
            .collect()
    }

    /// Mark the outer shell of the grid solid, leaving an open box inside.
    pub fn wall_in(&mut self) {
        for z in 0..self.height {
            for y in 0..self.length {
                for x in 0..self.width {
                    let edge = x == 0 || y == 0 || z == 0
                        || x + 1 == self.width || y + 1 == self.length;
                    if edge {
                        if let Some(cell) = self.cell(x, y, z) {
                            self.set_solid(cell, true);
                        }
                    }
                }
            }
        }
    }
}

impl Default for VoxelGrid {
    fn default() -> Self {
        Self::new(1, 1, 1, 20)
    }
}
