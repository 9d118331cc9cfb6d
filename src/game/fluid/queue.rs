use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::marker::PhantomData;

use super::store::{CellFluidStore, Removal};
use super::types::{FluidTypeId, FluidTypes, GroupId, Volume};
use crate::game::fixed_math::FixedNum;
use crate::game::grid::{CellId, VoxelGrid};

/// Ordering and capacity rule of a [`FlowQueue`].
pub trait QueueKind {
    /// Drain queues walk from the highest surface down, fill queues from the lowest up.
    const DESCENDING: bool;

    /// How much this cell can take (fill) or give (drain) this step.
    fn capacity(level: Volume, own_volume: Volume, max: Volume) -> Volume;
}

/// Cells fluid can flow into.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fill;

/// Member cells fluid can flow out of.
#[derive(Clone, Copy, Debug, Default)]
pub struct Drain;

impl QueueKind for Fill {
    const DESCENDING: bool = false;

    fn capacity(level: Volume, _own_volume: Volume, max: Volume) -> Volume {
        max.saturating_sub(level)
    }
}

impl QueueKind for Drain {
    const DESCENDING: bool = true;

    fn capacity(_level: Volume, own_volume: Volume, _max: Volume) -> Volume {
        own_volume
    }
}

/// Snapshot of one cell taken by [`FlowQueue::initialize_for_step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub cell: CellId,
    pub elevation: u32,
    /// Surface height of the group's fluid in this cell before the step.
    pub level: Volume,
    pub capacity: Volume,
    /// Staged change, always toward the queue's direction.
    pub delta: Volume,
}

impl QueueEntry {
    #[inline]
    fn remaining(&self) -> Volume {
        self.capacity - self.delta
    }
}

/// Ordered batching structure over a set of cells.
///
/// Membership is a plain cell set. Each step the set is measured into a sorted
/// snapshot and the leading run of entries sharing `(elevation, level)` forms
/// the head batch, which receives flow as one unit:
///
/// ```text
///  snapshot: [ exhausted .. | head batch .. | rest (sorted) .. ]
///                            ^head          ^batch_end
/// ```
///
/// Deltas are only staged here; [`FlowQueue::apply_delta`] commits them.
#[derive(Clone, Debug)]
pub struct FlowQueue<K: QueueKind> {
    cells: BTreeSet<CellId>,
    entries: Vec<QueueEntry>,
    head: usize,
    batch_end: usize,
    _kind: PhantomData<K>,
}

impl<K: QueueKind> Default for FlowQueue<K> {
    fn default() -> Self {
        Self {
            cells: BTreeSet::new(),
            entries: Vec::new(),
            head: 0,
            batch_end: 0,
            _kind: PhantomData,
        }
    }
}

impl<K: QueueKind> FlowQueue<K> {
    pub fn add_cell(&mut self, cell: CellId) -> bool {
        self.cells.insert(cell)
    }

    pub fn remove_cell(&mut self, cell: CellId) -> bool {
        self.cells.remove(&cell)
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.cells.contains(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &BTreeSet<CellId> {
        &self.cells
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
        self.reset_snapshot();
    }

    pub(crate) fn reset_snapshot(&mut self) {
        self.entries.clear();
        self.head = 0;
        self.batch_end = 0;
    }

    /// Measure every member cell and sort the snapshot. Cells that can neither
    /// give nor take anything are left out.
    pub fn initialize_for_step(
        &mut self,
        store: &CellFluidStore,
        grid: &VoxelGrid,
        fluid: FluidTypeId,
        density: FixedNum,
        types: &FluidTypes,
    ) {
        self.reset_snapshot();
        let max = store.max_cell_volume();

        for &cell in &self.cells {
            let level = store.level_for(cell, density, types);
            let own = store.volume_of(cell, fluid);
            let capacity = K::capacity(level, own, max);
            if capacity == 0 {
                continue;
            }
            self.entries.push(QueueEntry {
                cell,
                elevation: grid.elevation(cell),
                level,
                capacity,
                delta: 0,
            });
        }

        self.entries.sort_by(|a, b| {
            let key = (a.elevation, a.level).cmp(&(b.elevation, b.level));
            let key = if K::DESCENDING { key.reverse() } else { key };
            key.then(a.cell.cmp(&b.cell))
        });
        self.extend_batch();
    }

    /// No entry left that can move anything.
    pub fn is_empty(&self) -> bool {
        self.head >= self.entries.len()
    }

    pub fn batch_len(&self) -> usize {
        self.batch_end - self.head
    }

    #[inline]
    fn current_level(&self, entry: &QueueEntry) -> Volume {
        if K::DESCENDING {
            entry.level - entry.delta
        } else {
            entry.level + entry.delta
        }
    }

    /// `(elevation, level)` shared by the head batch.
    pub fn batch_key(&self) -> Option<(u32, Volume)> {
        let entry = self.entries.get(self.head)?;
        Some((entry.elevation, self.current_level(entry)))
    }

    /// Largest amount every batch cell can still give or take.
    pub fn batch_capacity(&self) -> Volume {
        self.entries[self.head..self.batch_end]
            .iter()
            .map(QueueEntry::remaining)
            .min()
            .unwrap_or(0)
    }

    /// Per-cell flow after which the head batch reaches the level of the next
    /// entry on the same elevation. `None` when the next entry sits elsewhere.
    pub fn flow_until_next_break(&self) -> Option<Volume> {
        let (elevation, level) = self.batch_key()?;
        let next = self.entries.get(self.batch_end)?;
        if next.elevation != elevation {
            return None;
        }
        Some(if K::DESCENDING { level - next.level } else { next.level - level })
    }

    /// Stage `per_cell` on every cell of the head batch, then retire exhausted
    /// cells and pull in entries the batch has caught up with.
    pub fn record_delta(&mut self, per_cell: Volume) {
        if per_cell == 0 || self.is_empty() {
            return;
        }
        for entry in &mut self.entries[self.head..self.batch_end] {
            debug_assert!(per_cell <= entry.remaining(), "delta exceeds capacity of {:?}", entry.cell);
            entry.delta += per_cell.min(entry.remaining());
        }
        self.retire_exhausted();
        self.extend_batch();
    }

    /// Spread an amount smaller than the batch one unit at a time, in queue
    /// order. Breaks batch uniformity, so it is only used once the loop ends.
    /// Returns what was placed.
    pub fn record_remainder(&mut self, mut amount: Volume) -> Volume {
        let mut placed = 0;
        for entry in &mut self.entries[self.head..] {
            if amount == 0 {
                break;
            }
            let take = amount.min(entry.remaining()).min(1);
            entry.delta += take;
            amount -= take;
            placed += take;
        }
        placed
    }

    fn retire_exhausted(&mut self) {
        let mut i = self.head;
        while i < self.batch_end {
            if self.entries[i].remaining() == 0 {
                self.entries.swap(self.head, i);
                self.head += 1;
            }
            i += 1;
        }
        if self.batch_end < self.head {
            self.batch_end = self.head;
        }
    }

    fn extend_batch(&mut self) {
        if self.batch_end <= self.head {
            if self.head >= self.entries.len() {
                self.batch_end = self.head;
                return;
            }
            self.batch_end = self.head + 1;
        }
        let Some(key) = self.batch_key() else { return };
        while let Some(next) = self.entries.get(self.batch_end) {
            if (next.elevation, next.level).cmp(&key) != Ordering::Equal {
                break;
            }
            self.batch_end += 1;
        }
    }

    /// Staged snapshot, including retired entries.
    pub fn staged(&self) -> impl Iterator<Item = &QueueEntry> + '_ {
        self.entries.iter().filter(|e| e.delta > 0)
    }

    pub fn snapshot(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn has_staged(&self) -> bool {
        self.entries.iter().any(|e| e.delta > 0)
    }

    /// Entry of the head batch in queue order, before any delta was staged.
    pub fn first(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }
}

/// A committed fill delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Filled {
    pub cell: CellId,
    pub volume: Volume,
    /// Group that owns the entry afterwards. Differs from the filling group
    /// when the cell already held the same fluid under another group.
    pub owner: GroupId,
    pub created: bool,
}

impl FlowQueue<Fill> {
    /// Commit staged fill deltas into the store.
    pub(crate) fn apply_delta(&mut self, store: &mut CellFluidStore, fluid: FluidTypeId, group: GroupId) -> Vec<Filled> {
        let applied = self
            .entries
            .iter()
            .filter(|e| e.delta > 0)
            .map(|e| {
                let (owner, created) = store.add_volume(e.cell, fluid, e.delta, group);
                Filled { cell: e.cell, volume: e.delta, owner, created }
            })
            .collect();
        self.reset_snapshot();
        applied
    }
}

impl FlowQueue<Drain> {
    /// Commit staged drain deltas into the store.
    pub(crate) fn apply_delta(&mut self, store: &mut CellFluidStore, fluid: FluidTypeId) -> Vec<(CellId, Removal)> {
        let applied = self
            .entries
            .iter()
            .filter(|e| e.delta > 0)
            .map(|e| (e.cell, store.remove_volume(e.cell, fluid, e.delta)))
            .collect();
        self.reset_snapshot();
        applied
    }
}
