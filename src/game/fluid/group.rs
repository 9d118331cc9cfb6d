use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::queue::{Drain, Fill, FlowQueue};
use super::store::CellFluidStore;
use super::types::{FluidTypeId, GroupId, GroupState, Volume};
use crate::game::config::FluidSimConfig;
use crate::game::fixed_math::FixedNum;
use crate::game::grid::{CellId, VoxelGrid};

/// Shared, read-only world state handed to every parallel read step.
#[derive(Clone, Copy)]
pub struct ReadContext<'a> {
    pub store: &'a CellFluidStore,
    pub grid: &'a VoxelGrid,
    pub config: &'a FluidSimConfig,
}

/// What a read step decided, consumed by the sequential phases.
#[derive(Clone, Debug, Default)]
pub struct StepPlan {
    /// Nothing could move; the group may go to sleep.
    pub settled: bool,
    /// At least one fill or drain delta was staged.
    pub any_delta: bool,
    /// Change to the group's excess once the deltas are written.
    pub excess_delta: i64,

    // Descriptive future
    pub no_longer_empty: BTreeSet<CellId>,
    pub empty: BTreeSet<CellId>,
    pub full: BTreeSet<CellId>,
    pub no_longer_full: BTreeSet<CellId>,

    // Prescriptive future
    /// Neighbours the group reaches for the first time. Cells already owned by
    /// another group of the same fluid are merge targets.
    pub new_empty_adjacents: BTreeSet<CellId>,
    /// Connected components of the future drain set, largest first. Empty
    /// unless the group is about to fall apart.
    pub future_groups: Vec<BTreeSet<CellId>>,
    /// Member with the highest surface, source of diagonal seepage.
    pub highest_drain: Option<CellId>,

    /// Cells written into that already belonged to another same-fluid group.
    pub merge_candidates: BTreeSet<CellId>,
}

impl StepPlan {
    pub fn moved(&self) -> bool {
        !self.settled && (self.any_delta || self.excess_delta != 0)
    }
}

/// A connected set of cells sharing one fluid, managed as one unit.
///
/// The drain queue is the member set; a cell's entry owner and drain
/// membership always agree. The fill queue holds members that are not full
/// plus open neighbours of members that can take the fluid.
#[derive(Clone, Debug)]
pub struct FluidGroup {
    pub(crate) id: GroupId,
    pub(crate) fluid: FluidTypeId,
    pub(crate) density: FixedNum,
    pub(crate) viscosity: Volume,
    pub(crate) state: GroupState,
    pub(crate) excess: i64,
    pub(crate) dissolved: BTreeMap<FluidTypeId, Volume>,
    pub(crate) drain: FlowQueue<Drain>,
    pub(crate) fill: FlowQueue<Fill>,
    /// Cells that left the drain set outside the read step; seeds for split detection.
    pub(crate) departed: BTreeSet<CellId>,
    /// Cells of sibling groups left touching this one by a split. Merge
    /// targets for the next read step.
    pub(crate) contacts: BTreeSet<CellId>,
    /// Disturbed after its read step this tick; must not be put to sleep.
    pub(crate) woken: bool,
    pub(crate) plan: StepPlan,
}

impl FluidGroup {
    pub(crate) fn new(id: GroupId, fluid: FluidTypeId, config: &FluidSimConfig) -> Self {
        let fluid_type = config.fluids.get(fluid);
        Self {
            id,
            fluid,
            density: fluid_type.density,
            viscosity: fluid_type.viscosity,
            state: GroupState::Unstable,
            excess: 0,
            dissolved: BTreeMap::new(),
            drain: FlowQueue::default(),
            fill: FlowQueue::default(),
            departed: BTreeSet::new(),
            contacts: BTreeSet::new(),
            woken: true,
            plan: StepPlan::default(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn fluid(&self) -> FluidTypeId {
        self.fluid
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn excess(&self) -> i64 {
        self.excess
    }

    pub fn viscosity(&self) -> Volume {
        self.viscosity
    }

    pub fn members(&self) -> &BTreeSet<CellId> {
        self.drain.cells()
    }

    pub fn fill_cells(&self) -> &BTreeSet<CellId> {
        self.fill.cells()
    }

    pub fn is_member(&self, cell: CellId) -> bool {
        self.drain.contains(cell)
    }

    pub fn dissolved(&self) -> &BTreeMap<FluidTypeId, Volume> {
        &self.dissolved
    }

    pub fn plan(&self) -> &StepPlan {
        &self.plan
    }

    /// Volume this group accounts for outside its member cells.
    pub fn held_volume(&self) -> i64 {
        self.excess + self.dissolved.values().map(|&v| v as i64).sum::<i64>()
    }

    /// Compute this tick's flow without touching shared state.
    ///
    /// Only the group's own queues and plan are written, so any number of
    /// groups may run this concurrently over the same store.
    pub fn read_step(&mut self, ctx: &ReadContext) {
        self.plan = StepPlan::default();
        if !self.state.is_active() {
            return;
        }
        for cell in std::mem::take(&mut self.contacts) {
            if ctx.grid.adjacent(cell).iter().any(|&n| self.drain.contains(n)) {
                self.plan.new_empty_adjacents.insert(cell);
            }
        }

        let types = &ctx.config.fluids;
        self.fill.initialize_for_step(ctx.store, ctx.grid, self.fluid, self.density, types);
        self.drain.initialize_for_step(ctx.store, ctx.grid, self.fluid, self.density, types);
        self.plan.highest_drain = self.drain.first().map(|e| e.cell);

        let mut excess = self.excess;
        let mut viscosity = self.viscosity;

        let can_disperse = (excess > 0 && !self.fill.is_empty()) || (excess < 0 && !self.drain.is_empty());
        let can_flow = viscosity > 0 && !self.fill.is_empty() && !self.drain.is_empty();
        if !can_disperse && !can_flow && self.departed.is_empty() {
            self.plan.settled = true;
            return;
        }

        self.disperse_excess(&mut excess);
        self.primary_flow(&mut excess, &mut viscosity);

        // Leftovers smaller than a batch go one unit per cell
        if excess > 0 {
            excess -= self.fill.record_remainder(excess.min(Volume::MAX as i64) as Volume) as i64;
        } else if excess < 0 {
            excess += self.drain.record_remainder((-excess).min(Volume::MAX as i64) as Volume) as i64;
        }

        self.plan.excess_delta = excess - self.excess;
        self.plan.any_delta = self.fill.has_staged() || self.drain.has_staged();
        self.describe_future(ctx);
        self.prescribe_future(ctx);
    }

    fn disperse_excess(&mut self, excess: &mut i64) {
        while *excess > 0 && !self.fill.is_empty() {
            let n = self.fill.batch_len() as i64;
            let per_cell = (*excess / n).min(self.fill.batch_capacity() as i64);
            let per_cell = match self.fill.flow_until_next_break() {
                Some(limit) => per_cell.min(limit as i64),
                None => per_cell,
            };
            if per_cell <= 0 {
                break;
            }
            self.fill.record_delta(per_cell as Volume);
            *excess -= per_cell * n;
        }

        while *excess < 0 && !self.drain.is_empty() {
            let n = self.drain.batch_len() as i64;
            let per_cell = (-*excess / n).min(self.drain.batch_capacity() as i64);
            let per_cell = match self.drain.flow_until_next_break() {
                Some(limit) => per_cell.min(limit as i64),
                None => per_cell,
            };
            if per_cell <= 0 {
                break;
            }
            self.drain.record_delta(per_cell as Volume);
            *excess += per_cell * n;
        }
    }

    /// Move fluid from the highest drain batch to the lowest fill batch until
    /// the two meet, the viscosity budget runs out, or a side is exhausted.
    fn primary_flow(&mut self, excess: &mut i64, viscosity: &mut Volume) {
        while *viscosity > 0 {
            let (Some((fill_z, fill_level)), Some((drain_z, drain_level))) =
                (self.fill.batch_key(), self.drain.batch_key())
            else {
                break;
            };

            // Equilibrium: a one unit difference on the same elevation is level
            if fill_z > drain_z || (fill_z == drain_z && fill_level + 1 >= drain_level) {
                break;
            }

            let nf = self.fill.batch_len() as u64;
            let nd = self.drain.batch_len() as u64;

            let mut per_fill = (self.fill.batch_capacity() as u64).min(*viscosity as u64);
            if let Some(limit) = self.fill.flow_until_next_break() {
                per_fill = per_fill.min(limit as u64);
            }
            let mut per_drain = self.drain.batch_capacity() as u64;
            if let Some(limit) = self.drain.flow_until_next_break() {
                per_drain = per_drain.min(limit as u64);
            }
            if fill_z == drain_z {
                let gap = (drain_level - fill_level) as u64;
                per_fill = per_fill.min(gap * nd / (nf + nd));
                per_drain = per_drain.min(gap * nf / (nf + nd));
            }

            // Neither side may move more than the other provides in total
            let fill_amount = per_fill.min(per_drain * nd / nf);
            if fill_amount == 0 {
                break;
            }
            let drain_amount = (fill_amount * nf).div_ceil(nd);

            self.fill.record_delta(fill_amount as Volume);
            self.drain.record_delta(drain_amount as Volume);
            *viscosity -= fill_amount as Volume;
            *excess += (drain_amount * nd) as i64 - (fill_amount * nf) as i64;
        }
    }

    fn describe_future(&mut self, ctx: &ReadContext) {
        let max = ctx.store.max_cell_volume();

        for entry in self.fill.staged() {
            if ctx.store.entry(entry.cell, self.fluid).is_none() {
                self.plan.no_longer_empty.insert(entry.cell);
            }
            if entry.delta == entry.capacity {
                self.plan.full.insert(entry.cell);
            }
        }
        for entry in self.drain.staged() {
            if entry.delta == entry.capacity {
                self.plan.empty.insert(entry.cell);
            }
            if entry.level >= max {
                self.plan.no_longer_full.insert(entry.cell);
            }
        }
    }

    fn prescribe_future(&mut self, ctx: &ReadContext) {
        let max = ctx.store.max_cell_volume();
        let types = &ctx.config.fluids;

        for &cell in &self.plan.no_longer_empty {
            for neighbour in ctx.grid.adjacent(cell) {
                if ctx.grid.is_solid(neighbour)
                    || self.drain.contains(neighbour)
                    || self.fill.contains(neighbour)
                    || self.plan.no_longer_empty.contains(&neighbour)
                {
                    continue;
                }
                let foreign = ctx.store.owner(neighbour, self.fluid).is_some_and(|owner| owner != self.id);
                let open = ctx.store.level_for(neighbour, self.density, types) < max;
                if foreign || open {
                    self.plan.new_empty_adjacents.insert(neighbour);
                }
            }
        }

        if self.plan.empty.is_empty() && self.departed.is_empty() {
            return;
        }

        // A departed cell refilled this tick does not hold the group together
        let plan = &self.plan;
        let drain = &self.drain;
        let departed = &self.departed;
        let in_future = |cell: CellId| {
            (drain.contains(cell) && !plan.empty.contains(&cell))
                || (plan.no_longer_empty.contains(&cell) && !departed.contains(&cell))
        };
        let removed = plan.empty.iter().chain(self.departed.iter()).copied();
        let components = connected_components(ctx.grid, removed, in_future);
        if components.len() > 1 {
            self.plan.future_groups = components;
        }
    }
}

/// Components of a member set reachable from `removed` and its neighbours,
/// largest first; ties go to the component holding the smallest cell.
///
/// When the set was connected before `removed` left it, every remaining
/// component touches a removed cell, so this finds them all.
pub(crate) fn connected_components(
    grid: &VoxelGrid,
    removed: impl IntoIterator<Item = CellId>,
    is_member: impl Fn(CellId) -> bool,
) -> Vec<BTreeSet<CellId>> {
    let mut visited: FxHashSet<CellId> = FxHashSet::default();
    let mut components = Vec::new();
    let mut frontier = VecDeque::new();

    let mut seeds: Vec<CellId> = removed
        .into_iter()
        .flat_map(|cell| std::iter::once(cell).chain(grid.adjacent(cell)))
        .filter(|&cell| is_member(cell))
        .collect();
    seeds.sort_unstable();
    seeds.dedup();

    for seed in seeds {
        if !visited.insert(seed) {
            continue;
        }
        let mut component = BTreeSet::new();
        frontier.push_back(seed);
        while let Some(cell) = frontier.pop_front() {
            component.insert(cell);
            for neighbour in grid.adjacent(cell) {
                if is_member(neighbour) && visited.insert(neighbour) {
                    frontier.push_back(neighbour);
                }
            }
        }
        components.push(component);
    }

    components.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.first().cmp(&b.first()))
    });
    components
}
