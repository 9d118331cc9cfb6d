use super::*;
use crate::game::config::FluidSimConfig;
use crate::game::grid::{CellId, VoxelGrid};
use std::collections::BTreeSet;

const WATER: FluidTypeId = FluidTypeId(0);
const OIL: FluidTypeId = FluidTypeId(1);

fn strict_config() -> FluidSimConfig {
    FluidSimConfig { strict_invariants: true, ..Default::default() }
}

fn cell(grid: &VoxelGrid, x: u32, y: u32, z: u32) -> CellId {
    grid.cell(x, y, z).unwrap()
}

fn group_ids(fluids: &FluidCoordinator) -> Vec<GroupId> {
    fluids.active_groups().map(|g| g.id()).collect()
}

fn tick_until_settled(fluids: &mut FluidCoordinator, grid: &VoxelGrid, max_ticks: usize) {
    for _ in 0..max_ticks {
        fluids.tick(grid);
        if fluids.is_settled() {
            return;
        }
    }
    panic!("fluids did not settle within {max_ticks} ticks");
}

#[test]
fn test_simple_fill_spills_into_cell_above() {
    let grid = VoxelGrid::new(1, 1, 3, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let bottom = cell(&grid, 0, 0, 0);
    let middle = cell(&grid, 0, 0, 1);

    fluids.at(&grid, bottom).add_fluid(150, WATER);
    fluids.tick(&grid);

    assert_eq!(fluids.store().volume_of(bottom, WATER), 100);
    assert_eq!(fluids.store().volume_of(middle, WATER), 50);
    assert_eq!(group_ids(&fluids).len(), 1);
    assert_eq!(fluids.store().owner(bottom, WATER), fluids.store().owner(middle, WATER));
    assert_eq!(fluids.total_volume(), 150);
}

#[test]
fn test_overfill_displaces_lighter_fluid() {
    let grid = VoxelGrid::new(1, 1, 3, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let bottom = cell(&grid, 0, 0, 0);
    let middle = cell(&grid, 0, 0, 1);

    fluids.at(&grid, bottom).add_fluid(100, WATER);
    let oil_group = fluids.at(&grid, bottom).add_fluid(20, OIL).unwrap();
    fluids.at(&grid, bottom).resolve_overfull();

    assert_eq!(fluids.store().volume_of(bottom, WATER), 100);
    assert_eq!(fluids.store().volume_of(bottom, OIL), 0);
    let oil = fluids.group(oil_group).unwrap();
    assert_eq!(oil.excess(), 20);
    assert!(oil.fill_cells().contains(&middle), "oil should be headed for the cell above");
    assert_eq!(fluids.total_volume(), 120);

    fluids.tick(&grid);

    assert_eq!(fluids.store().volume_of(middle, OIL), 20);
    assert_eq!(fluids.store().owner(middle, OIL), Some(oil_group));
    assert_eq!(fluids.store().volume_of(bottom, WATER), 100);
    assert_eq!(fluids.total_volume(), 120);
}

fn l_shaped_basin() -> (VoxelGrid, [CellId; 5]) {
    let mut grid = VoxelGrid::new(3, 3, 1, 20);
    for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
        let c = cell(&grid, x, y, 0);
        grid.set_solid(c, true);
    }
    let cells = [
        cell(&grid, 0, 0, 0),
        cell(&grid, 1, 0, 0),
        cell(&grid, 2, 0, 0),
        cell(&grid, 0, 1, 0),
        cell(&grid, 0, 2, 0),
    ];
    (grid, cells)
}

#[test]
fn test_walling_the_corner_splits_the_group() {
    let (mut grid, cells) = l_shaped_basin();
    let config = FluidSimConfig {
        fluid_piston_enabled: false,
        diagonal_seep_enabled: false,
        ..strict_config()
    };
    let mut fluids = FluidCoordinator::new(config, &grid);
    for &c in &cells {
        fluids.at(&grid, c).add_fluid(50, WATER);
    }
    assert_eq!(group_ids(&fluids).len(), 1);
    tick_until_settled(&mut fluids, &grid, 10);

    let corner = cells[0];
    grid.set_solid(corner, true);
    fluids.at(&grid, corner).on_cell_became_solid();
    fluids.tick(&grid);

    let groups: Vec<&FluidGroup> = fluids.active_groups().collect();
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.members().len(), 2);
        let volume: Volume = group.members().iter().map(|&c| fluids.store().volume_of(c, WATER)).sum();
        assert_eq!(volume, 100);
    }
    assert!(groups[0].members().is_disjoint(groups[1].members()));
    assert_eq!(fluids.total_volume(), 200);
}

#[test]
fn test_draining_the_corner_splits_the_group() {
    let (grid, cells) = l_shaped_basin();
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    for &c in &cells {
        fluids.at(&grid, c).add_fluid(50, WATER);
    }
    tick_until_settled(&mut fluids, &grid, 10);
    let original = group_ids(&fluids)[0];

    let corner = cells[0];
    let removed = fluids.at(&grid, corner).remove_fluid(50, WATER);
    assert_eq!(removed, 50);
    fluids.tick(&grid);

    let groups: Vec<&FluidGroup> = fluids.active_groups().collect();
    assert_eq!(groups.len(), 2, "the arms fall apart even though the corner refills");
    assert!(groups[0].members().is_disjoint(groups[1].members()));
    let kept = fluids.group(original).unwrap();
    assert_eq!(kept.members(), &BTreeSet::from([cells[0], cells[1], cells[2]]));
    let other = groups.iter().find(|g| g.id() != original).unwrap();
    assert_eq!(other.members(), &BTreeSet::from([cells[3], cells[4]]));
    assert_eq!(fluids.total_volume(), 200);
    assert!(fluids.validate().is_ok());

    fluids.tick(&grid);

    assert_eq!(group_ids(&fluids), vec![original], "the refilled corner joins the arms again");
    assert_eq!(fluids.group(original).unwrap().members().len(), 5);
    assert_eq!(fluids.total_volume(), 200);
}

#[test]
fn test_synchronous_removal_splits_then_flow_reunites() {
    let grid = VoxelGrid::new(5, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let line: Vec<CellId> = (0..5).map(|x| cell(&grid, x, 0, 0)).collect();
    for &c in &line {
        fluids.at(&grid, c).add_fluid(10, WATER);
    }
    tick_until_settled(&mut fluids, &grid, 10);

    let removed = fluids.at(&grid, line[2]).remove_fluid_synchronous(10, WATER);
    assert_eq!(removed, 10);
    assert_eq!(group_ids(&fluids).len(), 2, "the gap splits the line at once");

    fluids.tick(&grid);

    assert_eq!(group_ids(&fluids).len(), 1, "both halves flow into the gap and merge");
    assert_eq!(fluids.store().volume_of(line[2], WATER), 12);
    assert_eq!(fluids.total_volume(), 40);
}

#[test]
fn test_adding_between_groups_merges_them() {
    let grid = VoxelGrid::new(3, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let left = fluids.at(&grid, cell(&grid, 0, 0, 0)).add_fluid(30, WATER).unwrap();
    let right = fluids.at(&grid, cell(&grid, 2, 0, 0)).add_fluid(30, WATER).unwrap();
    assert_ne!(left, right);

    let joined = fluids.at(&grid, cell(&grid, 1, 0, 0)).add_fluid(30, WATER).unwrap();

    assert_eq!(joined, left, "ties go to the lower id");
    assert_eq!(group_ids(&fluids), vec![left]);
    assert_eq!(fluids.group(right).unwrap().state(), GroupState::Merged(left));
    assert_eq!(fluids.cleanup_merged(), 1);
    assert_eq!(fluids.group(joined).unwrap().members().len(), 3);
}

#[test]
fn test_unknown_fluid_is_rejected() {
    let grid = VoxelGrid::new(2, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let c = cell(&grid, 0, 0, 0);

    assert_eq!(fluids.at(&grid, c).add_fluid(10, FluidTypeId(7)), None);
    assert_eq!(fluids.at(&grid, c).remove_fluid(10, FluidTypeId(7)), 0);

    assert!(fluids.store().is_empty(c));
    assert!(group_ids(&fluids).is_empty());
    assert!(fluids.is_settled());
}

fn three_isolated_groups() -> (VoxelGrid, FluidCoordinator, [GroupId; 3]) {
    let mut grid = VoxelGrid::new(7, 1, 1, 20);
    for x in [0, 2, 4, 6] {
        let c = cell(&grid, x, 0, 0);
        grid.set_solid(c, true);
    }
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let a = fluids.at(&grid, cell(&grid, 1, 0, 0)).add_fluid(10, WATER).unwrap();
    let b = fluids.at(&grid, cell(&grid, 3, 0, 0)).add_fluid(20, WATER).unwrap();
    let c = fluids.at(&grid, cell(&grid, 5, 0, 0)).add_fluid(30, WATER).unwrap();
    fluids.groups.get_mut(&b).unwrap().excess = 7;
    (grid, fluids, [a, b, c])
}

#[test]
fn test_merge_order_does_not_matter() {
    let (grid, mut first, [a, b, c]) = three_isolated_groups();
    let ab = first.merge_groups(&grid, a, b);
    let abc = first.merge_groups(&grid, ab, c);

    let (grid, mut second, [a, b, c]) = three_isolated_groups();
    let bc = second.merge_groups(&grid, b, c);
    let abc2 = second.merge_groups(&grid, a, bc);

    let left = first.group(abc).unwrap();
    let right = second.group(abc2).unwrap();
    assert_eq!(left.members(), right.members());
    assert_eq!(left.excess(), right.excess());
    assert_eq!(first.total_volume(), 67);
    assert_eq!(second.total_volume(), 67);
    assert!(first.validate().is_ok());
    assert!(second.validate().is_ok());
}

#[test]
fn test_settled_group_stays_asleep() {
    let mut grid = VoxelGrid::new(4, 4, 2, 20);
    grid.wall_in();
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    fluids.at(&grid, cell(&grid, 1, 1, 1)).add_fluid(100, WATER);

    tick_until_settled(&mut fluids, &grid, 50);
    let before: Vec<_> = fluids.store().occupied().map(|(c, e)| (c, e.to_vec())).collect();
    let id = group_ids(&fluids)[0];
    assert_eq!(fluids.group(id).unwrap().state(), GroupState::Stable);
    assert_eq!(before.len(), 4, "100 units spread over the 2x2 interior");

    let report = fluids.tick(&grid);

    assert_eq!(report.groups_read, 0);
    assert!(report.changed_cells.is_empty());
    assert_eq!(fluids.group(id).unwrap().state(), GroupState::Stable);
    let after: Vec<_> = fluids.store().occupied().map(|(c, e)| (c, e.to_vec())).collect();
    assert_eq!(before, after);
}

#[test]
fn test_piston_pushes_fluid_out_of_new_wall() {
    let mut grid = VoxelGrid::new(2, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let wall = cell(&grid, 0, 0, 0);
    let open = cell(&grid, 1, 0, 0);
    let id = fluids.at(&grid, wall).add_fluid(50, WATER).unwrap();

    grid.set_solid(wall, true);
    fluids.at(&grid, wall).on_cell_became_solid();
    assert_eq!(fluids.group(id).unwrap().excess(), 50);

    fluids.tick(&grid);

    assert_eq!(fluids.store().volume_of(open, WATER), 50);
    assert_eq!(fluids.total_volume(), 50);
}

#[test]
fn test_without_piston_walled_fluid_is_deleted() {
    let mut grid = VoxelGrid::new(2, 1, 1, 20);
    let config = FluidSimConfig { fluid_piston_enabled: false, ..strict_config() };
    let mut fluids = FluidCoordinator::new(config, &grid);
    let wall = cell(&grid, 0, 0, 0);
    let id = fluids.at(&grid, wall).add_fluid(50, WATER).unwrap();

    grid.set_solid(wall, true);
    fluids.at(&grid, wall).on_cell_became_solid();

    assert_eq!(fluids.group(id).unwrap().state(), GroupState::Destroyed);
    assert_eq!(fluids.total_volume(), 0);
}

#[test]
fn test_trapped_light_fluid_dissolves_and_reemerges() {
    let mut grid = VoxelGrid::new(1, 1, 2, 20);
    let bottom = cell(&grid, 0, 0, 0);
    let top = cell(&grid, 0, 0, 1);
    grid.set_solid(top, true);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);

    let water = fluids.at(&grid, bottom).add_fluid(100, WATER).unwrap();
    let oil = fluids.at(&grid, bottom).add_fluid(20, OIL).unwrap();
    fluids.at(&grid, bottom).resolve_overfull();

    assert_eq!(fluids.group(oil).unwrap().state(), GroupState::Dissolved(water));
    assert_eq!(fluids.group(water).unwrap().dissolved().get(&OIL), Some(&20));
    assert_eq!(fluids.total_volume(), 120);

    grid.set_solid(top, false);
    fluids.at(&grid, top).on_cell_became_not_solid();
    fluids.tick(&grid);

    assert_eq!(fluids.store().volume_of(top, OIL), 20);
    assert!(fluids.group(water).unwrap().dissolved().is_empty());
    assert!(fluids.group(oil).is_none(), "dissolved group purged at the end of the tick");
    assert_eq!(fluids.total_volume(), 120);
}

fn pinched_pair() -> (VoxelGrid, CellId, CellId) {
    let mut grid = VoxelGrid::new(2, 2, 1, 20);
    for (x, y) in [(1, 0), (0, 1)] {
        let c = cell(&grid, x, y, 0);
        grid.set_solid(c, true);
    }
    let source = cell(&grid, 0, 0, 0);
    let target = cell(&grid, 1, 1, 0);
    (grid, source, target)
}

#[test]
fn test_diagonal_seep_through_pinch() {
    let (grid, source, target) = pinched_pair();
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    fluids.at(&grid, source).add_fluid(100, WATER);

    let report = fluids.tick(&grid);

    let seeped = fluids.store().volume_of(target, WATER);
    assert!(seeped > 0 && seeped <= 10, "seep is capped by the modifier, got {seeped}");
    assert_eq!(report.seeped, seeped);
    assert_eq!(fluids.store().volume_of(source, WATER) + seeped, 100);
    assert_eq!(group_ids(&fluids).len(), 2);
}

#[test]
fn test_seep_can_be_disabled() {
    let (grid, source, target) = pinched_pair();
    let config = FluidSimConfig { diagonal_seep_enabled: false, ..strict_config() };
    let mut fluids = FluidCoordinator::new(config, &grid);
    fluids.at(&grid, source).add_fluid(100, WATER);

    fluids.tick(&grid);

    assert_eq!(fluids.store().volume_of(target, WATER), 0);
}

#[test]
fn test_mist_over_fresh_open_surface_decays() {
    let grid = VoxelGrid::new(1, 1, 2, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let bottom = cell(&grid, 0, 0, 0);
    let top = cell(&grid, 0, 0, 1);
    fluids.at(&grid, bottom).add_fluid(40, WATER);

    let report = fluids.tick(&grid);
    assert_eq!(report.mist_spawned, vec![(top, WATER)]);
    assert_eq!(fluids.mist_at(top).map(|m| m.fluid), Some(WATER));

    for _ in 0..3 {
        fluids.tick(&grid);
    }
    assert!(fluids.mist_at(top).is_none());
    assert_eq!(fluids.total_volume(), 40, "mist is not part of the volume");
}

#[test]
fn test_cold_surface_freezes() {
    let mut grid = VoxelGrid::new(1, 1, 2, 20);
    let bottom = cell(&grid, 0, 0, 0);
    grid.set_temperature(bottom, -5);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let id = fluids.at(&grid, bottom).add_fluid(100, WATER).unwrap();

    let report = fluids.tick(&grid);

    assert_eq!(report.frozen, vec![FrozenCell { cell: bottom, fluid: WATER, volume: 100 }]);
    assert_eq!(fluids.store().volume_of(bottom, WATER), 0);
    assert!(fluids.group(id).is_none_or(|g| !g.state().is_active()));
}

#[test]
fn test_validate_catches_and_resync_repairs() {
    let grid = VoxelGrid::new(3, 1, 1, 20);
    let config = FluidSimConfig { strict_invariants: false, ..Default::default() };
    let mut fluids = FluidCoordinator::new(config, &grid);
    let c = cell(&grid, 1, 0, 0);
    let id = fluids.at(&grid, c).add_fluid(40, WATER).unwrap();

    fluids.groups.get_mut(&id).unwrap().drain.remove_cell(c);
    assert_eq!(
        fluids.validate(),
        Err(FluidError::MissingMember { cell: c, fluid: WATER, owner: id })
    );

    fluids.resync(&grid);

    assert!(fluids.validate().is_ok());
    assert!(fluids.group_at(c, WATER).is_some());
    assert_eq!(fluids.total_volume(), 40);
}

#[test]
fn test_write_phase_checks_ownership() {
    let grid = VoxelGrid::new(3, 1, 1, 20);
    let config = FluidSimConfig { strict_invariants: false, ..Default::default() };
    let mut fluids = FluidCoordinator::new(config, &grid);
    let c = cell(&grid, 1, 0, 0);
    let id = fluids.at(&grid, c).add_fluid(40, WATER).unwrap();
    fluids.groups.get_mut(&id).unwrap().drain.remove_cell(c);

    let report = fluids.tick(&grid);

    assert_eq!(report.resynced_after, vec!["write"]);
    assert!(fluids.validate().is_ok());
    assert_eq!(fluids.total_volume(), 40);
}

#[test]
fn test_sources_hold_their_levels() {
    let grid = VoxelGrid::new(4, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    let spring = cell(&grid, 0, 0, 0);
    let sink = cell(&grid, 3, 0, 0);
    let sources = FluidSources::new(vec![
        FluidSource { cell: spring, fluid: WATER, level: 80 },
        FluidSource { cell: sink, fluid: WATER, level: 0 },
    ]);

    let mut added = 0;
    let mut removed = 0;
    for _ in 0..20 {
        fluids.tick(&grid);
        let flow = sources.step(&mut fluids, &grid);
        added += flow.added as i64;
        removed += flow.removed as i64;
        assert_eq!(fluids.store().total_volume(spring), 80);
        assert_eq!(fluids.store().total_volume(sink), 0);
    }
    assert!(removed > 0, "water reached the sink");
    assert_eq!(fluids.total_volume(), added - removed);
}

#[test]
fn test_snapshot_round_trip_keeps_group_handles() {
    let grid = VoxelGrid::new(3, 1, 2, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    fluids.at(&grid, cell(&grid, 0, 0, 0)).add_fluid(120, WATER);
    fluids.at(&grid, cell(&grid, 2, 0, 0)).add_fluid(30, OIL);
    for _ in 0..3 {
        fluids.tick(&grid);
    }
    let sources = FluidSources::new(vec![FluidSource { cell: cell(&grid, 1, 0, 1), fluid: WATER, level: 10 }]);

    let snapshot = FluidSnapshot::capture(&fluids, &sources);
    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: FluidSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, snapshot);

    let (restored, restored_sources) = decoded.restore(strict_config(), &grid).unwrap();
    assert_eq!(restored.total_volume(), fluids.total_volume());
    assert_eq!(restored_sources.len(), 1);
    for (c, entries) in fluids.store().occupied() {
        assert_eq!(restored.store().entries(c), entries);
    }
    assert_eq!(group_ids(&restored), group_ids(&fluids));
}

#[test]
fn test_snapshot_rejects_unknown_version() {
    let grid = VoxelGrid::new(1, 1, 1, 20);
    let fluids = FluidCoordinator::new(strict_config(), &grid);
    let mut snapshot = FluidSnapshot::capture(&fluids, &FluidSources::default());
    snapshot.version = 99;

    let err = snapshot.restore(strict_config(), &grid).err();
    assert_eq!(err, Some(FluidError::UnsupportedVersion { found: 99, expected: 1 }));
}

#[test]
fn test_save_and_load_fluids() {
    let grid = VoxelGrid::new(2, 1, 1, 20);
    let mut fluids = FluidCoordinator::new(strict_config(), &grid);
    fluids.at(&grid, cell(&grid, 0, 0, 0)).add_fluid(64, WATER);
    let snapshot = FluidSnapshot::capture(&fluids, &FluidSources::default());

    let path = std::env::temp_dir().join(format!("tidewater_fluids_{}.bin", std::process::id()));
    let path = path.to_str().unwrap();
    save_fluids(path, &snapshot).unwrap();
    let loaded = load_fluids(path).unwrap();
    let _ = std::fs::remove_file(path);

    assert_eq!(loaded, snapshot);
}
