use tidewater::game::config::FluidSimConfig;
use tidewater::game::fluid::{FluidCoordinator, FluidTypeId, FluidTypes, Volume};
use tidewater::game::grid::{CellId, VoxelGrid};

fn strict() -> FluidSimConfig {
    FluidSimConfig { strict_invariants: true, ..Default::default() }
}

fn fluid(types: &FluidTypes, name: &str) -> FluidTypeId {
    types.by_name(name).unwrap_or_else(|| panic!("no fluid named {name}"))
}

fn settle(fluids: &mut FluidCoordinator, grid: &VoxelGrid) -> usize {
    for ticks in 1..=200 {
        fluids.tick(grid);
        if fluids.is_settled() {
            return ticks;
        }
    }
    panic!("fluids never settled");
}

#[test]
fn test_overflowing_shaft_fills_bottom_up() {
    let grid = VoxelGrid::new(1, 1, 5, 20);
    let config = strict();
    let water = fluid(&config.fluids, "water");
    let mut fluids = FluidCoordinator::new(config, &grid);
    let shaft: Vec<CellId> = (0..5).map(|z| grid.cell(0, 0, z).unwrap()).collect();

    fluids.at(&grid, shaft[0]).add_fluid(350, water);
    settle(&mut fluids, &grid);

    let levels: Vec<Volume> = shaft.iter().map(|&c| fluids.store().volume_of(c, water)).collect();
    assert_eq!(levels, vec![100, 100, 100, 50, 0]);
    assert_eq!(fluids.active_groups().count(), 1);
    assert_eq!(fluids.total_volume(), 350);
}

#[test]
fn test_lava_sinks_under_water() {
    let grid = VoxelGrid::new(1, 1, 2, 20);
    let config = strict();
    let water = fluid(&config.fluids, "water");
    let lava = fluid(&config.fluids, "lava");
    let mut fluids = FluidCoordinator::new(config, &grid);
    let bottom = grid.cell(0, 0, 0).unwrap();
    let top = grid.cell(0, 0, 1).unwrap();

    fluids.at(&grid, bottom).add_fluid(100, water);
    fluids.at(&grid, bottom).add_fluid(100, lava);
    settle(&mut fluids, &grid);

    assert_eq!(fluids.store().volume_of(bottom, lava), 100);
    assert_eq!(fluids.store().volume_of(bottom, water), 0);
    assert_eq!(fluids.store().volume_of(top, water), 100);
    assert_eq!(fluids.total_volume_of(water), 100);
    assert_eq!(fluids.total_volume_of(lava), 100);
}

#[test]
fn test_wall_through_pond_splits_it_and_keeps_the_water() {
    let mut grid = VoxelGrid::new(5, 1, 1, 20);
    let config = strict();
    let water = fluid(&config.fluids, "water");
    let mut fluids = FluidCoordinator::new(config, &grid);
    let pond: Vec<CellId> = (0..5).map(|x| grid.cell(x, 0, 0).unwrap()).collect();
    for &c in &pond {
        fluids.at(&grid, c).add_fluid(50, water);
    }
    settle(&mut fluids, &grid);

    grid.set_solid(pond[2], true);
    fluids.at(&grid, pond[2]).on_cell_became_solid();
    settle(&mut fluids, &grid);

    assert_eq!(fluids.active_groups().count(), 2);
    assert_eq!(fluids.store().total_volume(pond[2]), 0);
    assert_eq!(fluids.total_volume(), 250);
    for &c in &pond {
        assert!(fluids.store().total_volume(c) <= fluids.store().max_cell_volume());
    }
}

#[test]
fn test_digging_out_a_wall_joins_two_pools() {
    let mut grid = VoxelGrid::new(3, 1, 1, 20);
    let config = strict();
    let water = fluid(&config.fluids, "water");
    let wall = grid.cell(1, 0, 0).unwrap();
    grid.set_solid(wall, true);
    let mut fluids = FluidCoordinator::new(config, &grid);
    fluids.at(&grid, grid.cell(0, 0, 0).unwrap()).add_fluid(90, water);
    fluids.at(&grid, grid.cell(2, 0, 0).unwrap()).add_fluid(30, water);
    settle(&mut fluids, &grid);
    assert_eq!(fluids.active_groups().count(), 2);

    grid.set_solid(wall, false);
    fluids.at(&grid, wall).on_cell_became_not_solid();
    settle(&mut fluids, &grid);

    assert_eq!(fluids.active_groups().count(), 1);
    assert_eq!(fluids.total_volume(), 120);
    for x in 0..3 {
        let level = fluids.store().volume_of(grid.cell(x, 0, 0).unwrap(), water);
        assert!((39..=41).contains(&level), "cell {x} should be near 40, got {level}");
    }
}
