use bevy::prelude::*;

pub mod config;
pub mod fixed_math;
pub mod fluid;
pub mod grid;
pub mod profiling;

use config::FluidConfigPlugin;
use fluid::FluidPlugin;

/// Everything the fluid simulation needs inside a Bevy app: configuration
/// loading plus the fluid resources and fixed-step systems.
pub struct TidewaterPlugin;

impl Plugin for TidewaterPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((FluidConfigPlugin, FluidPlugin));
    }
}
