use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::game::fixed_math::FixedNum;
use crate::game::fluid::{FluidType, FluidTypes, Volume};

pub const INITIAL_CONFIG_PATH: &str = "assets/fluid_config.ron";

/// Static configuration loaded once at startup.
///
/// These values feed the deterministic fluid simulation; changing them
/// mid-game changes every flow computed afterwards. Floats are used here for
/// readable RON files and converted once into [`FluidSimConfig`].
#[derive(Resource, Deserialize, Serialize, Clone, Debug)]
pub struct FluidInitialConfig {
    pub tick_rate: f64,

    // Default area, used when no VoxelGrid resource was inserted
    pub grid_width: u32,
    pub grid_length: u32,
    pub grid_height: u32,
    pub ambient_temperature: i16,

    // Flow tuning
    pub max_cell_volume: u32,
    pub diagonal_seep_enabled: bool,
    pub diagonal_seep_modifier: f32,
    pub fluid_piston_enabled: bool,
    pub read_batch_size: usize,

    // Actors and items float once this much denser fluid is in their cell
    pub float_threshold: u32,

    // Panic on ownership mismatches instead of resyncing. Defaults to debug builds.
    pub strict_invariants: Option<bool>,

    pub fluids: Vec<FluidTypeConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct FluidTypeConfig {
    pub name: String,
    pub density: f32,
    pub viscosity: u32,
    #[serde(default)]
    pub mist_duration: u16,
    #[serde(default)]
    pub freezing_point: Option<i16>,
}

impl Default for FluidInitialConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20.0,
            grid_width: 32,
            grid_length: 32,
            grid_height: 16,
            ambient_temperature: 20,
            max_cell_volume: 100,
            diagonal_seep_enabled: true,
            diagonal_seep_modifier: 0.1,
            fluid_piston_enabled: true,
            read_batch_size: 16,
            float_threshold: 50,
            strict_invariants: None,
            fluids: vec![
                FluidTypeConfig {
                    name: "water".to_string(),
                    density: 1.0,
                    viscosity: 100,
                    mist_duration: 3,
                    freezing_point: Some(0),
                },
                FluidTypeConfig {
                    name: "oil".to_string(),
                    density: 0.9,
                    viscosity: 40,
                    mist_duration: 0,
                    freezing_point: None,
                },
                FluidTypeConfig {
                    name: "lava".to_string(),
                    density: 3.1,
                    viscosity: 10,
                    mist_duration: 0,
                    freezing_point: None,
                },
            ],
        }
    }
}

/// Runtime fluid configuration with fixed-point values.
///
/// Built once from [`FluidInitialConfig`]; this is what the coordinator reads.
#[derive(Resource, Clone, Debug)]
pub struct FluidSimConfig {
    pub max_cell_volume: Volume,
    pub diagonal_seep_enabled: bool,
    pub diagonal_seep_modifier: FixedNum,
    pub fluid_piston_enabled: bool,
    pub read_batch_size: usize,
    pub float_threshold: Volume,
    pub strict_invariants: bool,
    pub fluids: FluidTypes,
}

impl From<&FluidInitialConfig> for FluidSimConfig {
    fn from(config: &FluidInitialConfig) -> Self {
        let fluids = config
            .fluids
            .iter()
            .map(|fluid| FluidType {
                name: fluid.name.clone(),
                density: FixedNum::from_num(fluid.density),
                viscosity: fluid.viscosity,
                mist_duration: fluid.mist_duration,
                freezing_point: fluid.freezing_point,
            })
            .collect();

        Self {
            max_cell_volume: config.max_cell_volume,
            diagonal_seep_enabled: config.diagonal_seep_enabled,
            diagonal_seep_modifier: FixedNum::from_num(config.diagonal_seep_modifier),
            fluid_piston_enabled: config.fluid_piston_enabled,
            read_batch_size: config.read_batch_size.max(1),
            float_threshold: config.float_threshold,
            strict_invariants: config.strict_invariants.unwrap_or(cfg!(debug_assertions)),
            fluids: FluidTypes::new(fluids),
        }
    }
}

impl Default for FluidSimConfig {
    fn default() -> Self {
        Self::from(&FluidInitialConfig::default())
    }
}

pub struct FluidConfigPlugin;

impl Plugin for FluidConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(PreStartup, load_initial_config);
    }
}

/// Read and parse a RON fluid configuration file.
pub fn read_initial_config(path: &str) -> Result<FluidInitialConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config = ron::from_str::<FluidInitialConfig>(&contents)?;
    Ok(config)
}

/// Load static configuration synchronously before any fluid resource is built.
/// A config inserted by the app beforehand wins over the file.
fn load_initial_config(mut commands: Commands, existing: Option<Res<FluidInitialConfig>>) {
    if existing.is_some() {
        info!("Using FluidInitialConfig provided by the app");
        return;
    }

    match read_initial_config(INITIAL_CONFIG_PATH) {
        Ok(config) => {
            info!("Loaded fluid config from {}", INITIAL_CONFIG_PATH);
            commands.insert_resource(config);
        }
        Err(e) => {
            error!("Failed to load {}: {}", INITIAL_CONFIG_PATH, e);
            error!("Using default FluidInitialConfig");
            commands.insert_resource(FluidInitialConfig::default());
        }
    }
}
