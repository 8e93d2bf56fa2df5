use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Pressure iteration count must be even and non-zero, got {0}")]
    PressureIterations(u32),
    #[error("Exposure reduction factor must be a power of two in 2..=256, got {0}")]
    ReductionFactor(u32),
    #[error("Velocity settle time must be at least two max timesteps ({min}), got {found}")]
    SettleTime { found: f32, min: f32 },
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the fluid pipeline and the pan/zoom controller.
///
/// `Default` reproduces the constants the simulation was tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ping-pong pressure solve iterations. Must be even so the result lands in pressure A.
    pub pressure_iterations: u32,
    /// Relaxation factor of the pressure solve (1.0 is plain Jacobi).
    pub sor_omega: f32,
    pub density: f32,
    /// Passed through to the velocity advection shader.
    pub vorticity: f32,
    /// Upper bound on the timestep fed to the solver and the controller.
    pub max_dt: f32,
    /// When set, the solver always steps by this amount instead of the clamped frame delta.
    pub fixed_dt: Option<f32>,
    /// Local workgroup edge for every image-space stage.
    pub workgroup_size: u32,
    /// Elements folded together per auto-exposure reduction pass (subgroup width).
    pub exposure_reduction_factor: u32,
    pub auto_exposure: bool,

    pub initial_offset: [f32; 2],
    pub initial_zoom: f32,
    pub target_pan_speed: f32,
    /// Zoom speed in octaves per second.
    pub target_zoom_speed: f32,
    pub velocity_settle_time: f32,

    /// Directory holding `<stage>.wgsl` overrides for hot reload.
    pub shader_dir: Option<PathBuf>,
    /// Replay each recorded frame through the hazard checker.
    pub validate_barriers: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pressure_iterations: 40,
            sor_omega: 1.0,
            density: 0.5,
            vorticity: 0.5,
            max_dt: 1.0 / 30.0,
            fixed_dt: None,
            workgroup_size: 16,
            exposure_reduction_factor: 32,
            auto_exposure: true,
            initial_offset: [-0.706835, 0.235839],
            initial_zoom: 1.0,
            target_pan_speed: 0.5,
            target_zoom_speed: 0.5,
            velocity_settle_time: 1.0,
            shader_dir: None,
            validate_barriers: cfg!(debug_assertions),
        }
    }
}

impl SimulationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pressure_iterations == 0 || self.pressure_iterations % 2 != 0 {
            return Err(ConfigError::PressureIterations(self.pressure_iterations));
        }
        let factor = self.exposure_reduction_factor;
        if !factor.is_power_of_two() || !(2..=256).contains(&factor) {
            return Err(ConfigError::ReductionFactor(factor));
        }
        // Explicit Euler on the controller oscillates once gain * dt exceeds 2.
        let min_settle = 2.0 * self.max_dt;
        if !(self.velocity_settle_time > 0.0 && self.velocity_settle_time >= min_settle) {
            return Err(ConfigError::SettleTime {
                found: self.velocity_settle_time,
                min: min_settle,
            });
        }
        Ok(())
    }

    /// Timestep for a frame whose wall-clock delta was `delta_time`.
    pub fn clamp_dt(&self, delta_time: f32) -> f32 {
        delta_time.clamp(0.0, self.max_dt)
    }
}
