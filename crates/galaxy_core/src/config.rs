use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BODY_COUNT, DT_YEARS, MARKER_TIMEOUT_MS, MIN_BODY_COUNT, SOFTENING};
use crate::error::ConfigError;

/// Inclusive mass interval in M☉
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassRange {
    pub min: f32,
    pub max: f32,
}

impl MassRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, mass: f32) -> bool {
        mass >= self.min && mass <= self.max
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if !(self.min > 0.0) || !self.max.is_finite() {
            return Err(ConfigError::NonPositiveMass {
                name,
                value: self.min,
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvalidRange {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Shape of the initial population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GalaxyMode {
    /// One spiral galaxy of the given radius (pc)
    Single { radius: f32 },
    /// Two galaxies on a collision course
    Collision {
        /// Radius of each galaxy is drawn from this interval (pc)
        radius_min: f32,
        radius_max: f32,
        /// Upper bound on the distance between the two centers (pc)
        max_distance: f32,
        /// Upper bound on the relative bulk speed (pc/yr)
        max_speed: f32,
    },
}

/// Parameters for galaxy population generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub star_mass: MassRange,
    pub black_hole_mass: MassRange,
    pub mode: GalaxyMode,
}

impl GenerationSettings {
    pub fn single(radius: f32) -> Self {
        Self {
            mode: GalaxyMode::Single { radius },
            ..Self::default()
        }
    }

    pub fn collision(radius_min: f32, radius_max: f32, max_distance: f32, max_speed: f32) -> Self {
        Self {
            mode: GalaxyMode::Collision {
                radius_min,
                radius_max,
                max_distance,
                max_speed,
            },
            ..Self::default()
        }
    }

    pub fn with_star_mass(mut self, min: f32, max: f32) -> Self {
        self.star_mass = MassRange::new(min, max);
        self
    }

    pub fn with_black_hole_mass(mut self, min: f32, max: f32) -> Self {
        self.black_hole_mass = MassRange::new(min, max);
        self
    }

    /// Check every range and magnitude
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.star_mass.validate("star mass")?;
        self.black_hole_mass.validate("black hole mass")?;
        match self.mode {
            GalaxyMode::Single { radius } => non_negative("radius", radius),
            GalaxyMode::Collision {
                radius_min,
                radius_max,
                max_distance,
                max_speed,
            } => {
                non_negative("radius min", radius_min)?;
                non_negative("radius max", radius_max)?;
                non_negative("max distance", max_distance)?;
                non_negative("max speed", max_speed)?;
                if radius_min > radius_max {
                    return Err(ConfigError::InvalidRange {
                        name: "radius",
                        min: radius_min,
                        max: radius_max,
                    });
                }
                Ok(())
            }
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            star_mass: MassRange::new(0.1, 2.0),
            black_hole_mass: MassRange::new(1_000.0, 5_000.0),
            mode: GalaxyMode::Single { radius: 50.0 },
        }
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

/// Platform/device pair chosen by the configuration collaborator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub platform: usize,
    pub device: usize,
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of bodies to generate
    pub body_count: u32,
    /// Smallest population accepted when opening a file
    pub min_body_count: u32,
    /// Random seed for deterministic generation
    pub seed: u64,
    /// Integration step in years
    pub step_years: f32,
    /// Softening length in pc
    pub softening: f32,
    /// Bound on a single completion-marker wait
    pub marker_timeout_ms: u64,
    pub device: DeviceSelection,
    pub generation: GenerationSettings,
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_count < self.min_body_count.max(MIN_BODY_COUNT) {
            return Err(ConfigError::TooFewBodies {
                required: self.min_body_count.max(MIN_BODY_COUNT) as usize,
                found: self.body_count as usize,
            });
        }
        if !(self.step_years > 0.0) || !self.step_years.is_finite() {
            return Err(ConfigError::InvalidStepSize(self.step_years));
        }
        non_negative("softening", self.softening)?;
        self.generation.validate()
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            body_count: DEFAULT_BODY_COUNT,
            min_body_count: MIN_BODY_COUNT,
            seed: 42,
            step_years: DT_YEARS,
            softening: SOFTENING,
            marker_timeout_ms: MARKER_TIMEOUT_MS,
            device: DeviceSelection::default(),
            generation: GenerationSettings::default(),
        }
    }
}
