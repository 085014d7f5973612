pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{DeviceSelection, GalaxyMode, GenerationSettings, MassRange, SimConfig};
pub use constants::*;
pub use error::{BuildError, ConfigError, DeviceError, EngineError, IoError, ResourceError};
pub use types::*;
