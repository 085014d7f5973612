pub mod forces;
pub mod procgen;

pub use procgen::{GalaxyGenerator, GalaxyLayout, GeneratedPopulation};
