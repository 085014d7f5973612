// Physical units used throughout the engine:
// - Distance: parsec (pc)
// - Mass: solar mass (M☉)
// - Time: year (yr)
// Velocities are therefore in pc/yr.

/// Gravitational constant in pc^3 / (M☉ · yr^2)
pub const G: f32 = 4.4985e-15;

/// Default softening length (pc) to prevent singularities in close encounters
pub const SOFTENING: f32 = 0.05;

/// Default integration step (years)
pub const DT_YEARS: f32 = 10_000.0;

/// Default number of bodies
pub const DEFAULT_BODY_COUNT: u32 = 4096;

/// Smallest population a simulation may be started or loaded with
pub const MIN_BODY_COUNT: u32 = 2;

/// Fraction of a galaxy's bodies (beyond the central one) that are black holes
pub const BLACK_HOLE_FRACTION: f64 = 0.002;

/// Inner orbit radius as a fraction of the galaxy radius
pub const MIN_RADIUS_FRACTION: f64 = 0.015;

/// Disk half-thickness at the center as a fraction of the galaxy radius
pub const DEPTH_FRACTION: f64 = 0.15;

/// Work-group size floor when searching for one that tiles the population
pub const MIN_LOCAL_SIZE: u32 = 16;

/// Bytes of work-group memory one body occupies in the force tile (vec4<f32>)
pub const TILE_BYTES_PER_BODY: u64 = 16;

/// Entry point of the force/integration kernel
pub const KERNEL_ENTRY_POINT: &str = "step";

/// How long the scheduler waits on a completion marker before giving up (ms)
pub const MARKER_TIMEOUT_MS: u64 = 5_000;

/// Pause before the single marker enqueue retry (ms)
pub const MARKER_RETRY_DELAY_MS: u64 = 2;

/// `.glxy` file magic
pub const GLXY_MAGIC: [u8; 4] = *b"GLXY";

/// `.glxy` format version written by this engine
pub const GLXY_VERSION: u32 = 1;
