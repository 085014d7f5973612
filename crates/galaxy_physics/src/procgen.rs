use std::f64::consts::{PI, TAU};
use std::ops::Range;

use bevy::math::{DQuat, DVec3};
use galaxy_core::*;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Placement of one generated galaxy inside a population
#[derive(Debug, Clone, PartialEq)]
pub struct GalaxyLayout {
    /// Contiguous index range of the galaxy's bodies
    pub range: Range<usize>,
    /// Central black hole plus the extra disk black holes, at the start of `range`
    pub black_holes: usize,
    pub radius: f32,
    pub center: [f32; 3],
    pub bulk_velocity: [f32; 3],
}

/// Generated bodies plus the layout of the galaxies they form
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPopulation {
    pub bodies: Vec<Body>,
    pub galaxies: Vec<GalaxyLayout>,
}

/// Deterministic galaxy population generator.
///
/// Every call reseeds its own ChaCha8 stream from `seed`, so the same settings
/// and body count always produce the same population.
#[derive(Debug, Clone, Copy)]
pub struct GalaxyGenerator {
    seed: u64,
}

impl GalaxyGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate according to `settings.mode`
    pub fn generate(
        &self,
        settings: &GenerationSettings,
        body_count: usize,
    ) -> Result<GeneratedPopulation, ConfigError> {
        match settings.mode {
            GalaxyMode::Single { .. } => self.generate_single(settings, body_count),
            GalaxyMode::Collision { .. } => self.generate_collision(settings, body_count),
        }
    }

    /// One spiral galaxy at the origin, at rest.
    /// In collision mode the largest radius of the range is used.
    pub fn generate_single(
        &self,
        settings: &GenerationSettings,
        body_count: usize,
    ) -> Result<GeneratedPopulation, ConfigError> {
        settings.validate()?;
        require_bodies(body_count, MIN_BODY_COUNT as usize)?;

        let radius = match settings.mode {
            GalaxyMode::Single { radius } => radius,
            GalaxyMode::Collision { radius_max, .. } => radius_max,
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut bodies = Vec::with_capacity(body_count);
        let layout = spiral_galaxy(
            &mut rng,
            settings,
            &mut bodies,
            body_count,
            radius as f64,
            DVec3::ZERO,
            DVec3::ZERO,
        );

        Ok(GeneratedPopulation {
            bodies,
            galaxies: vec![layout],
        })
    }

    /// Two spiral galaxies on a collision course.
    /// In single mode both galaxies take the single radius and start at rest
    /// on top of each other.
    pub fn generate_collision(
        &self,
        settings: &GenerationSettings,
        body_count: usize,
    ) -> Result<GeneratedPopulation, ConfigError> {
        settings.validate()?;
        require_bodies(body_count, 2 * MIN_BODY_COUNT as usize)?;

        let (radius_min, radius_max, max_distance, max_speed) = match settings.mode {
            GalaxyMode::Single { radius } => (radius, radius, 0.0, 0.0),
            GalaxyMode::Collision {
                radius_min,
                radius_max,
                max_distance,
                max_speed,
            } => (radius_min, radius_max, max_distance, max_speed),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let first_count = body_count / 2;
        let second_count = body_count - first_count;
        let first_radius = rng.gen_range(radius_min as f64..=radius_max as f64);
        let second_radius = rng.gen_range(radius_min as f64..=radius_max as f64);

        // Line of centers, second galaxy on the +axis side
        let axis = random_unit(&mut rng);
        let distance = rng.gen_range(0.0..=max_distance as f64);

        // Relative velocity points back along the axis with a sideways offset
        // so the disks approach without a dead-center hit
        let side = DQuat::from_axis_angle(axis, rng.gen_range(0.0..TAU)) * axis.any_orthonormal_vector();
        let direction = (-axis + side * rng.gen_range(0.0..0.5)).normalize();
        let speed = rng.gen_range(0.0..=max_speed as f64);
        let relative = direction * speed;

        let mut bodies = Vec::with_capacity(body_count);
        let first = spiral_galaxy(
            &mut rng,
            settings,
            &mut bodies,
            first_count,
            first_radius,
            -axis * distance * 0.5,
            -relative * 0.5,
        );
        let second = spiral_galaxy(
            &mut rng,
            settings,
            &mut bodies,
            second_count,
            second_radius,
            axis * distance * 0.5,
            relative * 0.5,
        );

        Ok(GeneratedPopulation {
            bodies,
            galaxies: vec![first, second],
        })
    }
}

fn require_bodies(found: usize, required: usize) -> Result<(), ConfigError> {
    if found < required {
        return Err(ConfigError::TooFewBodies { required, found });
    }
    Ok(())
}

/// Uniformly distributed direction on the unit sphere
fn random_unit(rng: &mut impl Rng) -> DVec3 {
    let z: f64 = rng.gen_range(-1.0..=1.0);
    let theta = rng.gen_range(0.0..TAU);
    let ring = (1.0 - z * z).max(0.0).sqrt();
    DVec3::new(ring * theta.cos(), ring * theta.sin(), z)
}

/// Append one spiral galaxy of `count` bodies to `bodies`
fn spiral_galaxy(
    rng: &mut impl Rng,
    settings: &GenerationSettings,
    bodies: &mut Vec<Body>,
    count: usize,
    radius: f64,
    center: DVec3,
    bulk_velocity: DVec3,
) -> GalaxyLayout {
    let start = bodies.len();

    // Index 0 is the central black hole, then the extra disk black holes
    let extra_black_holes = ((count as f64 * BLACK_HOLE_FRACTION) as usize).min(count - 1);
    let black_holes = 1 + extra_black_holes;

    let masses: Vec<f64> = (0..count)
        .map(|i| {
            let range = if i < black_holes {
                settings.black_hole_mass
            } else {
                settings.star_mass
            };
            rng.gen_range(range.min as f64..=range.max as f64)
        })
        .collect();
    let central_mass = masses[0];
    let disk_mass: f64 = masses[1..].iter().sum();

    let orientation = DQuat::from_axis_angle(random_unit(rng), rng.gen_range(0.0..TAU));

    let arms = if rng.gen_bool(0.5) { 2 } else { 4 };
    let winding = PI + TAU * rng.gen_range(0.0..1.0) / (arms / 2) as f64;
    let arm_spread = 0.125 * winding / arms as f64;

    let min_radius = MIN_RADIUS_FRACTION * radius;
    let span = radius - min_radius;

    bodies.push(Body::new(
        start as u32,
        center.as_vec3().to_array(),
        bulk_velocity.as_vec3().to_array(),
        central_mass as f32,
    ));

    for (i, &mass) in masses.iter().enumerate().skip(1) {
        let u: f64 = rng.gen_range(0.0..1.0);
        let r = min_radius + (1.0 - u.sqrt()) * span;

        let max_height = DEPTH_FRACTION * radius * (1.0 - r / radius).max(0.0).powf(2.5);
        let height = max_height * rng.gen_range(-1.0..=1.0);

        let along_arm = if span > 0.0 { (r - min_radius) / span } else { 0.0 };
        let arm = rng.gen_range(0..arms);
        let angle = winding * along_arm
            + arm as f64 * TAU / arms as f64
            + arm_spread * rng.gen_range(-1.0..=1.0);

        let (sin, cos) = angle.sin_cos();
        let local = DVec3::new(r * cos, height, r * sin);
        let tangent = DVec3::new(-sin, 0.0, cos);

        // Enclosed mass: central hole plus the cumulative disk fraction at r/R
        let x = if radius > 0.0 { (r / radius).clamp(0.0, 1.0) } else { 0.0 };
        let enclosed = central_mass + disk_mass * (1.0 - (1.0 - x) * (1.0 - x));
        let speed = if r > f64::EPSILON {
            (G as f64 * enclosed / r).sqrt()
        } else {
            0.0
        };

        let position = center + orientation * local;
        let velocity = bulk_velocity + orientation * tangent * speed;

        bodies.push(Body::new(
            (start + i) as u32,
            position.as_vec3().to_array(),
            velocity.as_vec3().to_array(),
            mass as f32,
        ));
    }

    GalaxyLayout {
        range: start..bodies.len(),
        black_holes,
        radius: radius as f32,
        center: center.as_vec3().to_array(),
        bulk_velocity: bulk_velocity.as_vec3().to_array(),
    }
}
