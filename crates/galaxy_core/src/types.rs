use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A point mass: star or black hole.
/// Position in pc, velocity in pc/yr, mass in M☉.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub mass: f32,
    /// Stable ordinal within the collection (dispatch/storage order)
    pub index: u32,
}

impl Body {
    pub fn new(index: u32, position: [f32; 3], velocity: [f32; 3], mass: f32) -> Self {
        Self {
            position,
            velocity,
            mass,
            index,
        }
    }

    pub fn speed(&self) -> f32 {
        let [x, y, z] = self.velocity;
        (x * x + y * y + z * z).sqrt()
    }
}

/// Renumber a collection so every `index` equals its position
pub fn reindex(bodies: &mut [Body]) {
    for (i, body) in bodies.iter_mut().enumerate() {
        body.index = i as u32;
    }
}

/// Device-side body layout.
/// Must be repr(C) and Pod for GPU buffer upload
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBody {
    /// Position (x, y, z) + mass packed in w
    pub position: [f32; 4],
    /// Velocity (x, y, z) + padding
    pub velocity: [f32; 4],
}

impl GpuBody {
    pub fn mass(&self) -> f32 {
        self.position[3]
    }

    pub fn pos(&self) -> [f32; 3] {
        [self.position[0], self.position[1], self.position[2]]
    }

    pub fn vel(&self) -> [f32; 3] {
        [self.velocity[0], self.velocity[1], self.velocity[2]]
    }

    pub fn to_body(&self, index: u32) -> Body {
        Body::new(index, self.pos(), self.vel(), self.mass())
    }
}

impl From<&Body> for GpuBody {
    fn from(body: &Body) -> Self {
        let [px, py, pz] = body.position;
        let [vx, vy, vz] = body.velocity;
        Self {
            position: [px, py, pz, body.mass],
            velocity: [vx, vy, vz, 0.0],
        }
    }
}

/// Per-step kernel parameters, uploaded as a uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StepParams {
    pub dt_years: f32,
    pub softening_sq: f32,
    pub gravity: f32,
    pub body_count: u32,
}

impl StepParams {
    pub fn new(dt_years: f32, softening: f32, body_count: u32) -> Self {
        Self {
            dt_years,
            softening_sq: softening * softening,
            gravity: crate::constants::G,
            body_count,
        }
    }
}

/// Which of the two particle buffers a role currently points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    A,
    B,
}

impl BufferRole {
    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Human readable simulated time: "850 yr", "12.50 kyr", "3.20 Myr", "1.05 Gyr"
pub fn format_elapsed(years: f64) -> String {
    let abs = years.abs();
    if abs >= 1e9 {
        format!("{:.2} Gyr", years / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2} Myr", years / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2} kyr", years / 1e3)
    } else {
        format!("{:.0} yr", years)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layout_packs_mass_in_w() {
        let body = Body::new(7, [1.0, 2.0, 3.0], [0.1, 0.2, 0.3], 5.0);
        let gpu = GpuBody::from(&body);
        assert_eq!(gpu.position, [1.0, 2.0, 3.0, 5.0]);
        assert_eq!(gpu.velocity[3], 0.0);
        assert_eq!(gpu.to_body(7), body);
        assert_eq!(std::mem::size_of::<GpuBody>(), 32);
    }

    #[test]
    fn elapsed_time_units() {
        assert_eq!(format_elapsed(850.0), "850 yr");
        assert_eq!(format_elapsed(12_500.0), "12.50 kyr");
        assert_eq!(format_elapsed(3.2e6), "3.20 Myr");
        assert_eq!(format_elapsed(1.05e9), "1.05 Gyr");
    }

    #[test]
    fn roles_alternate() {
        assert_eq!(BufferRole::A.other(), BufferRole::B);
        assert_eq!(BufferRole::B.other().index(), 0);
    }

    #[test]
    fn reindex_follows_position() {
        let mut bodies = vec![Body::new(9, [0.0; 3], [0.0; 3], 1.0); 3];
        reindex(&mut bodies);
        assert_eq!(
            bodies.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
