use galaxy_core::{Body, GpuBody, StepParams};

/// Softened gravitational acceleration on body i from body j
/// Returns [ax, ay, az]
pub fn gravity_acceleration(
    pos_i: [f32; 3],
    pos_j: [f32; 3],
    mass_j: f32,
    softening_sq: f32,
    gravity: f32,
) -> [f32; 3] {
    let dx = pos_j[0] - pos_i[0];
    let dy = pos_j[1] - pos_i[1];
    let dz = pos_j[2] - pos_i[2];

    let r2 = dx * dx + dy * dy + dz * dz + softening_sq;
    if r2 <= 0.0 {
        return [0.0; 3];
    }
    let inv = 1.0 / r2.sqrt();
    let f = gravity * mass_j * inv * inv * inv;

    [f * dx, f * dy, f * dz]
}

/// One all-pairs step over `input`, written to `output`.
///
/// Semi-implicit Euler: velocity is advanced first, position then moves with
/// the new velocity. Mass is carried through unchanged. Only the first
/// `params.body_count` entries take part.
pub fn integrate(input: &[GpuBody], output: &mut [GpuBody], params: &StepParams) {
    let count = (params.body_count as usize).min(input.len()).min(output.len());
    let sources = &input[..count];

    for (i, out) in output[..count].iter_mut().enumerate() {
        let body = &input[i];
        let pos = body.pos();

        let mut acc = [0.0f32; 3];
        for other in sources {
            let a = gravity_acceleration(
                pos,
                other.pos(),
                other.mass(),
                params.softening_sq,
                params.gravity,
            );
            acc[0] += a[0];
            acc[1] += a[1];
            acc[2] += a[2];
        }

        let dt = params.dt_years;
        let mut velocity = body.velocity;
        let mut position = body.position;
        for k in 0..3 {
            velocity[k] += acc[k] * dt;
            position[k] += velocity[k] * dt;
        }

        *out = GpuBody { position, velocity };
    }
}

/// Mass-weighted mean position
pub fn center_of_mass(bodies: &[Body]) -> [f64; 3] {
    let mut sum = [0.0f64; 3];
    let mut total = 0.0f64;
    for body in bodies {
        let m = body.mass as f64;
        total += m;
        for k in 0..3 {
            sum[k] += body.position[k] as f64 * m;
        }
    }
    if total > 0.0 {
        sum.map(|s| s / total)
    } else {
        sum
    }
}

pub fn total_momentum(bodies: &[Body]) -> [f64; 3] {
    let mut p = [0.0f64; 3];
    for body in bodies {
        for k in 0..3 {
            p[k] += body.velocity[k] as f64 * body.mass as f64;
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use galaxy_core::G;

    #[test]
    fn test_gravity_symmetry() {
        let a1 = gravity_acceleration([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0, 0.0025, G);
        let a2 = gravity_acceleration([1.0, 0.0, 0.0], [0.0, 0.0, 0.0], 1.0, 0.0025, G);

        // Opposite directions
        for k in 0..3 {
            assert_relative_eq!(a1[k], -a2[k]);
        }
    }

    #[test]
    fn test_gravity_inverse_square() {
        let a_near = gravity_acceleration([0.0; 3], [1.0, 0.0, 0.0], 1.0, 0.0, 1.0);
        let a_far = gravity_acceleration([0.0; 3], [2.0, 0.0, 0.0], 1.0, 0.0, 1.0);
        assert_relative_eq!(a_near[0] / a_far[0], 4.0, max_relative = 1e-5);
    }

    #[test]
    fn self_interaction_vanishes() {
        assert_eq!(gravity_acceleration([3.0; 3], [3.0; 3], 10.0, 0.0, G), [0.0; 3]);
        assert_eq!(gravity_acceleration([3.0; 3], [3.0; 3], 10.0, 0.01, G), [0.0; 3]);
    }

    #[test]
    fn two_body_momentum_is_conserved() {
        let bodies = [
            Body::new(0, [-0.5, 0.0, 0.0], [0.0, -1e-6, 0.0], 3_000.0),
            Body::new(1, [0.5, 0.0, 0.0], [0.0, 3e-6, 0.0], 1_000.0),
        ];
        let params = StepParams::new(10_000.0, 0.05, 2);

        let mut current: Vec<GpuBody> = bodies.iter().map(GpuBody::from).collect();
        let mut next = current.clone();
        let before = total_momentum(&bodies);

        for _ in 0..100 {
            integrate(&current, &mut next, &params);
            std::mem::swap(&mut current, &mut next);
        }

        let after: Vec<Body> = current
            .iter()
            .enumerate()
            .map(|(i, b)| b.to_body(i as u32))
            .collect();
        let moved = total_momentum(&after);
        for k in 0..3 {
            assert!((moved[k] - before[k]).abs() < 1e-6, "axis {k}: {before:?} -> {moved:?}");
        }
        assert_ne!(after[0].position, bodies[0].position);
    }

    #[test]
    fn masses_pass_through_and_excess_is_untouched() {
        let input = vec![
            GpuBody::from(&Body::new(0, [0.0; 3], [0.0; 3], 5.0)),
            GpuBody::from(&Body::new(1, [1.0, 0.0, 0.0], [0.0; 3], 7.0)),
            GpuBody::from(&Body::new(2, [9.0; 3], [0.0; 3], 9.0)),
        ];
        let mut output = vec![GpuBody::from(&Body::new(0, [42.0; 3], [0.0; 3], 1.0)); 3];
        integrate(&input, &mut output, &StepParams::new(1.0, 0.0, 2));

        assert_eq!(output[0].mass(), 5.0);
        assert_eq!(output[1].mass(), 7.0);
        assert_eq!(output[2].pos(), [42.0; 3]);
        // Pulled toward each other
        assert!(output[0].velocity[0] > 0.0);
        assert!(output[1].velocity[0] < 0.0);
    }

    #[test]
    fn center_of_mass_weights_by_mass() {
        let bodies = [
            Body::new(0, [0.0; 3], [0.0; 3], 3.0),
            Body::new(1, [4.0, 0.0, 0.0], [0.0; 3], 1.0),
        ];
        assert_relative_eq!(center_of_mass(&bodies)[0], 1.0);
    }
}
