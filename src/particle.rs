//! The data model: a six-tuple point mass (position + velocity), with unit
//! mass implicit in the force law.

use lin_alg::f64::Vec3;
use rand::Rng;

use crate::tree::BodyModel;

/// A point mass with unit mass (the force law in `tree::barnes_hut_force` never
/// multiplies mass in, so any non-unity mass field would be meaningless here;
/// see spec's unit-mass convention). Identified implicitly by its index in the
/// population vector; that index is the task unit the scheduler moves around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub pos: Vec3,
    pub vel: Vec3,
}

impl Particle {
    pub fn new(pos: Vec3, vel: Vec3) -> Self {
        Self { pos, vel }
    }

    /// Advances position by one Euler step. Velocity must already reflect this
    /// step's force contribution; called only by the main thread during the
    /// integration phase, never by a worker.
    pub fn integrate(&mut self, dt: f64) {
        self.pos += self.vel * dt;
    }
}

impl BodyModel for Particle {
    fn posit(&self) -> Vec3 {
        self.pos
    }
}

/// Draws `n` particles with positions uniform on [-10, 10]^3 and velocities
/// uniform on [-25, 25]^3, using the thread-local RNG. This is not seeded for
/// reproducibility: two runs without an input file will generally diverge.
/// Pass an input file (see [`crate::io::read_particles`]) when a
/// deterministic initial condition is required.
pub fn random_particles(n: usize) -> Vec<Particle> {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| {
            let pos = Vec3::new(
                rng.random_range(-10.0..=10.0),
                rng.random_range(-10.0..=10.0),
                rng.random_range(-10.0..=10.0),
            );
            let vel = Vec3::new(
                rng.random_range(-25.0..=25.0),
                rng.random_range(-25.0..=25.0),
                rng.random_range(-25.0..=25.0),
            );
            Particle::new(pos, vel)
        })
        .collect()
}
