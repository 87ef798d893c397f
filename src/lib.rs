//! A parallel N-body gravitational simulator built on the Barnes-Hut
//! approximation. Advances point masses through discrete time steps,
//! approximating pairwise gravity in O(N log N) by summarizing distant mass
//! with an octree, then integrating velocities and positions.
//!
//! The hard core is two tightly coupled subsystems:
//! - [`tree`]: octree construction, center-of-mass summarization/pruning,
//!   and Barnes-Hut force traversal.
//! - [`deque`] + [`worker`]: a lock-free work-stealing task queue and the
//!   scheduler that drives per-particle force computations across threads.
//!
//! Everything else ([`particle`], [`octant`], [`io`], [`cli`]) is per-step
//! glue: bounds, data model, file I/O, and argument parsing.

pub mod cli;
pub mod deque;
pub mod error;
pub mod io;
pub mod octant;
pub mod particle;
pub mod tree;
pub mod worker;

use lin_alg::f64::Vec3;
use log::debug;

use cli::{Mode, SimConfig};
use error::SimError;
use particle::Particle;
use tree::{BhConfig, Tree};

/// Runs the full simulation described by `config`, writing `points.txt` to
/// `output_path` (truncated on start). Returns the final particle state,
/// mostly useful for tests comparing sequential and parallel runs.
pub fn run(config: &SimConfig, output_path: &std::path::Path) -> Result<Vec<Particle>, SimError> {
    let mut particles = match &config.input_file {
        Some(path) => io::read_particles(path)?,
        None => particle::random_particles(config.n_particles),
    };
    if particles.is_empty() {
        return Err(SimError::Argument("cannot run a simulation with 0 particles".to_string()));
    }

    let mut sink = io::PointSink::create(output_path)?;
    sink.write_positions(&particles)?;

    let bh_config = BhConfig::default();

    for iter in 0..config.n_iters {
        let bound = io::bounds(&particles);
        let positions: Vec<Vec3> = particles.iter().map(|p| p.pos).collect();
        let tree = Tree::build(&particles, bound, bh_config.clone());

        match config.mode {
            Mode::Sequential => {
                let forces = tree::compute_forces(&tree, &positions);
                for (p, f) in particles.iter_mut().zip(forces.iter()) {
                    p.vel += *f * config.dt;
                }
            }
            Mode::Parallel => {
                let mut velocities: Vec<Vec3> = particles.iter().map(|p| p.vel).collect();
                worker::run_step(&tree, &positions, &mut velocities, config.dt, config.n_threads);
                for (p, v) in particles.iter_mut().zip(velocities.into_iter()) {
                    p.vel = v;
                }
            }
        }
        for p in particles.iter_mut() {
            p.integrate(config.dt);
        }

        sink.write_positions(&particles)?;
        debug!("completed iteration {}/{}", iter + 1, config.n_iters);
    }

    sink.flush()?;
    Ok(particles)
}
