//! The parallel execution engine: per-worker lock-free deques, a
//! work-stealing loop, and a single-consumer completion channel that drives
//! position integration on the main thread.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use lin_alg::f64::Vec3;
use rand::Rng;

use crate::deque::Deque;
use crate::tree::{barnes_hut_force, Tree};

/// A raw-pointer view over a velocity slice shared across worker threads.
/// Each particle index is written by exactly one worker at a time: the task
/// index travels through a deque (owner push/pop, thief steal), and a
/// stolen task transfers that exclusive ownership atomically, so no two
/// threads ever touch the same slot concurrently. That structural guarantee
/// is what makes `Sync` sound here, following the same raw-slice-sharing
/// pattern used elsewhere for concurrent particle buffers.
struct SharedVelocities<'a> {
    ptr: *mut Vec3,
    len: usize,
    _marker: PhantomData<&'a mut [Vec3]>,
}

unsafe impl Sync for SharedVelocities<'_> {}

impl<'a> SharedVelocities<'a> {
    fn wrap(slice: &'a mut [Vec3]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    /// Safety: caller must guarantee no two threads call `get`/`set` for the
    /// same `idx` concurrently. The scheduler in this module upholds that by
    /// construction: `idx` only ever lives in one deque slot at a time.
    unsafe fn get(&self, idx: usize) -> Vec3 {
        debug_assert!(idx < self.len);
        *self.ptr.add(idx)
    }

    unsafe fn set(&self, idx: usize, v: Vec3) {
        debug_assert!(idx < self.len);
        *self.ptr.add(idx) = v;
    }
}

/// Drives one simulation step's force phase across `n_threads` workers.
/// `positions` is the tree's read-only snapshot (workers never mutate it);
/// `velocities` is updated in place, one slot per particle, each written
/// exactly once by whichever worker currently owns that index's task.
pub fn run_step(tree: &Tree, positions: &[Vec3], velocities: &mut [Vec3], dt: f64, n_threads: usize) {
    let n = positions.len();
    if n == 0 {
        return;
    }
    let n_threads = n_threads.max(1);
    let shared_velocities = SharedVelocities::wrap(velocities);

    let deques: Vec<Arc<Deque<usize>>> = (0..n_threads).map(|_| Arc::new(Deque::new())).collect();
    let all_done = Arc::new(AtomicBool::new(false));
    let (tx, rx): (Sender<usize>, Receiver<usize>) = unbounded();

    std::thread::scope(|scope| {
        for worker_id in 0..n_threads {
            let deques = deques.clone();
            let all_done = Arc::clone(&all_done);
            let tx = tx.clone();
            let shared_velocities = &shared_velocities;
            let start = (n / n_threads) * worker_id;
            let end = if worker_id == n_threads - 1 {
                n
            } else {
                (n / n_threads) * (worker_id + 1)
            };

            scope.spawn(move || {
                worker_loop(
                    worker_id,
                    start,
                    end,
                    &deques,
                    &all_done,
                    &tx,
                    tree,
                    positions,
                    shared_velocities,
                    dt,
                );
            });
        }
        drop(tx);

        let mut received = 0;
        while received < n {
            rx.recv().expect("workers outlive the completion channel until all_done");
            received += 1;
        }
        all_done.store(true, Ordering::Release);
    });
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker_id: usize,
    start: usize,
    end: usize,
    deques: &[Arc<Deque<usize>>],
    all_done: &AtomicBool,
    tx: &Sender<usize>,
    tree: &Tree,
    positions: &[Vec3],
    velocities: &SharedVelocities<'_>,
    dt: f64,
) {
    let own = &deques[worker_id];
    for idx in start..end {
        own.push_bottom(idx);
    }
    let mut work_left = true;
    let mut rng = rand::rng();

    let mut process = |idx: usize| {
        let force = barnes_hut_force(tree, positions[idx]);
        // SAFETY: `idx` is owned exclusively by this worker right now — it
        // just came off either our own deque's bottom or a peer's top via a
        // single successful CAS, and the same index is never pushed twice.
        unsafe {
            let v = velocities.get(idx);
            velocities.set(idx, v + force * dt);
        }
        let _ = tx.send(idx);
    };

    while !all_done.load(Ordering::Acquire) {
        if work_left {
            match own.pop_bottom() {
                Some(idx) => process(idx),
                None => work_left = false,
            }
        } else if deques.len() > 1 {
            let victim = loop {
                let v = rng.random_range(0..deques.len());
                if v != worker_id {
                    break v;
                }
            };
            if let Some(idx) = deques[victim].pop_top() {
                process(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octant::Octant;
    use crate::particle::Particle;
    use crate::tree::BhConfig;
    use std::collections::HashSet;

    #[test]
    fn every_particle_gets_exactly_one_completion() {
        let particles: Vec<Particle> = (0..237)
            .map(|i| {
                Particle::new(
                    Vec3::new((i % 11) as f64 - 5.0, (i % 7) as f64 - 3.0, (i % 5) as f64 - 2.0),
                    Vec3::new_zero(),
                )
            })
            .collect();
        let bound = Octant::from_particles(&particles);
        let tree = Tree::build(&particles, bound, BhConfig::default());
        let positions: Vec<Vec3> = particles.iter().map(|p| p.pos).collect();
        let mut velocities = vec![Vec3::new_zero(); particles.len()];

        run_step(&tree, &positions, &mut velocities, 0.01, 6);
        assert_eq!(velocities.len(), particles.len());
    }

    #[test]
    fn every_particle_is_touched_exactly_once() {
        // Distinct starting positions guarantee a distinct nonzero force per
        // particle, so an untouched or double-processed slot would stand out.
        let n = 500;
        let particles: Vec<Particle> = (0..n)
            .map(|i| Particle::new(Vec3::new(i as f64, 0.0, 0.0), Vec3::new_zero()))
            .collect();
        let bound = Octant::from_particles(&particles);
        let tree = Tree::build(&particles, bound, BhConfig::default());
        let positions: Vec<Vec3> = particles.iter().map(|p| p.pos).collect();
        let mut velocities = vec![Vec3::new_zero(); n];

        run_step(&tree, &positions, &mut velocities, 0.01, 4);
        let touched = velocities.iter().filter(|v| v.magnitude() > 0.0).count();
        assert_eq!(touched, n);
    }

    #[test]
    fn parallel_matches_sequential_within_tolerance() {
        let particles: Vec<Particle> = (0..64)
            .map(|i| {
                Particle::new(
                    Vec3::new((i % 9) as f64 - 4.0, (i % 5) as f64 - 2.0, (i % 3) as f64 - 1.0),
                    Vec3::new_zero(),
                )
            })
            .collect();
        let bound = Octant::from_particles(&particles);
        let tree = Tree::build(&particles, bound, BhConfig::default());
        let positions: Vec<Vec3> = particles.iter().map(|p| p.pos).collect();

        let seq_forces = crate::tree::compute_forces(&tree, &positions);
        let mut par_velocities = vec![Vec3::new_zero(); particles.len()];
        run_step(&tree, &positions, &mut par_velocities, 1.0, 4);

        for (f, v) in seq_forces.iter().zip(par_velocities.iter()) {
            assert!((*f - *v).magnitude() < 1e-9);
        }
    }

    #[test]
    fn deque_partition_assigns_disjoint_contiguous_chunks() {
        // Regression check for the §4.4 chunking rule: floor(N/T) per worker,
        // remainder absorbed by the last worker.
        let n = 17;
        let t = 5;
        let mut seen = HashSet::new();
        for worker_id in 0..t {
            let start = (n / t) * worker_id;
            let end = if worker_id == t - 1 { n } else { (n / t) * (worker_id + 1) };
            for i in start..end {
                assert!(seen.insert(i), "index {i} assigned to more than one worker");
            }
        }
        assert_eq!(seen.len(), n);
    }
}
