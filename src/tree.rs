//! The octree: construction, center-of-mass summarization with pruning, and
//! Barnes-Hut force traversal.
//!
//! Nodes live in a flat arena (`Vec<Node>`) addressed by index rather than by
//! pointer. Leaf-to-internal promotion rewrites a node's state in place at
//! its existing index, so there is no parent back-reference and no sentinel
//! root: the logical root is always arena index 0, and can itself be
//! promoted in place just like any other node.

use lin_alg::f64::Vec3;
use rayon::prelude::*;

use crate::octant::Octant;

/// This determines how aggressively the traversal groups distant mass. 0
/// means no grouping (most accurate, least performant, effectively a naive
/// all-pairs sum). Higher values trade accuracy for speed.
pub const THETA: f64 = 0.5;

/// Additive term in the squared-distance denominator that bounds the force
/// at short range and absorbs coincident-particle degeneracies.
pub const SOFTENING_SQ: f64 = 1e-9;

/// Hook for arbitrary point-mass types to plug into the tree. Every particle
/// in this simulator has unit mass (the force law never multiplies mass in),
/// so unlike a general Barnes-Hut library this trait carries no `mass()`
/// accessor.
pub trait BodyModel {
    fn posit(&self) -> Vec3;
}

/// Tree construction and traversal parameters.
#[derive(Clone, Debug)]
pub struct BhConfig {
    pub theta: f64,
    /// Leaves accumulate more than one particle only once this is exceeded
    /// AND the depth cap has also been hit; the default of 1 matches the
    /// spec's "occupied leaf holds exactly one particle" invariant exactly.
    pub max_bodies_per_node: usize,
    /// Safety valve against coincident or near-coincident positions, which
    /// would otherwise force subdivision past the representable precision of
    /// `f64` and recurse forever.
    pub max_tree_depth: usize,
}

impl Default for BhConfig {
    fn default() -> Self {
        Self {
            theta: THETA,
            max_bodies_per_node: 1,
            max_tree_depth: 48,
        }
    }
}

#[derive(Clone, Debug)]
enum NodeState {
    Empty,
    /// Normally holds exactly one particle index. Holds more than one only
    /// when `max_tree_depth` was reached before a leaf could be promoted
    /// (coincident-position pathological case).
    Leaf(Vec<usize>),
    Internal([Option<usize>; 8]),
}

#[derive(Clone, Debug)]
struct Node {
    bound: Octant,
    /// Doubles as a particle count during construction (unit mass), and
    /// becomes each internal node's authoritative total mass after
    /// `summarize_and_prune` recomputes it from surviving children.
    mass: f64,
    com: Vec3,
    state: NodeState,
}

/// An octree built fresh each simulation step and discarded after force
/// evaluation. Read-only once summarized; safe to share across worker
/// threads without synchronization.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    config: BhConfig,
}

impl Tree {
    /// Allocates the root as a single empty leaf covering `bound`.
    pub fn initialize(bound: Octant, config: BhConfig) -> Self {
        Self {
            nodes: vec![Node {
                bound,
                mass: 0.0,
                com: Vec3::new_zero(),
                state: NodeState::Empty,
            }],
            config,
        }
    }

    /// Builds a complete, summarized tree over `particles` in one call:
    /// initialize, insert every particle, then summarize and prune. This is
    /// the entry point used once per simulation step.
    pub fn build<P: BodyModel>(particles: &[P], bound: Octant, config: BhConfig) -> Self {
        let mut tree = Self::initialize(bound, config);
        for i in 0..particles.len() {
            tree.insert(particles, i);
        }
        tree.summarize_and_prune();
        tree
    }

    /// Inserts the particle at `p_idx` into the tree. Undefined behavior
    /// (may panic or silently misplace the particle) if `p_idx`'s position
    /// lies outside the tree's root bound; callers must ensure the bound
    /// encloses every particle.
    pub fn insert<P: BodyModel>(&mut self, particles: &[P], p_idx: usize) {
        self.insert_at(particles, 0, p_idx, 0);
    }

    fn insert_at<P: BodyModel>(&mut self, particles: &[P], node_idx: usize, p_idx: usize, depth: usize) {
        // Clone the node's current state out before recursing so no borrow of
        // `self.nodes` survives into the mutation below (arena indices alias).
        let state = self.nodes[node_idx].state.clone();

        match state {
            NodeState::Empty => {
                let node = &mut self.nodes[node_idx];
                node.state = NodeState::Leaf(vec![p_idx]);
                node.mass = 1.0;
                node.com = particles[p_idx].posit();
            }
            NodeState::Leaf(mut ids) => {
                ids.push(p_idx);
                let should_promote =
                    ids.len() > self.config.max_bodies_per_node && depth < self.config.max_tree_depth;

                if !should_promote {
                    let com = mean_position(particles, &ids);
                    let node = &mut self.nodes[node_idx];
                    node.mass = ids.len() as f64;
                    node.com = com;
                    node.state = NodeState::Leaf(ids);
                } else {
                    let bound = self.nodes[node_idx].bound;
                    let octants = bound.subdivide();
                    let mut children = [None; 8];
                    for (i, octant) in octants.into_iter().enumerate() {
                        let idx = self.nodes.len();
                        self.nodes.push(Node {
                            bound: octant,
                            mass: 0.0,
                            com: Vec3::new_zero(),
                            state: NodeState::Empty,
                        });
                        children[i] = Some(idx);
                    }
                    let node = &mut self.nodes[node_idx];
                    node.state = NodeState::Internal(children);
                    node.mass = ids.len() as f64;

                    for id in ids {
                        let child = self.locate_child(children, particles[id].posit());
                        self.insert_at(particles, child, id, depth + 1);
                    }
                }
            }
            NodeState::Internal(children) => {
                self.nodes[node_idx].mass += 1.0;
                let child = self.locate_child(children, particles[p_idx].posit());
                self.insert_at(particles, child, p_idx, depth + 1);
            }
        }
    }

    /// Finds the unique child whose octant contains `pos`, in first-match
    /// order over the fixed 0..7 numbering. Falls back to the last child on
    /// a boundary miss caused by floating-point drift at extreme depth,
    /// rather than panicking.
    fn locate_child(&self, children: [Option<usize>; 8], pos: Vec3) -> usize {
        for child in children.into_iter().flatten() {
            if self.nodes[child].bound.contains(pos) {
                return child;
            }
        }
        children
            .into_iter()
            .flatten()
            .last()
            .expect("an internal node always has 8 freshly created children")
    }

    /// Post-order pass that prunes empty subtrees and computes each internal
    /// node's center-of-mass and total mass from its surviving children.
    /// Returns `true` when the whole tree (root) ended up empty; callers may
    /// treat that as a no-op step.
    pub fn summarize_and_prune(&mut self) -> bool {
        self.summarize_node(0)
    }

    fn summarize_node(&mut self, idx: usize) -> bool {
        let state = self.nodes[idx].state.clone();
        match state {
            NodeState::Empty => true,
            NodeState::Leaf(_) => false,
            NodeState::Internal(mut children) => {
                let mut sum = Vec3::new_zero();
                let mut total_mass = 0.0;

                for slot in children.iter_mut() {
                    if let Some(child_idx) = *slot {
                        if self.summarize_node(child_idx) {
                            *slot = None;
                        } else {
                            let child = &self.nodes[child_idx];
                            sum += child.com * child.mass;
                            total_mass += child.mass;
                        }
                    }
                }

                let node = &mut self.nodes[idx];
                node.state = NodeState::Internal(children);
                node.mass = total_mass;
                node.com = if total_mass > 0.0 {
                    sum / total_mass
                } else {
                    Vec3::new_zero()
                };
                total_mass == 0.0
            }
        }
    }

    #[cfg(test)]
    fn root_mass(&self) -> f64 {
        self.nodes[0].mass
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True if a reachable node (from root 0) is an empty leaf. Pruning only
    /// detaches a child slot (`summarize_node` sets it to `None`); the
    /// now-unreachable node itself stays in the arena, so this must walk
    /// reachable state rather than scan `self.nodes` directly.
    #[cfg(test)]
    fn has_reachable_empty_leaf(&self) -> bool {
        self.reachable_has_empty(0)
    }

    #[cfg(test)]
    fn reachable_has_empty(&self, idx: usize) -> bool {
        match &self.nodes[idx].state {
            NodeState::Empty => true,
            NodeState::Leaf(_) => false,
            NodeState::Internal(children) => children
                .iter()
                .flatten()
                .any(|&child| self.reachable_has_empty(child)),
        }
    }
}

fn mean_position<P: BodyModel>(particles: &[P], ids: &[usize]) -> Vec3 {
    let mut sum = Vec3::new_zero();
    for &id in ids {
        sum += particles[id].posit();
    }
    sum / ids.len() as f64
}

/// The softened inverse-cube contribution of a point mass at `com` on a
/// target at `pos_target`: with delta = com - pos_target and
/// s = |delta|^2 + softening, returns delta * s^(-3/2). Mass is not
/// multiplied in (unit-mass convention) and the gravitational constant is
/// unity.
fn contribution(com: Vec3, pos_target: Vec3) -> Vec3 {
    let delta = com - pos_target;
    let s = delta.magnitude_squared() + SOFTENING_SQ;
    delta * s.powf(-1.5)
}

/// Computes the accumulated Barnes-Hut force contribution on a target
/// position. Traverses from the root, treating a node as a single point
/// mass once `mass / distance < theta`, and always treating an occupied
/// leaf directly (so a target present in the tree self-interacts only
/// through the softened near-zero term, never divergently).
pub fn barnes_hut_force(tree: &Tree, pos_target: Vec3) -> Vec3 {
    traverse(tree, 0, pos_target, tree.config.theta)
}

fn traverse(tree: &Tree, idx: usize, pos_target: Vec3, theta: f64) -> Vec3 {
    let node = &tree.nodes[idx];
    match &node.state {
        NodeState::Empty => Vec3::new_zero(),
        NodeState::Leaf(_) => contribution(node.com, pos_target),
        NodeState::Internal(children) => {
            let dist = (node.com - pos_target).magnitude();
            if node.mass / dist < theta {
                contribution(node.com, pos_target)
            } else {
                let mut acc = Vec3::new_zero();
                for child in children.iter().flatten() {
                    acc += traverse(tree, *child, pos_target, theta);
                }
                acc
            }
        }
    }
}

/// Computes the Barnes-Hut force on every position in `positions` against
/// the same summarized tree, in parallel via rayon's work-stealing pool.
/// Used by the sequential (`s`) CLI mode, which opts out of the custom
/// lock-free scheduler in `worker` but still wants multi-core throughput.
pub fn compute_forces(tree: &Tree, positions: &[Vec3]) -> Vec<Vec3> {
    positions.par_iter().map(|&pos| barnes_hut_force(tree, pos)).collect()
}
