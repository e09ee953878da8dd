//! The tree walker: per-particle force accumulation by descending the
//! gravity tree and accepting a node as a single mass point once an
//! opening criterion is satisfied (spec §4.6).
//!
//! Grounded on `examples/original_source/src/Gravity/tree_accel.c`
//! (`gravity_tree_walk_local`, `relative_criterion`,
//! `interact_with_softening`'s Dehnen/Wendland-C2-equivalent polynomial
//! kernel, `node_size`) and teacher's `run_bh`/`Tree::leaves` (the
//! `size/dist < theta` opening test and the `par_iter().reduce(...)`
//! parallel-for-with-accumulation shape, generalized from one caller
//! supplied force function into the two named criteria below).
//!
//! The draft source's walk loop does `node++` (descend) when
//! `relative_criterion` accepts a node as a monopole — which would
//! wrongly open a node the criterion just said was safe to skip. We
//! implement the evidently-intended behavior instead: accepting either
//! criterion interacts with the node's aggregate mass/CoM and skips past
//! its whole subtree (`node += Tree[node].DNext`); only a node neither
//! criterion accepts gets opened. This is recorded as a fix rather than
//! silently carried over, consistent with this crate's momentum-check
//! fix in [`momentum_weighted_acceleration`].

use lin_alg::f64::Vec3;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::domain::DomainBox;
use crate::particles::ParticleStore;
use crate::tree::GravityTree;

/// Relative opening criterion (`relative_criterion`): a node is safe to
/// treat as a single mass point when
/// `G * mass * size² / r⁴ <= theta_rel * |a_prev|`.
fn relative_criterion_accepts(mass: f64, size: f64, r2: f64, prev_acc_mag: f64, config: &SimConfig) -> bool {
    if prev_acc_mag <= 0.0 {
        return false; // no previous acceleration to compare against yet
    }
    let val = config.gravitational_constant * mass * size * size / (r2 * r2);
    val <= config.theta_rel * prev_acc_mag
}

/// Barnes-Hut opening criterion: safe to treat as a single mass point
/// when `size² <= r² * theta_bh` (`theta_bh` already squared, see
/// [`SimConfig::theta_bh`]). The draft's `barnes_hutt_criterion` is an
/// unfinished stub (`return false`); this is the standard `s/d < theta`
/// test it was evidently meant to become.
fn barnes_hut_accepts(size: f64, r2: f64, config: &SimConfig) -> bool {
    size * size <= r2 * config.theta_bh
}

/// §4.6's geometric guard: a node can only be closed without descent when
/// the particle lies outside its cell, each coordinate distance at least
/// `0.6 * size` from the node center. A particle inside the cell forces a
/// descend even if the r²-based criterion would otherwise accept — the
/// r⁴/r² tests measure distance to the center of mass, not to the cell's
/// own extent, so a particle near a boundary can satisfy them while still
/// sitting inside the node's box.
fn outside_node(ppos: Vec3, node_pos: Vec3, size: f64) -> bool {
    let half = 0.6 * size;
    (ppos.x - node_pos.x).abs() >= half
        && (ppos.y - node_pos.y).abs() >= half
        && (ppos.z - node_pos.z).abs() >= half
}

/// Plummer-equivalent softening length used by the force kernel
/// (`h = Grav_Softening / 3`, matching `tree_accel.c`'s `h`).
fn softening_length(grav_softening: f64) -> f64 {
    grav_softening / 3.0
}

/// `interact_with_softening`: Dehnen/Wendland-C2-equivalent softened
/// `1/r` replacement for `r < h`, exact Newtonian `1/r` otherwise.
fn softened_accel(mass: f64, dr: Vec3, r: f64, h: f64, g: f64) -> Vec3 {
    let rinv = if r < h {
        let u = r / h;
        let u2 = u * u;
        let u3 = u2 * u;
        (14.0 * u - 84.0 * u3 + 140.0 * u2 * u2 - 90.0 * u2 * u3 + 21.0 * u3 * u3).sqrt() / h
    } else {
        1.0 / r
    };

    let acc_mag = g * mass * rinv * rinv;
    -dr * (acc_mag * rinv)
}

/// Walk every top-node subtree on behalf of one particle, accumulating
/// its gravitational acceleration. `ipart`'s own position is excluded
/// from self-interaction by particle identity, not distance, since a
/// collapsed leaf may hold other particles at the same node.
fn walk_particle(
    ipart: usize,
    store: &ParticleStore,
    tree: &GravityTree,
    domain: &DomainBox,
    config: &SimConfig,
) -> (Vec3, f64) {
    let mut acc = Vec3::new_zero();
    let mut cost = 0.0;
    let ppos = store.pos[ipart];
    let prev_acc_mag = store.prev_acc_mag[ipart];
    let h = softening_length(config.grav_softening[store.particle_type[ipart].0 as usize % 6]);

    for &root in &tree.top_node_indices {
        let root_node = &tree.nodes[root];

        if root_node.is_leaf() {
            cost += interact_with_leaf_range(
                ipart,
                root_node.leaf_first_particle(),
                root_node.npart,
                store,
                ppos,
                h,
                config,
                &mut acc,
            );
            continue;
        }

        let end = root + root_node.dnext as usize;
        let mut node = root;

        while node < end {
            let n = &tree.nodes[node];

            if n.is_leaf() {
                cost += interact_with_leaf_range(
                    ipart,
                    n.leaf_first_particle(),
                    n.npart,
                    store,
                    ppos,
                    h,
                    config,
                    &mut acc,
                );
                node += 1;
                continue;
            }

            let dr = ppos - n.com;
            let r2 = dr.x * dr.x + dr.y * dr.y + dr.z * dr.z;
            let size = n.size(domain);

            let accept = outside_node(ppos, n.pos, size)
                && (relative_criterion_accepts(n.mass, size, r2, prev_acc_mag, config)
                    || barnes_hut_accepts(size, r2, config));

            if accept {
                let r = r2.sqrt();
                if r > 0.0 {
                    acc += softened_accel(n.mass, dr, r, h, config.gravitational_constant);
                }
                cost += 1.0; // one node-monopole interaction (`globals.h`'s "computational weight")
                node += n.dnext.max(1) as usize;
            } else {
                node += 1; // open: descend into the first child
            }
        }
    }

    (acc, cost)
}

/// Per-particle-in-leaf interaction, kept separate from
/// [`walk_particle`]'s loop body for readability. `node`'s `TreeNode`
/// gives the leaf's first-particle/run-length encoding. Returns the
/// number of direct particle-particle interactions performed, the unit
/// [`walk_particle`] accumulates into `store.cost`.
fn interact_with_leaf_range(
    ipart: usize,
    leaf_first: usize,
    leaf_count: u32,
    store: &ParticleStore,
    ppos: Vec3,
    h: f64,
    config: &SimConfig,
    acc: &mut Vec3,
) -> f64 {
    let mut cost = 0.0;
    for jpart in leaf_first..leaf_first + leaf_count as usize {
        if jpart == ipart {
            continue;
        }
        let dr = ppos - store.pos[jpart];
        let r = (dr.x * dr.x + dr.y * dr.y + dr.z * dr.z).sqrt();
        if r <= 0.0 {
            continue;
        }
        *acc += softened_accel(store.mass[jpart], dr, r, h, config.gravitational_constant);
        cost += 1.0;
    }
    cost
}

/// `Gravity_Tree_Acceleration`: compute and add the tree force for every
/// active particle, dynamically scheduled across a rayon thread pool
/// (§5: "a dynamically scheduled parallel-for over active particles").
/// Also refreshes `store.cost` (`globals.h`'s per-particle "computational
/// weight") with the interaction count the walk just spent on it, the
/// signal [`crate::domain::DomainDecomposer`]'s CPU-load clause balances
/// on for the next decomposition.
pub fn accelerate_active_particles(
    store: &mut ParticleStore,
    active: &[usize],
    tree: &GravityTree,
    domain: &DomainBox,
    config: &SimConfig,
) {
    let deltas: Vec<(usize, Vec3, f64)> = active
        .par_iter()
        .map(|&ipart| {
            let (delta, cost) = walk_particle(ipart, store, tree, domain, config);
            (ipart, delta, cost)
        })
        .collect();

    for (ipart, delta, cost) in deltas {
        store.prev_acc_mag[ipart] = store.acc[ipart].magnitude();
        store.acc[ipart] += delta;
        store.cost[ipart] = cost;
    }
}

/// §9's momentum-change probe, reimplemented with a `SUM` reduction
/// instead of the source's `MIN` (flagged there as almost certainly a
/// bug: a tree force that is individually-conservative per pair would
/// make the *sum* of `m·Δa` over all particles the meaningful zero-check,
/// not the minimum). Large values indicate the tree walk is producing a
/// net spurious force.
pub fn momentum_weighted_acceleration(store: &ParticleStore) -> Vec3 {
    let mut total = Vec3::new_zero();
    for i in 0..store.len() {
        total += store.acc[i] * store.mass[i];
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainDecomposer;
    use crate::particles::ParticleType;
    use crate::tree::GravityTree;

    fn two_body_store() -> ParticleStore {
        let mut store = ParticleStore::default();
        store.push(
            ParticleType::COLLISIONLESS,
            0,
            1.0,
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new_zero(),
        );
        store.push(
            ParticleType::COLLISIONLESS,
            1,
            1.0,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new_zero(),
        );
        store
    }

    /// S2: two equal masses must attract each other along their
    /// separation axis, with equal and opposite acceleration magnitudes
    /// (to softening-kernel precision).
    #[test]
    fn s2_two_body_attraction_is_newtonian() {
        let mut store = two_body_store();
        let domain = DomainBox::from_particles(&store);
        store.sort_by_peano_key(domain.origin, domain.size);

        let config = SimConfig::default();
        let mut decomposer = DomainDecomposer::new(store.len());
        decomposer.decompose(&store, &domain, &config, 1);
        let tree = GravityTree::build(&mut store, &domain, &decomposer, &config);

        let active: Vec<usize> = (0..store.len()).collect();
        accelerate_active_particles(&mut store, &active, &tree, &domain, &config);

        // Particle 0 sits to the left of particle 1: attraction pulls it
        // in the +x direction, and the reverse for particle 1.
        assert!(store.acc[0].x > 0.0);
        assert!(store.acc[1].x < 0.0);
        assert!((store.acc[0].x + store.acc[1].x).abs() < 1e-8);
    }

    /// §4.6's geometric guard: a particle sitting inside a node's own
    /// cell must not be treated as outside it, regardless of where the
    /// node's center of mass happens to sit within that cell.
    #[test]
    fn outside_node_rejects_a_particle_inside_the_cell() {
        let node_pos = Vec3::new_zero();
        let size = 1.0;

        // Dead center: well inside on every axis.
        assert!(!outside_node(Vec3::new_zero(), node_pos, size));

        // Comfortably past 0.6*size on every axis.
        assert!(outside_node(Vec3::new(1.0, 1.0, 1.0), node_pos, size));

        // Outside on two axes but still inside on the third: must reject.
        assert!(!outside_node(Vec3::new(1.0, 1.0, 0.0), node_pos, size));
    }
}
