//! Particle sorter (spec §4.2): compute a PH-key sort permutation in
//! parallel, then apply it to every particle column by cycle-following,
//! one temporary record per cycle.
//!
//! Grounded on `examples/original_source/src/peano.c`'s
//! `reorder_collisionless_particles`, which is exactly the cycle-chasing
//! `for (;;) { P[dest] = P[src]; ...}` loop below. The source permutes a
//! single array-of-structs in one pass; our column-major store instead
//! applies the same cycle structure once per column ([`ParticleStore`]'s
//! `reorder_by`), so each call takes its own working copy of the
//! permutation — applying it destructively (as the source does, sharing
//! one `Idx` mutation across every field of a struct) would leave later
//! columns looking at an already-resolved, now-identity permutation.

use rayon::prelude::*;

use crate::particles::ParticleStore;

/// Compute the permutation that sorts `keys` ascending: `perm[i]` is the
/// original index whose key should end up at position `i` after
/// reordering. The sort itself is parallel (§5); only the apply step is
/// constrained to be single-writer.
pub fn compute_permutation(keys: &[u128]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..keys.len()).collect();
    perm.par_sort_by_key(|&i| keys[i]);
    perm
}

/// Reorder `data` in place so that `data[i]` after equals `data[perm[i]]`
/// before, using cycle-following with one temporary element per cycle.
pub fn apply_permutation<T: Clone>(data: &mut [T], perm: &[usize]) {
    debug_assert_eq!(data.len(), perm.len());

    let mut idx = perm.to_vec();
    let n = data.len();

    for i in 0..n {
        if idx[i] == i {
            continue;
        }

        let mut dest = i;
        let tmp = data[i].clone();
        let mut src = idx[i];

        loop {
            data[dest] = data[src].clone();
            idx[dest] = dest;

            dest = src;
            src = idx[dest];

            if src == i {
                break;
            }
        }

        data[dest] = tmp;
        idx[dest] = dest;
    }
}

impl ParticleStore {
    /// Reorder every column by `perm` (see [`apply_permutation`]).
    pub fn reorder_by(&mut self, perm: &[usize]) {
        apply_permutation(&mut self.particle_type, perm);
        apply_permutation(&mut self.id, perm);
        apply_permutation(&mut self.mass, perm);
        apply_permutation(&mut self.pos, perm);
        apply_permutation(&mut self.vel, perm);
        apply_permutation(&mut self.acc, perm);
        apply_permutation(&mut self.prev_acc_mag, perm);
        apply_permutation(&mut self.time_bin, perm);
        apply_permutation(&mut self.it_drift_pos, perm);
        apply_permutation(&mut self.it_kick_pos, perm);
        apply_permutation(&mut self.peano_key, perm);
        apply_permutation(&mut self.cost, perm);
        apply_permutation(&mut self.tree_parent, perm);
    }

    /// Recompute every particle's PH key from its position relative to
    /// the domain box, sort by key, and reorder the whole store.
    /// §8 property 1 holds for `self` after this call.
    pub fn sort_by_peano_key(&mut self, origin: lin_alg::f64::Vec3, size: f64) {
        let n = self.len();

        let keys: Vec<u128> = (0..n)
            .into_par_iter()
            .map(|i| {
                let p = self.pos[i];
                let x = (p.x - origin.x) / size;
                let y = (p.y - origin.y) / size;
                let z = (p.z - origin.z) / size;
                crate::peano::encode_long(x, y, z)
            })
            .collect();

        let perm = compute_permutation(&keys);

        self.reorder_by(&perm);

        // `keys` was computed pre-reorder and is itself a valid
        // particle-indexed column, so it must be permuted the same way
        // rather than recomputed against the now-reordered positions.
        let mut keys = keys;
        apply_permutation(&mut keys, &perm);
        self.peano_key = keys;
    }
}
