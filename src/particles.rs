//! The particle store (spec §3): a column-major, structure-of-arrays
//! record of every body in the simulation.
//!
//! Grounded on `examples/original_source/src/particles.h`'s
//! `struct Particle_Data` ("Here start the particle structures, which
//! hold most of the data of the code. Because we are using structures
//! containing arrays, not an array of structures..."). The teacher's
//! [`lin_alg::f64::Vec3`]-based `BodyModel` trait is generalized here
//! into direct field access on the store, since the store (not an
//! application-supplied type) now owns the data.

use lin_alg::f64::Vec3;

use crate::timeline::IntTime;

/// A small species tag. The original indexes `Grav_Softening` and
/// per-type particle counts by this; gas/star/black-hole physics is out
/// of this core's scope (§1 Non-goals), but the tag and the
/// contiguous-range convention it implies (§9: "Gas, star, and
/// black-hole subsets are sub-stores indexed by the same slot space
/// restricted to a type range") are part of the data model regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticleType(pub u8);

impl ParticleType {
    pub const COLLISIONLESS: ParticleType = ParticleType(1);
    pub const GAS: ParticleType = ParticleType(0);
    pub const STAR: ParticleType = ParticleType(4);
    pub const BLACK_HOLE: ParticleType = ParticleType(5);
}

/// Column-major store of every particle attribute named in §3. Index `i`
/// into every `Vec` refers to the same particle; reordering the store
/// (PH sort, tree-parent rewrite on leaf collapse) must move all columns
/// together, which is what [`crate::sort::apply_permutation`] does.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    pub particle_type: Vec<ParticleType>,
    pub id: Vec<u64>,
    pub mass: Vec<f64>,
    pub pos: Vec<Vec3>,
    pub vel: Vec<Vec3>,
    pub acc: Vec<Vec3>,
    /// Magnitude of the previous acceleration, used by the relative
    /// opening criterion (§4.6) before this step's `acc` is available.
    pub prev_acc_mag: Vec<f64>,
    pub time_bin: Vec<u8>,
    pub it_drift_pos: Vec<IntTime>,
    pub it_kick_pos: Vec<IntTime>,
    pub peano_key: Vec<u128>,
    pub cost: Vec<f64>,
    /// Index into the tree node array this particle currently sits in.
    /// `None` before the first tree build.
    pub tree_parent: Vec<Option<usize>>,
}

impl ParticleStore {
    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.len() == 0
    }

    /// Append one particle. Kept on the happy path for building up a
    /// store from an external collaborator (an IC reader); the core
    /// itself never grows the store mid-run.
    #[allow(clippy::too_many_arguments)]
    pub fn push(&mut self, particle_type: ParticleType, id: u64, mass: f64, pos: Vec3, vel: Vec3) {
        self.particle_type.push(particle_type);
        self.id.push(id);
        self.mass.push(mass);
        self.pos.push(pos);
        self.vel.push(vel);
        self.acc.push(Vec3::new_zero());
        self.prev_acc_mag.push(0.0);
        self.time_bin.push(0);
        self.it_drift_pos.push(0);
        self.it_kick_pos.push(0);
        self.peano_key.push(0);
        self.cost.push(0.0);
        self.tree_parent.push(None);
    }

    /// Total mass, re-derived from the store (§3 invariant).
    pub fn total_mass(&self) -> f64 {
        self.mass.iter().sum()
    }

    /// Global center of mass, re-derived from the store (§3 invariant).
    pub fn center_of_mass(&self) -> Vec3 {
        let mut com = Vec3::new_zero();
        let mut mass = 0.0;

        for i in 0..self.len() {
            com += self.pos[i] * self.mass[i];
            mass += self.mass[i];
        }

        if mass.abs() > f64::EPSILON {
            com /= mass;
        }

        com
    }

    /// Total momentum `Σ m·v` (§4.6's momentum-check probe input).
    pub fn total_momentum(&self) -> Vec3 {
        let mut p = Vec3::new_zero();
        for i in 0..self.len() {
            p += self.vel[i] * self.mass[i];
        }
        p
    }

    /// §8 property 1: after a PH sort, keys must be non-decreasing.
    pub fn is_peano_sorted(&self) -> bool {
        self.peano_key.windows(2).all(|w| w[0] <= w[1])
    }

    /// The contiguous index range occupied by one species, assuming the
    /// store is grouped by type (the original keeps `Type` as the first
    /// field precisely so type ranges stay contiguous under any stable
    /// reorder that doesn't cross species).
    pub fn type_range(&self, ty: ParticleType) -> std::ops::Range<usize> {
        let start = self.particle_type.iter().position(|&t| t == ty);
        let Some(start) = start else {
            return 0..0;
        };
        let end = self.particle_type[start..]
            .iter()
            .position(|&t| t != ty)
            .map(|rel| start + rel)
            .unwrap_or(self.len());
        start..end
    }
}
