//! Domain decomposition (spec §4.3): split the particle set into
//! contiguous Peano-Hilbert intervals ("bunches") of roughly equal
//! weight, and turn the surviving set into the top-node forest the tree
//! builder starts from.
//!
//! Grounded on `examples/original_source/src/domain.c` in full:
//! `Init_Domain_Decomposition`, `Domain_Decomposition`, `split_bunch`,
//! `fill_bunches`, `remove_empty_bunches`, `imbalance_small`,
//! `reset_bunchlist`, `find_global_domain_extend`. The source keeps one
//! global `union Domain_Node_List *D` array and mutates it across a
//! handful of file-scope statics (`NBunches`, `Max_NBunches`,
//! `Top_Node_Alloc_Factor`); this module bundles the same state into
//! [`DomainDecomposer`], one value per decomposition rather than process
//! globals (§9's redesign note).

use lin_alg::f64::Vec3;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::particles::ParticleStore;
use crate::peano::{self, ShortKey};

/// A bunch: a contiguous Peano-Hilbert interval, the unit the
/// decomposer splits/merges. Doubles as a top node once decomposition
/// settles — the source's `union Domain_Node_List` folds both uses into
/// one struct, so does this one (§9: "the domain bunch and the tree top
/// node are the same object at different points in its life").
#[derive(Debug, Clone, Copy)]
pub struct Bunch {
    /// Largest PH key contained in this bunch (interval is
    /// `(previous.key, key]`, reversed-triplet convention per [`peano`]).
    pub key: ShortKey,
    pub level: u32,
    pub npart: usize,
    pub first_part: usize,
    pub cost: f64,
    /// `< 0` encodes "not yet assigned a rank" (`Target = -1` / `-INT_MAX`
    /// in the source); `Some(rank)` once `communicate_bunches` runs. This
    /// reduced core is always single-rank, so every live bunch resolves
    /// to `Some(0)`.
    pub target: Option<u32>,
    pub is_local: bool,
    pub modify: bool,
}

impl Bunch {
    fn empty() -> Self {
        Self {
            key: ShortKey::MAX,
            level: 0,
            npart: 0,
            first_part: usize::MAX,
            cost: 0.0,
            target: None,
            is_local: false,
            modify: false,
        }
    }
}

/// The domain box: an axis-aligned cube enlarging the particle extent by
/// `2.05x` (source: "made slightly larger to avoid roundoff problems
/// with the PH numbers").
#[derive(Debug, Clone, Copy)]
pub struct DomainBox {
    pub origin: Vec3,
    pub center: Vec3,
    pub size: f64,
    pub center_of_mass: Vec3,
}

impl DomainBox {
    /// `find_global_domain_extend` (non-periodic branch only — the
    /// periodic branch just uses the fixed simulation box, which this
    /// reduced core's §1 Non-goals exclude along with periodic image
    /// summation).
    pub fn from_particles(store: &ParticleStore) -> Self {
        let max_distance = (0..store.len())
            .into_par_iter()
            .map(|i| {
                let p = store.pos[i];
                p.x.abs().max(p.y.abs()).max(p.z.abs())
            })
            .reduce(|| 0.0, f64::max);

        let size = 2.05 * max_distance;
        let origin = Vec3::new(-0.5 * size, -0.5 * size, -0.5 * size);
        let center = origin + Vec3::new(0.5 * size, 0.5 * size, 0.5 * size);

        Self {
            origin,
            center,
            size,
            center_of_mass: store.center_of_mass(),
        }
    }

    /// Normalize a position into `[0, 1)³` relative to this box, the
    /// input [`peano::encode_short`]/[`peano::encode_long`] expect.
    pub fn normalize(&self, p: Vec3) -> Vec3 {
        Vec3::new(
            (p.x - self.origin.x) / self.size,
            (p.y - self.origin.y) / self.size,
            (p.z - self.origin.z) / self.size,
        )
    }
}

/// Owns the bunch list plus the handful of counters the split/imbalance
/// loop needs, mirroring the source's `D`/`NBunches`/`Max_NBunches`/
/// `Top_Node_Alloc_Factor` statics.
pub struct DomainDecomposer {
    pub bunches: Vec<Bunch>,
    top_node_alloc_factor: f64,
}

impl DomainDecomposer {
    /// `Init_Domain_Decomposition`: one root bunch covering the whole
    /// key space, and an initial allocation sized `4096 / N_total`.
    pub fn new(n_total: usize) -> Self {
        let top_node_alloc_factor = 4096.0 / n_total.max(1) as f64;
        let mut root = Bunch::empty();
        root.key = ShortKey::MAX;
        Self {
            bunches: vec![root],
            top_node_alloc_factor,
        }
    }

    /// `reallocate_topnodes`: grow headroom by 20% (no-op for a `Vec`
    /// beyond reserving capacity, but kept as an explicit step since the
    /// factor itself is load-bearing state carried across calls).
    fn reallocate(&mut self, n_total: usize) {
        self.top_node_alloc_factor *= 1.2;
        let max_bunches = (n_total as f64 * self.top_node_alloc_factor) as usize;
        self.bunches.reserve(max_bunches.saturating_sub(self.bunches.len()));
    }

    /// `fill_bunches`: count particles and accumulate cost into the
    /// bunches at `bunch_range`, scanning only `particle_range`. The
    /// source calls this once globally (after `reset_bunchlist`) and
    /// again, locally, for each freshly split bunch's own children and
    /// particle slice — `bunch_range` must be contiguous and sorted by
    /// key, and `particle_range` must be covered exactly by those
    /// bunches' key intervals (both hold for a full-store call and for
    /// a just-split parent's 8 children).
    fn fill(
        &mut self,
        store: &ParticleStore,
        domain: &DomainBox,
        bunch_range: std::ops::Range<usize>,
        particle_range: std::ops::Range<usize>,
    ) {
        for b in &mut self.bunches[bunch_range.clone()] {
            b.npart = 0;
            b.cost = 0.0;
            b.first_part = usize::MAX;
        }

        let mut run = bunch_range.start;
        for ipart in particle_range {
            let p = domain.normalize(store.pos[ipart]);
            let pkey = peano::encode_short(p.x, p.y, p.z);

            while self.bunches[run].key < pkey {
                run += 1;
            }

            let b = &mut self.bunches[run];
            b.npart += 1;
            b.cost += store.cost[ipart];
            b.first_part = b.first_part.min(ipart);
        }
    }

    /// `split_bunch`: replace bunch `parent` with 8 children sharing its
    /// upper key triplets, one new triplet per child at `level+1`.
    fn split(&mut self, parent: usize) -> std::ops::Range<usize> {
        let parent_bunch = self.bunches[parent];
        let level = parent_bunch.level + 1;
        let shift = crate::peano::SHORT_BITS - 3 * level;

        let first = self.bunches.len();
        for i in 0u64..8 {
            let bitmask: ShortKey = 0x7 << shift;
            let fragment: ShortKey = i << shift;
            let mut child = Bunch::empty();
            child.level = level;
            child.key = (parent_bunch.key & !bitmask) | fragment;
            child.target = None; // unassigned until communicate_bunches
            self.bunches.push(child);
        }

        first..first + 8
    }

    /// `remove_empty_bunches`: drop zero-particle bunches, report the
    /// number of leaves (`npart <= max_bodies_per_leaf`) and the deepest
    /// level reached.
    fn remove_empty(&mut self, config: &SimConfig) -> (usize, u32) {
        self.bunches.retain(|b| b.npart > 0);

        let n_leaves = self
            .bunches
            .iter()
            .filter(|b| b.npart <= config.max_bodies_per_leaf)
            .count();
        let max_level = self.bunches.iter().map(|b| b.level).max().unwrap_or(0);

        (n_leaves, max_level)
    }

    /// `imbalance_small`: mark overloaded bunches for another split
    /// round; returns `true` once nothing needs splitting (the source's
    /// `Stop_Splitting` reduced with `MIN`, i.e. "stop unless any thread
    /// found work"). §4.3's three-way OR: relative memory load, relative
    /// CPU load (`b.cost`, fed from `walk::accelerate_active_particles`'s
    /// interaction count, against `config.theta_cpu`), or too few heavy
    /// leaves.
    fn imbalance_small(&mut self, n_total: usize, n_ranks: usize, n_leaves: usize, config: &SimConfig) -> bool {
        let n_bunches = self.bunches.len();
        let n_heavy_leaves = n_bunches - n_leaves;
        let mean_npart = n_total as f64 / (n_ranks as f64 * config.bunches_per_thread);
        let mean_cost = {
            let total_cost: f64 = self.bunches.iter().map(|b| b.cost).sum();
            total_cost / (n_ranks as f64 * config.bunches_per_thread)
        };

        let mut stop_splitting = true;

        for b in &mut self.bunches {
            b.modify = false;

            let rel_mem_load = (b.npart as f64 - mean_npart) / mean_npart;
            let rel_cpu_load = if mean_cost > 0.0 {
                (b.cost - mean_cost) / mean_cost
            } else {
                0.0
            };

            if n_bunches > n_ranks * 16 {
                continue;
            }
            if b.level as usize == crate::peano::SHORT_TRIPLETS as usize - 1 {
                continue;
            }

            let should_split = if rel_mem_load > config.theta_mem {
                true
            } else if rel_cpu_load > config.theta_cpu {
                true
            } else {
                (n_heavy_leaves as f64) < n_ranks as f64 * config.bunches_per_thread
            };

            if should_split {
                b.modify = true;
                stop_splitting = false;
            }
        }

        stop_splitting
    }

    /// `reset_bunchlist`: after a split round, the bunch list only
    /// covers the intervals that were touched. This fills in the gaps so
    /// the key space `[0, ShortKey::MAX]` is completely covered again,
    /// by completing every triplet from each bunch's level up to the
    /// common prefix with its neighbor, then down to the neighbor's
    /// level — upward fill, common-level fill, downward fill, exactly as
    /// the three nested loops in the source do.
    fn reset_bunchlist(&mut self) {
        if self.bunches.len() < 2 {
            return;
        }

        self.bunches.sort_by_key(|b| b.key);

        if self.bunches.last().unwrap().key != ShortKey::MAX {
            let mut sentinel = Bunch::empty();
            sentinel.level = 1;
            sentinel.key = ShortKey::MAX;
            sentinel.target = None;
            self.bunches.push(sentinel);
        }

        let old = self.bunches.clone();
        let bits = crate::peano::SHORT_BITS;
        let mut filled = Vec::new();

        for w in old.windows(2) {
            let (a, b) = (w[0], w[1]);
            let akey = a.key;
            let bkey = b.key;

            let mut top = 1u32;
            let mut mask: ShortKey = 0x7 << (bits - 3);
            while (akey & mask) == (bkey & mask) {
                top += 1;
                mask >>= 3;
            }

            // Fill upwards: complete every triplet from a's own level
            // down to (but not including) the common level `top`.
            for j in (top + 1..=a.level).rev() {
                let shift = bits - 3 * j;
                let atriplet = (akey >> shift) & 0x7;
                for k in (atriplet + 1)..8 {
                    let template = (akey | (ShortKey::MAX >> (3 * j))) & !(0x7 << shift);
                    filled.push(Bunch {
                        key: template | (k << shift),
                        level: j,
                        ..Bunch::empty()
                    });
                }
            }

            // Fill at the common level `top` between a's and b's triplets.
            let shift = bits - 3 * top;
            let atriplet = (akey >> shift) & 0x7;
            let btriplet = (bkey >> shift) & 0x7;
            for k in (atriplet + 1)..btriplet {
                let template = (akey | (ShortKey::MAX >> (3 * top))) & !(0x7 << shift);
                filled.push(Bunch {
                    key: template | (k << shift),
                    level: top,
                    ..Bunch::empty()
                });
            }

            // Fill downwards towards b's own level.
            for j in (top + 1)..=b.level {
                let shift = bits - 3 * j;
                let btriplet = (bkey >> shift) & 0x7;
                let template = (bkey | (ShortKey::MAX >> (3 * j))) & !(0x7 << shift);
                for k in 0..btriplet {
                    filled.push(Bunch {
                        key: template | (k << shift),
                        level: j,
                        ..Bunch::empty()
                    });
                }
            }
        }

        self.bunches.extend(filled);

        for b in &mut self.bunches {
            b.npart = 0;
            b.modify = false;
            b.cost = 0.0;
            b.first_part = usize::MAX;
            if b.target.is_some() {
                b.is_local = true;
            }
        }

        self.bunches.sort_by_key(|b| b.key);
    }

    /// `communicate_bunches`: assign every surviving bunch to a rank.
    /// Single-rank reduced core, so this always assigns rank 0 and marks
    /// every bunch local (§6: "the reduced version executes locally
    /// only").
    fn communicate_bunches(&mut self) {
        for b in &mut self.bunches {
            b.target = Some(0);
            b.is_local = true;
        }
    }

    /// `Domain_Decomposition`: the full split/refine/reconstruct loop.
    /// `store` must already be sorted by Peano key (§4.2 precedes §4.3).
    pub fn decompose(
        &mut self,
        store: &ParticleStore,
        domain: &DomainBox,
        config: &SimConfig,
        n_ranks: usize,
    ) -> (usize, u32) {
        self.reset_bunchlist();
        self.bunches.sort_by_key(|b| b.key);
        let n = self.bunches.len();
        self.fill(store, domain, 0..n, 0..store.len());

        let (mut n_leaves, mut max_level) = (0usize, 0u32);

        loop {
            self.bunches.sort_by_key(|b| b.key);
            self.communicate_bunches();

            let (leaves, level) = self.remove_empty(config);
            n_leaves = leaves;
            max_level = level;

            if self.imbalance_small(store.len(), n_ranks, n_leaves, config) {
                break;
            }

            let to_split: Vec<usize> = self
                .bunches
                .iter()
                .enumerate()
                .filter(|(_, b)| b.modify)
                .map(|(i, _)| i)
                .collect();

            if self.bunches.len() + to_split.len() * 8 >= self.bunches.capacity() {
                self.reallocate(store.len());
            }

            let mut replaced = std::collections::HashSet::new();
            for &parent in &to_split {
                let parent_bunch = self.bunches[parent];
                let children_range = self.split(parent);
                self.fill(
                    store,
                    domain,
                    children_range,
                    parent_bunch.first_part..parent_bunch.first_part + parent_bunch.npart,
                );
                // The parent is superseded by its 8 children; drop it,
                // matching `split_bunch` + the `memset`-to-zero
                // "mark for deletion" in the source.
                replaced.insert(parent);
            }

            self.bunches = self
                .bunches
                .iter()
                .enumerate()
                .filter(|(i, _)| !replaced.contains(i))
                .map(|(_, b)| *b)
                .collect();

            self.reset_bunchlist();
            let n = self.bunches.len();
            self.fill(store, domain, 0..n, 0..store.len());
        }

        (n_leaves, max_level)
    }
}
