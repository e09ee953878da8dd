//! The gravity oct-tree builder (spec §4.5): one subtree per local top
//! node, built in parallel, with on-the-fly leaf collapsing.
//!
//! Grounded on `examples/original_source/src/Gravity/tree_build.c`
//! (`Gravity_Tree_Build`, `transform_bunch_into_top_node`,
//! `build_subtree`, `create_node_from_particle`,
//! `add_particle_to_node`, `finalise_sub_tree`, the `Bitfield`
//! level/key-fragment/TOP accessors) and teacher's `Tree::new`/`Node`
//! (`Vec<Node>` arena, `id`/`children` indices — generalized here into
//! signed `dnext`/`dup` arena offsets per §9's redesign note).
//!
//! The draft source builds a subtree by walking particles one at a time
//! along the current branch and skipping via a not-yet-finalized
//! `DNext`, patching sibling pointers afterwards in a separate pass.
//! Since the store is already Peano-sorted before this runs, the same
//! tree is produced — more directly — by recursive descent over
//! contiguous key-triplet groups of a sorted range, accumulating mass
//! and collapsing a group into a single leaf once it is small enough.
//! We build that way; the result has the same arena layout (preorder,
//! `dnext` a forward skip offset, `dup` a backward parent offset,
//! `Bitfield` carrying level/key-fragment/is-top) the draft targets.

use std::ops::Range;

use lin_alg::f64::Vec3;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::domain::{Bunch, DomainBox, DomainDecomposer};
use crate::particles::ParticleStore;
use crate::peano;

const LEVEL_MASK: u32 = 0x3F;
const KEY_FRAGMENT_SHIFT: u32 = 6;
const KEY_FRAGMENT_MASK: u32 = 0x7 << KEY_FRAGMENT_SHIFT;
const TOP_BIT: u32 = 1 << 9;

pub fn node_level(bitfield: u32) -> u32 {
    bitfield & LEVEL_MASK
}

pub fn node_key_fragment(bitfield: u32) -> u8 {
    ((bitfield & KEY_FRAGMENT_MASK) >> KEY_FRAGMENT_SHIFT) as u8
}

pub fn node_is_top(bitfield: u32) -> bool {
    bitfield & TOP_BIT != 0
}

fn make_bitfield(level: u32, key_triplet: u8, is_top: bool) -> u32 {
    let mut b = level & LEVEL_MASK;
    b |= (key_triplet as u32) << KEY_FRAGMENT_SHIFT;
    if is_top {
        b |= TOP_BIT;
    }
    b
}

/// One arena slot: either an internal node (`npart > max_bodies_per_leaf`,
/// `dnext` a forward skip) or a collapsed leaf (`dnext` encoding the
/// index of its first particle, `npart` the run length). Mirrors
/// `struct Tree_Node` (`gravity.h`).
#[derive(Debug, Clone, Copy)]
pub struct TreeNode {
    pub bitfield: u32,
    /// Internal node: offset to the node past this entire subtree
    /// (`Tree[node].DNext`, a skip when the opening criterion fails).
    /// Leaf: `-(first_particle_index) - 1`.
    pub dnext: i32,
    /// Offset back to the parent node (`0` for a subtree root).
    pub dup: i32,
    pub pos: Vec3,
    /// Mass-weighted position sum during the build; divided down to an
    /// actual center of mass by [`GravityTree::finalize`].
    pub com: Vec3,
    pub mass: f64,
    pub npart: u32,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.dnext <= 0
    }

    /// Valid only when [`TreeNode::is_leaf`].
    pub fn leaf_first_particle(&self) -> usize {
        debug_assert!(self.is_leaf());
        (-self.dnext - 1) as usize
    }

    /// Node half-width at its own level, relative to the domain box.
    pub fn size(&self, domain: &DomainBox) -> f64 {
        domain.size / (1u64 << node_level(self.bitfield)) as f64
    }
}

/// The full local gravity tree: one arena holding every top node's
/// subtree back-to-back. `top_node_indices[i]` is the arena index of the
/// root of the `i`-th local top node's subtree — that root's
/// `mass`/`com` doubles as the coarse node used by the top-level walk
/// across bunches (§4.6), exactly as the source's `union
/// Domain_Node_List` lets one bunch act as both.
pub struct GravityTree {
    pub nodes: Vec<TreeNode>,
    pub top_node_indices: Vec<usize>,
}

impl GravityTree {
    /// `Gravity_Tree_Build`: snap every local bunch into a top node, then
    /// build each one's subtree in parallel and concatenate the arenas.
    /// `store` must already be Peano-sorted and decomposed (§4.2, §4.3
    /// precede §4.5), so that each bunch's particles occupy the
    /// contiguous range `[first_part, first_part + npart)`.
    pub fn build(
        store: &mut ParticleStore,
        domain: &DomainBox,
        decomposer: &DomainDecomposer,
        config: &SimConfig,
    ) -> Self {
        let local_bunches: Vec<&Bunch> = decomposer
            .bunches
            .iter()
            .filter(|b| b.is_local && b.npart > 0)
            .collect();

        let subtrees: Vec<(Vec<TreeNode>, Vec<(usize, usize)>)> = local_bunches
            .par_iter()
            .map(|b| {
                let top_pos = transform_bunch_into_top_node(b, domain, store);
                let range = b.first_part..b.first_part + b.npart;
                build_subtree(store, domain, range, b.level, top_pos, config.max_bodies_per_leaf)
            })
            .collect();

        let mut nodes = Vec::new();
        let mut top_node_indices = Vec::with_capacity(subtrees.len());
        let mut assignments = Vec::new();

        for (sub_nodes, sub_assign) in subtrees {
            let offset = nodes.len();
            top_node_indices.push(offset);
            for (p, local) in sub_assign {
                assignments.push((p, local + offset));
            }
            nodes.extend(sub_nodes);
        }

        for (p, node_idx) in assignments {
            store.tree_parent[p] = Some(node_idx);
        }

        let mut tree = Self { nodes, top_node_indices };
        tree.finalize();
        tree
    }

    /// `finalise_sub_tree`'s final pass: turn every node's mass-weighted
    /// position sum into an actual center of mass.
    fn finalize(&mut self) {
        for node in &mut self.nodes {
            if node.mass.abs() > f64::EPSILON {
                node.com /= node.mass;
            }
        }
    }
}

/// `transform_bunch_into_top_node`: snap the top node's position to the
/// cell center at its level, `(floor(p/size) + 0.5) * size`, per axis
/// (the draft computes `px` once and reuses it for `py`/`pz`, which we
/// treat as a transcription slip and fix here — each axis must snap
/// against its own coordinate).
fn transform_bunch_into_top_node(bunch: &Bunch, domain: &DomainBox, store: &ParticleStore) -> Vec3 {
    let ipart = bunch.first_part;
    let p = store.pos[ipart] - domain.origin;
    let size = domain.size / (1u64 << bunch.level) as f64;

    let snapped = Vec3::new(
        (f64::floor(p.x / size) + 0.5) * size,
        (f64::floor(p.y / size) + 0.5) * size,
        (f64::floor(p.z / size) + 0.5) * size,
    );

    snapped + domain.origin
}

fn long_key(store: &ParticleStore, domain: &DomainBox, ipart: usize) -> u128 {
    let p = domain.normalize(store.pos[ipart]);
    peano::encode_long(p.x, p.y, p.z)
}

/// Build one top node's subtree, returning its local arena and the
/// `(particle_index, local_node_index)` assignments to write back into
/// the store once the arena's global offset is known.
fn build_subtree(
    store: &ParticleStore,
    domain: &DomainBox,
    range: Range<usize>,
    top_level: u32,
    top_pos: Vec3,
    max_leaf: usize,
) -> (Vec<TreeNode>, Vec<(usize, usize)>) {
    let mut nodes = Vec::new();
    let mut assignments = Vec::new();

    build_node(
        store,
        domain,
        range,
        top_level,
        top_pos,
        max_leaf,
        &mut nodes,
        &mut assignments,
        true,
    );

    (nodes, assignments)
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    store: &ParticleStore,
    domain: &DomainBox,
    range: Range<usize>,
    level: u32,
    node_pos: Vec3,
    max_leaf: usize,
    nodes: &mut Vec<TreeNode>,
    assignments: &mut Vec<(usize, usize)>,
    is_top: bool,
) -> usize {
    let node_idx = nodes.len();
    let key0 = long_key(store, domain, range.start);
    let triplet = peano::triplet_at_level(key0, level.max(1), peano::LONG_BITS);

    nodes.push(TreeNode {
        bitfield: make_bitfield(level, triplet, is_top),
        dnext: 0,
        dup: 0,
        pos: node_pos,
        com: Vec3::new_zero(),
        mass: 0.0,
        npart: 0,
    });

    let is_collapsible = range.len() <= max_leaf || level >= peano::LONG_TRIPLETS;

    if is_collapsible {
        for p in range.clone() {
            accumulate(nodes, node_idx, store, p);
            assignments.push((p, node_idx));
        }
        nodes[node_idx].dnext = -(range.start as i32) - 1;
        return node_idx;
    }

    let mut i = range.start;
    while i < range.end {
        let child_level = level + 1;
        let ti = peano::triplet_at_level(long_key(store, domain, i), child_level, peano::LONG_BITS);

        let mut j = i + 1;
        while j < range.end
            && peano::triplet_at_level(long_key(store, domain, j), child_level, peano::LONG_BITS) == ti
        {
            j += 1;
        }

        let size = domain.size / (1u64 << child_level) as f64;
        let parent_pos = nodes[node_idx].pos;
        let anchor = store.pos[i];
        let sign = Vec3::new(
            if anchor.x > parent_pos.x { 1.0 } else { -1.0 },
            if anchor.y > parent_pos.y { 1.0 } else { -1.0 },
            if anchor.z > parent_pos.z { 1.0 } else { -1.0 },
        );
        let child_pos = parent_pos + sign * size * 0.5;

        let child_idx = build_node(
            store,
            domain,
            i..j,
            child_level,
            child_pos,
            max_leaf,
            nodes,
            assignments,
            false,
        );
        nodes[child_idx].dup = child_idx as i32 - node_idx as i32;

        i = j;
    }

    for p in range {
        accumulate(nodes, node_idx, store, p);
    }
    nodes[node_idx].dnext = nodes.len() as i32 - node_idx as i32;

    node_idx
}

fn accumulate(nodes: &mut [TreeNode], node_idx: usize, store: &ParticleStore, ipart: usize) {
    let n = &mut nodes[node_idx];
    n.com += store.pos[ipart] * store.mass[ipart];
    n.mass += store.mass[ipart];
    n.npart += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainDecomposer;
    use crate::particles::ParticleType;

    fn grid_store(n_per_axis: usize) -> ParticleStore {
        let mut store = ParticleStore::default();
        let mut id = 0u64;
        let delta = 1.0 / n_per_axis as f64;
        for i in 0..n_per_axis {
            for j in 0..n_per_axis {
                for k in 0..n_per_axis {
                    let x = (i as f64 + 0.5) * delta - 0.5;
                    let y = (j as f64 + 0.5) * delta - 0.5;
                    let z = (k as f64 + 0.5) * delta - 0.5;
                    store.push(
                        ParticleType::COLLISIONLESS,
                        id,
                        1.0,
                        Vec3::new(x, y, z),
                        Vec3::new_zero(),
                    );
                    id += 1;
                }
            }
        }
        store
    }

    fn build_tree(store: &mut ParticleStore, config: &SimConfig) -> (GravityTree, DomainBox) {
        let domain = DomainBox::from_particles(store);
        store.sort_by_peano_key(domain.origin, domain.size);

        let mut decomposer = DomainDecomposer::new(store.len());
        decomposer.decompose(store, &domain, config, 1);

        let tree = GravityTree::build(store, &domain, &decomposer, config);
        (tree, domain)
    }

    #[test]
    fn every_particle_gets_a_tree_parent() {
        let mut store = grid_store(4);
        let config = SimConfig::default();
        let (tree, _) = build_tree(&mut store, &config);

        for i in 0..store.len() {
            let parent = store.tree_parent[i].expect("every particle must be assigned a node");
            assert!(parent < tree.nodes.len());
        }
    }

    #[test]
    fn small_leaf_groups_stay_collapsed() {
        let mut store = grid_store(2); // 8 particles total, well under max_bodies_per_leaf
        let config = SimConfig::default();
        let (tree, _) = build_tree(&mut store, &config);

        // With <= 8 particles under one top node, the whole bunch should
        // collapse to a single leaf at its top node.
        let leaves = tree.nodes.iter().filter(|n| n.is_leaf()).count();
        assert!(leaves >= 1);
        let total_in_leaves: u32 = tree.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.npart).sum();
        assert!(total_in_leaves <= store.len() as u32 * tree.top_node_indices.len() as u32);
    }

    #[test]
    fn node_mass_equals_sum_of_member_particle_masses() {
        let mut store = grid_store(3);
        let config = SimConfig::default();
        let (tree, _) = build_tree(&mut store, &config);

        for &root in &tree.top_node_indices {
            let node = &tree.nodes[root];
            assert!(node.mass > 0.0);
            assert!((node.mass - node.npart as f64).abs() < 1e-9);
        }
    }
}
