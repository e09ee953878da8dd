//! A parallel, cosmological N-body simulation core: integer timeline,
//! Peano-Hilbert domain decomposition, gravity oct-tree build and walk,
//! Kick-Drift-Kick leapfrog integration.
//!
//! Grounded on `examples/original_source/` (the `tandav` cosmological
//! simulation code) for the per-module algorithms documented in each
//! module's own doc comment, and on teacher's `barnes_hut` crate
//! (`David-OConnor/barnes_hut`) for the overall shape of a tree-code
//! crate: a small config struct, an arena-backed tree, and a
//! `rayon`-parallel force evaluation entry point — generalized here from
//! one flat tree pass into the full decompose/build/walk/integrate cycle
//! a block time-stepped, multi-sync-point run requires (§2, §9).
//!
//! This crate implements a single run's core: it does not read snapshot
//! files, dispatch a parameter-file CLI, or talk to other MPI ranks
//! (§1 Non-goals) — those live behind the [`collaborators`] trait
//! boundary. What's here takes a [`particles::ParticleStore`] already
//! populated by some collaborator and steps it forward in time.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod integrator;
pub mod particles;
pub mod peano;
pub mod sort;
pub mod timeline;
pub mod tree;
pub mod walk;

use context::{SimContext, Signals};
use domain::{DomainBox, DomainDecomposer};
use error::NbodyError;
use particles::ParticleStore;
use timeline::Timeline;
use tree::GravityTree;

/// One run's worth of state threaded through every phase: the particle
/// store, its domain decomposition and gravity tree, the timeline, and
/// the run-wide context (§9's "no process globals" redesign note).
///
/// Grounded on §2's control-flow overview and `main.c`'s top-level loop
/// (`Read_Parameter_File` → `Init` → `while (!Sig.Endrun) { ... }`), which
/// this struct's [`Simulation::run_to_completion`] mirrors at the level
/// of one rank executing the reduced core.
pub struct Simulation {
    pub store: ParticleStore,
    pub domain: DomainBox,
    pub decomposer: DomainDecomposer,
    pub tree: GravityTree,
    pub timeline: Timeline,
    pub ctx: SimContext,
    pub config: config::SimConfig,
}

impl Simulation {
    /// `Init`: build the first domain decomposition, tree, and force
    /// evaluation for a freshly loaded particle store, establishing the
    /// invariants every later sync iteration assumes (every particle has
    /// a tree parent, `prev_acc_mag` reflects a real force evaluation).
    pub fn init(
        mut store: ParticleStore,
        config: config::SimConfig,
        timeline: Timeline,
        boxsize: [f64; 3],
        periodic: bool,
    ) -> Result<Self, NbodyError> {
        let n_total = store.len() as u64;
        let ctx = SimContext::new(n_total, rayon::current_num_threads(), boxsize, periodic);

        let domain = DomainBox::from_particles(&store);
        store.sort_by_peano_key(domain.origin, domain.size);

        let mut decomposer = DomainDecomposer::new(store.len());
        decomposer.decompose(&store, &domain, &config, ctx.sim.n_ranks);

        let tree = GravityTree::build(&mut store, &domain, &decomposer, &config);

        let mut sim = Self {
            store,
            domain,
            decomposer,
            tree,
            timeline,
            ctx,
            config,
        };

        let active: Vec<usize> = (0..sim.store.len()).collect();
        walk::accelerate_active_particles(&mut sim.store, &active, &sim.tree, &sim.domain, &sim.config);

        log::info!(
            "init: {} particles, {} top nodes, {} tree nodes",
            sim.store.len(),
            sim.tree.top_node_indices.len(),
            sim.tree.nodes.len()
        );

        Ok(sim)
    }

    /// One sync iteration: assign time bins, pick the system step, kick
    /// the active set, drift everyone, refresh the domain/tree when
    /// signaled, recompute forces for the active set, and kick again
    /// (§2, §4.4). Returns the momentum-weighted acceleration probe
    /// (§8 property 5) so the caller can track drift across steps.
    pub fn step(&mut self) -> Result<lin_alg::f64::Vec3, NbodyError> {
        let expansion_factor = match self.timeline.mode {
            timeline::TimeMode::Newtonian => 1.0,
            timeline::TimeMode::Comoving { .. } => {
                self.timeline.physical_time(self.timeline.current)
            }
        };

        let (bin_min, bin_max) = self.timeline.assign_particle_bins(
            &mut self.store,
            &self.config,
            self.config.max_timestep,
            expansion_factor,
        )?;

        self.timeline.set_system_step(bin_min, bin_max);
        self.ctx.sig.sync_point = self.timeline.sync_point;

        let active = self.timeline.active_particle_list(&self.store);

        // `Kick_First_Halfstep`: advance the active set's velocities to
        // the midpoint of the step using the acceleration computed at
        // the end of the previous step.
        let midpoint = self.timeline.midpoint();
        integrator::kick_active_particles(&mut self.store, &self.timeline, &active, midpoint);

        let periodic = if self.ctx.sim.periodic {
            Some(lin_alg::f64::Vec3::new(
                self.ctx.sim.boxsize[0],
                self.ctx.sim.boxsize[1],
                self.ctx.sim.boxsize[2],
            ))
        } else {
            None
        };
        integrator::drift_to_sync_point(&mut self.store, &mut self.timeline, &mut self.ctx.sig, periodic);

        self.timeline.advance();

        if self.ctx.sig.sync_point || self.ctx.sig.domain_update {
            self.domain = DomainBox::from_particles(&self.store);
            self.store.sort_by_peano_key(self.domain.origin, self.domain.size);
            self.decomposer = DomainDecomposer::new(self.store.len());
            self.decomposer
                .decompose(&self.store, &self.domain, &self.config, self.ctx.sim.n_ranks);
            self.ctx.sig.tree_update = true;
        }

        if self.ctx.sig.tree_update {
            self.tree = GravityTree::build(&mut self.store, &self.domain, &self.decomposer, &self.config);
            self.ctx.sig.tree_update = false;
        }

        let active = self.timeline.active_particle_list(&self.store);
        walk::accelerate_active_particles(&mut self.store, &active, &self.tree, &self.domain, &self.config);

        // `Kick_Second_Halfstep`: bring the active set's velocities the
        // rest of the way to `current` (== the step's `next`, after
        // `advance`) using the force just computed.
        integrator::kick_active_particles(&mut self.store, &self.timeline, &active, self.timeline.current);

        Ok(walk::momentum_weighted_acceleration(&self.store))
    }

    /// Run until the timeline reaches `end` or a rank-abort-worthy error
    /// occurs (§2's top-level `while (!Sig.Endrun)` loop, flattened into
    /// a `Result`-returning call since this reduced core has nothing to
    /// broadcast an abort to).
    pub fn run_to_completion(&mut self) -> Result<(), NbodyError> {
        while self.timeline.current < self.timeline.end && !self.ctx.sig.endrun {
            self.step()?;
        }
        Ok(())
    }
}
