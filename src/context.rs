//! Explicit simulation context (spec §9, "Global mutable state" redesign).
//!
//! The original keeps `Sim`, `Task`, and `Sig` as process-level globals
//! (one `#pragma omp threadprivate` struct per worker, two shared ones).
//! We bundle the rank/run-wide pieces into [`SimContext`] and thread it
//! through every phase entry point instead. `Time`/`Int_Time` are kept in
//! [`crate::timeline::IntegerTimeline`] since they have their own
//! substantial behavior (§4.4) and are documented there.

/// Invariants of the whole run, re-derivable from the particle store but
/// cached here because several phases (domain decomposition, timestep
/// constraint) need them before they'd otherwise be recomputed.
///
/// Grounded on `examples/original_source/src/globals.h`'s
/// `Global_Simulation_Properties`.
#[derive(Debug, Clone)]
pub struct SimProperties {
    pub n_total: u64,
    /// Number of MPI ranks. The reduced core in this crate always runs
    /// with exactly one rank; this field exists so the domain/timeline
    /// formulas that divide by `n_ranks` read the same as the original.
    pub n_ranks: usize,
    pub n_threads: usize,
    pub boxsize: [f64; 3],
    pub periodic: bool,
    pub total_mass: f64,
    pub center_of_mass: [f64; 3],
}

impl SimProperties {
    pub fn new(n_total: u64, n_threads: usize, boxsize: [f64; 3], periodic: bool) -> Self {
        Self {
            n_total,
            n_ranks: 1,
            n_threads,
            boxsize,
            periodic,
            total_mass: 0.0,
            center_of_mass: [0.0; 3],
        }
    }
}

/// Per-rank task info. Grounded on `globals.h`'s `Local_Task_Properties`.
#[derive(Debug, Clone)]
pub struct TaskProperties {
    pub rank: usize,
    pub is_master: bool,
    pub npart_total: usize,
    pub npart_total_max: usize,
    pub buffer_size: usize,
}

impl TaskProperties {
    pub fn single_rank(npart_total: usize, buffer_size: usize) -> Self {
        Self {
            rank: 0,
            is_master: true,
            npart_total,
            npart_total_max: npart_total,
            buffer_size,
        }
    }
}

/// Phase signals (`Sig` in the original). These are booleans other phases
/// read to decide whether to run; we keep them explicit fields rather
/// than a bitset since there are few of them and clarity matters more
/// than packing (unlike the tree node `bitfield`, which is genuinely
/// hot).
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub first_step: bool,
    pub sync_point: bool,
    pub domain_update: bool,
    pub tree_update: bool,
    pub restart_write_file: bool,
    pub endrun: bool,
    /// `Sig.Synchronize_Drift`: set by a snapshot-time drift that stopped
    /// short of the next integer-timeline position, so the following
    /// drift must cover only the remaining gap instead of a full system
    /// step (`drift.c`'s `Drift_To_Snaptime`/`Drift_To_Sync_Point` pair).
    pub synchronize_drift: bool,
}

/// Everything a phase entry point needs about the run, besides the
/// particle store and the timeline.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub sim: SimProperties,
    pub task: TaskProperties,
    pub sig: Signals,
}

impl SimContext {
    pub fn new(n_total: u64, n_threads: usize, boxsize: [f64; 3], periodic: bool) -> Self {
        let sim = SimProperties::new(n_total, n_threads, boxsize, periodic);
        let task = TaskProperties::single_rank(n_total as usize, 1 << 20);
        Self {
            sim,
            task,
            sig: Signals {
                first_step: true,
                ..Default::default()
            },
        }
    }
}
