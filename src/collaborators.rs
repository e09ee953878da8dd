//! External interface boundaries (spec §6) that stay outside this core's
//! scope (§1 Non-goals: snapshot I/O, the MPI export path, the rank abort
//! protocol) but whose *shape* the core must still expose so a concrete
//! application can wire them in.
//!
//! Grounded on `examples/original_source/src/io.c`/`restart.c` for the
//! snapshot record shape and `domain.c`'s `Send_Particles`/
//! `Export_Particle` for the remote top-node export payload; the traits
//! here are this crate's equivalent of the original's function-pointer
//! dispatch tables (`Io_Header`, the per-block read/write callbacks).

#[cfg(feature = "encode")]
use bincode::{Decode, Encode};
use lin_alg::f64::Vec3;

use crate::error::NbodyError;
use crate::particles::ParticleStore;

/// `Start_Flag` from the CLI contract (§6): how the run should be seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// 0: read the initial-conditions snapshot named by `Input_File`.
    ReadInitialConditions,
    /// 1: resume from the last restart checkpoint.
    ResumeFromRestart,
    /// 2: continue from a numbered snapshot.
    ContinueFromSnapshot(u32),
    /// 10: write a canonical parameter file from the defaults and exit.
    WriteParameterFileAndExit,
}

/// The 256-byte `HEAD` block (§6): everything a snapshot reader/writer
/// needs besides the per-particle field blocks. Plain enough to round-trip
/// through `bincode` directly (teacher's `encode` feature idiom), which a
/// [`SnapshotIo`] implementation can use for a non-Fortran-record transport
/// without this core having to own the wire format itself.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "encode", derive(Encode, Decode))]
pub struct SnapshotHeader {
    pub npart: [u32; 6],
    pub mass_per_type: [f64; 6],
    pub time: f64,
    pub redshift: f64,
    pub nall: [u32; 6],
    pub num_files: u32,
    pub boxsize: f64,
    pub omega_0: f64,
    pub omega_lambda: f64,
    pub hubble: f64,
    pub nall_highword: [u32; 6],
}

/// Reads and writes the record-based binary snapshot format (§6): 4-byte
/// Fortran-style record markers around the header and each per-type field
/// block, little/big-endian autodetected from the first marker's value
/// against `134217728`.
///
/// This core has no implementation of this trait (§1 Non-goals exclude
/// snapshot I/O); an application links in its own and constructs a
/// [`ParticleStore`] from what it reads.
pub trait SnapshotIo {
    fn read_header(&mut self) -> Result<SnapshotHeader, NbodyError>;
    fn read_particles(&mut self, header: &SnapshotHeader) -> Result<ParticleStore, NbodyError>;
    fn write(&mut self, header: &SnapshotHeader, store: &ParticleStore) -> Result<(), NbodyError>;
}

/// One parallel I/O reader/writer slot (`Num_IO_Tasks`). The core itself
/// never opens a file; this names the degree of parallelism a
/// [`SnapshotIo`] implementation may use, so the parameter stays visible
/// on the config/collaborator boundary it was read from.
#[derive(Debug, Clone, Copy)]
pub struct IoTaskCount(pub u32);

/// A request/reply pair for the remote top-node export path (§6): when a
/// particle's walk needs a node owned by another rank, its interaction
/// is deferred into this payload, sent to that rank, and reduced back
/// into the particle's accumulator on reply.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "encode", derive(Encode, Decode))]
pub struct ExportRequest {
    pub particle_id: u64,
    pub pos: Vec3,
    pub prev_acc_mag: f64,
    pub mass: f64,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "encode", derive(Encode, Decode))]
pub struct ExportReply {
    pub acc: Vec3,
    pub potential: Option<f64>,
    pub cost: f64,
}

/// Sends deferred interactions to other ranks and reduces their replies.
/// The reduced, single-rank core this crate implements never has a
/// remote top node to defer to, so [`NoRemoteRanks`] below satisfies this
/// trait as a no-op; a multi-rank application supplies its own transport.
pub trait RemoteExport {
    fn export(&mut self, request: ExportRequest, owning_rank: usize) -> Result<(), NbodyError>;
    fn drain_replies(&mut self) -> Vec<(u64, ExportReply)>;
}

/// The no-op [`RemoteExport`] this core runs with: `Sim.N_ranks == 1`
/// always (see [`crate::context::SimProperties`]), so every top node is
/// local and `export` is never reachable from [`crate::walk`]. It exists
/// so call sites that are written generically over the trait still
/// compile against a concrete type.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteRanks;

impl RemoteExport for NoRemoteRanks {
    fn export(&mut self, _request: ExportRequest, _owning_rank: usize) -> Result<(), NbodyError> {
        unreachable!("single-rank core never owns a non-local top node to export to")
    }

    fn drain_replies(&mut self) -> Vec<(u64, ExportReply)> {
        Vec::new()
    }
}

/// The rank-abort protocol (§7: "errors inside a worker are surfaced...
/// via an abort protocol that broadcasts a fatal-signal message... and
/// exits all ranks with the same code"). Single-rank execution just
/// needs to propagate the `Result`, which is what [`LocalAbort`] does;
/// a multi-rank application supplies a broadcasting implementation.
pub trait RankAbort {
    fn abort(&mut self, error: &NbodyError);
}

/// No broadcast to perform with one rank: the caller already has the
/// `Result` and this exists only to satisfy call sites written against
/// the trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAbort;

impl RankAbort for LocalAbort {
    fn abort(&mut self, error: &NbodyError) {
        log::error!("fatal: {error}");
    }
}
