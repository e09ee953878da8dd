//! Error kinds for the simulation core (spec §7).
//!
//! Fatal kinds propagate as `Result<_, NbodyError>` up to the phase entry
//! points on [`crate::Simulation`]. Warnings (bunch refinement exhausted,
//! buffer undersized, PH resolution exhausted) are not representable here:
//! they are logged via `log::warn!` at the call site and execution
//! continues, per §7's "logged, not fatal" policy.

use thiserror::Error;

/// Errors that abort a sync iteration. A caller that owns multiple ranks
/// is expected to broadcast whichever of these it receives as a
/// fatal-signal message and exit every rank with the same code (§7); this
/// crate only executes a single rank and so only returns the error.
#[derive(Debug, Error)]
pub enum NbodyError {
    /// A required parameter-file key was missing, or a value contradicts
    /// another (e.g. `Buffer_Size` larger than `Max_Mem_Size`).
    #[error("configuration error: {key}: {reason}")]
    Configuration {
        /// The offending key name.
        key: String,
        reason: String,
    },

    /// The arena (tree node array or bunch store) could not grow to the
    /// requested size.
    #[error("resource exhausted: {resource} (requested {requested_bytes} bytes)")]
    ResourceExhausted {
        resource: &'static str,
        requested_bytes: usize,
    },

    /// A particle's desired timestep fell below the integer timeline's
    /// resolution (`Time.Step_Min`).
    #[error(
        "timeline violation: particle {particle_id} wants dt below timeline \
         resolution (|a| = {accel_mag})"
    )]
    TimelineViolation {
        particle_id: u64,
        accel_mag: f64,
    },

    /// A snapshot block was malformed (label not found, record markers
    /// inconsistent, size mismatch). The core itself does not implement
    /// snapshot I/O (§1 Non-goals); this variant exists for the
    /// `collaborators` trait boundary to report through.
    #[error("snapshot format error: {0}")]
    SnapshotFormat(String),

    /// A computed acceleration or position was non-finite.
    #[error("numerical error: particle {particle_id} produced a non-finite value")]
    Numerical { particle_id: u64 },
}
