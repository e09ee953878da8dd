//! The integer timeline and multi-bin step controller (spec §4.4).
//!
//! Grounded on `examples/original_source/src/timestep.c`
//! (`Set_New_Timesteps`, `set_new_particle_timebins`,
//! `set_system_timestep`, `timestep2timebin`, `cosmological_timestep`)
//! and `drift.c` for the sync/snapshot-drift interplay. The original
//! keeps `Time`/`Int_Time` as file-scope globals (`struct TimeData Time`,
//! `struct IntegerTimeLine Int_Time`); per §9's redesign note we bundle
//! them into [`Timeline`], one value threaded through phase entry points
//! instead of a singleton.

use crate::config::SimConfig;
use crate::error::NbodyError;
use crate::particles::ParticleStore;

/// The integer timeline's tick type. `B = 8 * size_of::<IntTime>()`
/// bins exist, one per bit (§3). We use a 64-bit integer, giving 64 bins
/// — the original's `intime_t` is whatever native integer the build
/// picks, with the same "number of bits = number of bins" contract.
pub type IntTime = u64;

/// Number of time bins, `B` in the spec (`8 * size_of::<IntTime>()`).
pub const N_INT_BINS: u32 = (std::mem::size_of::<IntTime>() * 8) as u32;

/// Whether physical time runs linearly (Newtonian) or the timeline steps
/// in `log(a)` (comoving/cosmological), per §3.
#[derive(Debug, Clone, Copy)]
pub enum TimeMode {
    Newtonian,
    /// `hubble_parameter` converts a physical `dt` into `dlog(a)` (§4.4:
    /// "In comoving mode dt is converted to dlog(a) by multiplying by
    /// the Hubble parameter").
    Comoving { hubble_parameter: f64 },
}

/// Plummer-equivalent softening scale used by the timestep criterion.
/// Grounded on `timestep.c`'s `cosmological_timestep`:
/// `epsilon = 105/32 * Grav_Softening` (Dehnen & Read 2011, eq. 21's
/// softening-to-scale-length conversion for a Plummer kernel).
pub fn plummer_equivalent_eps(grav_softening: f64) -> f64 {
    105.0 / 32.0 * grav_softening
}

/// Re-implementation of C's `frexp`: decompose `value` into a mantissa
/// `m ∈ [0.5, 1)` and exponent `e` such that `value == m * 2^e`. Used by
/// [`timestep_to_bin`], which needs the exact `ceil(log2(...))`
/// semantics the original gets from `frexp`.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }

    let bits = value.to_bits();
    let sign = bits & (1u64 << 63);
    let exponent_bits = ((bits >> 52) & 0x7ff) as i64;
    let mantissa_bits = bits & 0x000f_ffff_ffff_ffff;

    if exponent_bits == 0 {
        // Subnormal: rescale, recurse, and correct the exponent.
        let (m, e) = frexp(value * 2f64.powi(54));
        return (m, e - 54);
    }

    let exp = exponent_bits - 1022;
    let normalized_bits = sign | (1022u64 << 52) | mantissa_bits;

    (f64::from_bits(normalized_bits), exp as i32)
}

/// Convert a desired timestep to a power-of-two time bin:
/// `B - 1 - ceil(log2(step_max/dt)) - 1` (§4.4), using `frexp` the way
/// the source's `timestep2timebin` does.
pub fn timestep_to_bin(dt: f64, step_max: f64) -> i32 {
    let (_, exponent) = frexp(step_max / dt);
    N_INT_BINS as i32 - 1 - exponent
}

/// The integer timeline plus the physical-time conversion it implies.
/// Grounded on `timestep.c`'s `struct IntegerTimeLine`/`struct TimeData`
/// pair and `Setup_Time_Integration`.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub mode: TimeMode,
    pub physical_begin: f64,
    pub physical_end: f64,
    /// `Time.Step_Min`: physical (or log-a) change per integer tick.
    pub step_min: f64,
    /// `Time.Step_Max`: total physical (or log-a) span of the run.
    pub step_max: f64,

    pub begin: IntTime,
    pub end: IntTime,
    pub current: IntTime,
    pub next: IntTime,
    pub next_sync_point: IntTime,
    pub step: IntTime,

    pub max_active_bin: u8,
    pub sync_point: bool,
    pub first_step: bool,
    /// Physical time already reached by a prior `Drift_To_Snaptime`-style
    /// partial drift, consumed by the next sync-point drift so it only
    /// covers the remaining gap instead of the whole system step. Only
    /// meaningful while [`crate::context::Signals::synchronize_drift`]
    /// is set.
    pub partial_drift_time: f64,
}

impl Timeline {
    pub fn new(mode: TimeMode, physical_begin: f64, physical_end: f64) -> Self {
        let begin: IntTime = 0;
        let end: IntTime = 1 << (N_INT_BINS - 1);

        let step_max = match mode {
            TimeMode::Newtonian => physical_end - physical_begin,
            TimeMode::Comoving { .. } => physical_end.ln() - physical_begin.ln(),
        };
        let step_min = step_max / (end - begin) as f64;

        Self {
            mode,
            physical_begin,
            physical_end,
            step_min,
            step_max,
            begin,
            end,
            current: begin,
            next: begin,
            next_sync_point: begin,
            step: 0,
            max_active_bin: (N_INT_BINS - 1) as u8,
            sync_point: false,
            first_step: true,
            partial_drift_time: physical_begin,
        }
    }

    /// Physical time (or scale factor `a` in comoving mode) at integer
    /// position `t` (§3: "Physical time of integer position t").
    pub fn physical_time(&self, t: IntTime) -> f64 {
        match self.mode {
            TimeMode::Newtonian => t as f64 * self.step_min + self.physical_begin,
            TimeMode::Comoving { .. } => self.physical_begin * (t as f64 * self.step_min).exp(),
        }
    }

    /// Inverse of [`Timeline::physical_time`].
    pub fn integer_time(&self, time: f64) -> IntTime {
        match self.mode {
            TimeMode::Newtonian => ((time - self.physical_begin) / self.step_min) as IntTime,
            TimeMode::Comoving { .. } => {
                ((time / self.physical_begin).ln() / self.step_min) as IntTime
            }
        }
    }

    /// Physical time elapsed moving from integer position `from` to `to`
    /// (used by the integrator's kick/drift, which always operate on a
    /// difference of integer-timeline positions, never an absolute
    /// step — see §4.4's Integrator contract).
    pub fn dt_between(&self, from: IntTime, to: IntTime) -> f64 {
        self.physical_time(to) - self.physical_time(from)
    }

    fn convert_dt_to_dlna(&self, dt: f64) -> f64 {
        match self.mode {
            TimeMode::Newtonian => dt,
            TimeMode::Comoving { hubble_parameter } => dt * hubble_parameter,
        }
    }

    /// Per-particle desired step (§4.4): `accuracy * sqrt(2*eps/|a|)`,
    /// with `eps` scaled by the expansion factor in comoving mode.
    fn desired_timestep(
        &self,
        accel_mag: f64,
        eps: f64,
        accuracy: f64,
        expansion_factor: f64,
    ) -> f64 {
        if accel_mag <= 0.0 {
            return f64::MAX;
        }

        let scaled_eps = match self.mode {
            TimeMode::Newtonian => eps,
            TimeMode::Comoving { .. } => expansion_factor * eps,
        };

        accuracy * (2.0 * scaled_eps / accel_mag).sqrt()
    }

    /// Assign every particle a new time bin (`set_new_particle_timebins`),
    /// returning `(bin_min, bin_max)` across the whole store (already
    /// reduced, since this reduced core runs a single rank — the
    /// original's `MPI_Allreduce(..., MPI_MIN/MPI_MAX, ...)` is a no-op
    /// reduction over one rank's own value here).
    pub fn assign_particle_bins(
        &self,
        store: &mut ParticleStore,
        config: &SimConfig,
        dt_max_global: f64,
        expansion_factor: f64,
    ) -> Result<(u8, u8), NbodyError> {
        let mut bin_min = (N_INT_BINS - 1) as u8;
        let mut bin_max = 0u8;

        for i in 0..store.len() {
            let accel_mag = store.acc[i].magnitude();
            let eps = plummer_equivalent_eps(
                config.grav_softening[store.particle_type[i].0 as usize % 6],
            );

            let mut dt = self.desired_timestep(accel_mag, eps, config.time_int_accuracy, expansion_factor);
            dt = self.convert_dt_to_dlna(dt);
            dt = dt.min(dt_max_global);

            if !dt.is_finite() || dt < self.step_min {
                return Err(NbodyError::TimelineViolation {
                    particle_id: store.id[i],
                    accel_mag,
                });
            }

            let want = timestep_to_bin(dt, self.step_max).clamp(0, (N_INT_BINS - 1) as i32) as u8;

            let previous_bin = store.time_bin[i];
            let allowed = self.max_active_bin.max(previous_bin);
            let bin = want.min(allowed);

            store.time_bin[i] = bin;
            bin_min = bin_min.min(bin);
            bin_max = bin_max.max(bin);
        }

        Ok((bin_min, bin_max))
    }

    /// Choose the system-wide step from the reduced `bin_min`
    /// (`set_system_timestep`), advance `current`/`next`, and detect
    /// sync points.
    pub fn set_system_step(&mut self, bin_min: u8, bin_max: u8) {
        let step_bin: IntTime = 1 << bin_min;

        let step_sync: IntTime = if self.current == self.begin {
            step_bin
        } else {
            1 << self.current.trailing_zeros()
        };

        let step_end = self.end - self.current;

        self.step = step_end.min(step_bin).min(step_sync);
        self.next = self.current + self.step;

        if self.first_step {
            self.max_active_bin = bin_min;
        } else {
            self.max_active_bin = self.next.trailing_zeros() as u8;
        }

        self.sync_point = self.current == self.next_sync_point;
        if self.sync_point {
            self.next_sync_point += 1 << bin_max;
        }

        self.first_step = false;
    }

    /// Advance `current` to `next` after a full step has been applied by
    /// the integrator.
    pub fn advance(&mut self) {
        self.current = self.next;
    }

    /// The integer position halfway between `current` and `next`, the
    /// boundary between `Kick_First_Halfstep` and `Kick_Second_Halfstep`
    /// in a KDK leapfrog step. At the finest resolution (`step == 1`)
    /// the halfway point coincides with `current`, collapsing the first
    /// half-kick to a no-op — the whole kick lands in the second half.
    pub fn midpoint(&self) -> IntTime {
        self.current + self.step / 2
    }

    /// Active-particle indices: `{i : time_bin[i] <= max_active_bin}`
    /// (§4.4, rebuilt after every bin assignment).
    pub fn active_particle_list(&self, store: &ParticleStore) -> Vec<usize> {
        (0..store.len())
            .filter(|&i| store.time_bin[i] <= self.max_active_bin)
            .collect()
    }
}
