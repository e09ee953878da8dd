//! Kick-Drift-Kick leapfrog integrator (spec §4.4's "Integrator"
//! collaborator contract).
//!
//! Grounded on `examples/original_source/src/drift.c`
//! (`Drift_To_Sync_Point`, `Drift_To_Snaptime`, the
//! `Sig.Synchronize_Drift` desync-then-correct behavior) and
//! `timestep.c`'s field comment on `It_Drift_Pos`/`It_Kick_Pos` ("the
//! kick operation and the drift operation" tracking their own integer
//! timeline position per particle, since under block time-stepping not
//! every particle is kicked every step). The kick half-step itself
//! (`Kick_First_Halfstep`/`Kick_Second_Halfstep`) lives in a file this
//! pack didn't retrieve; we reconstruct its contract from the KDK scheme
//! `drift.c` cites (Dehnen & Read 2012, Springel 2005): kick only the
//! active particles from their own last kick position to the new
//! sync point, drift every particle using the system step.

use lin_alg::f64::Vec3;
use rayon::prelude::*;

use crate::context::Signals;
use crate::particles::ParticleStore;
use crate::timeline::{IntTime, Timeline};

/// Kick every active particle's velocity from its own last kick position
/// up to `to`, using the acceleration computed for it this step. Only
/// active particles have a fresh acceleration to kick with; inactive
/// ones keep the velocity from their last active kick until they next
/// become active (§4.4: individual time-bin stepping).
pub fn kick_active_particles(store: &mut ParticleStore, timeline: &Timeline, active: &[usize], to: IntTime) {
    let deltas: Vec<(usize, Vec3, IntTime)> = active
        .par_iter()
        .map(|&i| {
            let dt = timeline.dt_between(store.it_kick_pos[i], to);
            (i, store.acc[i] * dt, to)
        })
        .collect();

    for (i, dv, kicked_to) in deltas {
        store.vel[i] += dv;
        store.it_kick_pos[i] = kicked_to;
    }
}

/// `Drift_To_Sync_Point`: advance every particle's position by the
/// system step, honoring a pending partial drift from a prior
/// [`drift_to_time`] call.
pub fn drift_to_sync_point(store: &mut ParticleStore, timeline: &mut Timeline, sig: &mut Signals, periodic: Option<Vec3>) {
    let dt = if sig.synchronize_drift {
        // A prior `drift_to_time` call already moved particles up to
        // `partial_drift_time`, short of `next`; only the remaining gap
        // is left to cover (`drift.c`'s `Sig.Synchronize_Drift` branch).
        sig.synchronize_drift = false;
        timeline.physical_time(timeline.next) - timeline.partial_drift_time
    } else {
        timeline.dt_between(timeline.current, timeline.next)
    };

    drift_all(store, dt, periodic);

    for it in &mut store.it_drift_pos {
        *it = timeline.next;
    }
}

/// `Drift_To_Snaptime`: drift only as far as `snap_time`, leaving the
/// timeline's own `current`/`next` untouched and marking that the
/// remainder must still be applied by the next [`drift_to_sync_point`]
/// call.
pub fn drift_to_time(store: &mut ParticleStore, timeline: &mut Timeline, snap_time: f64, sig: &mut Signals, periodic: Option<Vec3>) {
    let current_time = timeline.physical_time(timeline.current);
    let dt = snap_time - current_time;

    drift_all(store, dt, periodic);

    timeline.partial_drift_time = snap_time;
    sig.synchronize_drift = true;
}

fn drift_all(store: &mut ParticleStore, dt: f64, periodic: Option<Vec3>) {
    store
        .pos
        .par_iter_mut()
        .zip(store.vel.par_iter())
        .for_each(|(pos, vel)| {
            *pos += *vel * dt;

            if let Some(boxsize) = periodic {
                wrap(pos, boxsize);
            }
        });
}

/// Wrap a drifted position back into `[0, boxsize)` per axis (§1 Non-goals
/// excludes periodic *force* summation, but periodic position wrap is a
/// drift-time bookkeeping detail the spec's particle model still expects
/// for a periodic box).
fn wrap(pos: &mut Vec3, boxsize: Vec3) {
    pos.x = pos.x.rem_euclid(boxsize.x);
    pos.y = pos.y.rem_euclid(boxsize.y);
    pos.z = pos.z.rem_euclid(boxsize.z);
}
