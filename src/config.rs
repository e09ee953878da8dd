//! Configuration: the subset of the parameter-file surface (spec §6) that
//! the core itself consumes, plus a parser for the line-based format.
//!
//! Locating the parameter file, dispatching on `Start_Flag`, and wiring
//! `Input_File`/`Output_File_Base`/`Num_IO_Tasks` into a snapshot reader
//! are collaborator responsibilities (§1 Non-goals, §6) and live behind
//! [`crate::collaborators`]. What's here is the in-memory shape the core
//! algorithms read from, and the grammar of the file the collaborator
//! hands to [`ParameterFile::parse`].

use std::collections::HashMap;

use crate::error::NbodyError;

/// Per-species Plummer-equivalent gravitational softening. The original
/// indexes this by particle type (0..6); we keep the same shape since
/// §3's particle record carries a `type` field and softening is looked
/// up by it.
pub type SofteningTable = [f64; 6];

/// The tree/timestep-relevant parameters from §6, in the units the core
/// operates on (softening in box units, thresholds dimensionless).
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// `Const.Gravity` — Newton's constant in the simulation's unit
    /// system (commonly `1.0` in N-body codes that define their own
    /// length/mass/time units, per `tree_accel.c`'s `Const.Gravity`).
    pub gravitational_constant: f64,
    pub grav_softening: SofteningTable,
    /// ε in §4.4's `dt_want` formula, the time-integration accuracy
    /// parameter (`Time_Int_Accuracy`).
    pub time_int_accuracy: f64,
    /// θ_BH² (`Tree_Open_Param_BH`) — squared already, matching the
    /// original's `size² ≤ r²·θ_BH` form so the hot path avoids a sqrt.
    pub theta_bh: f64,
    /// θ_rel (`Tree_Open_Param_Rel`).
    pub theta_rel: f64,
    pub max_timestep: f64,
    pub min_timestep: f64,
    /// `L_leaf`, the maximum particles per collapsed tree leaf (§3, §4.5).
    pub max_bodies_per_leaf: usize,
    /// Signed relative-memory-load split threshold (§4.3). The original
    /// uses `-0.8`, i.e. "split unless this bunch already carries well
    /// below the mean" — see DESIGN.md Open Question 5.
    pub theta_mem: f64,
    pub theta_cpu: f64,
    /// `k_per_thread` in §4.3's `N̄ = N_total / (R · k_per_thread)`.
    pub bunches_per_thread: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gravitational_constant: 1.0,
            grav_softening: [0.0; 6],
            time_int_accuracy: 0.025,
            theta_bh: 0.3 * 0.3,
            theta_rel: 0.005,
            max_timestep: f64::MAX,
            min_timestep: 0.0,
            max_bodies_per_leaf: 8,
            theta_mem: -0.8,
            theta_cpu: -1.0,
            bunches_per_thread: 4.0,
        }
    }
}

/// A parsed parameter file: every `Key Value` pair found, keyed by name.
/// Unknown keys are kept but never consulted (§6: "Unknown keys are
/// ignored"); missing required keys are reported with the offending tag
/// name via [`NbodyError::Configuration`].
#[derive(Debug, Clone, Default)]
pub struct ParameterFile {
    entries: HashMap<String, String>,
}

impl ParameterFile {
    /// Parse the text, line-based `Key Value` format from spec §6.
    /// Blank lines and lines starting with `%` or `#` are comments, as in
    /// the Gadget-family parameter files this format descends from.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();

        for line in text.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();

            if key.is_empty() {
                continue;
            }

            entries.insert(key.to_string(), value.to_string());
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, NbodyError> {
        self.get(key).ok_or_else(|| NbodyError::Configuration {
            key: key.to_string(),
            reason: "missing required parameter".to_string(),
        })
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, NbodyError> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| NbodyError::Configuration {
            key: key.to_string(),
            reason: format!("expected a floating point value, got '{raw}'"),
        })
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, NbodyError> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| NbodyError::Configuration {
            key: key.to_string(),
            reason: format!("expected an integer value, got '{raw}'"),
        })
    }

    /// Build a [`SimConfig`] from the recognized keys in §6, falling back
    /// to [`SimConfig::default`] for any that are absent (all of the
    /// core-relevant keys are optional in the sense that the original
    /// ships working defaults for them; `Min_Timestep`/`Max_Timestep` and
    /// the opening parameters are the ones simulations usually override).
    ///
    /// `Max_Bodies_Per_Leaf`, `Theta_Mem`, `Theta_Cpu`, and
    /// `Bunches_Per_Thread` are this crate's own keys for §4.3's domain
    /// decomposer tunables — the original hardcodes these as `#define`s
    /// (`domain.c`'s `DOMAIN_SPLIT_MEM_THRES`, `DOMAIN_SPLIT_CPU_THRES`,
    /// `DOMAIN_NBUNCHES_PER_THREAD`) rather than exposing them through its
    /// parameter file, so [`SimConfig::default`] carries their exact
    /// values and these keys only need setting to override them.
    pub fn to_sim_config(&self) -> Result<SimConfig, NbodyError> {
        let mut cfg = SimConfig::default();

        if let Some(_v) = self.get("Gravity_Constant") {
            cfg.gravitational_constant = self.require_f64("Gravity_Constant")?;
        }
        if let Some(_v) = self.get("Grav_Softening") {
            let eps = self.require_f64("Grav_Softening")?;
            cfg.grav_softening = [eps; 6];
        }
        if let Some(_v) = self.get("Time_Int_Accuracy") {
            cfg.time_int_accuracy = self.require_f64("Time_Int_Accuracy")?;
        }
        if let Some(_v) = self.get("Tree_Open_Param_BH") {
            cfg.theta_bh = self.require_f64("Tree_Open_Param_BH")?;
        }
        if let Some(_v) = self.get("Tree_Open_Param_Rel") {
            cfg.theta_rel = self.require_f64("Tree_Open_Param_Rel")?;
        }
        if let Some(_v) = self.get("Max_Timestep") {
            cfg.max_timestep = self.require_f64("Max_Timestep")?;
        }
        if let Some(_v) = self.get("Min_Timestep") {
            cfg.min_timestep = self.require_f64("Min_Timestep")?;
        }
        if let Some(_v) = self.get("Max_Bodies_Per_Leaf") {
            let n = self.require_i64("Max_Bodies_Per_Leaf")?;
            if n <= 0 {
                return Err(NbodyError::Configuration {
                    key: "Max_Bodies_Per_Leaf".to_string(),
                    reason: format!("expected a positive leaf bound, got '{n}'"),
                });
            }
            cfg.max_bodies_per_leaf = n as usize;
        }
        if let Some(_v) = self.get("Theta_Mem") {
            cfg.theta_mem = self.require_f64("Theta_Mem")?;
        }
        if let Some(_v) = self.get("Theta_Cpu") {
            cfg.theta_cpu = self.require_f64("Theta_Cpu")?;
        }
        if let Some(_v) = self.get("Bunches_Per_Thread") {
            cfg.bunches_per_thread = self.require_f64("Bunches_Per_Thread")?;
        }

        if cfg.min_timestep > 0.0 && cfg.max_timestep < cfg.min_timestep {
            return Err(NbodyError::Configuration {
                key: "Max_Timestep".to_string(),
                reason: "Max_Timestep is smaller than Min_Timestep".to_string(),
            });
        }

        Ok(cfg)
    }
}
