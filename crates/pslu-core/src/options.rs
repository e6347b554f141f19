//! Factorization options.
//!
//! [`FactorOptions`] carries every tunable of a factorization call. Options
//! serialize to TOML and support partial files where unspecified values use
//! the defaults below.
//!
//! | Option | Default | Meaning |
//! |--------|---------|---------|
//! | `panel_size` | 8 | columns per panel unit |
//! | `relax` | 4 | widest leaf subtree factored as a relaxed supernode |
//! | `max_supernode` | 64 | widest supernode the split policy allows |
//! | `diag_pivot_thresh` | 1.0 | threshold `u`: diagonal kept if `|a_jj| >= u * max` |
//! | `pivot_floor` | 0.0 | pivots with magnitude at or below this fail |
//! | `fill_ratio` | 4 | initial buffer size as a multiple of `nnz(A)` |
//! | `expansion_factor` | 1.5 | multiplicative growth of factor buffers |
//! | `domain_ratio` | 4.0 | domains target `n / (threads * ratio)` columns |
//! | `prune_backoff_limit` | 64 | backoff steps before a prune is deferred |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PsluError, PsluResult};

/// How much of a previous factorization is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FactorMode {
    /// Compute ordering, elimination tree and pivots from scratch.
    #[default]
    Fresh,
    /// Reuse the column order and elimination tree.
    SamePattern,
    /// Also prefer the previous pivot rows when they pass the threshold test.
    SamePatternSameRowPerm,
}

impl FactorMode {
    pub fn needs_prior(self) -> bool {
        !matches!(self, FactorMode::Fresh)
    }
}

/// Options for one factorization call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorOptions {
    pub mode: FactorMode,

    /// Partial pivoting threshold in `[0, 1]`. 1.0 is classic partial
    /// pivoting, 0.0 always keeps a nonzero diagonal.
    pub diag_pivot_thresh: f64,

    /// Pivots whose magnitude is at or below this value are singular.
    pub pivot_floor: f64,

    pub relax: usize,

    pub panel_size: usize,

    pub max_supernode: usize,

    /// Build the elimination tree of `A + A'` and pivot on the diagonal only.
    pub symmetric_mode: bool,

    pub fill_ratio: usize,

    pub expansion_factor: f64,

    /// Upper bound on bytes held by factor buffers (`None` = unbounded).
    pub memory_limit_bytes: Option<usize>,

    pub domain_ratio: f64,

    pub prune_backoff_limit: u32,
}

impl Default for FactorOptions {
    fn default() -> Self {
        Self {
            mode: FactorMode::Fresh,
            diag_pivot_thresh: 1.0,
            pivot_floor: 0.0,
            relax: 4,
            panel_size: 8,
            max_supernode: 64,
            symmetric_mode: false,
            fill_ratio: 4,
            expansion_factor: 1.5,
            memory_limit_bytes: None,
            domain_ratio: 4.0,
            prune_backoff_limit: 64,
        }
    }
}

impl FactorOptions {
    /// Check option ranges. Called by the driver before any work starts.
    pub fn validate(&self) -> PsluResult<()> {
        if self.panel_size == 0 {
            return Err(PsluError::Config("panel_size must be at least 1".into()));
        }
        if self.relax == 0 {
            return Err(PsluError::Config("relax must be at least 1".into()));
        }
        if self.max_supernode == 0 {
            return Err(PsluError::Config("max_supernode must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.diag_pivot_thresh) {
            return Err(PsluError::Config(format!(
                "diag_pivot_thresh must lie in [0, 1], got {}",
                self.diag_pivot_thresh
            )));
        }
        if !self.pivot_floor.is_finite() || self.pivot_floor < 0.0 {
            return Err(PsluError::Config(format!(
                "pivot_floor must be a finite non-negative number, got {}",
                self.pivot_floor
            )));
        }
        if self.fill_ratio == 0 {
            return Err(PsluError::Config("fill_ratio must be at least 1".into()));
        }
        if !self.expansion_factor.is_finite() || self.expansion_factor <= 1.0 {
            return Err(PsluError::Config(format!(
                "expansion_factor must be greater than 1, got {}",
                self.expansion_factor
            )));
        }
        if !self.domain_ratio.is_finite() || self.domain_ratio <= 0.0 {
            return Err(PsluError::Config(format!(
                "domain_ratio must be positive, got {}",
                self.domain_ratio
            )));
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: FactorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_panel_size(mut self, panel_size: usize) -> Self {
        self.panel_size = panel_size;
        self
    }

    pub fn with_relax(mut self, relax: usize) -> Self {
        self.relax = relax;
        self
    }

    pub fn with_max_supernode(mut self, max_supernode: usize) -> Self {
        self.max_supernode = max_supernode;
        self
    }

    pub fn with_pivot_threshold(mut self, thresh: f64) -> Self {
        self.diag_pivot_thresh = thresh;
        self
    }

    pub fn with_pivot_floor(mut self, floor: f64) -> Self {
        self.pivot_floor = floor;
        self
    }

    pub fn with_symmetric_mode(mut self, symmetric: bool) -> Self {
        self.symmetric_mode = symmetric;
        self
    }

    pub fn with_fill_ratio(mut self, fill_ratio: usize) -> Self {
        self.fill_ratio = fill_ratio;
        self
    }

    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Load options from a TOML file. Missing keys keep their defaults.
    pub fn load_from(path: impl AsRef<Path>) -> PsluResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: Self = toml::from_str(&contents)?;
        Ok(options)
    }

    /// Save options as pretty TOML.
    pub fn save_to(&self, path: impl AsRef<Path>) -> PsluResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
