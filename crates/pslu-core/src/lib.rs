//! # pslu-core: shared types for parallel sparse LU
//!
//! Everything a caller needs to describe a factorization and read its outcome,
//! independent of the engine that performs it:
//!
//! - [`SparseColumns`]: validated square CSC input built from `sprs`
//! - [`FactorOptions`]: tunables, loadable from partial TOML files
//! - [`FactorReport`]: per-worker statistics and memory usage
//! - [`PsluError`]: every failure mode, with SuperLU-style status codes
//! - [`gallery`]: reproducible test matrices
//!
//! ## Quick Start
//!
//! ```rust
//! use pslu_core::{gallery, FactorOptions};
//!
//! let a = gallery::convection_diffusion_2d(8, 20.0).unwrap();
//! let options = FactorOptions::default().with_panel_size(4);
//! assert!(options.validate().is_ok());
//! assert_eq!(a.n(), 64);
//! ```

pub mod error;
pub mod gallery;
pub mod matrix;
pub mod options;
pub mod report;

pub use error::{ErrorClass, PsluError, PsluResult};
pub use matrix::SparseColumns;
pub use options::{FactorMode, FactorOptions};
pub use report::{BufferUsage, FactorReport, MemoryUsage, WorkerStats};

/// Marker for "no index": an unassigned pivot, a root's parent, an unset region.
pub const EMPTY: usize = usize::MAX;
