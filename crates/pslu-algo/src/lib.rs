//! # pslu-algo: parallel supernodal sparse LU
//!
//! A left-looking supernodal LU factorization `P·A·Q = L·U` executed by a
//! pool of cooperating worker threads. The crate is mostly about scheduling
//! and dependency management; arithmetic is a pluggable collaborator.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`scheduler`], [`queue`] | cut the elimination tree into units, hand them out |
//! | [`graph`], [`dfs`] | symmetric pruning graph and dependency search |
//! | [`memory`], [`store`] | growable factor buffers addressed by regions |
//! | [`sync`] | column status board, busy markers, error ledger, named locks |
//! | [`worker`] | per-thread execution loop |
//! | [`factor`] | driver: symbolic setup, thread pool, error reconciliation |
//!
//! Collaborators are traits with default implementations:
//!
//! - [`NumericKernel`] ([`SupernodalKernel`]): block updates and pivot choice
//! - [`ColumnOrdering`] ([`NaturalOrdering`], [`ExplicitOrdering`]): column
//!   permutation and domain partition
//! - [`SupernodeSplitPolicy`] ([`FundamentalSplit`]): supernode boundaries
//!
//! ## Determinism
//!
//! Updates are applied in ascending column order from sorted dependency
//! sets, and pivot ties go to the lowest row, so one thread and many threads
//! produce bit-identical factors.
//!
//! ## Example
//!
//! ```
//! use pslu_algo::Factorizer;
//! use pslu_core::{gallery, FactorMode, FactorOptions};
//!
//! let a = gallery::random_unsymmetric(40, 3, 1).unwrap();
//! let lu = Factorizer::default().with_threads(4).factor_columns(&a).unwrap();
//! assert!(lu.residual(&a).unwrap() < 1e-10);
//!
//! // Same pattern, new values: reuse the symbolic work
//! let again = Factorizer::new(FactorOptions::default().with_mode(FactorMode::SamePattern))
//!     .refactor_columns(&a, &lu.prior())
//!     .unwrap();
//! assert_eq!(again.col_order(), lu.col_order());
//! ```

pub mod arena;
pub mod context;
pub mod dfs;
pub mod etree;
pub mod factor;
pub mod factors;
pub mod graph;
pub mod kernel;
pub mod memory;
pub mod ordering;
pub mod queue;
pub mod scheduler;
pub mod split;
pub mod store;
pub mod sync;
pub mod worker;

pub use factor::Factorizer;
pub use factors::{LuFactors, PriorFactorization};
pub use kernel::{Accumulator, NumericFailure, NumericKernel, PivotRequest, SupernodalKernel};
pub use memory::{BufferKind, FactorBuffer, MemoryBudget, Region};
pub use ordering::{ColumnOrdering, ExplicitOrdering, NaturalOrdering};
pub use split::{FundamentalSplit, JoinCandidate, SingleColumn, SupernodeSplitPolicy};
pub use store::FactorStore;
pub use worker::WorkerState;
