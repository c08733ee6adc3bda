//! quire_core - building blocks for incremental document pipelines.
//!
//! This crate holds the pieces of the build that know nothing about documents:
//!
//! - [`parallel`]: split an ordered work list into contiguous chunks, run each
//!   chunk on an isolated worker and fold the results back one at a time on
//!   the calling thread
//! - [`tasks`]: a sequential queue for finish-up work that must be joined
//!   before a build may report success
//! - [`fingerprint`]: blake3 fingerprints for configuration and artifacts
//!
//! # Features
//!
//! - `parallel` - enable [`parallel::ParallelTasks`] (brings in `rayon`)
//! - `serde` - derive `Serialize`/`Deserialize` for [`Fingerprint`]

pub mod fingerprint;
pub mod parallel;
pub mod tasks;

pub use fingerprint::Fingerprint;
pub use parallel::{TaskError, make_chunks};
#[cfg(feature = "parallel")]
pub use parallel::ParallelTasks;
pub use tasks::SerialTasks;

/// Whether this build of the crate can run chunks on a worker pool.
///
/// Callers fall back to serial execution when this is `false`.
#[inline]
pub const fn parallel_available() -> bool {
    cfg!(feature = "parallel")
}
