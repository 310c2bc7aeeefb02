//! # Stencil Core
//!
//! The numerical backbone of the distributed box-stencil. This crate holds
//! everything that is pure computation: no files, no communication.
//!
//! ## Modules
//!
//! - [`types`]: Flat buffers with borrowed strided views (`Dims`, `Filter`, `GlobalBatch`).
//! - [`partition`]: Load-balanced split of the batch dimension across workers.
//! - [`kernel`]: The copy-boundary `k × k` stencil, parallel over `(batch, row)`.

pub mod kernel;
pub mod partition;
pub mod types;

pub use kernel::{apply_stencil, BoundaryWidths};
pub use partition::{PartitionError, PartitionPlan, WorkerShare};
pub use types::{product, Dims, Filter, GlobalBatch, ShapeError};
