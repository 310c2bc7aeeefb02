//! Communicator and kernel backend traits.
//!
//! The [`Communicator`] trait abstracts over the transport that connects the
//! workers of a run (in-process threads, MPI processes) so that the
//! coordinator in [`crate::coordinator`] stays transport-agnostic. The
//! [`StencilBackend`] trait does the same for the local kernel.
//!
//! All collectives are rooted at [`ROOT`], the rank that plays the
//! coordinator role.

use ndarray::{ArrayView2, ArrayView3};
use stencil_core::{PartitionPlan, ShapeError};
use thiserror::Error;

/// Rank of the coordinator in every collective.
pub const ROOT: usize = 0;

/// Exit code used when a run is aborted.
pub const ABORT_CODE: i32 = 1;

/// Errors raised by a communicator.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("Run aborted by rank {rank} (code {code})")]
    Aborted { rank: usize, code: i32 },

    #[error("Lost connection to rank {rank}")]
    Disconnected { rank: usize },

    #[error("All workers disconnected before the collective completed")]
    WorkersGone,

    #[error("Received {actual} values, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Element count {0} does not fit the transport's count type")]
    CountOverflow(usize),

    #[error("A worker group needs at least one member")]
    EmptyGroup,
}

/// Collective operations between the workers of a run.
///
/// Every call blocks until this worker's part of the exchange is complete.
/// Calls must be issued in the same order on every rank. Methods suffixed
/// `_root` may only be called on [`ROOT`]; their counterparts only on the
/// other ranks.
pub trait Communicator {
    /// This worker's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Block until every worker has reached the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Copy `buf` from the root into `buf` on every other rank.
    fn broadcast_u64(&self, buf: &mut [u64]) -> Result<(), CommError>;

    /// Copy `buf` from the root into `buf` on every other rank.
    fn broadcast_f32(&self, buf: &mut [f32]) -> Result<(), CommError>;

    /// Send each rank its share of `send` according to `plan`. The root's own
    /// share is copied into `recv`.
    fn scatter_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError>;

    /// Receive this rank's share of a scatter into `recv`.
    fn scatter_recv(&self, recv: &mut [f32]) -> Result<(), CommError>;

    /// Collect every rank's share into `recv` at the offsets of `plan`. The
    /// root contributes `send`.
    fn gather_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError>;

    /// Contribute `send` to a gather.
    fn gather_send(&self, send: &[f32]) -> Result<(), CommError>;

    /// Terminate the run on every rank. Workers blocked in a collective are
    /// released with [`CommError::Aborted`] (or, for process transports, the
    /// whole job exits with `code`).
    fn abort(&self, code: i32);

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}

/// Errors originating from kernel backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Filter must be square, got {rows}x{cols}")]
    NonSquareFilter { rows: usize, cols: usize },

    #[error("Output holds {output} values but the input has {input}")]
    OutputMismatch { input: usize, output: usize },

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Describes a kernel backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of kernel backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
}

/// Executes the local stencil on one worker's batches.
pub trait StencilBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Apply `filter` to every matrix of `input`, writing the flat result into
    /// `output`, which must have the same number of elements.
    fn apply(
        &self,
        input: ArrayView3<'_, f32>,
        filter: ArrayView2<'_, f32>,
        output: &mut [f32],
    ) -> Result<(), ComputeError>;
}
