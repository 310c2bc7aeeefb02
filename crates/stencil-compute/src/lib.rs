//! # Stencil Compute
//!
//! Execution layer for the distributed box stencil. Two seams keep the
//! coordinator independent of where it runs:
//!
//! - [`StencilBackend`](backend::StencilBackend) applies the kernel to a
//!   worker's local slice of the batch.
//! - [`Communicator`](backend::Communicator) provides the collectives the
//!   coordinator needs: barrier, broadcast, variable-count scatter and
//!   gather, and group abort.
//!
//! ## Available implementations
//!
//! | Implementation | Feature flag | Kind |
//! |----------------|-------------|------|
//! | CPU (Rayon) | `cpu` (default) | Kernel backend |
//! | In-process group (crossbeam) | always | Communicator |
//! | MPI world | `mpi` | Communicator |

pub mod backend;
pub mod coordinator;
pub mod local;
pub mod timing;

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "mpi")]
pub mod distributed;

pub use backend::{
    BackendType, CommError, Communicator, ComputeError, DeviceInfo, StencilBackend, ABORT_CODE,
    ROOT,
};
pub use coordinator::{
    execute, run_job, run_serial, GlobalOutput, Inputs, Job, Outcome, Role, RunError,
};
pub use local::{local_group, LocalComm};
pub use timing::{time_collective, Timed, TimingLine, DEFAULT_TIMING_LABEL};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

#[cfg(feature = "mpi")]
pub use distributed::MpiComm;
