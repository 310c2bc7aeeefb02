//! Distribution coordinator.
//!
//! Every worker of a run executes the same sequence, with the root playing
//! the [`Role::Coordinator`] and every other rank a [`Role::Worker`]:
//!
//! 1. **Role assignment.** The root loads and validates the input batch and
//!    filter. A failure aborts the whole group before any collective is
//!    issued, so no worker waits on a broadcast that never comes.
//! 2. **Timed phase**, bracketed by barriers:
//!    - broadcast `(b, m, n, k)`, then the `k × k` filter;
//!    - build the [`PartitionPlan`] from `b` and the group size;
//!    - scatter each worker's contiguous input slice;
//!    - run the local kernel;
//!    - gather every output slice back at its original offset.
//! 3. The root returns the assembled [`GlobalOutput`] for the caller to
//!    persist.
//!
//! Any error after role assignment aborts the group as well, including an
//! allocation failure on a worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use ndarray::ArrayView3;
use stencil_core::types::batch_view;
use stencil_core::{
    Dims, Filter, GlobalBatch, PartitionError, PartitionPlan, ShapeError, WorkerShare,
};
use stencil_io::{write_output, FileError, TextFormat};
use thiserror::Error;

use crate::backend::{CommError, Communicator, ComputeError, StencilBackend, ABORT_CODE, ROOT};
use crate::timing::{time_collective, time_local, Timed};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("Rank {rank} cannot allocate {elements} values")]
    Allocation { rank: usize, elements: usize },

    #[error("Broadcast parameters {0:?} do not describe a valid run")]
    InvalidParams([u64; 4]),
}

impl RunError {
    /// Whether this error is the echo of an abort issued elsewhere.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Comm(CommError::Aborted { .. }))
    }
}

/// Input and filter locations for a run.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub filter: PathBuf,
    pub format: TextFormat,
}

/// Validated inputs, owned by the coordinator.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub batch: GlobalBatch,
    pub filter: Filter,
}

impl Inputs {
    /// Load and validate the input batch and filter of `job`.
    pub fn load(job: &Job) -> Result<Self, FileError> {
        let batch = job.format.load_batch(&job.input)?;
        let filter = job.format.load_filter(&job.filter)?;
        Ok(Self { batch, filter })
    }
}

/// The part a worker plays in a run.
#[derive(Debug)]
pub enum Role {
    /// Owns the global input and assembles the global output.
    Coordinator(Inputs),
    /// Receives its share, computes it, and sends it back.
    Worker,
}

impl Role {
    /// Give the root the coordinator role by running `load`; every other
    /// rank becomes a worker. If `load` fails the group is aborted.
    pub fn assign<C: Communicator + ?Sized>(
        comm: &C,
        load: impl FnOnce() -> Result<Inputs, FileError>,
    ) -> Result<Self, RunError> {
        if !comm.is_root() {
            return Ok(Self::Worker);
        }
        match load() {
            Ok(inputs) => Ok(Self::Coordinator(inputs)),
            Err(e) => {
                error!("{}", e);
                comm.abort(ABORT_CODE);
                Err(e.into())
            }
        }
    }
}

/// The assembled `b × m × n` result.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOutput {
    dims: Dims,
    data: Vec<f32>,
}

impl GlobalOutput {
    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn view(&self) -> Result<ArrayView3<'_, f32>, ShapeError> {
        batch_view(self.dims, &self.data)
    }

    /// Write the output file (`"b m n "` header, values to 7 decimals).
    pub fn persist(&self, path: &Path) -> Result<(), FileError> {
        write_output(path, &self.data, &self.dims.as_array())
    }
}

/// What a worker is left with after a successful run.
#[derive(Debug)]
pub enum Outcome {
    Coordinator {
        output: GlobalOutput,
        elapsed: Duration,
    },
    Worker {
        rank: usize,
        batches: usize,
    },
}

/// Assign roles for `job` and execute the run on this worker.
pub fn run_job<C: Communicator + ?Sized>(
    comm: &C,
    job: &Job,
    backend: &dyn StencilBackend,
) -> Result<Outcome, RunError> {
    let role = Role::assign(comm, || Inputs::load(job))?;
    execute(comm, role, backend)
}

/// Execute one worker's part of a run.
///
/// Must be called on every rank of `comm`, with exactly one
/// [`Role::Coordinator`] at the root.
pub fn execute<C: Communicator + ?Sized>(
    comm: &C,
    role: Role,
    backend: &dyn StencilBackend,
) -> Result<Outcome, RunError> {
    let result = match role {
        Role::Coordinator(inputs) => coordinate(comm, inputs, backend),
        Role::Worker => work(comm, backend),
    };
    if let Err(e) = &result {
        if !e.is_abort() {
            error!("Rank {} failed: {}", comm.rank(), e);
            comm.abort(ABORT_CODE);
        }
    }
    result
}

fn coordinate<C: Communicator + ?Sized>(
    comm: &C,
    inputs: Inputs,
    backend: &dyn StencilBackend,
) -> Result<Outcome, RunError> {
    let Inputs { batch, filter } = inputs;
    let dims = batch.dims();
    let rank = comm.rank();
    info!(
        "Distributing {} batch with a {}x{} filter across {} workers ({})",
        dims,
        filter.size(),
        filter.size(),
        comm.size(),
        backend.device_info().name
    );

    let timed = time_collective(comm, || -> Result<Vec<f32>, RunError> {
        let mut params = encode_params(dims, filter.size());
        comm.broadcast_u64(&mut params)?;
        let mut weights = filter.as_slice().to_vec();
        comm.broadcast_f32(&mut weights)?;

        let plan = plan_for(comm, dims)?;
        let share = own_share(&plan, rank)?;
        let mut local_in = allocate(rank, share.element_count)?;
        comm.scatter_root(batch.as_slice(), &plan, &mut local_in)?;
        debug!("Rank {} scattered {} batches", rank, dims.batch);

        let local_out = compute_local(
            rank,
            backend,
            dims.with_batch(share.batch_count),
            &filter,
            &local_in,
        )?;
        drop(local_in);

        let mut output = allocate(rank, plan.total_elements())?;
        comm.gather_root(&local_out, &plan, &mut output)?;
        debug!("Rank {} gathered {} values", rank, output.len());
        Ok(output)
    })?;

    info!("Distributed phase took {:.6} s", timed.elapsed.as_secs_f64());
    Ok(Outcome::Coordinator {
        output: GlobalOutput {
            dims,
            data: timed.value,
        },
        elapsed: timed.elapsed,
    })
}

fn work<C: Communicator + ?Sized>(
    comm: &C,
    backend: &dyn StencilBackend,
) -> Result<Outcome, RunError> {
    let rank = comm.rank();
    let timed = time_collective(comm, || -> Result<usize, RunError> {
        let mut params = [0u64; 4];
        comm.broadcast_u64(&mut params)?;
        let (dims, k) = decode_params(params)?;
        let mut weights = allocate(rank, k * k)?;
        comm.broadcast_f32(&mut weights)?;
        let filter = Filter::new(k, weights)?;

        let plan = plan_for(comm, dims)?;
        let share = own_share(&plan, rank)?;
        let mut local_in = allocate(rank, share.element_count)?;
        comm.scatter_recv(&mut local_in)?;

        let local_out = compute_local(
            rank,
            backend,
            dims.with_batch(share.batch_count),
            &filter,
            &local_in,
        )?;
        comm.gather_send(&local_out)?;
        Ok(share.batch_count)
    })?;

    Ok(Outcome::Worker {
        rank,
        batches: timed.value,
    })
}

/// Apply the kernel to the whole batch in this process, timing only the
/// kernel call. No collectives are involved.
pub fn run_serial(
    inputs: &Inputs,
    backend: &dyn StencilBackend,
) -> Result<Timed<GlobalOutput>, RunError> {
    let dims = inputs.batch.dims();
    let mut data = allocate(ROOT, inputs.batch.as_slice().len())?;
    let timed = time_local(|| -> Result<(), RunError> {
        backend.apply(inputs.batch.view()?, inputs.filter.view()?, &mut data)?;
        Ok(())
    })?;
    Ok(Timed {
        value: GlobalOutput { dims, data },
        elapsed: timed.elapsed,
    })
}

fn encode_params(dims: Dims, k: usize) -> [u64; 4] {
    [dims.batch as u64, dims.rows as u64, dims.cols as u64, k as u64]
}

fn decode_params(params: [u64; 4]) -> Result<(Dims, usize), RunError> {
    let invalid = || RunError::InvalidParams(params);
    let mut values = [0usize; 4];
    for (value, &raw) in values.iter_mut().zip(params.iter()) {
        *value = usize::try_from(raw).map_err(|_| invalid())?;
    }
    let [batch, rows, cols, k] = values;
    if rows == 0 || cols == 0 || k == 0 || k.checked_mul(k).is_none() {
        return Err(invalid());
    }
    Ok((Dims::new(batch, rows, cols), k))
}

fn plan_for<C: Communicator + ?Sized>(comm: &C, dims: Dims) -> Result<PartitionPlan, RunError> {
    let plane_len = dims
        .plane_len()
        .ok_or_else(|| ShapeError::Overflow(dims.as_array().to_vec()))?;
    Ok(PartitionPlan::new(dims.batch, comm.size(), plane_len)?)
}

fn own_share(plan: &PartitionPlan, rank: usize) -> Result<WorkerShare, RunError> {
    plan.share(rank).copied().ok_or_else(|| {
        CommError::Protocol(format!("rank {} has no share in the partition plan", rank)).into()
    })
}

/// Zeroed buffer of `elements` values, failing instead of aborting the
/// process when memory is exhausted.
fn allocate(rank: usize, elements: usize) -> Result<Vec<f32>, RunError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| RunError::Allocation { rank, elements })?;
    buf.resize(elements, 0.0);
    Ok(buf)
}

fn compute_local(
    rank: usize,
    backend: &dyn StencilBackend,
    dims: Dims,
    filter: &Filter,
    input: &[f32],
) -> Result<Vec<f32>, RunError> {
    let mut output = allocate(rank, input.len())?;
    if !input.is_empty() {
        backend.apply(batch_view(dims, input)?, filter.view()?, &mut output)?;
    }
    debug!("Rank {} computed {} batches", rank, dims.batch);
    Ok(output)
}
