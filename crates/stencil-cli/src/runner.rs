//! Run drivers: ties together configuration, loading, the worker group and
//! output persistence.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use stencil_compute::{
    run_job, run_serial, CpuBackend, GlobalOutput, Inputs, Job, Outcome, TimingLine,
};

use crate::config::RunConfig;

/// Build the per-worker kernel backend.
fn make_backend(config: &RunConfig) -> Result<CpuBackend> {
    let backend = match config.threads_per_worker {
        Some(threads) => CpuBackend::with_threads(threads)?,
        None => CpuBackend::new(),
    };
    Ok(backend)
}

fn job_for(config: &RunConfig, input: &Path, filter: &Path) -> Job {
    Job {
        input: input.to_path_buf(),
        filter: filter.to_path_buf(),
        format: config.text_format(),
    }
}

/// Report the timing line on stdout, then write the coordinator's output.
fn finish(config: &RunConfig, output: &GlobalOutput, elapsed: Duration, path: &Path) -> Result<()> {
    report_and_persist(&mut std::io::stdout().lock(), config, output, elapsed, path)
}

fn report_and_persist(
    out: &mut impl Write,
    config: &RunConfig,
    output: &GlobalOutput,
    elapsed: Duration,
    path: &Path,
) -> Result<()> {
    let line = TimingLine {
        label: &config.timing_label,
        elapsed,
    };
    writeln!(out, "{}", line)?;
    out.flush()?;
    output.persist(path)?;
    info!("Wrote {} output to {}", output.dims(), path.display());
    Ok(())
}

/// Run the distributed stencil over an in-process group of
/// `config.workers` workers, one thread each.
#[cfg(not(feature = "mpi"))]
pub fn run_distributed(config: &RunConfig, input: &Path, filter: &Path, output: &Path) -> Result<()> {
    use std::thread;

    use anyhow::anyhow;
    use log::error;
    use stencil_compute::{local_group, CommError, RunError, StencilBackend};

    let job = job_for(config, input, filter);
    // Backends are built up front: a worker that failed here would never
    // join the first collective.
    let backends = (0..config.workers)
        .map(|_| make_backend(config))
        .collect::<Result<Vec<_>>>()?;
    let group = local_group(config.workers)?;
    if let Some(backend) = backends.first() {
        info!(
            "Starting {} in-process workers on {}",
            config.workers,
            backend.device_info().name
        );
    }

    let results: Vec<Result<Outcome, RunError>> = thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .zip(backends)
            .map(|(comm, backend)| {
                let job = &job;
                s.spawn(move || run_job(&comm, job, &backend))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(CommError::Protocol("worker thread panicked".into()).into())
                })
            })
            .collect()
    });

    // Rank order: the coordinator's result comes first.
    let mut results = results.into_iter();
    let root = results
        .next()
        .ok_or_else(|| anyhow!("Worker group is empty"))?;
    for result in results {
        match result {
            Ok(Outcome::Worker { rank, batches }) => {
                info!("Worker {} processed {} batches", rank, batches)
            }
            Ok(Outcome::Coordinator { .. }) => warn!("Unexpected coordinator outside rank 0"),
            Err(e) if e.is_abort() => {}
            Err(e) => error!("{}", e),
        }
    }

    match root.context("Distributed run failed")? {
        Outcome::Coordinator {
            output: global,
            elapsed,
        } => finish(config, &global, elapsed, output),
        Outcome::Worker { .. } => Err(anyhow!("Rank 0 finished without coordinating")),
    }
}

/// Run the distributed stencil as one rank of an MPI job. The group size is
/// the MPI world size.
#[cfg(feature = "mpi")]
pub fn run_distributed(config: &RunConfig, input: &Path, filter: &Path, output: &Path) -> Result<()> {
    use log::error;
    use stencil_compute::{Communicator, MpiComm, ABORT_CODE};

    let comm = MpiComm::initialize()?;
    if comm.is_root() && config.workers > 1 {
        warn!("Ignoring configured worker count; MPI world size is {}", comm.size());
    }
    let backend = match make_backend(config) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Rank {}: {}", comm.rank(), e);
            comm.abort(ABORT_CODE);
            return Err(e);
        }
    };

    let job = job_for(config, input, filter);
    match run_job(&comm, &job, &backend).context("Distributed run failed")? {
        Outcome::Coordinator { output: global, elapsed } => finish(config, &global, elapsed, output),
        Outcome::Worker { rank, batches } => {
            info!("Worker {} processed {} batches", rank, batches);
            Ok(())
        }
    }
}

/// Apply the stencil in this process only, as a single-worker baseline.
pub fn run_serial_job(config: &RunConfig, input: &Path, filter: &Path, output: &Path) -> Result<()> {
    let job = job_for(config, input, filter);
    let inputs = Inputs::load(&job)?;
    let backend = make_backend(config)?;
    let timed = run_serial(&inputs, &backend).context("Serial run failed")?;
    finish(config, &timed.value, timed.elapsed, output)
}

/// Load and check both files without computing anything.
pub fn validate(config: &RunConfig, input: &Path, filter: &Path) -> Result<()> {
    let inputs = Inputs::load(&job_for(config, input, filter))?;
    let k = inputs.filter.size();
    println!("Input:  {} ({})", inputs.batch.dims(), input.display());
    println!("Filter: {}x{} ({})", k, k, filter.display());
    Ok(())
}
