//! End-to-end runs of the coordinator over in-process worker groups.

use std::fs;
use std::path::PathBuf;
use std::thread;

use approx::assert_abs_diff_eq;
use ndarray::{ArrayView2, ArrayView3};
use stencil_compute::{
    execute, local_group, run_job, run_serial, BackendType, CommError, Communicator,
    ComputeError, CpuBackend, DeviceInfo, GlobalOutput, Inputs, Job, Outcome, Role, RunError,
    StencilBackend, ABORT_CODE,
};
use stencil_core::{Dims, Filter, GlobalBatch};
use stencil_io::{load_batch, FileError, TextFormat};
use tempfile::TempDir;

fn ramp_batch(batch: usize, rows: usize, cols: usize) -> GlobalBatch {
    let dims = Dims::new(batch, rows, cols);
    let data = (0..batch * rows * cols)
        .map(|v| ((v * 37) % 101) as f32 * 0.25 - 7.0)
        .collect();
    GlobalBatch::new(dims, data).unwrap()
}

fn weighted_filter(k: usize) -> Filter {
    let weights = (0..k * k).map(|v| (v as f32 + 1.0) / 10.0).collect();
    Filter::new(k, weights).unwrap()
}

/// Run a whole group on scoped threads and return each member's result,
/// indexed by rank.
fn run_group(inputs: Inputs, workers: usize) -> Vec<Result<Outcome, RunError>> {
    let group = local_group(workers).unwrap();
    let mut inputs = Some(inputs);
    thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let role = if comm.rank() == 0 {
                    Role::Coordinator(inputs.take().unwrap())
                } else {
                    Role::Worker
                };
                s.spawn(move || {
                    let backend = CpuBackend::with_threads(2).unwrap();
                    execute(&comm, role, &backend)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn coordinator_output(results: Vec<Result<Outcome, RunError>>) -> GlobalOutput {
    let mut output = None;
    for result in results {
        match result.unwrap() {
            Outcome::Coordinator { output: out, .. } => output = Some(out),
            Outcome::Worker { .. } => {}
        }
    }
    output.unwrap()
}

fn inputs(batch: GlobalBatch, filter: Filter) -> Inputs {
    Inputs { batch, filter }
}

#[test]
fn test_result_independent_of_worker_count() {
    let batch = ramp_batch(7, 9, 8);
    let filter = weighted_filter(3);

    let single = coordinator_output(run_group(inputs(batch.clone(), filter.clone()), 1));
    let many = coordinator_output(run_group(inputs(batch.clone(), filter.clone()), 4));
    assert_eq!(single.as_slice(), many.as_slice());

    let serial = run_serial(&inputs(batch, filter), &CpuBackend::new()).unwrap();
    assert_eq!(serial.value.as_slice(), many.as_slice());
}

#[test]
fn test_interior_values_through_group() {
    let dims = Dims::new(2, 4, 4);
    let data: Vec<f32> = (0..32).map(|v| (v % 16) as f32).collect();
    let batch = GlobalBatch::new(dims, data).unwrap();
    let filter = Filter::new(3, vec![1.0; 9]).unwrap();

    let output = coordinator_output(run_group(inputs(batch, filter), 2));
    let view = output.view().unwrap();
    for b in 0..2 {
        assert_abs_diff_eq!(view[[b, 1, 1]], 45.0);
        assert_abs_diff_eq!(view[[b, 1, 2]], 54.0);
        assert_abs_diff_eq!(view[[b, 2, 1]], 81.0);
        assert_abs_diff_eq!(view[[b, 2, 2]], 90.0);
        assert_abs_diff_eq!(view[[b, 0, 3]], 3.0);
        assert_abs_diff_eq!(view[[b, 3, 0]], 12.0);
    }
}

#[test]
fn test_identity_filter_reproduces_input() {
    let batch = ramp_batch(5, 6, 7);
    let expected = batch.as_slice().to_vec();
    let output = coordinator_output(run_group(inputs(batch, Filter::identity(5).unwrap()), 3));
    assert_eq!(output.as_slice(), expected.as_slice());
}

#[test]
fn test_more_workers_than_batches() {
    let batch = ramp_batch(2, 5, 5);
    let filter = weighted_filter(3);
    let expected = run_serial(&inputs(batch.clone(), filter.clone()), &CpuBackend::new())
        .unwrap()
        .value;

    let results = run_group(inputs(batch, filter), 4);
    let mut shares = Vec::new();
    let mut output = None;
    for result in results {
        match result.unwrap() {
            Outcome::Coordinator { output: out, .. } => {
                shares.push(1);
                output = Some(out);
            }
            Outcome::Worker { batches, .. } => shares.push(batches),
        }
    }
    assert_eq!(shares, vec![1, 1, 0, 0]);
    assert_eq!(output.unwrap(), expected);
}

#[test]
fn test_missing_input_aborts_every_worker() {
    let dir = TempDir::new().unwrap();
    let filter_path = dir.path().join("filter.txt");
    fs::write(&filter_path, "3\n0 0 0 0 1 0 0 0 0\n").unwrap();
    let job = Job {
        input: dir.path().join("missing.txt"),
        filter: filter_path,
        format: TextFormat::default(),
    };

    // The workers race the root's exit, so repeat to cover both orders.
    for _ in 0..100 {
        let group = local_group(3).unwrap();
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|comm| {
                    let job = &job;
                    s.spawn(move || run_job(&comm, job, &CpuBackend::new()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(matches!(
            &results[0],
            Err(RunError::File(FileError::FileOpen { .. }))
        ));
        for result in &results[1..] {
            assert!(matches!(
                result,
                Err(RunError::Comm(CommError::Aborted { rank: 0, code: ABORT_CODE }))
            ));
        }
    }
}

/// Backend whose kernel call always fails.
struct BrokenBackend;

impl StencilBackend for BrokenBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "broken".into(),
            backend_type: BackendType::Cpu,
            compute_units: None,
        }
    }

    fn apply(
        &self,
        _input: ArrayView3<'_, f32>,
        _filter: ArrayView2<'_, f32>,
        _output: &mut [f32],
    ) -> Result<(), ComputeError> {
        Err(ComputeError::ThreadPool("kernel unavailable".into()))
    }
}

#[test]
fn test_worker_failure_aborts_the_group() {
    const FAILING_RANK: usize = 2;

    for _ in 0..100 {
        let group = local_group(3).unwrap();
        let mut pending = Some(inputs(ramp_batch(3, 4, 4), weighted_filter(3)));
        let results: Vec<Result<Outcome, RunError>> = thread::scope(|s| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|comm| {
                    let role = if comm.rank() == 0 {
                        Role::Coordinator(pending.take().unwrap())
                    } else {
                        Role::Worker
                    };
                    s.spawn(move || {
                        if comm.rank() == FAILING_RANK {
                            execute(&comm, role, &BrokenBackend)
                        } else {
                            execute(&comm, role, &CpuBackend::new())
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (rank, result) in results.iter().enumerate() {
            if rank == FAILING_RANK {
                assert!(matches!(
                    result,
                    Err(RunError::Compute(ComputeError::ThreadPool(_)))
                ));
            } else {
                assert!(matches!(
                    result,
                    Err(RunError::Comm(CommError::Aborted {
                        rank: FAILING_RANK,
                        code: ABORT_CODE
                    }))
                ));
            }
        }
    }
}

#[test]
fn test_job_round_trip_through_files() {
    let dir = TempDir::new().unwrap();
    let input_path = dir.path().join("input.txt");
    let filter_path = dir.path().join("filter.txt");
    let output_path: PathBuf = dir.path().join("output.txt");
    fs::write(&input_path, "1 3 3 \n1 2 3\n4 5 6\n7 8 9\n").unwrap();
    fs::write(&filter_path, "3 3\n1 1 1 1 1 1 1 1 1\n").unwrap();
    let job = Job {
        input: input_path,
        filter: filter_path,
        format: TextFormat::default(),
    };

    let group = local_group(2).unwrap();
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let job = &job;
                s.spawn(move || run_job(&comm, job, &CpuBackend::new()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let output = coordinator_output(results);
    output.persist(&output_path).unwrap();

    let written = load_batch(&output_path).unwrap();
    assert_eq!(written.dims(), Dims::new(1, 3, 3));
    let view = written.view().unwrap();
    assert_abs_diff_eq!(view[[0, 1, 1]], 45.0);
    assert_abs_diff_eq!(view[[0, 0, 0]], 1.0);
    assert_abs_diff_eq!(view[[0, 2, 2]], 9.0);
}
