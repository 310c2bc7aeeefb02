//! CPU kernel backend using Rayon for shared-memory parallelism.

use ndarray::{ArrayView2, ArrayView3};
use rayon::{ThreadPool, ThreadPoolBuilder};
use stencil_core::kernel::apply_stencil;

use crate::backend::{BackendType, ComputeError, DeviceInfo, StencilBackend};

/// CPU backend that splits output rows across Rayon threads.
pub struct CpuBackend {
    pool: Option<ThreadPool>,
    num_threads: usize,
}

impl CpuBackend {
    /// Create a CPU backend on the global Rayon pool.
    pub fn new() -> Self {
        Self {
            pool: None,
            num_threads: rayon::current_num_threads(),
        }
    }

    /// Create a CPU backend with a dedicated pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("stencil-cpu-{}", i))
            .build()
            .map_err(|e| ComputeError::ThreadPool(e.to_string()))?;
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(pool),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StencilBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn apply(
        &self,
        input: ArrayView3<'_, f32>,
        filter: ArrayView2<'_, f32>,
        output: &mut [f32],
    ) -> Result<(), ComputeError> {
        if filter.nrows() != filter.ncols() {
            return Err(ComputeError::NonSquareFilter {
                rows: filter.nrows(),
                cols: filter.ncols(),
            });
        }
        if output.len() != input.len() {
            return Err(ComputeError::OutputMismatch {
                input: input.len(),
                output: output.len(),
            });
        }

        match &self.pool {
            Some(pool) => pool.install(|| apply_stencil(input, filter, output)),
            None => apply_stencil(input, filter, output),
        }
        Ok(())
    }
}
