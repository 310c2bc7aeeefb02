//! MPI communicator for multi-process runs.
//!
//! Gated behind the `mpi` feature. Each MPI rank is one worker; rank 0 is
//! the coordinator. The collectives map directly onto MPI: broadcasts onto
//! `MPI_Bcast`, scatter/gather onto `MPI_Scatterv`/`MPI_Gatherv` with counts
//! and displacements taken from the partition plan, and abort onto
//! `MPI_Abort`, which terminates every process of the job.
//!
//! Launch with `mpirun -np <P> stencil-cli run <input> <filter> <output>`.

use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;
use stencil_core::PartitionPlan;

use crate::backend::{CommError, Communicator as StencilCommunicator, ROOT};

/// The MPI world communicator.
pub struct MpiComm {
    world: SimpleCommunicator,
    // Finalises MPI on drop, so it must be dropped after `world`.
    _universe: Universe,
}

impl MpiComm {
    /// Initialise MPI and wrap the world communicator.
    pub fn initialize() -> Result<Self, CommError> {
        let universe = mpi::initialize()
            .ok_or_else(|| CommError::Protocol("MPI has already been initialised".into()))?;
        let world = universe.world();
        Ok(Self {
            world,
            _universe: universe,
        })
    }

    fn root(&self) -> impl Root + '_ {
        self.world.process_at_rank(ROOT as Count)
    }
}

fn to_count(value: usize) -> Result<Count, CommError> {
    Count::try_from(value).map_err(|_| CommError::CountOverflow(value))
}

/// Per-rank counts and displacements in MPI's count type.
fn counts_and_displs(plan: &PartitionPlan) -> Result<(Vec<Count>, Vec<Count>), CommError> {
    let counts = plan.counts().map(to_count).collect::<Result<Vec<_>, _>>()?;
    let displs = plan.offsets().map(to_count).collect::<Result<Vec<_>, _>>()?;
    Ok((counts, displs))
}

impl StencilCommunicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn broadcast_u64(&self, buf: &mut [u64]) -> Result<(), CommError> {
        self.root().broadcast_into(buf);
        Ok(())
    }

    fn broadcast_f32(&self, buf: &mut [f32]) -> Result<(), CommError> {
        self.root().broadcast_into(buf);
        Ok(())
    }

    fn scatter_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError> {
        let (counts, displs) = counts_and_displs(plan)?;
        let partition = Partition::new(send, counts, displs);
        self.root().scatter_varcount_into_root(&partition, recv);
        Ok(())
    }

    fn scatter_recv(&self, recv: &mut [f32]) -> Result<(), CommError> {
        self.root().scatter_varcount_into(recv);
        Ok(())
    }

    fn gather_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError> {
        let (counts, displs) = counts_and_displs(plan)?;
        let mut partition = PartitionMut::new(recv, counts, displs);
        self.root().gather_varcount_into_root(send, &mut partition);
        Ok(())
    }

    fn gather_send(&self, send: &[f32]) -> Result<(), CommError> {
        self.root().gather_varcount_into(send);
        Ok(())
    }

    fn abort(&self, code: i32) {
        self.world.abort(code)
    }
}
