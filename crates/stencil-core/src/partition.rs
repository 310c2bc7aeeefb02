//! Load-balanced split of the batch dimension across workers.
//!
//! With `q = b / W` and `r = b % W`, worker `p` receives `q + 1` batches if
//! `p < r` and `q` otherwise. Shares are contiguous and order-preserving:
//! worker 0 holds the first batches, and each share's element offset is the
//! running sum of the element counts before it.

use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

/// Errors from building a partition plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Element offsets overflow for {batches} batches of {plane_len} elements")]
    Overflow { batches: usize, plane_len: usize },
}

/// One worker's slice of the global batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerShare {
    pub batch_count: usize,
    /// Offset of the first element in the flat global buffer.
    pub element_offset: usize,
    /// `batch_count · m · n`.
    pub element_count: usize,
}

impl WorkerShare {
    /// Range of flat element indices covered by this share.
    pub fn elements(&self) -> Range<usize> {
        self.element_offset..self.element_offset + self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.batch_count == 0
    }
}

/// Per-worker shares, indexed by worker rank. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    shares: Vec<WorkerShare>,
    plane_len: usize,
}

impl PartitionPlan {
    /// Split `batches` matrices of `plane_len` elements each across `workers`.
    pub fn new(batches: usize, workers: usize, plane_len: usize) -> Result<Self, PartitionError> {
        if workers == 0 {
            return Err(PartitionError::NoWorkers);
        }
        batches
            .checked_mul(plane_len)
            .ok_or(PartitionError::Overflow { batches, plane_len })?;

        let base = batches / workers;
        let remainder = batches % workers;

        let mut offset = 0usize;
        let shares = (0..workers)
            .map(|p| {
                let batch_count = base + usize::from(p < remainder);
                let element_count = batch_count * plane_len;
                let share = WorkerShare {
                    batch_count,
                    element_offset: offset,
                    element_count,
                };
                offset += element_count;
                share
            })
            .collect();

        Ok(Self { shares, plane_len })
    }

    pub fn workers(&self) -> usize {
        self.shares.len()
    }

    pub fn share(&self, rank: usize) -> Option<&WorkerShare> {
        self.shares.get(rank)
    }

    pub fn shares(&self) -> &[WorkerShare] {
        &self.shares
    }

    pub fn plane_len(&self) -> usize {
        self.plane_len
    }

    pub fn total_batches(&self) -> usize {
        self.shares.iter().map(|s| s.batch_count).sum()
    }

    pub fn total_elements(&self) -> usize {
        self.shares.iter().map(|s| s.element_count).sum()
    }

    /// Element counts in rank order, as used for variable-count scatter/gather.
    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.shares.iter().map(|s| s.element_count)
    }

    /// Element offsets (displacements) in rank order.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.shares.iter().map(|s| s.element_offset)
    }
}
