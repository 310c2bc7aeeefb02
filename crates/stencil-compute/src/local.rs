//! In-process worker group.
//!
//! Workers are threads of one process, connected in a star around the root:
//! the root holds a sender to every worker plus a shared inbox, and each
//! worker holds its own inbox plus a sender to the root. Channels are
//! unbounded, so sends never block and each collective blocks only on the
//! receives it needs.
//!
//! A fast worker can run ahead into the next collective (for example, arrive
//! at a barrier while the root is still gathering). The root keeps such
//! early messages until the collective they belong to asks for them.

use std::cell::RefCell;
use std::collections::VecDeque;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use stencil_core::PartitionPlan;

use crate::backend::{CommError, Communicator, ROOT};

/// Root to worker.
enum Downstream {
    Scalars(Vec<u64>),
    Values(Vec<f32>),
    Release,
    Abort { rank: usize, code: i32 },
}

impl Downstream {
    fn kind(&self) -> &'static str {
        match self {
            Self::Scalars(_) => "scalars",
            Self::Values(_) => "values",
            Self::Release => "barrier release",
            Self::Abort { .. } => "abort",
        }
    }
}

/// Worker to root.
enum Upstream {
    Arrived { rank: usize },
    Values { rank: usize, data: Vec<f32> },
    Abort { rank: usize, code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Arrival,
    Values,
}

impl Upstream {
    fn matches(&self, expect: Expect) -> bool {
        matches!(
            (self, expect),
            (Self::Arrived { .. }, Expect::Arrival) | (Self::Values { .. }, Expect::Values)
        )
    }
}

enum Link {
    Root {
        workers: Vec<Sender<Downstream>>,
        inbox: Receiver<Upstream>,
        early: RefCell<VecDeque<Upstream>>,
    },
    Worker {
        inbox: Receiver<Downstream>,
        root: Sender<Upstream>,
    },
}

/// One member of an in-process worker group.
pub struct LocalComm {
    rank: usize,
    size: usize,
    link: Link,
}

/// Create a connected group of `size` members, indexed by rank. Member 0 is
/// the root.
pub fn local_group(size: usize) -> Result<Vec<LocalComm>, CommError> {
    if size == 0 {
        return Err(CommError::EmptyGroup);
    }

    let (up_tx, up_rx) = unbounded();
    let mut workers = Vec::with_capacity(size - 1);
    let mut members = Vec::with_capacity(size);
    for rank in 1..size {
        let (down_tx, down_rx) = unbounded();
        workers.push(down_tx);
        members.push(LocalComm {
            rank,
            size,
            link: Link::Worker {
                inbox: down_rx,
                root: up_tx.clone(),
            },
        });
    }
    members.insert(
        ROOT,
        LocalComm {
            rank: ROOT,
            size,
            link: Link::Root {
                workers,
                inbox: up_rx,
                early: RefCell::new(VecDeque::new()),
            },
        },
    );
    debug!("Created in-process group of {} workers", size);
    Ok(members)
}

fn copy_checked<T: Copy>(dst: &mut [T], src: &[T]) -> Result<(), CommError> {
    if dst.len() != src.len() {
        return Err(CommError::LengthMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

fn check_plan(plan: &PartitionPlan, size: usize, elements: usize) -> Result<(), CommError> {
    if plan.workers() != size {
        return Err(CommError::Protocol(format!(
            "partition plan covers {} workers, group has {}",
            plan.workers(),
            size
        )));
    }
    if plan.total_elements() != elements {
        return Err(CommError::LengthMismatch {
            expected: plan.total_elements(),
            actual: elements,
        });
    }
    Ok(())
}

fn fan_out_abort(workers: &[Sender<Downstream>], rank: usize, code: i32) {
    for tx in workers {
        // A worker that already exited has nothing left to release.
        let _ = tx.send(Downstream::Abort { rank, code });
    }
}

impl LocalComm {
    fn root_link(
        &self,
        op: &str,
    ) -> Result<(&[Sender<Downstream>], &Receiver<Upstream>, &RefCell<VecDeque<Upstream>>), CommError>
    {
        match &self.link {
            Link::Root {
                workers,
                inbox,
                early,
            } => Ok((workers.as_slice(), inbox, early)),
            Link::Worker { .. } => Err(CommError::Protocol(format!(
                "{} called on rank {}",
                op, self.rank
            ))),
        }
    }

    fn worker_link(&self, op: &str) -> Result<(&Receiver<Downstream>, &Sender<Upstream>), CommError> {
        match &self.link {
            Link::Worker { inbox, root } => Ok((inbox, root)),
            Link::Root { .. } => Err(CommError::Protocol(format!("{} called on the root", op))),
        }
    }

    fn send_all(
        workers: &[Sender<Downstream>],
        message: impl Fn() -> Downstream,
    ) -> Result<(), CommError> {
        for (i, tx) in workers.iter().enumerate() {
            tx.send(message())
                .map_err(|_| CommError::Disconnected { rank: i + 1 })?;
        }
        Ok(())
    }

    /// Next message of the expected kind, taking early arrivals first. An
    /// abort from any worker is fanned out to the rest of the group.
    fn next_upstream(&self, expect: Expect) -> Result<Upstream, CommError> {
        let (workers, inbox, early) = self.root_link("collective")?;

        let stashed = {
            let mut early = early.borrow_mut();
            let index = early.iter().position(|m| m.matches(expect));
            index.and_then(|i| early.remove(i))
        };
        if let Some(message) = stashed {
            return Ok(message);
        }

        loop {
            let message = inbox.recv().map_err(|_| CommError::WorkersGone)?;
            match message {
                Upstream::Abort { rank, code } => {
                    warn!("Rank {} aborted the run (code {})", rank, code);
                    fan_out_abort(workers, rank, code);
                    return Err(CommError::Aborted { rank, code });
                }
                m if m.matches(expect) => return Ok(m),
                m => early.borrow_mut().push_back(m),
            }
        }
    }

    /// Send to the root. If the root has already gone, an abort it fanned
    /// out before leaving is reported instead of the lost connection.
    fn send_up(&self, op: &str, message: Upstream) -> Result<(), CommError> {
        let (inbox, root) = self.worker_link(op)?;
        if root.send(message).is_ok() {
            return Ok(());
        }
        while let Ok(pending) = inbox.try_recv() {
            if let Downstream::Abort { rank, code } = pending {
                return Err(CommError::Aborted { rank, code });
            }
        }
        Err(CommError::Disconnected { rank: ROOT })
    }

    fn next_downstream(&self, op: &str) -> Result<Downstream, CommError> {
        let (inbox, _) = self.worker_link(op)?;
        match inbox.recv() {
            Ok(Downstream::Abort { rank, code }) => Err(CommError::Aborted { rank, code }),
            Ok(message) => Ok(message),
            Err(_) => Err(CommError::Disconnected { rank: ROOT }),
        }
    }

    fn unexpected(&self, expected: &str, got: &Downstream) -> CommError {
        CommError::Protocol(format!(
            "rank {} expected {}, got {}",
            self.rank,
            expected,
            got.kind()
        ))
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        match &self.link {
            Link::Root { workers, .. } => {
                let mut arrived = vec![false; self.size];
                arrived[ROOT] = true;
                for _ in 1..self.size {
                    let rank = match self.next_upstream(Expect::Arrival)? {
                        Upstream::Arrived { rank } => rank,
                        _ => {
                            return Err(CommError::Protocol(
                                "barrier received a non-arrival message".into(),
                            ))
                        }
                    };
                    if rank >= self.size || arrived[rank] {
                        return Err(CommError::Protocol(format!(
                            "unexpected barrier arrival from rank {}",
                            rank
                        )));
                    }
                    arrived[rank] = true;
                }
                Self::send_all(workers, || Downstream::Release)
            }
            Link::Worker { .. } => {
                self.send_up("barrier", Upstream::Arrived { rank: self.rank })?;
                match self.next_downstream("barrier")? {
                    Downstream::Release => Ok(()),
                    other => Err(self.unexpected("barrier release", &other)),
                }
            }
        }
    }

    fn broadcast_u64(&self, buf: &mut [u64]) -> Result<(), CommError> {
        match &self.link {
            Link::Root { workers, .. } => Self::send_all(workers, || Downstream::Scalars(buf.to_vec())),
            Link::Worker { .. } => match self.next_downstream("broadcast_u64")? {
                Downstream::Scalars(values) => copy_checked(buf, &values),
                other => Err(self.unexpected("scalars", &other)),
            },
        }
    }

    fn broadcast_f32(&self, buf: &mut [f32]) -> Result<(), CommError> {
        match &self.link {
            Link::Root { workers, .. } => Self::send_all(workers, || Downstream::Values(buf.to_vec())),
            Link::Worker { .. } => match self.next_downstream("broadcast_f32")? {
                Downstream::Values(values) => copy_checked(buf, &values),
                other => Err(self.unexpected("filter values", &other)),
            },
        }
    }

    fn scatter_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError> {
        let (workers, _, _) = self.root_link("scatter_root")?;
        check_plan(plan, self.size, send.len())?;

        for (i, tx) in workers.iter().enumerate() {
            let share = plan.shares()[i + 1];
            tx.send(Downstream::Values(send[share.elements()].to_vec()))
                .map_err(|_| CommError::Disconnected { rank: i + 1 })?;
        }
        copy_checked(recv, &send[plan.shares()[ROOT].elements()])
    }

    fn scatter_recv(&self, recv: &mut [f32]) -> Result<(), CommError> {
        match self.next_downstream("scatter_recv")? {
            Downstream::Values(values) => copy_checked(recv, &values),
            other => Err(self.unexpected("scattered values", &other)),
        }
    }

    fn gather_root(
        &self,
        send: &[f32],
        plan: &PartitionPlan,
        recv: &mut [f32],
    ) -> Result<(), CommError> {
        self.root_link("gather_root")?;
        check_plan(plan, self.size, recv.len())?;

        copy_checked(&mut recv[plan.shares()[ROOT].elements()], send)?;
        let mut received = vec![false; self.size];
        received[ROOT] = true;

        for _ in 1..self.size {
            let (rank, data) = match self.next_upstream(Expect::Values)? {
                Upstream::Values { rank, data } => (rank, data),
                _ => return Err(CommError::Protocol("gather received a non-data message".into())),
            };
            if rank >= self.size || received[rank] {
                return Err(CommError::Protocol(format!(
                    "unexpected gather slice from rank {}",
                    rank
                )));
            }
            received[rank] = true;
            copy_checked(&mut recv[plan.shares()[rank].elements()], &data)?;
        }
        Ok(())
    }

    fn gather_send(&self, send: &[f32]) -> Result<(), CommError> {
        self.send_up(
            "gather_send",
            Upstream::Values {
                rank: self.rank,
                data: send.to_vec(),
            },
        )
    }

    fn abort(&self, code: i32) {
        match &self.link {
            Link::Root { workers, .. } => fan_out_abort(workers, self.rank, code),
            Link::Worker { root, .. } => {
                let _ = root.send(Upstream::Abort {
                    rank: self.rank,
                    code,
                });
            }
        }
    }
}
