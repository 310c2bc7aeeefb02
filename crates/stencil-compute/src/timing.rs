//! Wall-clock timing of the distributed compute phase.
//!
//! The measured window is bracketed by two barriers, so it covers the
//! collectives and the local kernel of the slowest worker but none of the
//! file I/O or setup around them.

use std::fmt;
use std::time::{Duration, Instant};

use crate::backend::{CommError, Communicator};

/// Label of the timing line consumed by scaling reports.
pub const DEFAULT_TIMING_LABEL: &str = "STENCIL_TIME";

/// A value together with how long it took to produce.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

/// Run `phase` between two barriers and time it.
pub fn time_collective<C, T, E>(comm: &C, phase: impl FnOnce() -> Result<T, E>) -> Result<Timed<T>, E>
where
    C: Communicator + ?Sized,
    E: From<CommError>,
{
    comm.barrier()?;
    let start = Instant::now();
    let value = phase()?;
    comm.barrier()?;
    Ok(Timed {
        value,
        elapsed: start.elapsed(),
    })
}

/// Time a phase that involves no other worker.
pub fn time_local<T, E>(phase: impl FnOnce() -> Result<T, E>) -> Result<Timed<T>, E> {
    let start = Instant::now();
    let value = phase()?;
    Ok(Timed {
        value,
        elapsed: start.elapsed(),
    })
}

/// The single line a coordinator reports, e.g. `STENCIL_TIME: 0.012345`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingLine<'a> {
    pub label: &'a str,
    pub elapsed: Duration,
}

impl fmt::Display for TimingLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.6}", self.label, self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::local_group;

    #[test]
    fn test_timing_line_format() {
        let line = TimingLine {
            label: DEFAULT_TIMING_LABEL,
            elapsed: Duration::from_micros(1_500_250),
        };
        assert_eq!(line.to_string(), "STENCIL_TIME: 1.500250");
    }

    #[test]
    fn test_time_collective_on_single_worker() {
        let group = local_group(1).unwrap();
        let timed = time_collective(&group[0], || {
            std::thread::sleep(Duration::from_millis(5));
            Ok::<_, CommError>(42)
        })
        .unwrap();
        assert_eq!(timed.value, 42);
        assert!(timed.elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_phase_error_propagates() {
        let result = time_local(|| Err::<(), _>(CommError::EmptyGroup));
        assert!(matches!(result, Err(CommError::EmptyGroup)));
    }
}
