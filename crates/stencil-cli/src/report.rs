//! Strong-scaling tables from benchmark logs.
//!
//! A benchmark log interleaves `-> Threads = P` markers with the timing line
//! printed by each run. Every marker is paired with the next timing line;
//! the single-worker time `T1` is the baseline for speedup `T1 / Tp` and
//! efficiency `speedup / P`.

use std::fmt::Write as _;

use anyhow::{bail, Result};
use serde::Serialize;

const THREADS_MARKER: &str = "-> Threads = ";

/// One timed run from the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub threads: usize,
    pub time: f64,
}

/// One line of the scaling table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingRow {
    pub threads: usize,
    pub time: f64,
    pub speedup: f64,
    pub efficiency: f64,
}

/// Extract `(P, T)` pairs from `log`, where timing lines start with
/// `label`. A timing line with no pending marker is skipped.
pub fn parse_log(log: &str, label: &str) -> Vec<Sample> {
    let prefix = format!("{}: ", label);
    let mut samples = Vec::new();
    let mut pending = None;

    for line in log.lines() {
        if let Some(threads) = field_after(line, THREADS_MARKER).and_then(|v| v.parse().ok()) {
            pending = Some(threads);
        }
        if let Some(time) = field_after(line, &prefix).and_then(|v| v.parse::<f64>().ok()) {
            if let Some(threads) = pending.take() {
                samples.push(Sample { threads, time });
            }
        }
    }
    samples
}

/// First whitespace-delimited token following `marker` in `line`.
fn field_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    line[start..].split_whitespace().next()
}

/// Sort samples by worker count and derive speedup and efficiency.
pub fn scaling_rows(mut samples: Vec<Sample>) -> Result<Vec<ScalingRow>> {
    if samples.is_empty() {
        bail!("No timing data found");
    }
    samples.sort_by_key(|s| s.threads);
    let t1 = match samples.iter().find(|s| s.threads == 1) {
        Some(s) => s.time,
        None => bail!("No single-worker timing (Threads = 1) found"),
    };

    Ok(samples
        .into_iter()
        .map(|s| {
            let speedup = if s.time > 0.0 { t1 / s.time } else { 0.0 };
            let efficiency = if s.threads > 0 {
                speedup / s.threads as f64
            } else {
                0.0
            };
            ScalingRow {
                threads: s.threads,
                time: s.time,
                speedup,
                efficiency,
            }
        })
        .collect())
}

/// Render rows as a Markdown table.
pub fn markdown_table(rows: &[ScalingRow]) -> String {
    let mut out = String::from("### Strong Scaling\n\n");
    out.push_str("| Threads | Time (s) | Speedup | Efficiency |\n");
    out.push_str("|-----------------|--------------------|-----------------|-----------------------|\n");
    for row in rows {
        let _ = writeln!(
            out,
            "| {:<15} | {:<18.6} | {:<15.3} | {:<21.3} |",
            row.threads, row.time, row.speedup, row.efficiency
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LOG: &str = "\
== strong scaling ==
-> Threads = 4
STENCIL_TIME: 0.250000
-> Threads = 1
STENCIL_TIME: 1.000000
stray STENCIL_TIME: 9.0
-> Threads = 2
some other output
STENCIL_TIME: 0.500000
";

    #[test]
    fn test_parse_pairs_markers_with_times() {
        let samples = parse_log(LOG, "STENCIL_TIME");
        assert_eq!(
            samples,
            vec![
                Sample { threads: 4, time: 0.25 },
                Sample { threads: 1, time: 1.0 },
                Sample { threads: 2, time: 0.5 },
            ]
        );
    }

    #[test]
    fn test_scaling_rows_sorted_with_speedup() {
        let rows = scaling_rows(parse_log(LOG, "STENCIL_TIME")).unwrap();
        let threads: Vec<_> = rows.iter().map(|r| r.threads).collect();
        assert_eq!(threads, vec![1, 2, 4]);
        assert_relative_eq!(rows[2].speedup, 4.0);
        assert_relative_eq!(rows[2].efficiency, 1.0);
        assert_relative_eq!(rows[1].speedup, 2.0);
    }

    #[test]
    fn test_missing_baseline_rejected() {
        let samples = vec![Sample { threads: 2, time: 0.5 }];
        assert!(scaling_rows(samples).is_err());
        assert!(scaling_rows(Vec::new()).is_err());
    }

    #[test]
    fn test_custom_label() {
        let samples = parse_log("-> Threads = 1\nT: 2.5\n", "T");
        assert_eq!(samples, vec![Sample { threads: 1, time: 2.5 }]);
    }

    #[test]
    fn test_markdown_layout() {
        let rows = scaling_rows(vec![Sample { threads: 1, time: 2.0 }]).unwrap();
        let table = markdown_table(&rows);
        assert!(table.starts_with("### Strong Scaling\n\n| Threads |"));
        assert!(table.contains("| 1               | 2.000000           | 1.000           | 1.000                 |"));
    }
}
