use std::collections::HashMap;
use std::time::Duration;

use crate::error::SampleError;
use crate::format::{fit_width, format_bytes, format_percent, format_rate};

/// Lifetime IO byte totals of one process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoTotals {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Cumulative counters of one process as read in a single enumeration pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    /// Start time in seconds since the epoch; distinguishes a reused pid.
    pub start_time: u64,
    /// `None` when the IO counters of the process could not be read.
    pub io: Option<IoTotals>,
    pub cpu_time_ms: u64,
    pub working_set: u64,
}

pub type ProcessTable = HashMap<u32, ProcessSample>;

/// Enumerates live processes. Processes that exit while being read are left
/// out of the table rather than reported as errors; an `Err` means the
/// enumeration as a whole failed.
pub trait ProcessSource: Send {
    fn sample(&mut self) -> Result<ProcessTable, SampleError>;
    fn core_count(&self) -> usize;
}

/// IO performed by one process between two passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IoDelta {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_rate: f64,
    pub write_rate: f64,
}

/// Per-process consumption between two passes.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessDelta {
    pub pid: u32,
    pub name: String,
    pub cpu_time_ms: u64,
    pub cpu_percent: f64,
    /// Present only when both passes could read the IO counters.
    pub io: Option<IoDelta>,
    pub working_set: u64,
}

/// Share of total machine capacity used by `cpu_delta_ms` of processor time
/// over `interval`, clamped to `[0, 100]`.
pub fn cpu_percent(cpu_delta_ms: f64, interval: Duration, core_count: usize) -> f64 {
    let capacity_ms = interval.as_secs_f64() * 1000.0 * core_count.max(1) as f64;
    if capacity_ms <= 0.0 {
        return 0.0;
    }
    let raw = cpu_delta_ms * 100.0 / capacity_ms;
    if raw.is_finite() { raw.clamp(0.0, 100.0) } else { 0.0 }
}

/// Diff two passes. Only pids present in both passes with the same start time
/// produce a delta; identity fields and the working set come from `initial`.
pub fn delta(
    initial: &ProcessTable,
    last: &ProcessTable,
    interval: Duration,
    core_count: usize,
) -> Vec<ProcessDelta> {
    let secs = interval.as_secs_f64();
    let per_sec = |bytes: u64| if secs > 0.0 { bytes as f64 / secs } else { 0.0 };

    initial
        .values()
        .filter_map(|first| {
            let second = last.get(&first.pid)?;
            if second.start_time != first.start_time {
                return None;
            }
            let io = match (first.io, second.io) {
                (Some(before), Some(after)) => {
                    let read_bytes = after.read_bytes.saturating_sub(before.read_bytes);
                    let write_bytes = after.write_bytes.saturating_sub(before.write_bytes);
                    Some(IoDelta {
                        read_bytes,
                        write_bytes,
                        read_rate: per_sec(read_bytes),
                        write_rate: per_sec(write_bytes),
                    })
                }
                _ => None,
            };
            let cpu_delta = second.cpu_time_ms as f64 - first.cpu_time_ms as f64;
            Some(ProcessDelta {
                pid: first.pid,
                name: first.name.clone(),
                cpu_time_ms: second.cpu_time_ms.saturating_sub(first.cpu_time_ms),
                cpu_percent: cpu_percent(cpu_delta, interval, core_count),
                io,
                working_set: first.working_set,
            })
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankBy {
    CpuTime,
    WorkingSet,
    ReadBytes,
}

impl RankBy {
    /// Ranking key; `None` when the process has no value for this metric and
    /// must not be ranked by it.
    pub fn key(self, d: &ProcessDelta) -> Option<u64> {
        match self {
            RankBy::CpuTime => Some(d.cpu_time_ms),
            RankBy::WorkingSet => Some(d.working_set),
            RankBy::ReadBytes => d.io.map(|io| io.read_bytes),
        }
    }

    fn metric(self, d: &ProcessDelta) -> String {
        match self {
            RankBy::CpuTime => format_percent(d.cpu_percent),
            RankBy::WorkingSet => format_bytes(d.working_set),
            RankBy::ReadBytes => d
                .io
                .map_or_else(|| "n/a".to_string(), |io| format_rate(io.read_rate)),
        }
    }
}

/// The `n` largest deltas by `by`, descending. Equal keys keep input order;
/// deltas without a key are left out.
pub fn top_n(deltas: &[ProcessDelta], n: usize, by: RankBy) -> Vec<&ProcessDelta> {
    let mut ranked: Vec<(u64, &ProcessDelta)> = deltas
        .iter()
        .filter_map(|d| by.key(d).map(|key| (key, d)))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(n).map(|(_, d)| d).collect()
}

pub fn render_ranked(entries: &[&ProcessDelta], by: RankBy, name_width: usize) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}. {} {}", i + 1, fit_width(&d.name, name_width), by.metric(d)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The three rendered top-N blocks of one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessRankings {
    pub by_cpu: String,
    pub by_memory: String,
    pub by_disk: String,
}

impl ProcessRankings {
    pub fn from_deltas(deltas: &[ProcessDelta], top: usize, name_width: usize) -> Self {
        let block = |by| render_ranked(&top_n(deltas, top, by), by, name_width);
        ProcessRankings {
            by_cpu: block(RankBy::CpuTime),
            by_memory: block(RankBy::WorkingSet),
            by_disk: block(RankBy::ReadBytes),
        }
    }
}
