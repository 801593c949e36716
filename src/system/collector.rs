use std::time::{Duration, Instant};

use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate,
    RefreshKind, System,
};
use tracing::{debug, trace};

use super::counters::{Counter, NetworkInterface, RateCounter, RateSource};
use super::platform;
use super::process::{IoTotals, ProcessSample, ProcessSource, ProcessTable};
use super::snapshot::SystemInfo;
use crate::error::SampleError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Counters backed by `sysinfo` and the platform extensions of this host.
pub struct HostRateSource;

impl RateSource for HostRateSource {
    fn open(&self, counter: &Counter) -> Result<Box<dyn RateCounter>, SampleError> {
        match counter {
            Counter::ProcessorTime => Ok(Box::new(CpuCounter::open()?)),
            Counter::MemoryInUse => Ok(Box::new(MemoryCounter::open(MemoryReading::InUsePercent)?)),
            Counter::MemoryAvailable => {
                Ok(Box::new(MemoryCounter::open(MemoryReading::AvailableMb)?))
            }
            Counter::DiskBusy(disk) => Ok(Box::new(DiskBusyCounter::open(disk)?)),
            Counter::NetworkSent(iface) => {
                Ok(Box::new(NetworkCounter::open(iface, Direction::Sent)?))
            }
            Counter::NetworkReceived(iface) => {
                Ok(Box::new(NetworkCounter::open(iface, Direction::Received)?))
            }
        }
    }

    fn disk_instances(&self) -> Result<Vec<String>, SampleError> {
        platform::disk_names()
            .ok_or_else(|| SampleError::unavailable("disk", "no physical disk statistics on this host"))
    }

    fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, SampleError> {
        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<NetworkInterface> = networks
            .list()
            .iter()
            .map(|(name, data)| NetworkInterface {
                name: name.clone(),
                total_bytes: data
                    .total_received()
                    .saturating_add(data.total_transmitted()),
            })
            .collect();
        // The OS map has no stable order; sorted names make selection repeatable.
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }
}

/// Turns a cumulative counter into a per-interval delta.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    last: Option<(u64, Instant)>,
}

impl DeltaTracker {
    /// Record `value` at `now`; returns the growth since the previous call and
    /// the time between the two, or `None` on the first call.
    pub fn advance(&mut self, value: u64, now: Instant) -> Option<(u64, Duration)> {
        let previous = self.last.replace((value, now));
        previous.map(|(prev, at)| (value.saturating_sub(prev), now.saturating_duration_since(at)))
    }
}

struct CpuCounter {
    sys: System,
}

impl CpuCounter {
    fn open() -> Result<Self, SampleError> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        if sys.cpus().is_empty() {
            return Err(SampleError::unavailable(Counter::ProcessorTime, "no processors reported"));
        }
        Ok(CpuCounter { sys })
    }
}

impl RateCounter for CpuCounter {
    fn read(&mut self) -> f64 {
        self.sys.refresh_cpu_usage();
        f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0)
    }
}

#[derive(Clone, Copy)]
enum MemoryReading {
    InUsePercent,
    AvailableMb,
}

struct MemoryCounter {
    sys: System,
    reading: MemoryReading,
}

impl MemoryCounter {
    fn open(reading: MemoryReading) -> Result<Self, SampleError> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        if sys.total_memory() == 0 {
            let counter = match reading {
                MemoryReading::InUsePercent => Counter::MemoryInUse,
                MemoryReading::AvailableMb => Counter::MemoryAvailable,
            };
            return Err(SampleError::unavailable(counter, "physical memory size unknown"));
        }
        Ok(MemoryCounter { sys, reading })
    }
}

impl RateCounter for MemoryCounter {
    fn read(&mut self) -> f64 {
        self.sys
            .refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        match self.reading {
            MemoryReading::InUsePercent => {
                let total = self.sys.total_memory();
                if total == 0 {
                    return 0.0;
                }
                (self.sys.used_memory() as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
            }
            MemoryReading::AvailableMb => self.sys.available_memory() as f64 / BYTES_PER_MB,
        }
    }
}

struct DiskBusyCounter {
    disk: String,
    tracker: DeltaTracker,
}

impl DiskBusyCounter {
    fn open(disk: &str) -> Result<Self, SampleError> {
        if platform::disk_busy_ms(disk).is_none() {
            return Err(SampleError::unavailable(
                Counter::DiskBusy(disk.to_string()),
                "device not listed in disk statistics",
            ));
        }
        Ok(DiskBusyCounter {
            disk: disk.to_string(),
            tracker: DeltaTracker::default(),
        })
    }
}

impl RateCounter for DiskBusyCounter {
    fn read(&mut self) -> f64 {
        let Some(busy_ms) = platform::disk_busy_ms(&self.disk) else {
            return 0.0;
        };
        match self.tracker.advance(busy_ms, Instant::now()) {
            Some((busy, elapsed)) if !elapsed.is_zero() => {
                (busy as f64 * 100.0 / (elapsed.as_secs_f64() * 1000.0)).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

struct NetworkCounter {
    networks: Networks,
    interface: String,
    direction: Direction,
    tracker: DeltaTracker,
}

impl NetworkCounter {
    fn open(interface: &str, direction: Direction) -> Result<Self, SampleError> {
        let networks = Networks::new_with_refreshed_list();
        if !networks.list().contains_key(interface) {
            let counter = match direction {
                Direction::Sent => Counter::NetworkSent(interface.to_string()),
                Direction::Received => Counter::NetworkReceived(interface.to_string()),
            };
            return Err(SampleError::unavailable(counter, "interface not present"));
        }
        Ok(NetworkCounter {
            networks,
            interface: interface.to_string(),
            direction,
            tracker: DeltaTracker::default(),
        })
    }
}

impl RateCounter for NetworkCounter {
    fn read(&mut self) -> f64 {
        self.networks.refresh(true);
        let Some(data) = self.networks.list().get(&self.interface) else {
            return 0.0;
        };
        let total = match self.direction {
            Direction::Sent => data.total_transmitted(),
            Direction::Received => data.total_received(),
        };
        match self.tracker.advance(total, Instant::now()) {
            Some((bytes, elapsed)) if !elapsed.is_zero() => bytes as f64 / elapsed.as_secs_f64(),
            _ => 0.0,
        }
    }
}

/// IO byte totals of `pid` from the platform extensions.
pub fn read_io(pid: u32) -> Result<IoTotals, SampleError> {
    platform::process_io(pid)
        .map(|io| IoTotals {
            read_bytes: io.read_bytes,
            write_bytes: io.write_bytes,
        })
        .ok_or(SampleError::TransientProcessAccess { pid })
}

/// Process enumeration through `sysinfo`, with IO counters from the platform
/// extensions. Threads listed next to their process are not sampled, and a
/// process whose IO counters cannot be read is kept without them.
pub struct HostProcessSource {
    sys: System,
    core_count: usize,
}

impl Default for HostProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProcessSource {
    pub fn new() -> Self {
        let cpus = System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()));
        HostProcessSource {
            sys: System::new(),
            core_count: cpus.cpus().len().max(1),
        }
    }
}

impl ProcessSource for HostProcessSource {
    fn sample(&mut self) -> Result<ProcessTable, SampleError> {
        let _span = tracing::debug_span!("collector.sample").entered();

        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        if self.sys.processes().is_empty() {
            return Err(SampleError::CycleFailure(
                "process enumeration returned no processes".to_string(),
            ));
        }

        let mut table = ProcessTable::with_capacity(self.sys.processes().len());
        let mut threads = 0usize;
        let mut without_io = 0usize;
        for (pid, process) in self.sys.processes() {
            // Linux tasks share the working set of their process.
            if process.thread_kind().is_some() {
                threads += 1;
                continue;
            }
            let pid = pid.as_u32();
            let io = match read_io(pid) {
                Ok(io) => Some(io),
                Err(err) => {
                    trace!(error = %err, "io counters unreadable");
                    without_io += 1;
                    None
                }
            };
            table.insert(
                pid,
                ProcessSample {
                    pid,
                    name: process.name().to_string_lossy().to_string(),
                    start_time: process.start_time(),
                    io,
                    cpu_time_ms: process.accumulated_cpu_time(),
                    working_set: process.memory(),
                },
            );
        }
        debug!(sampled = table.len(), threads, without_io, "process pass");
        Ok(table)
    }

    fn core_count(&self) -> usize {
        self.core_count
    }
}

/// Processor brand and disk capacity of this host.
pub fn host_info() -> SystemInfo {
    let sys = System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()));
    let processor_name = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown processor".to_string());

    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
        (t.saturating_add(disk.total_space()), a.saturating_add(disk.available_space()))
    });

    SystemInfo {
        processor_name,
        disk_summary: SystemInfo::disk_summary(disks.list().len(), total, available),
    }
}
