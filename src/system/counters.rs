use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::error::SampleError;

/// Aggregate pseudo-instance some counter categories report next to the real
/// instances.
pub const TOTAL_INSTANCE: &str = "_Total";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// System-wide processor busy percentage.
    ProcessorTime,
    /// Percentage of physical memory in use.
    MemoryInUse,
    /// Available physical memory in megabytes.
    MemoryAvailable,
    /// Busy percentage of one physical disk.
    DiskBusy(String),
    /// Bytes per second sent on one interface.
    NetworkSent(String),
    /// Bytes per second received on one interface.
    NetworkReceived(String),
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Counter::ProcessorTime => write!(f, "processor/{TOTAL_INSTANCE}"),
            Counter::MemoryInUse => write!(f, "memory/in-use"),
            Counter::MemoryAvailable => write!(f, "memory/available"),
            Counter::DiskBusy(disk) => write!(f, "disk/{disk}"),
            Counter::NetworkSent(iface) => write!(f, "network/{iface}/sent"),
            Counter::NetworkReceived(iface) => write!(f, "network/{iface}/received"),
        }
    }
}

/// An opened OS counter. Each read returns the rate over the time since the
/// previous read; the first read after opening has no baseline and returns 0.
pub trait RateCounter: Send {
    fn read(&mut self) -> f64;
}

/// A network interface as enumerated by a [`RateSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    /// Bytes sent plus received since the interface came up.
    pub total_bytes: u64,
}

/// Opens counters and enumerates counter instances on the host.
pub trait RateSource: Send + Sync {
    fn open(&self, counter: &Counter) -> Result<Box<dyn RateCounter>, SampleError>;
    fn disk_instances(&self) -> Result<Vec<String>, SampleError>;
    /// Interfaces in enumeration order.
    fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, SampleError>;
}

/// Exclusive owner of one opened counter. The warm-up read happens in
/// [`CounterHandle::open`], so every value returned by
/// [`CounterHandle::read_rate`] has a real baseline.
pub struct CounterHandle {
    counter: Counter,
    inner: Box<dyn RateCounter>,
}

impl CounterHandle {
    pub fn open(source: &dyn RateSource, counter: Counter) -> Result<Self, SampleError> {
        let mut inner = source.open(&counter)?;
        let _warm_up = inner.read();
        Ok(CounterHandle { counter, inner })
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    pub fn read_rate(&mut self) -> f64 {
        self.inner.read()
    }
}

impl Drop for CounterHandle {
    fn drop(&mut self) {
        trace!(counter = %self.counter, "released counter handle");
    }
}

pub type SharedCounter = Arc<Mutex<CounterHandle>>;

/// Read a shared handle. A poisoned lock only means an earlier read panicked;
/// the handle itself is still usable.
pub fn read_shared(counter: &SharedCounter) -> f64 {
    let mut handle = counter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    handle.read_rate()
}

pub fn is_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    if lower.contains("loopback") {
        return true;
    }
    match lower.strip_prefix("lo") {
        Some(rest) => rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Pick the interface to poll: `preferred` when it exists, otherwise the first
/// non-loopback interface that has moved any traffic, otherwise the first
/// non-loopback interface. Order is enumeration order.
pub fn select_interface(
    interfaces: &[NetworkInterface],
    preferred: Option<&str>,
) -> Option<String> {
    if let Some(wanted) = preferred {
        if interfaces.iter().any(|i| i.name == wanted) {
            return Some(wanted.to_string());
        }
        debug!(interface = wanted, "configured interface not found, selecting automatically");
    }
    let usable: Vec<&NetworkInterface> = interfaces
        .iter()
        .filter(|i| !is_loopback(&i.name))
        .collect();
    usable
        .iter()
        .find(|i| i.total_bytes > 0)
        .or(usable.first())
        .map(|i| i.name.clone())
}

pub fn physical_disks(instances: Vec<String>) -> Vec<String> {
    instances
        .into_iter()
        .filter(|name| !name.eq_ignore_ascii_case(TOTAL_INSTANCE))
        .collect()
}

#[derive(Clone)]
pub struct NetworkCounters {
    pub interface: String,
    pub sent: SharedCounter,
    pub received: SharedCounter,
}

/// Every counter the sampler polls. A metric whose source could not be opened
/// is absent here and stays absent for the sampler's lifetime.
#[derive(Clone, Default)]
pub struct CounterSet {
    pub cpu: Option<SharedCounter>,
    pub memory_in_use: Option<SharedCounter>,
    pub memory_available: Option<SharedCounter>,
    pub disks: Vec<SharedCounter>,
    pub network: Option<NetworkCounters>,
}

impl CounterSet {
    pub fn open(source: &dyn RateSource, preferred_interface: Option<&str>) -> Self {
        let cpu = open_optional(source, Counter::ProcessorTime);
        let memory_in_use = open_optional(source, Counter::MemoryInUse);
        let memory_available = open_optional(source, Counter::MemoryAvailable);

        let disks = match source.disk_instances() {
            Ok(instances) => physical_disks(instances)
                .into_iter()
                .filter_map(|disk| open_optional(source, Counter::DiskBusy(disk)))
                .collect(),
            Err(err) => {
                debug!(error = %err, "disk counters disabled");
                Vec::new()
            }
        };

        let network = match source.network_interfaces() {
            Ok(interfaces) => select_interface(&interfaces, preferred_interface)
                .and_then(|iface| open_network(source, iface)),
            Err(err) => {
                debug!(error = %err, "network counters disabled");
                None
            }
        };
        if network.is_none() {
            debug!("no usable network interface; network metrics omitted");
        }

        CounterSet {
            cpu,
            memory_in_use,
            memory_available,
            disks,
            network,
        }
    }
}

fn open_optional(source: &dyn RateSource, counter: Counter) -> Option<SharedCounter> {
    match CounterHandle::open(source, counter) {
        Ok(handle) => Some(Arc::new(Mutex::new(handle))),
        Err(err) => {
            debug!(error = %err, "metric disabled");
            None
        }
    }
}

fn open_network(source: &dyn RateSource, interface: String) -> Option<NetworkCounters> {
    let sent = open_optional(source, Counter::NetworkSent(interface.clone()))?;
    let received = open_optional(source, Counter::NetworkReceived(interface.clone()))?;
    Some(NetworkCounters {
        interface,
        sent,
        received,
    })
}
