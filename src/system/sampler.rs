//! Reference-counted sampling service.
//!
//! The sampler is idle until the first consumer attaches. While at least one
//! consumer is attached a single background task runs cycles back to back:
//! every enabled counter family and one two-pass process sample run
//! concurrently, their results are merged into a [`SystemSnapshot`], and the
//! snapshot replaces the previous one in a `watch` channel. The task checks the
//! consumer count only between cycles, so a cycle that has started always
//! completes and is published.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, info, warn};

use super::collector::{HostProcessSource, HostRateSource, host_info};
use super::counters::{CounterSet, NetworkCounters, RateSource, SharedCounter, read_shared};
use super::process::{ProcessRankings, ProcessSource, ProcessTable, delta};
use super::snapshot::{NetworkRates, SystemInfo, SystemSnapshot};
use crate::config::SamplerSettings;
use crate::error::SampleError;

/// Latest published snapshot; `None` until the first cycle completes.
pub type Published = Option<Arc<SystemSnapshot>>;

type SharedProcessSource = Arc<Mutex<Box<dyn ProcessSource>>>;

#[derive(Default)]
struct LoopState {
    consumers: usize,
    running: bool,
    shutdown: bool,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    settings: SamplerSettings,
    /// Taken and dropped by [`Sampler::shutdown`].
    counters: Mutex<Option<CounterSet>>,
    interface: Option<String>,
    processes: SharedProcessSource,
    system: SystemInfo,
    runtime: Handle,
    state: Mutex<LoopState>,
    publisher: watch::Sender<Published>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_counters(&self) -> MutexGuard<'_, Option<CounterSet>> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loop check point. Clears `running` in the same critical section that
    /// observes zero consumers, so an attach never sees a loop that is about
    /// to exit.
    fn keep_running(&self) -> bool {
        let mut state = self.lock_state();
        if state.consumers == 0 || state.shutdown {
            state.running = false;
            return false;
        }
        true
    }
}

#[derive(Clone)]
pub struct Sampler {
    shared: Arc<Shared>,
}

impl Sampler {
    /// Open every counter `rates` can provide and prepare the service. Must be
    /// called inside a tokio runtime; the polling task is spawned on it later.
    pub fn new(
        settings: SamplerSettings,
        rates: &dyn RateSource,
        processes: Box<dyn ProcessSource>,
        system: SystemInfo,
    ) -> Result<Self, SampleError> {
        let runtime = Handle::try_current().map_err(|_| SampleError::NoRuntime)?;
        let counters = CounterSet::open(rates, settings.preferred_interface.as_deref());
        debug!(
            cpu = counters.cpu.is_some(),
            memory = counters.memory_in_use.is_some() || counters.memory_available.is_some(),
            disks = counters.disks.len(),
            network = counters.network.as_ref().map(|n| n.interface.as_str()),
            "counters opened"
        );
        let interface = counters.network.as_ref().map(|n| n.interface.clone());
        let (publisher, _) = watch::channel(None);

        Ok(Sampler {
            shared: Arc::new(Shared {
                settings,
                counters: Mutex::new(Some(counters)),
                interface,
                processes: Arc::new(Mutex::new(processes)),
                system,
                runtime,
                state: Mutex::new(LoopState::default()),
                publisher,
            }),
        })
    }

    /// Sampler over this host's counters and process table.
    pub fn for_host(settings: SamplerSettings) -> Result<Self, SampleError> {
        Sampler::new(
            settings,
            &HostRateSource,
            Box::new(HostProcessSource::new()),
            host_info(),
        )
    }

    /// Register a consumer. The first consumer starts the polling task; this
    /// never waits for a snapshot. After [`Sampler::shutdown`] no task is
    /// started.
    pub fn attach(&self) -> Consumer {
        let mut state = self.shared.lock_state();
        state.consumers += 1;
        if !state.running && !state.shutdown {
            state.running = true;
            let task = self.shared.runtime.spawn(run_loop(Arc::clone(&self.shared)));
            state.task = Some(task);
            debug!("polling task started");
        }
        debug!(consumers = state.consumers, "consumer attached");
        Consumer {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.lock_state().consumers
    }

    /// Whether the polling task is running as of its last check point.
    pub fn is_running(&self) -> bool {
        self.shared.lock_state().running
    }

    pub fn snapshot(&self) -> Published {
        self.shared.publisher.borrow().clone()
    }

    /// Receiver that is marked changed every time a cycle publishes.
    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.shared.publisher.subscribe()
    }

    pub fn network_interface(&self) -> Option<&str> {
        self.shared.interface.as_deref()
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.shared.system
    }

    /// Stop the polling task at its next check point, wait for it to exit and
    /// release every counter handle.
    pub async fn shutdown(&self) {
        let task = {
            let mut state = self.shared.lock_state();
            state.shutdown = true;
            state.task.take()
        };
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "polling task ended abnormally");
        }
        let released = self.shared.lock_counters().take();
        if released.is_some() {
            drop(released);
            debug!("counter handles released");
        }
    }
}

/// Attachment to a [`Sampler`]. Dropping it detaches.
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    pub fn detach(self) {}

    pub fn snapshot(&self) -> Published {
        self.shared.publisher.borrow().clone()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.consumers = state.consumers.saturating_sub(1);
        debug!(consumers = state.consumers, "consumer detached");
    }
}

/// Time left to sleep after a cycle that took `elapsed`. A cycle that overran
/// the target starts the next one immediately.
pub fn remaining_interval(target: Duration, elapsed: Duration) -> Option<Duration> {
    target.checked_sub(elapsed).filter(|rest| !rest.is_zero())
}

async fn run_loop(shared: Arc<Shared>) {
    info!("sampling started");
    let counters = shared.lock_counters().clone().unwrap_or_default();
    let mut previous = shared.publisher.borrow().clone();

    while shared.keep_running() {
        let started = Instant::now();
        let cycle = previous.as_ref().map_or(1, |s| s.cycle + 1);
        let snapshot = run_cycle(&shared, &counters, previous.as_deref(), cycle, started)
            .instrument(debug_span!("sampler.cycle", cycle))
            .await;
        let snapshot = Arc::new(snapshot);
        shared.publisher.send_replace(Some(Arc::clone(&snapshot)));
        previous = Some(snapshot);

        if !shared.keep_running() {
            break;
        }
        if let Some(rest) = remaining_interval(shared.settings.cycle_interval, started.elapsed()) {
            tokio::time::sleep(rest).await;
        }
    }
    info!("sampling stopped");
}

async fn run_cycle(
    shared: &Shared,
    counters: &CounterSet,
    previous: Option<&SystemSnapshot>,
    cycle: u64,
    started: Instant,
) -> SystemSnapshot {

    let (cpu, memory_percent, memory_available_mb, disk_busy_percent, network, rankings) = tokio::join!(
        poll(counters.cpu.as_ref(), previous.and_then(|s| s.cpu_percent)),
        poll(counters.memory_in_use.as_ref(), previous.and_then(|s| s.memory_percent)),
        poll(
            counters.memory_available.as_ref(),
            previous.and_then(|s| s.memory_available_mb)
        ),
        poll_disks(&counters.disks, previous.and_then(|s| s.disk_busy_percent)),
        poll_network(counters.network.as_ref(), previous.and_then(|s| s.network.as_ref())),
        rank_processes(shared),
    );

    let rankings = match rankings {
        Ok(rankings) => rankings,
        Err(err) => {
            warn!(error = %err, "process rankings kept from previous cycle");
            previous
                .map(|s| ProcessRankings {
                    by_cpu: s.top_cpu.clone(),
                    by_memory: s.top_memory.clone(),
                    by_disk: s.top_disk.clone(),
                })
                .unwrap_or_default()
        }
    };

    SystemSnapshot {
        cycle,
        cycle_duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        cpu_percent: cpu,
        memory_percent,
        memory_available_mb,
        disk_busy_percent,
        network,
        top_cpu: rankings.by_cpu,
        top_memory: rankings.by_memory,
        top_disk: rankings.by_disk,
        system: shared.system.clone(),
    }
}

/// Read one counter on the blocking pool. `None` if the read task panicked.
async fn read_counter(counter: SharedCounter) -> Option<f64> {
    match tokio::task::spawn_blocking(move || read_shared(&counter)).await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "counter read failed");
            None
        }
    }
}

async fn poll(counter: Option<&SharedCounter>, fallback: Option<f64>) -> Option<f64> {
    let counter = Arc::clone(counter?);
    read_counter(counter).await.or(fallback)
}

async fn poll_disks(disks: &[SharedCounter], fallback: Option<f64>) -> Option<f64> {
    if disks.is_empty() {
        return None;
    }
    let readings: Vec<f64> = join_all(disks.iter().cloned().map(read_counter))
        .await
        .into_iter()
        .flatten()
        .collect();
    if readings.is_empty() {
        return fallback;
    }
    Some(readings.iter().sum::<f64>() / readings.len() as f64)
}

async fn poll_network(
    network: Option<&NetworkCounters>,
    fallback: Option<&NetworkRates>,
) -> Option<NetworkRates> {
    let network = network?;
    let (sent, received) = tokio::join!(
        read_counter(Arc::clone(&network.sent)),
        read_counter(Arc::clone(&network.received)),
    );
    // A direction with neither a reading nor an earlier value is not published.
    let sent_kbps = sent
        .map(|bytes| bytes / 1024.0)
        .or(fallback.map(|n| n.sent_kbps))?;
    let received_kbps = received
        .map(|bytes| bytes / 1024.0)
        .or(fallback.map(|n| n.received_kbps))?;
    Some(NetworkRates {
        interface: network.interface.clone(),
        sent_kbps,
        received_kbps,
    })
}

struct Pass {
    table: ProcessTable,
    core_count: usize,
    finished: Instant,
}

async fn take_pass(source: &SharedProcessSource) -> Result<Pass, SampleError> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || -> Result<Pass, SampleError> {
        let mut source = source.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let table = source.sample()?;
        Ok(Pass {
            table,
            core_count: source.core_count(),
            finished: Instant::now(),
        })
    })
    .await
    .map_err(|err| SampleError::CycleFailure(format!("process sampler task failed: {err}")))?
}

async fn rank_processes(shared: &Shared) -> Result<ProcessRankings, SampleError> {
    let initial = take_pass(&shared.processes).await?;
    tokio::time::sleep(shared.settings.process_interval).await;
    let last = take_pass(&shared.processes).await?;

    let interval = last.finished.saturating_duration_since(initial.finished);
    let deltas = delta(&initial.table, &last.table, interval, last.core_count);
    debug!(processes = deltas.len(), ?interval, "process deltas");
    Ok(ProcessRankings::from_deltas(
        &deltas,
        shared.settings.top_count,
        shared.settings.name_width,
    ))
}
