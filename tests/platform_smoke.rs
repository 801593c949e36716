use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pulsebar::SampleError;
use pulsebar::system::collector::{HostProcessSource, HostRateSource, host_info, read_io};
use pulsebar::system::process::delta;
use pulsebar::system::{Counter, CounterHandle, ProcessSource, RateSource};

fn spawn_long_lived_child() -> Child {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("powershell");
        c.args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Start-Sleep -Seconds 30",
        ]);
        c
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.args(["-c", "sleep 30"]);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn child process")
}

#[test]
fn host_process_passes_diff_cleanly() {
    let mut child = spawn_long_lived_child();
    let pid = child.id();

    let mut source = HostProcessSource::new();
    assert!(source.core_count() >= 1);
    let first = source.sample();
    thread::sleep(Duration::from_millis(100));
    let second = source.sample();
    let _ = child.kill();
    let _ = child.wait();

    let (first, second) = (first.expect("first pass"), second.expect("second pass"));
    let sample = first.get(&pid).expect("live child is sampled");
    assert!(!sample.name.is_empty());
    assert_eq!(sample.pid, pid);
    assert!(second.contains_key(&pid));
    let deltas = delta(&first, &second, Duration::from_millis(100), source.core_count());
    for d in &deltas {
        assert!(first.contains_key(&d.pid) && second.contains_key(&d.pid));
        assert!((0.0..=100.0).contains(&d.cpu_percent));
    }
}

#[test]
fn host_counters_open_or_report_unavailable() {
    let source = HostRateSource;
    for counter in [
        Counter::ProcessorTime,
        Counter::MemoryInUse,
        Counter::MemoryAvailable,
    ] {
        match CounterHandle::open(&source, counter.clone()) {
            Ok(mut handle) => {
                let value = handle.read_rate();
                assert!(value.is_finite() && value >= 0.0, "{counter}: {value}");
            }
            Err(err) => eprintln!("{counter} unavailable here: {err}"),
        }
    }
    let names: Vec<String> = source
        .network_interfaces()
        .expect("interface enumeration")
        .into_iter()
        .map(|iface| iface.name)
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn host_info_is_populated() {
    let info = host_info();
    assert!(!info.processor_name.is_empty());
    assert!(info.disk_summary.contains("free of"));
}

/// Thread group id from `/proc/<pid>/status`; `None` where procfs is absent.
fn thread_group_id(pid: u32) -> Option<u32> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Tgid:"))
        .and_then(|tgid| tgid.trim().parse().ok())
}

#[test]
fn threads_are_not_sampled_as_processes() {
    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(5));
                }
            })
        })
        .collect();

    let mut source = HostProcessSource::new();
    let first = source.sample();
    thread::sleep(Duration::from_millis(50));
    let second = source.sample();
    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }

    let (first, second) = (first.expect("first pass"), second.expect("second pass"));
    for table in [&first, &second] {
        for pid in table.keys() {
            if let Some(tgid) = thread_group_id(*pid) {
                assert_eq!(tgid, *pid, "thread {pid} of process {tgid} sampled as a process");
            }
        }
    }

    let own = std::process::id();
    let deltas = delta(&first, &second, Duration::from_millis(50), source.core_count());
    assert!(deltas.iter().filter(|d| d.pid == own).count() <= 1);
}

#[test]
fn unreadable_io_is_a_transient_access_error() {
    match read_io(u32::MAX) {
        Err(SampleError::TransientProcessAccess { pid }) => assert_eq!(pid, u32::MAX),
        other => panic!("expected transient access error, got {other:?}"),
    }
}
