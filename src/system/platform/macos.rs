use libproc::libproc::pid_rusage::{RUsageInfoV2, pidrusage};

use super::{IoStats, PlatformExtensions};

pub struct Platform;

impl PlatformExtensions for Platform {
    fn process_io(pid: u32) -> Option<IoStats> {
        // rusage v2 carries the lifetime disk IO byte counters
        let usage = pidrusage::<RUsageInfoV2>(pid as i32).ok()?;
        Some(IoStats {
            read_bytes: usage.ri_diskio_bytesread,
            write_bytes: usage.ri_diskio_byteswritten,
        })
    }

    fn disk_names() -> Option<Vec<String>> {
        // IOKit block storage statistics are not exposed without a framework binding
        None
    }

    fn disk_busy_ms(_name: &str) -> Option<u64> {
        None
    }
}
