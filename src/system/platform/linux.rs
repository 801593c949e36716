use std::path::Path;

use super::{IoStats, PlatformExtensions};

pub struct Platform;

const DISKSTATS: &str = "/proc/diskstats";

impl PlatformExtensions for Platform {
    fn process_io(pid: u32) -> Option<IoStats> {
        // Read /proc/{pid}/io; unreadable for other users' processes without privileges
        let path = format!("/proc/{pid}/io");
        let contents = std::fs::read_to_string(path).ok()?;
        let mut read_bytes = None;
        let mut write_bytes = None;
        for line in contents.lines() {
            if let Some(val) = line.strip_prefix("read_bytes: ") {
                read_bytes = val.trim().parse().ok();
            } else if let Some(val) = line.strip_prefix("write_bytes: ") {
                write_bytes = val.trim().parse().ok();
            }
        }
        Some(IoStats {
            read_bytes: read_bytes?,
            write_bytes: write_bytes?,
        })
    }

    fn disk_names() -> Option<Vec<String>> {
        let contents = std::fs::read_to_string(DISKSTATS).ok()?;
        // Whole physical devices have a `device` link in sysfs; partitions,
        // loop, ram and device-mapper nodes do not.
        let names = contents
            .lines()
            .filter_map(|line| line.split_whitespace().nth(2))
            .filter(|name| Path::new("/sys/block").join(name).join("device").exists())
            .map(str::to_string)
            .collect();
        Some(names)
    }

    fn disk_busy_ms(name: &str) -> Option<u64> {
        let contents = std::fs::read_to_string(DISKSTATS).ok()?;
        contents.lines().find_map(|line| parse_busy_ms(line, name))
    }
}

/// Fields: major minor name, then reads(0) .. io_in_progress(8) io_ms(9).
fn parse_busy_ms(line: &str, name: &str) -> Option<u64> {
    let mut fields = line.split_whitespace();
    let device = fields.nth(2)?;
    if device != name {
        return None;
    }
    fields.nth(9)?.parse().ok()
}
