#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

pub trait PlatformExtensions {
    /// Lifetime IO byte totals of a process; `None` when it exited or access
    /// was denied.
    fn process_io(pid: u32) -> Option<IoStats>;
    /// Physical block devices, in kernel enumeration order.
    fn disk_names() -> Option<Vec<String>>;
    /// Cumulative milliseconds the device spent servicing IO.
    fn disk_busy_ms(name: &str) -> Option<u64>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

pub fn process_io(pid: u32) -> Option<IoStats> {
    platform_impl::Platform::process_io(pid)
}

pub fn disk_names() -> Option<Vec<String>> {
    platform_impl::Platform::disk_names()
}

pub fn disk_busy_ms(name: &str) -> Option<u64> {
    platform_impl::Platform::disk_busy_ms(name)
}
