use super::{IoStats, PlatformExtensions};

pub struct Platform;

#[cfg(target_os = "windows")]
use windows_sys::Win32::{
    Foundation::CloseHandle,
    System::Threading::{GetProcessIoCounters, IO_COUNTERS, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION},
};

impl PlatformExtensions for Platform {
    #[cfg(target_os = "windows")]
    fn process_io(pid: u32) -> Option<IoStats> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return None;
            }
            let mut counters = std::mem::zeroed::<IO_COUNTERS>();
            let ok = GetProcessIoCounters(handle, &mut counters);
            CloseHandle(handle);
            if ok == 0 {
                return None;
            }
            Some(IoStats {
                read_bytes: counters.ReadTransferCount,
                write_bytes: counters.WriteTransferCount,
            })
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn process_io(_pid: u32) -> Option<IoStats> {
        None
    }

    fn disk_names() -> Option<Vec<String>> {
        // PhysicalDisk busy time needs the PDH counter API, which is not bound here
        None
    }

    fn disk_busy_ms(_name: &str) -> Option<u64> {
        None
    }
}
