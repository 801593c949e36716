use serde::Serialize;

use crate::format::{format_bytes, format_percent};

/// Static host description gathered once when the sampler is built.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SystemInfo {
    pub processor_name: String,
    pub disk_summary: String,
}

impl SystemInfo {
    pub fn disk_summary(disk_count: usize, total_bytes: u64, available_bytes: u64) -> String {
        let noun = if disk_count == 1 { "disk" } else { "disks" };
        format!(
            "{disk_count} {noun}, {} free of {}",
            format_bytes(available_bytes),
            format_bytes(total_bytes)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NetworkRates {
    pub interface: String,
    pub sent_kbps: f64,
    pub received_kbps: f64,
}

/// One complete cycle's worth of metrics. Published whole and never mutated
/// afterwards; a metric whose source is disabled is `None` and skipped when
/// serialized.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cycle: u64,
    pub cycle_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_available_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_busy_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkRates>,
    pub top_cpu: String,
    pub top_memory: String,
    pub top_disk: String,
    pub system: SystemInfo,
}

impl SystemSnapshot {
    /// One-line summary of the fast counters, omitting disabled metrics.
    pub fn headline(&self) -> String {
        let mut parts = Vec::new();
        if let Some(cpu) = self.cpu_percent {
            parts.push(format!("CPU {}", format_percent(cpu)));
        }
        match (self.memory_percent, self.memory_available_mb) {
            (Some(used), Some(free)) => {
                parts.push(format!("Memory {} ({free:.0} MB free)", format_percent(used)))
            }
            (Some(used), None) => parts.push(format!("Memory {}", format_percent(used))),
            (None, Some(free)) => parts.push(format!("Memory {free:.0} MB free")),
            (None, None) => {}
        }
        if let Some(disk) = self.disk_busy_percent {
            parts.push(format!("Disk {}", format_percent(disk)));
        }
        if let Some(net) = &self.network {
            parts.push(format!(
                "{} \u{2191}{:.1} KB/s \u{2193}{:.1} KB/s",
                net.interface, net.sent_kbps, net.received_kbps
            ));
        }
        parts.join(" | ")
    }
}
