//! Host metrics reported in `METRICS` frames.
//!
//! The payload is one line of JSON; the collector stores it verbatim.

use chrono::Utc;
use serde::Serialize;
use sysinfo::{Disks, System};

use crate::error::AgentError;

/// Produces the payload for the next `METRICS` frame.
pub trait MetricsSource: Send {
    fn payload(&mut self) -> Result<String, AgentError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct HostMetrics {
    pub hostname: String,
    pub uptime_secs: u64,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
    pub cpu_percent: f32,
    /// Bytes.
    pub mem_total: u64,
    pub mem_used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    /// Unix seconds at sampling time.
    pub timestamp: i64,
}

/// Samples the local host with `sysinfo`.
pub struct SysinfoSource {
    system: System,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self { system }
    }

    pub fn sample(&mut self) -> HostMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = disks.list().iter().fold((0u64, 0u64), |(t, f), d| {
            (t + d.total_space(), f + d.available_space())
        });
        let load = System::load_average();

        HostMetrics {
            hostname: System::host_name().unwrap_or_default(),
            uptime_secs: System::uptime(),
            load_1: load.one,
            load_5: load.five,
            load_15: load.fifteen,
            cpu_percent: self.system.global_cpu_usage(),
            mem_total: self.system.total_memory(),
            mem_used: self.system.used_memory(),
            swap_total: self.system.total_swap(),
            swap_used: self.system.used_swap(),
            disk_total,
            disk_used: disk_total.saturating_sub(disk_free),
            timestamp: Utc::now().timestamp(),
        }
    }
}

impl MetricsSource for SysinfoSource {
    fn payload(&mut self) -> Result<String, AgentError> {
        Ok(serde_json::to_string(&self.sample())?)
    }
}
