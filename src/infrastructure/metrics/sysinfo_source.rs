use std::path::Path;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

use crate::domain::errors::SamplingError;
use crate::domain::models::SystemSample;
use crate::domain::ports::MetricsSource;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// [`MetricsSource`] backed by sysinfo.
///
/// Keeps one `System` across samples so process CPU usage is measured
/// between consecutive refreshes. The first sample reports 0% CPU.
pub struct SysinfoMetricsSource {
    pid: Pid,
    system: Mutex<System>,
}

impl SysinfoMetricsSource {
    pub fn new() -> Result<Self, SamplingError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| SamplingError::ProcessUnavailable(e.to_string()))?;

        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl MetricsSource for SysinfoMetricsSource {
    fn sample(&self) -> Result<SystemSample, SamplingError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = system
            .process(self.pid)
            .ok_or_else(|| SamplingError::ProcessUnavailable(self.pid.to_string()))?;
        let process_memory_mb = process.memory() as f64 / BYTES_PER_MB;
        let process_cpu_percent = f64::from(process.cpu_usage());
        let system_memory_total_mb = system.total_memory() as f64 / BYTES_PER_MB;
        drop(system);

        Ok(SystemSample {
            process_memory_mb,
            system_memory_total_mb,
            process_cpu_percent,
            disk_free_mb: root_disk_free_mb()?,
        })
    }
}

/// Free space on `/`, or on the disk with the shortest mount point.
fn root_disk_free_mb() -> Result<f64, SamplingError> {
    let disks = Disks::new_with_refreshed_list();
    let root = Path::new("/");

    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == root)
        .or_else(|| {
            disks
                .list()
                .iter()
                .min_by_key(|disk| disk.mount_point().as_os_str().len())
        })
        .map(|disk| disk.available_space() as f64 / BYTES_PER_MB)
        .ok_or(SamplingError::NoDisk)
}
