//! Host load probe.

use std::path::Path;

use nodeward_core::NodeStatus;
use parking_lot::Mutex;
use sysinfo::{Disks, System};

/// Source of [`NodeStatus`] snapshots.
pub trait StatusProbe: Send + Sync {
    fn node_status(&self) -> NodeStatus;
}

/// [`StatusProbe`] backed by `sysinfo`.
///
/// Keeps one `System` across calls so CPU usage is measured between
/// consecutive probes.
pub struct SystemProbe {
    sys: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe").finish_non_exhaustive()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[expect(clippy::cast_precision_loss)]
    let ratio = used as f64 / total as f64;
    ratio * 100.0
}

#[expect(clippy::cast_precision_loss)]
fn average(usages: impl ExactSizeIterator<Item = f32>) -> f64 {
    let count = usages.len();
    if count == 0 {
        return 0.0;
    }
    let total: f32 = usages.sum();
    f64::from(total / count as f32)
}

impl StatusProbe for SystemProbe {
    fn node_status(&self) -> NodeStatus {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let cpu = average(sys.cpus().iter().map(|c| c.cpu_usage()));
        let mem = percent(sys.used_memory(), sys.total_memory());
        drop(sys);

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .map_or(0.0, |d| {
                percent(d.total_space().saturating_sub(d.available_space()), d.total_space())
            });

        NodeStatus {
            cpu,
            mem,
            disk,
            uptime: System::uptime(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(average(std::iter::empty()), 0.0);
        assert_eq!(average([10.0, 30.0].into_iter()), 20.0);
    }

    #[test]
    fn probe_reports_sane_ranges() {
        let probe = SystemProbe::new();
        let status = probe.node_status();
        assert!((0.0..=100.0).contains(&status.mem));
        assert!((0.0..=100.0).contains(&status.disk));
        assert!(status.cpu >= 0.0);
    }
}
