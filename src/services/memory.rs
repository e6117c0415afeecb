use std::fs;

/// Used-memory percentage above which a warning is logged.
pub const MEMORY_WARNING_PERCENT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryUsage {
    pub used_mb: u64,
    pub percent_used: f64,
}

/// Source of memory-pressure readings for progress telemetry.
pub trait MemoryProbe: Send + Sync {
    /// `None` when no reading is available on this platform.
    fn usage(&self) -> Option<MemoryUsage>;
}

/// Resident set size of this process against total physical memory, read
/// from `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn usage(&self) -> Option<MemoryUsage> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let used_kb = kb_field(&status, "VmRSS:")?;
        let total_kb = kb_field(&meminfo, "MemTotal:")?;
        if total_kb == 0 {
            return None;
        }
        Some(MemoryUsage {
            used_mb: used_kb / 1024,
            percent_used: 100.0 * used_kb as f64 / total_kb as f64,
        })
    }
}

fn kb_field(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line[key.len()..].split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// Logs progress for `total` computed rows of `label` and warns when memory
/// is nearly exhausted. Returns whether the warning fired.
pub fn log_progress(probe: &dyn MemoryProbe, label: &str, total: usize) -> bool {
    match probe.usage() {
        Some(usage) => {
            log::info!("{} {} rows computed ({}MB used)", total, label, usage.used_mb);
            if usage.percent_used > MEMORY_WARNING_PERCENT {
                log::warn!(
                    "Memory is low ({:.1}% used). Reduce the feature count or the input size",
                    usage.percent_used
                );
                return true;
            }
            false
        }
        None => {
            log::info!("{} {} rows computed", total, label);
            false
        }
    }
}
