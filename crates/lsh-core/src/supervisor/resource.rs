//! Best-effort resource sampling for a live child process via `/proc`.
//!
//! Sampling must never block or fail an execution; every reader returns
//! `Option` and callers treat `None` as "not available on this host".

/// One sample of a process's resource usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Peak resident set size so far, in megabytes (`VmHWM`).
    pub peak_rss_mb: f64,
    /// Cumulative user+system CPU time, in clock ticks.
    pub cpu_ticks: u64,
}

/// Read a sample for `pid`. Returns `None` off Linux or once the
/// process has been reaped.
#[cfg(target_os = "linux")]
pub fn sample(pid: u32) -> Option<ResourceSample> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let peak_kb: u64 = status
        .lines()
        .find(|l| l.starts_with("VmHWM:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;

    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesized comm; utime and stime are the 14th
    // and 15th overall.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    Some(ResourceSample {
        peak_rss_mb: peak_kb as f64 / 1024.0,
        cpu_ticks: utime + stime,
    })
}

#[cfg(not(target_os = "linux"))]
pub fn sample(_pid: u32) -> Option<ResourceSample> {
    None
}

/// Kernel clock ticks per second, for converting `cpu_ticks` to seconds.
pub fn clock_ticks_per_sec() -> f64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_ticks_is_positive() {
        assert!(clock_ticks_per_sec() > 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sampling_own_process_works() {
        let s = sample(std::process::id()).expect("own /proc entry readable");
        assert!(s.peak_rss_mb > 0.0);
    }

    #[test]
    fn sampling_dead_pid_returns_none() {
        // Pid 0 never has a /proc entry of its own.
        assert!(sample(0).is_none() || cfg!(not(target_os = "linux")));
    }
}
