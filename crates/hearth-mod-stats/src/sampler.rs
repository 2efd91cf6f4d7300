//! Interval-gated host sampling on top of `sysinfo`.

use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Host and process figures from the most recent refresh.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Global CPU usage in percent; NaN until the first refresh.
    pub cpu: f32,
    pub mem_total: u64,
    pub mem_used: u64,
    /// Resident set size of this process.
    pub rss: Option<u64>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            cpu: f32::NAN,
            mem_total: 0,
            mem_used: 0,
            rss: None,
        }
    }
}

pub struct Sampler {
    sys: System,
    pid: Pid,
    interval: Duration,
    last: Option<Instant>,
    sample: Sample,
}

impl Sampler {
    pub fn new(interval: Duration) -> Self {
        let mut sys = System::new();
        // The first CPU reading is always zero; take it now.
        sys.refresh_cpu_usage();
        Self {
            sys,
            pid: Pid::from_u32(std::process::id()),
            interval,
            last: None,
            sample: Sample::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh if `interval` has passed since the last refresh. Returns
    /// whether it did.
    pub fn maybe_refresh(&mut self, now: Instant) -> bool {
        let due = self.last.map_or(true, |last| {
            now.checked_duration_since(last)
                .is_some_and(|since| since >= self.interval)
        });
        if due {
            self.refresh(now);
        }
        due
    }

    pub fn refresh(&mut self, now: Instant) {
        self.last = Some(now);
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);

        self.sample.cpu = self.sys.global_cpu_usage();
        self.sample.mem_total = self.sys.total_memory();
        self.sample.mem_used = self.sys.used_memory();
        self.sample.rss = self.sys.process(self.pid).map(|p| p.memory());
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }
}

/// Binary-unit rendering used in log lines, e.g. `"1.5 GiB"`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_gated_by_interval() {
        let mut sampler = Sampler::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(sampler.maybe_refresh(now));
        assert!(!sampler.maybe_refresh(now + Duration::from_secs(1)));
        assert!(sampler.maybe_refresh(now + Duration::from_secs(61)));
    }

    #[test]
    fn refresh_reads_memory_and_own_process() {
        let mut sampler = Sampler::new(Duration::from_secs(1));
        assert!(sampler.sample().cpu.is_nan());
        sampler.refresh(Instant::now());
        assert!(sampler.sample().mem_total > 0);
        assert!(sampler.sample().rss.is_some());
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(384 * 1024 * 1024), "384.0 MiB");
        assert_eq!(human_bytes(3 << 40), "3.0 TiB");
        assert_eq!(human_bytes(5000 << 40), "5000.0 TiB");
    }
}
