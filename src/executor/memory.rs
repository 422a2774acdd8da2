//! Process memory diagnostics, read from `/proc/self/status`.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub resident_bytes: Option<u64>,
    pub peak_resident_bytes: Option<u64>,
}

impl MemoryUsage {
    /// Current usage; empty on platforms without procfs.
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/self/status")
                .map(|status| Self::parse(&status))
                .unwrap_or_default()
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::default()
        }
    }

    fn parse(status: &str) -> Self {
        let kib = |prefix: &str| -> Option<u64> {
            status.lines().find_map(|line| {
                let rest = line.strip_prefix(prefix)?;
                let value = rest.split_whitespace().next()?.parse::<u64>().ok()?;
                Some(value.saturating_mul(1024))
            })
        };
        Self {
            resident_bytes: kib("VmRSS:"),
            peak_resident_bytes: kib("VmHWM:"),
        }
    }

    pub fn log(&self) {
        let mib = |bytes: Option<u64>| bytes.map(|b| b / (1024 * 1024));
        tracing::warn!(
            resident_mib = ?mib(self.resident_bytes),
            peak_resident_mib = ?mib(self.peak_resident_bytes),
            "memory usage after query execution"
        );
    }
}
