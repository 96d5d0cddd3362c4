use serde::Serialize;

/// Point-in-time copy of the run counters, printed as the final tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub directories: u64,
    pub files: u64,
    pub converted: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed: u64,
    pub images: u64,
    pub texts: u64,
    pub videos: u64,
}

impl StatsSnapshot {
    /// Files the run has fully accounted for, one way or another.
    pub fn settled(&self) -> u64 {
        self.converted + self.duplicates + self.skipped + self.failed
    }
}
