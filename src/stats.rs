//! Process statistics snapshot for the stats command.

use std::time::{Duration, Instant};

use crate::common::logger::get_ram_usage;
use crate::messaging::{Card, CommandOutcome};
use crate::playback::PlaybackEngine;

/// Tracks process start time and produces stat snapshots.
pub struct StatsMonitor {
    started: Instant,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Snapshot of uptime, memory, and live playback counts across all
    /// guild sessions.
    pub async fn report(&self, engine: &PlaybackEngine) -> CommandOutcome {
        let sessions = engine.session_count();

        CommandOutcome::ok(
            Card::new("Bot Statistics", "Current process health")
                .field("Uptime", format_uptime(self.uptime()), true)
                .field("Memory", get_ram_usage(), true)
                .field("Active sessions", sessions.to_string(), true),
        )
    }
}

impl Default for StatsMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Format an uptime as `1d 2h 3m 4s`, skipping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 || !parts.is_empty() {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 || !parts.is_empty() {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3_605)), "1h 0m 5s");
        assert_eq!(
            format_uptime(Duration::from_secs(90_061)),
            "1d 1h 1m 1s"
        );
    }
}
