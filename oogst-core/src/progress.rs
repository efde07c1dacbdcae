use crate::frontier::FrontierStats;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

/// One poll of the frontier, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stats: FrontierStats,
    pub window: Duration,
    pub taken_at: DateTime<Local>,
}

impl ProgressSnapshot {
    pub fn new(stats: FrontierStats, window: Duration) -> Self {
        Self::at(stats, window, Local::now())
    }

    pub fn at(stats: FrontierStats, window: Duration, taken_at: DateTime<Local>) -> Self {
        Self {
            stats,
            window,
            taken_at,
        }
    }

    /// Share of entries processed, 0.0 for an empty frontier.
    pub fn percent(&self) -> f64 {
        if self.stats.total == 0 {
            return 0.0;
        }
        self.stats.processed as f64 / self.stats.total as f64 * 100.0
    }

    /// Nothing left to process, including an empty frontier.
    pub fn is_complete(&self) -> bool {
        self.stats.unprocessed == 0
    }

    /// Time left at the recent processing rate, if anything was processed
    /// within the window.
    pub fn eta(&self) -> Option<Duration> {
        if self.stats.recently_processed == 0 || self.window.is_zero() {
            return None;
        }
        let per_entry = self.window.as_secs_f64() / self.stats.recently_processed as f64;
        Some(Duration::from_secs_f64(per_entry * self.stats.unprocessed as f64))
    }

    /// `[14:30:00] Total: 1,234 | Processed: ... | Recent: 12`
    pub fn render_line(&self) -> String {
        format!(
            "[{}] Total: {} | Processed: {} | Remaining: {} | Progress: {:.1}% | Recent: {}",
            self.taken_at.format("%H:%M:%S"),
            group_thousands(self.stats.total),
            group_thousands(self.stats.processed),
            group_thousands(self.stats.unprocessed),
            self.percent(),
            self.stats.recently_processed
        )
    }
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// `1h 05m`, `12m 30s` or `45s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(total: u64, processed: u64, recent: u64) -> FrontierStats {
        FrontierStats {
            total,
            processed,
            unprocessed: total - processed,
            recently_processed: recent,
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_percent_of_empty_frontier() {
        let snapshot = ProgressSnapshot::new(stats(0, 0, 0), Duration::from_secs(600));
        assert_eq!(snapshot.percent(), 0.0);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_render_line() {
        let taken_at = Local.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        let snapshot = ProgressSnapshot::at(stats(2000, 500, 12), Duration::from_secs(600), taken_at);
        assert_eq!(
            snapshot.render_line(),
            "[14:30:00] Total: 2,000 | Processed: 500 | Remaining: 1,500 | Progress: 25.0% | Recent: 12"
        );
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn test_eta_uses_recent_rate() {
        let snapshot = ProgressSnapshot::new(stats(100, 40, 10), Duration::from_secs(600));
        // 60s per entry, 60 left
        assert_eq!(snapshot.eta(), Some(Duration::from_secs(3600)));

        let idle = ProgressSnapshot::new(stats(100, 40, 0), Duration::from_secs(600));
        assert_eq!(idle.eta(), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(750)), "12m 30s");
        assert_eq!(format_duration(Duration::from_secs(3900)), "1h 05m");
    }
}
