use crate::models::{AverageWindow, CalculationMode, ExpDataPoint, WindowAverage};
use chrono::{DateTime, Duration, Utc};

/// Retention horizon for the sample series
const RETENTION_HOURS: i64 = 24;

/// Rolling time-series of cumulative-exp samples and the two selectable
/// window-average algorithms computed over it.
#[derive(Debug, Clone, Default)]
pub struct RateWindowAnalytics {
    points: Vec<ExpDataPoint>,
}

impl RateWindowAnalytics {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Append one sample and drop everything older than the retention
    /// horizon. Samples are produced at a fixed cadence while tracking,
    /// so the series stays bounded.
    pub fn append(&mut self, point: ExpDataPoint) {
        let cutoff = point.timestamp - Duration::hours(RETENTION_HOURS);
        self.points.retain(|p| p.timestamp >= cutoff);
        self.points.push(point);
    }

    /// Drop the whole series (session reset)
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Compute the configured window average. Returns `None` when the
    /// window selection disables averaging; otherwise a plain integer
    /// the presentation layer formats.
    pub fn average(
        &self,
        mode: CalculationMode,
        window: AverageWindow,
        now: DateTime<Utc>,
        elapsed_seconds: u64,
        total_exp: u64,
    ) -> Option<WindowAverage> {
        let window_seconds = window.seconds()?;

        let value = match mode {
            CalculationMode::PerInterval => {
                self.per_interval(window_seconds, now, elapsed_seconds, total_exp)
            }
            CalculationMode::Prediction => {
                self.prediction(window_seconds, now, elapsed_seconds, total_exp)
            }
        };

        Some(WindowAverage {
            label: format!("{} ({})", window.label(), mode.suffix()),
            value,
        })
    }

    /// Actual gain in the trailing window. Exact when at least two
    /// samples fall inside it; a linear estimate from the whole session
    /// until enough history exists.
    fn per_interval(
        &self,
        window_seconds: u64,
        now: DateTime<Utc>,
        elapsed_seconds: u64,
        total_exp: u64,
    ) -> u64 {
        if elapsed_seconds == 0 {
            return 0;
        }

        let in_window = self.points_since(now - Duration::seconds(window_seconds as i64));
        if in_window.len() >= 2 {
            let first = in_window[0].cumulative_exp;
            let last = in_window[in_window.len() - 1].cumulative_exp;
            return last.saturating_sub(first);
        }

        let span = elapsed_seconds.min(window_seconds);
        (span as f64 * (total_exp as f64 / elapsed_seconds as f64)).floor() as u64
    }

    /// Extrapolate from the trailing tenth of the window to the full
    /// window. Falls back to projecting the whole-session rate whenever
    /// the sub-window has too little data.
    fn prediction(
        &self,
        window_seconds: u64,
        now: DateTime<Utc>,
        elapsed_seconds: u64,
        total_exp: u64,
    ) -> u64 {
        if elapsed_seconds == 0 {
            return 0;
        }

        let session_rate_projection =
            ((total_exp as f64 / elapsed_seconds as f64) * window_seconds as f64).floor() as u64;

        let sub_window = window_seconds / 10;
        if elapsed_seconds < sub_window {
            return session_rate_projection;
        }

        let in_sub = self.points_since(now - Duration::seconds(sub_window as i64));
        if in_sub.len() >= 2 {
            let first = &in_sub[0];
            let last = &in_sub[in_sub.len() - 1];
            let dt = last
                .timestamp
                .signed_duration_since(first.timestamp)
                .num_seconds();
            if dt > 0 {
                let gained = last.cumulative_exp.saturating_sub(first.cumulative_exp);
                let rate = gained as f64 / dt as f64;
                return (rate * window_seconds as f64).floor() as u64;
            }
        }

        session_rate_projection
    }

    fn points_since(&self, cutoff: DateTime<Utc>) -> &[ExpDataPoint] {
        // Series is append-only in timestamp order; find the first
        // in-window index and slice.
        let idx = self.points.partition_point(|p| p.timestamp < cutoff);
        &self.points[idx..]
    }
}
