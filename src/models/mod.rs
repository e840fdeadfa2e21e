use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a tracking session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Tracking,
    Paused,
}

/// One coherent view of everything the recognition backend has told us,
/// plus the rates derived from it. Replaced wholesale on every
/// reconciliation; never mutated field-by-field from outside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub level: Option<u32>,
    pub exp: Option<u64>,
    pub percentage: Option<f64>,
    pub total_exp: u64,
    pub total_percentage: f64,
    pub elapsed_seconds: u64,
    pub exp_per_hour: u64,
    pub percentage_per_hour: f64,
    pub consumable_a_count: Option<u32>,
    pub consumable_b_count: Option<u32>,
    pub consumable_a_used: u32,
    pub consumable_b_used: u32,
    pub consumable_a_per_minute: f64,
    pub consumable_b_per_minute: f64,
    pub error: Option<String>,
    pub is_live: bool,
    pub is_tracking: bool,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            level: None,
            exp: None,
            percentage: None,
            total_exp: 0,
            total_percentage: 0.0,
            elapsed_seconds: 0,
            exp_per_hour: 0,
            percentage_per_hour: 0.0,
            consumable_a_count: None,
            consumable_b_count: None,
            consumable_a_used: 0,
            consumable_b_used: 0,
            consumable_a_per_minute: 0.0,
            consumable_b_per_minute: 0.0,
            error: None,
            is_live: false,
            is_tracking: false,
        }
    }
}

/// Point-in-time sample for the rolling rate-window series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpDataPoint {
    pub timestamp: DateTime<Utc>,
    pub cumulative_exp: u64,
    pub consumable_a_used: u32,
    pub consumable_b_used: u32,
}

/// An archived (or in-progress) grinding session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub paused_seconds: u64,
    pub start_level: Option<u32>,
    pub end_level: Option<u32>,
    pub start_exp: Option<u64>,
    pub end_exp: Option<u64>,
    pub exp_gained: Option<u64>,
    pub avg_exp_per_second: f64,
    pub consumable_a_used: u32,
    pub consumable_b_used: u32,
    /// Where the session was ground out, when the caller knows it
    pub map_location: Option<String>,
}

impl SessionRecord {
    /// Combat time excluding pauses
    pub fn active_seconds(&self) -> u64 {
        self.duration_seconds.saturating_sub(self.paused_seconds)
    }
}

/// Trailing time span a rate average is computed over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AverageWindow {
    None,
    OneMinute,
    FiveMinutes,
    TenMinutes,
    ThirtyMinutes,
    OneHour,
}

impl AverageWindow {
    /// Window length in seconds; `None` disables averaging entirely
    pub fn seconds(&self) -> Option<u64> {
        match self {
            AverageWindow::None => None,
            AverageWindow::OneMinute => Some(60),
            AverageWindow::FiveMinutes => Some(5 * 60),
            AverageWindow::TenMinutes => Some(10 * 60),
            AverageWindow::ThirtyMinutes => Some(30 * 60),
            AverageWindow::OneHour => Some(60 * 60),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AverageWindow::None => "off",
            AverageWindow::OneMinute => "1 min",
            AverageWindow::FiveMinutes => "5 min",
            AverageWindow::TenMinutes => "10 min",
            AverageWindow::ThirtyMinutes => "30 min",
            AverageWindow::OneHour => "1 hour",
        }
    }
}

/// How the window average is computed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CalculationMode {
    /// Extrapolate from a short early sub-window to the full window
    Prediction,
    /// Exact gain observed within the trailing window
    PerInterval,
}

impl CalculationMode {
    pub fn suffix(&self) -> &'static str {
        match self {
            CalculationMode::Prediction => "prediction",
            CalculationMode::PerInterval => "per-interval",
        }
    }
}

/// Computed window average handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAverage {
    pub label: String,
    pub value: u64,
}

impl fmt::Display for WindowAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

/// Screen-space rectangle the recognition backend reads pixels from.
/// Opaque to the engine; only carried through to the sample source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// The four regions tracking needs before it can start
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionConfig {
    pub level: Region,
    pub exp: Region,
    pub consumable_a: Region,
    pub consumable_b: Region,
}

/// Tracker configuration, persisted separately from session data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Authoritative pull cadence in seconds
    pub poll_interval_seconds: u64,
    /// Rate-window series sampling cadence in seconds
    pub sample_interval_seconds: u64,
    /// Archived sessions retained beyond this are dropped oldest-first
    pub archive_limit: usize,
    pub average_window: AverageWindow,
    pub calculation_mode: CalculationMode,
    pub regions: Option<RegionConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 3,
            sample_interval_seconds: 60,
            archive_limit: 100,
            average_window: AverageWindow::FiveMinutes,
            calculation_mode: CalculationMode::PerInterval,
            regions: None,
        }
    }
}
