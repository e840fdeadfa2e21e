pub mod analytics;
pub mod archive;
pub mod engine;
pub mod eta;
pub mod reconciler;
pub mod sample_source;
pub mod session_clock;

use crate::models::RegionConfig;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Discrete recognition event for a single on-screen field.
/// Events for different fields arrive independently and in any order.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleEvent {
    LevelChanged(u32),
    ExpChanged { exp: u64, percentage: f64 },
    ConsumableAChanged(u32),
    ConsumableBChanged(u32),
}

/// Authoritative full read of every tracked field, shaped like the
/// snapshot the reconciler maintains. Fields the backend could not read
/// this round come back as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    pub level: Option<u32>,
    pub exp: Option<u64>,
    pub percentage: Option<f64>,
    pub consumable_a_count: Option<u32>,
    pub consumable_b_count: Option<u32>,
}

/// Seam to the external recognition backend. The engine never sees
/// pixels; it consumes typed events pushed into the channel handed to
/// `start`, plus the pollable authoritative batch.
#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    /// Begin emitting recognition events for the configured regions
    async fn start(&self, regions: RegionConfig, events: mpsc::Sender<SampleEvent>) -> Result<()>;

    /// Stop emitting events; idempotent
    async fn stop(&self) -> Result<()>;

    /// Read every field in one pass. May fail transiently; the caller
    /// degrades to stale-but-present state rather than clearing data.
    async fn poll_stats(&self) -> Result<SampleBatch>;
}
