use crate::models::{
    ExpDataPoint, StatsSnapshot, TrackerConfig, TrackingState, WindowAverage,
};
use crate::services::analytics::RateWindowAnalytics;
use crate::services::archive::SessionArchive;
use crate::services::eta::{predict_level_up, EtaEstimate};
use crate::services::reconciler::StatsReconciler;
use crate::services::session_clock::SessionClock;
use crate::services::{SampleEvent, SampleSource};
use anyhow::{bail, Result};
use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Everything the three loops mutate, behind one lock so a tick, an
/// event and a pull can never interleave partial updates.
struct EngineState {
    clock: SessionClock,
    reconciler: StatsReconciler,
    analytics: RateWindowAnalytics,
}

impl EngineState {
    fn new() -> Self {
        Self {
            clock: SessionClock::new(),
            reconciler: StatsReconciler::new(),
            analytics: RateWindowAnalytics::new(),
        }
    }

    fn refresh_rates(&mut self) {
        let active = self.clock.active_duration();
        let tracking = self.clock.state() == TrackingState::Tracking;
        self.reconciler.recompute_rates(active, tracking);
    }
}

/// Owns the session lifecycle and funnels the 1 Hz clock tick, the
/// recognition event stream and the periodic authoritative pull into the
/// single reconciliation point.
pub struct TrackingEngine<S: SampleSource> {
    state: Arc<RwLock<EngineState>>,
    archive: Arc<RwLock<SessionArchive>>,
    source: Arc<S>,
    config: TrackerConfig,
    is_running: Arc<RwLock<bool>>,
    pull_in_flight: Arc<RwLock<bool>>,
}

impl<S: SampleSource> TrackingEngine<S> {
    pub fn new(source: Arc<S>, archive: Arc<RwLock<SessionArchive>>, config: TrackerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState::new())),
            archive,
            source,
            config,
            is_running: Arc::new(RwLock::new(false)),
            pull_in_flight: Arc::new(RwLock::new(false)),
        }
    }

    /// Begin or resume tracking. Fails synchronously when no screen
    /// regions are configured; resuming from a pause only flips the
    /// clock, the loops never stopped.
    pub async fn start(&self) -> Result<()> {
        let Some(regions) = self.config.regions else {
            bail!("tracking regions are not configured");
        };

        {
            let mut state = self.state.write().await;
            match state.clock.state() {
                TrackingState::Tracking => return Ok(()),
                TrackingState::Paused => {
                    state.clock.start();
                    state.refresh_rates();
                    info!("tracking resumed");
                    return Ok(());
                }
                TrackingState::Idle => {}
            }
        }

        {
            let mut running = self.is_running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        if let Err(e) = self.source.start(regions, event_tx).await {
            *self.is_running.write().await = false;
            return Err(e);
        }

        self.archive.write().await.start_session();
        self.state.write().await.clock.start();

        self.spawn_event_loop(event_rx);
        self.spawn_tick_loop();
        self.spawn_pull_loop();

        info!("tracking started");
        Ok(())
    }

    /// Tracking -> Paused. The loops keep running; the clock simply
    /// stops counting.
    pub async fn pause(&self) {
        let mut state = self.state.write().await;
        state.clock.pause();
        state.refresh_rates();
        info!("tracking paused");
    }

    /// End the session explicitly: archive it and return to idle.
    pub async fn end_session(&self) -> Result<()> {
        self.finish().await
    }

    /// Back to idle. A reset while a session is active archives it
    /// first, same as an explicit end.
    pub async fn reset(&self) -> Result<()> {
        self.finish().await
    }

    /// Timers are torn down before state is cleared so a late tick or
    /// pull can never write into an already-reset snapshot: the running
    /// flag drops first, and every loop re-checks the clock state under
    /// the state lock before mutating.
    async fn finish(&self) -> Result<()> {
        *self.is_running.write().await = false;
        self.source.stop().await?;

        let mut state = self.state.write().await;
        let mut archive = self.archive.write().await;
        if archive.in_progress().is_some() {
            archive.update_session_duration(
                state.clock.elapsed_seconds(),
                state.clock.paused_seconds(),
            );
            let start_level = state.reconciler.gains().start_level();
            let start_exp = state.reconciler.gains().start_exp();
            archive.record_session_stats(state.reconciler.snapshot(), start_level, start_exp);
            archive.end_session().await?;
        }
        state.clock.reset();
        state.reconciler.reset();
        state.analytics.clear();
        Ok(())
    }

    pub async fn tracking_state(&self) -> TrackingState {
        self.state.read().await.clock.state()
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.state.read().await.reconciler.snapshot().clone()
    }

    /// The configured window average, or `None` when averaging is
    /// switched off.
    pub async fn window_average(&self) -> Option<WindowAverage> {
        let state = self.state.read().await;
        let snapshot = state.reconciler.snapshot();
        state.analytics.average(
            self.config.calculation_mode,
            self.config.average_window,
            Utc::now(),
            state.clock.active_duration(),
            snapshot.total_exp,
        )
    }

    pub async fn level_up_eta(&self) -> EtaEstimate {
        let state = self.state.read().await;
        let snapshot = state.reconciler.snapshot();
        predict_level_up(
            snapshot.level,
            snapshot.percentage,
            snapshot.exp_per_hour as f64,
        )
    }

    /// Single consumer for the recognition event stream. Serializing
    /// every partial update through here is what keeps interleaved
    /// field updates from losing writes.
    fn spawn_event_loop(&self, mut events: mpsc::Receiver<SampleEvent>) {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !*engine.is_running.read().await {
                    break;
                }
                let wants_pull = {
                    let mut state = engine.state.write().await;
                    if state.clock.state() == TrackingState::Idle {
                        continue;
                    }
                    state.reconciler.apply_event(event);
                    state.refresh_rates();
                    state.reconciler.take_pull_request()
                };
                if wants_pull {
                    engine.do_pull().await;
                }
            }
        });
    }

    /// 1 Hz clock. A missed second is lost, not replayed; the time-series
    /// sample rides this loop at the configured cadence.
    fn spawn_tick_loop(&self) {
        let state = Arc::clone(&self.state);
        let archive = Arc::clone(&self.archive);
        let is_running = Arc::clone(&self.is_running);
        let sample_interval = self.config.sample_interval_seconds.max(1);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick completes immediately

            loop {
                ticker.tick().await;
                if !*is_running.read().await {
                    break;
                }

                let (elapsed, paused) = {
                    let mut state = state.write().await;
                    if state.clock.state() != TrackingState::Tracking {
                        continue;
                    }
                    state.clock.tick();
                    state.refresh_rates();

                    if state.clock.elapsed_seconds() % sample_interval == 0 {
                        let snapshot = state.reconciler.snapshot();
                        let point = ExpDataPoint {
                            timestamp: Utc::now(),
                            cumulative_exp: snapshot.total_exp,
                            consumable_a_used: snapshot.consumable_a_used,
                            consumable_b_used: snapshot.consumable_b_used,
                        };
                        state.analytics.append(point);
                    }
                    (state.clock.elapsed_seconds(), state.clock.paused_seconds())
                };
                archive.write().await.update_session_duration(elapsed, paused);
            }
        });
    }

    /// Fixed-cadence authoritative pull
    fn spawn_pull_loop(&self) {
        let engine = self.clone();
        let poll_interval = self.config.poll_interval_seconds.max(1);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(poll_interval));
            loop {
                ticker.tick().await;
                if !*engine.is_running.read().await {
                    break;
                }
                engine.do_pull().await;
            }
        });
    }

    /// Pull the full stats batch and apply it wholesale. At most one
    /// pull is in flight; a request landing while one runs is coalesced
    /// away, so pulls can never apply out of arrival order.
    async fn do_pull(&self) {
        {
            let mut in_flight = self.pull_in_flight.write().await;
            if *in_flight {
                return;
            }
            *in_flight = true;
        }

        let result = self.source.poll_stats().await;

        {
            let mut state = self.state.write().await;
            if state.clock.state() != TrackingState::Idle {
                match result {
                    Ok(batch) => state.reconciler.apply_pull(batch),
                    Err(e) => {
                        error!("authoritative pull failed: {}", e);
                        state.reconciler.record_failure(e.to_string());
                    }
                }
                state.refresh_rates();
            }
        }

        *self.pull_in_flight.write().await = false;
    }
}

impl<S: SampleSource> Clone for TrackingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            archive: Arc::clone(&self.archive),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            is_running: Arc::clone(&self.is_running),
            pull_in_flight: Arc::clone(&self.pull_in_flight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, RegionConfig};
    use crate::services::SampleBatch;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Stub backend that answers pulls from a fixed batch and never
    /// emits events on its own.
    struct FixedSource {
        batch: RwLock<Result<SampleBatch, String>>,
    }

    impl FixedSource {
        fn new(batch: SampleBatch) -> Self {
            Self { batch: RwLock::new(Ok(batch)) }
        }

        fn failing(message: &str) -> Self {
            Self { batch: RwLock::new(Err(message.to_string())) }
        }
    }

    #[async_trait]
    impl SampleSource for FixedSource {
        async fn start(
            &self,
            _regions: RegionConfig,
            _events: mpsc::Sender<SampleEvent>,
        ) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn poll_stats(&self) -> Result<SampleBatch> {
            match &*self.batch.read().await {
                Ok(batch) => Ok(batch.clone()),
                Err(message) => Err(anyhow::anyhow!(message.clone())),
            }
        }
    }

    fn test_regions() -> RegionConfig {
        let r = Region { x: 0, y: 0, width: 10, height: 10 };
        RegionConfig { level: r, exp: r, consumable_a: r, consumable_b: r }
    }

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            regions: Some(test_regions()),
            ..TrackerConfig::default()
        }
    }

    fn engine_with(
        dir: &TempDir,
        source: FixedSource,
        config: TrackerConfig,
    ) -> TrackingEngine<FixedSource> {
        let archive = SessionArchive::new(dir.path().join("sessions.json"), 100);
        TrackingEngine::new(Arc::new(source), Arc::new(RwLock::new(archive)), config)
    }

    #[tokio::test]
    async fn test_start_without_regions_fails() {
        let dir = TempDir::new().unwrap();
        let config = TrackerConfig::default(); // no regions
        let engine = engine_with(&dir, FixedSource::new(SampleBatch::default()), config);

        let err = engine.start().await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert_eq!(engine.tracking_state().await, TrackingState::Idle);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(&dir, FixedSource::new(SampleBatch::default()), test_config());

        engine.start().await.unwrap();
        assert_eq!(engine.tracking_state().await, TrackingState::Tracking);

        engine.pause().await;
        assert_eq!(engine.tracking_state().await, TrackingState::Paused);

        engine.start().await.unwrap();
        assert_eq!(engine.tracking_state().await, TrackingState::Tracking);

        engine.end_session().await.unwrap();
        assert_eq!(engine.tracking_state().await, TrackingState::Idle);
    }

    #[tokio::test]
    async fn test_pull_populates_snapshot() {
        let dir = TempDir::new().unwrap();
        let batch = SampleBatch {
            level: Some(126),
            exp: Some(5_000),
            percentage: Some(50.0),
            consumable_a_count: Some(80),
            consumable_b_count: Some(90),
        };
        let engine = engine_with(&dir, FixedSource::new(batch), test_config());

        engine.start().await.unwrap();
        // Two pulls so the level reading is confirmed
        engine.do_pull().await;
        engine.do_pull().await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.level, Some(126));
        assert_eq!(snapshot.exp, Some(5_000));
        assert!(snapshot.is_live);

        engine.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_failure_degrades_to_stale() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(&dir, FixedSource::failing("capture timed out"), test_config());

        engine.start().await.unwrap();
        engine.do_pull().await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.error.as_deref(), Some("capture timed out"));
        assert!(!snapshot.is_live);
        // Still tracking; the failure is non-fatal
        assert_eq!(engine.tracking_state().await, TrackingState::Tracking);

        engine.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_end_session_archives_record() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(&dir, FixedSource::new(SampleBatch::default()), test_config());

        engine.start().await.unwrap();
        engine.end_session().await.unwrap();

        let archive = Arc::clone(&engine.archive);
        let archive = archive.read().await;
        assert_eq!(archive.total_sessions(), 1);
        // No exp reading ever arrived
        assert_eq!(archive.all_sessions()[0].exp_gained, None);
    }

    #[tokio::test]
    async fn test_reset_clears_snapshot_and_archives() {
        let dir = TempDir::new().unwrap();
        let batch = SampleBatch {
            level: Some(60),
            exp: Some(100),
            percentage: Some(1.0),
            consumable_a_count: None,
            consumable_b_count: None,
        };
        let engine = engine_with(&dir, FixedSource::new(batch), test_config());

        engine.start().await.unwrap();
        engine.do_pull().await;
        engine.do_pull().await;
        assert_eq!(engine.snapshot().await.level, Some(60));

        engine.reset().await.unwrap();
        assert_eq!(engine.snapshot().await, StatsSnapshot::default());
        assert_eq!(engine.archive.read().await.total_sessions(), 1);

        // A second reset with nothing in progress archives nothing more
        engine.reset().await.unwrap();
        assert_eq!(engine.archive.read().await.total_sessions(), 1);
    }

    #[tokio::test]
    async fn test_eta_unknown_before_data() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(&dir, FixedSource::new(SampleBatch::default()), test_config());
        assert_eq!(engine.level_up_eta().await, EtaEstimate::Unknown);
    }

    #[tokio::test]
    async fn test_window_average_respects_none_window() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.average_window = crate::models::AverageWindow::None;
        let engine = engine_with(&dir, FixedSource::new(SampleBatch::default()), config);
        assert!(engine.window_average().await.is_none());
    }
}
