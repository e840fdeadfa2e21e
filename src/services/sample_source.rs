use crate::models::RegionConfig;
use crate::services::eta::LEVEL_EXP;
use crate::services::{SampleBatch, SampleEvent, SampleSource};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Simulated recognition backend for development and testing: emits a
/// plausible stream of level/exp/consumable readings without any screen
/// capture. Stands in for the external recognition engine behind the
/// same trait.
pub struct SimulatedSampleSource {
    state: Arc<RwLock<SimState>>,
}

#[derive(Debug, Clone)]
struct SimState {
    running: bool,
    level: u32,
    exp_in_level: u64,
    consumable_a: u32,
    consumable_b: u32,
}

impl SimState {
    fn new(level: u32) -> Self {
        Self {
            running: false,
            level,
            exp_in_level: 0,
            consumable_a: 300,
            consumable_b: 300,
        }
    }

    fn level_span(&self) -> u64 {
        let level = self.level as usize;
        if level + 1 < LEVEL_EXP.len() {
            LEVEL_EXP[level + 1].saturating_sub(LEVEL_EXP[level]).max(1)
        } else {
            u64::MAX
        }
    }

    fn percentage(&self) -> f64 {
        self.exp_in_level as f64 / self.level_span() as f64 * 100.0
    }
}

impl SimulatedSampleSource {
    pub fn new(starting_level: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimState::new(starting_level))),
        }
    }

    /// One simulated recognition round: grind some exp, occasionally
    /// drink a consumable, level up when the span fills.
    async fn advance(state: &Arc<RwLock<SimState>>) -> Vec<SampleEvent> {
        let mut sim = state.write().await;
        let mut events = Vec::new();

        let span = sim.level_span();
        // Roughly a level every few minutes at low levels
        let gain = (span / 120).max(10) + (rand::random::<u64>() % 50);
        sim.exp_in_level += gain;
        if sim.exp_in_level >= span && sim.level < 199 {
            sim.exp_in_level -= span;
            sim.level += 1;
            debug!("simulated level up -> {}", sim.level);
        }

        events.push(SampleEvent::LevelChanged(sim.level));
        events.push(SampleEvent::ExpChanged {
            exp: sim.exp_in_level,
            percentage: sim.percentage(),
        });

        if rand::random::<f64>() < 0.3 && sim.consumable_a > 0 {
            sim.consumable_a -= 1;
            events.push(SampleEvent::ConsumableAChanged(sim.consumable_a));
        }
        if rand::random::<f64>() < 0.2 && sim.consumable_b > 0 {
            sim.consumable_b -= 1;
            events.push(SampleEvent::ConsumableBChanged(sim.consumable_b));
        }

        events
    }
}

#[async_trait]
impl SampleSource for SimulatedSampleSource {
    async fn start(
        &self,
        _regions: RegionConfig,
        events: tokio::sync::mpsc::Sender<SampleEvent>,
    ) -> Result<()> {
        {
            let mut sim = self.state.write().await;
            if sim.running {
                return Ok(());
            }
            sim.running = true;
        }
        info!("simulated sample source started");

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                if !state.read().await.running {
                    break;
                }
                for event in Self::advance(&state).await {
                    // Receiver gone means the engine shut down
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                sleep(Duration::from_millis(500)).await;
            }
            // Dropping the sender lets the engine's event loop finish
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.write().await.running = false;
        info!("simulated sample source stopped");
        Ok(())
    }

    async fn poll_stats(&self) -> Result<SampleBatch> {
        let sim = self.state.read().await;
        Ok(SampleBatch {
            level: Some(sim.level),
            exp: Some(sim.exp_in_level),
            percentage: Some(sim.percentage()),
            consumable_a_count: Some(sim.consumable_a),
            consumable_b_count: Some(sim.consumable_b),
        })
    }
}
