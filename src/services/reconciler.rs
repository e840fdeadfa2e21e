use crate::models::StatsSnapshot;
use crate::services::eta::LEVEL_EXP;
use crate::services::{SampleBatch, SampleEvent};
use log::{debug, warn};

/// Reading of the experience field at one instant. `exp` is the value
/// shown within the current level, not a lifetime total.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ExpReading {
    level: u32,
    exp: u64,
    percentage: f64,
}

/// Cumulative exp/percentage gained since session start, with level-up
/// transition accounting and rejection of implausible readings.
#[derive(Debug, Clone, Default)]
pub struct GainLedger {
    initial: Option<ExpReading>,
    last: Option<ExpReading>,
    start_level: Option<u32>,
    start_exp: Option<u64>,
    completed_exp: u64,
    completed_percentage: f64,
}

impl GainLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_level(&self) -> Option<u32> {
        self.start_level
    }

    pub fn start_exp(&self) -> Option<u64> {
        self.start_exp
    }

    pub fn total_exp(&self) -> u64 {
        match (&self.initial, &self.last) {
            (Some(initial), Some(last)) => {
                last.exp.saturating_sub(initial.exp) + self.completed_exp
            }
            _ => 0,
        }
    }

    pub fn total_percentage(&self) -> f64 {
        match (&self.initial, &self.last) {
            (Some(initial), Some(last)) => {
                last.percentage - initial.percentage + self.completed_percentage
            }
            _ => 0.0,
        }
    }

    /// Fold one confirmed reading into the ledger. The first reading
    /// becomes the session baseline. Implausible readings are dropped
    /// and the previous good reading stands.
    pub fn observe(&mut self, level: u32, exp: u64, percentage: f64) {
        let reading = ExpReading { level, exp, percentage };

        let Some(last) = self.last else {
            self.initial = Some(reading);
            self.last = Some(reading);
            self.start_level = Some(level);
            self.start_exp = Some(exp);
            return;
        };

        if self.is_misread(&last, &reading) {
            return;
        }

        if reading.level > last.level {
            self.apply_level_up(&reading);
        }

        self.last = Some(reading);
    }

    /// Recognition noise heuristics: exp never decreases within a level,
    /// and a jump of more than 10x (or a crash below a tenth) of a
    /// meaningful previous value is a misread digit, not a real gain.
    fn is_misread(&self, last: &ExpReading, reading: &ExpReading) -> bool {
        if reading.level != last.level {
            return false;
        }
        if reading.exp < last.exp {
            warn!(
                "rejecting exp drop within level {}: {} -> {}",
                last.level, last.exp, reading.exp
            );
            return true;
        }
        if last.exp > 1_000 {
            let ratio = reading.exp as f64 / last.exp as f64;
            if !(0.1..=10.0).contains(&ratio) {
                warn!(
                    "rejecting implausible exp jump at level {}: {} -> {} (ratio {:.2})",
                    last.level, last.exp, reading.exp, ratio
                );
                return true;
            }
        }
        false
    }

    /// Crossing a level boundary banks the exp remainder of the old
    /// level plus everything already earned in the new one, and the
    /// percentage remainder up to 100, then rebases the session baseline
    /// so the running diffs restart from the new reading.
    fn apply_level_up(&mut self, reading: &ExpReading) {
        let Some(initial) = self.initial else { return };

        let prev_level = initial.level as usize;
        let remainder = if prev_level + 1 < LEVEL_EXP.len() {
            let span = LEVEL_EXP[prev_level + 1].saturating_sub(LEVEL_EXP[prev_level]);
            span.saturating_sub(initial.exp)
        } else {
            debug!("no table span for level {}, counting new-level exp only", prev_level);
            0
        };

        self.completed_exp += remainder + reading.exp;
        self.completed_percentage += 100.0 - initial.percentage;
        self.initial = Some(*reading);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// How many units a single update may plausibly consume; anything above
/// this is a misread count.
const MAX_USAGE_PER_UPDATE: u32 = 10;
/// Consecutive identical readings required before accepting a count
/// increase (a restock) as the new baseline.
const INCREASE_CONFIRMATIONS: u8 = 5;

/// Usage accounting for one consumable slot, inferred from count
/// decreases.
#[derive(Debug, Clone, Default)]
pub struct ConsumableLedger {
    last_count: Option<u32>,
    total_used: u32,
    pending_increase: Option<(u32, u8)>,
}

impl ConsumableLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_used(&self) -> u32 {
        self.total_used
    }

    /// Fold one count reading into the ledger and return the running
    /// usage total.
    pub fn observe(&mut self, count: u32) -> u32 {
        let Some(last) = self.last_count else {
            self.last_count = Some(count);
            return self.total_used;
        };

        if count < last {
            let used = last - count;
            if used > MAX_USAGE_PER_UPDATE {
                warn!("rejecting consumable misread: {} -> {} (-{})", last, count, used);
            } else {
                self.total_used += used;
                self.last_count = Some(count);
            }
        } else if count > last {
            // A count increase is only real after it holds steady; a
            // single inflated reading is a misread.
            match self.pending_increase {
                Some((pending, seen)) if pending == count => {
                    if seen + 1 >= INCREASE_CONFIRMATIONS {
                        debug!("consumable restock confirmed: {} -> {}", last, count);
                        self.last_count = Some(count);
                        self.pending_increase = None;
                    } else {
                        self.pending_increase = Some((count, seen + 1));
                    }
                }
                _ => {
                    self.pending_increase = Some((count, 1));
                }
            }
        } else if self.pending_increase.is_some() {
            // Value reverted mid-confirmation
            self.pending_increase = None;
        }

        self.total_used
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Consecutive identical level readings required before a level value is
/// trusted.
const LEVEL_CONFIRMATIONS: u32 = 2;

/// Merges independently-arriving partial updates and periodic
/// authoritative pulls into one coherent snapshot. Single-writer: the
/// engine funnels every event and pull result through here in order.
#[derive(Debug, Default)]
pub struct StatsReconciler {
    snapshot: StatsSnapshot,
    gains: GainLedger,
    consumable_a: ConsumableLedger,
    consumable_b: ConsumableLedger,
    pending_level: Option<(u32, u32)>,
    pull_requested: bool,
}

impl StatsReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &StatsSnapshot {
        &self.snapshot
    }

    pub fn gains(&self) -> &GainLedger {
        &self.gains
    }

    /// Apply one partial update. Only the touched field changes; derived
    /// rates are left to the next authoritative pull, which this
    /// flags as wanted.
    pub fn apply_event(&mut self, event: SampleEvent) {
        match event {
            SampleEvent::LevelChanged(level) => self.observe_level(level),
            SampleEvent::ExpChanged { exp, percentage } => self.observe_exp(exp, percentage),
            SampleEvent::ConsumableAChanged(count) => {
                self.snapshot.consumable_a_count = Some(count);
                self.snapshot.consumable_a_used = self.consumable_a.observe(count);
            }
            SampleEvent::ConsumableBChanged(count) => {
                self.snapshot.consumable_b_count = Some(count);
                self.snapshot.consumable_b_used = self.consumable_b.observe(count);
            }
        }
        self.pull_requested = true;
    }

    /// Replace the snapshot wholesale from an authoritative read. Fields
    /// the backend could not read this round keep their last-known
    /// values; nothing is merged field-by-field with in-flight events.
    pub fn apply_pull(&mut self, batch: SampleBatch) {
        if let Some(level) = batch.level {
            self.observe_level(level);
        }
        if let (Some(exp), Some(percentage)) = (batch.exp, batch.percentage) {
            self.observe_exp(exp, percentage);
        }
        if let Some(count) = batch.consumable_a_count {
            self.snapshot.consumable_a_count = Some(count);
            self.snapshot.consumable_a_used = self.consumable_a.observe(count);
        }
        if let Some(count) = batch.consumable_b_count {
            self.snapshot.consumable_b_count = Some(count);
            self.snapshot.consumable_b_used = self.consumable_b.observe(count);
        }
        self.snapshot.error = None;
        self.snapshot.is_live = true;
    }

    /// A transient backend failure: keep every last-known value, surface
    /// the error, and mark the snapshot stale.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.snapshot.error = Some(error.into());
        self.snapshot.is_live = false;
    }

    /// Recompute every derived rate from the totals and the active
    /// session duration. Centralized so partial updates can never leave
    /// rates computed against mismatched inputs.
    pub fn recompute_rates(&mut self, active_seconds: u64, is_tracking: bool) {
        self.snapshot.total_exp = self.gains.total_exp();
        self.snapshot.total_percentage = self.gains.total_percentage();
        self.snapshot.elapsed_seconds = active_seconds;
        self.snapshot.is_tracking = is_tracking;

        if active_seconds > 0 {
            self.snapshot.exp_per_hour = self.snapshot.total_exp * 3600 / active_seconds;
            self.snapshot.percentage_per_hour =
                self.snapshot.total_percentage * 3600.0 / active_seconds as f64;
            self.snapshot.consumable_a_per_minute =
                self.snapshot.consumable_a_used as f64 * 60.0 / active_seconds as f64;
            self.snapshot.consumable_b_per_minute =
                self.snapshot.consumable_b_used as f64 * 60.0 / active_seconds as f64;
        } else {
            self.snapshot.exp_per_hour = 0;
            self.snapshot.percentage_per_hour = 0.0;
            self.snapshot.consumable_a_per_minute = 0.0;
            self.snapshot.consumable_b_per_minute = 0.0;
        }
    }

    /// Whether a fresh authoritative pull has been requested since the
    /// last call. Clears the flag.
    pub fn take_pull_request(&mut self) -> bool {
        std::mem::take(&mut self.pull_requested)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn observe_level(&mut self, level: u32) {
        // A level reading must repeat before it is trusted; single
        // glitched digits otherwise corrupt the gain accounting.
        match self.pending_level {
            Some((pending, seen)) if pending == level => {
                if seen + 1 >= LEVEL_CONFIRMATIONS {
                    self.snapshot.level = Some(level);
                } else {
                    self.pending_level = Some((level, seen + 1));
                }
            }
            _ => {
                self.pending_level = Some((level, 1));
            }
        }
    }

    fn observe_exp(&mut self, exp: u64, percentage: f64) {
        self.snapshot.exp = Some(exp);
        self.snapshot.percentage = Some(percentage);
        if let Some(level) = self.snapshot.level {
            self.gains.observe(level, exp, percentage);
        }
    }
}
