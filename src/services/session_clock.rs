use crate::models::TrackingState;
use chrono::{DateTime, Utc};

/// Session state machine and elapsed-time accounting, independent of
/// sample arrival. Ticked at 1 Hz by the engine while tracking; a missed
/// wall-clock second is lost rather than retroactively added.
#[derive(Debug, Clone)]
pub struct SessionClock {
    state: TrackingState,
    elapsed_seconds: u64,
    paused_seconds: u64,
    session_start: Option<DateTime<Utc>>,
    last_pause: Option<DateTime<Utc>>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            state: TrackingState::Idle,
            elapsed_seconds: 0,
            paused_seconds: 0,
            session_start: None,
            last_pause: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn paused_seconds(&self) -> u64 {
        self.paused_seconds
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    /// Transition Idle -> Tracking or Paused -> Tracking. The session
    /// start time is stamped on the very first entry into Tracking only;
    /// resuming from a pause folds the pause length into `paused_seconds`.
    pub fn start(&mut self) {
        match self.state {
            TrackingState::Idle => {
                if self.session_start.is_none() {
                    self.session_start = Some(Utc::now());
                }
                self.state = TrackingState::Tracking;
            }
            TrackingState::Paused => {
                if let Some(paused_at) = self.last_pause.take() {
                    let pause_len = Utc::now().signed_duration_since(paused_at).num_seconds();
                    self.paused_seconds += pause_len.max(0) as u64;
                }
                self.state = TrackingState::Tracking;
            }
            TrackingState::Tracking => {}
        }
    }

    /// Transition Tracking -> Paused. Pausing from any other state is a
    /// caller error and ignored.
    pub fn pause(&mut self) {
        if self.state == TrackingState::Tracking {
            self.state = TrackingState::Paused;
            self.last_pause = Some(Utc::now());
        }
    }

    /// Any state -> Idle, all counters back to their initial values
    pub fn reset(&mut self) {
        self.state = TrackingState::Idle;
        self.elapsed_seconds = 0;
        self.paused_seconds = 0;
        self.session_start = None;
        self.last_pause = None;
    }

    /// One wall-clock second passed. Counts only while Tracking, so a
    /// tick arriving after a stop or reset is harmless.
    pub fn tick(&mut self) {
        if self.state == TrackingState::Tracking {
            self.elapsed_seconds += 1;
        }
    }

    /// Seconds actually spent tracking, never negative
    pub fn active_duration(&self) -> u64 {
        self.elapsed_seconds.saturating_sub(self.paused_seconds)
    }

    #[cfg(test)]
    pub(crate) fn set_last_pause(&mut self, at: DateTime<Utc>) {
        self.last_pause = Some(at);
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
