use std::time::{Duration, Instant};

/// One loop iteration's worth of signals, consumed immediately.
#[derive(Debug, Clone, Copy)]
pub struct ObservationEvent {
    pub motion: bool,
    pub presence: bool,
    pub observed_at: Instant,
}

/// A state update that should reach the remote store. The record written
/// downstream carries a server-assigned timestamp, so the emission itself is
/// just the two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub motion: bool,
    pub presence: bool,
}

/// Debounced change reporting: an edge trigger for low latency on change,
/// plus a heartbeat so observers can treat recency as liveness.
pub struct StateReporter {
    last_state: Option<(bool, bool)>,
    last_emit_at: Option<Instant>,
    update_interval: Duration,
}

impl StateReporter {
    pub fn new(update_interval: Duration) -> Self {
        Self {
            last_state: None,
            last_emit_at: None,
            update_interval,
        }
    }

    /// Decide whether this observation is worth telling the store about.
    ///
    /// Local state advances on every emission, before any write happens; a
    /// failed write downstream must not resurrect stale state here.
    pub fn evaluate(&mut self, event: ObservationEvent) -> Option<Emission> {
        let state = (event.motion, event.presence);

        let changed = self.last_state != Some(state);
        let heartbeat_due = match self.last_emit_at {
            Some(at) => event.observed_at.duration_since(at) > self.update_interval,
            None => true,
        };

        if !changed && !heartbeat_due {
            return None;
        }

        self.last_state = Some(state);
        self.last_emit_at = Some(event.observed_at);

        Some(Emission {
            motion: event.motion,
            presence: event.presence,
        })
    }
}
