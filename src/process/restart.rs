use crate::config::ProcessSpec;
use std::time::{Duration, SystemTime};

/// Restart policy for one process spec
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Consecutive unstable restarts allowed
    pub max_restarts: u32,
    /// Runs at least this long reset the consecutive counter
    pub min_uptime: Duration,
    /// Fixed delay before each restart
    pub restart_delay: Duration,
}

/// Outcome of evaluating the policy after an exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration },
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    AutorestartDisabled,
    RestartsExhausted,
}

impl RestartPolicy {
    pub fn from_spec(spec: &ProcessSpec) -> Self {
        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            min_uptime: spec.min_uptime,
            restart_delay: spec.restart_delay,
        }
    }

    /// Decide what happens after a run that lasted `uptime`
    ///
    /// A run that reached `min_uptime` clears the consecutive counter before
    /// it is incremented, so a crash after a stable run counts as the first
    /// restart. The counter is only advanced when a restart is granted and
    /// therefore never exceeds `max_restarts`.
    pub fn decide(&self, tracker: &mut RestartTracker, uptime: Duration) -> RestartDecision {
        if !self.enabled {
            return RestartDecision::GiveUp(GiveUpReason::AutorestartDisabled);
        }

        if uptime >= self.min_uptime {
            tracker.reset();
        }

        let next = tracker.consecutive + 1;
        if next > self.max_restarts {
            return RestartDecision::GiveUp(GiveUpReason::RestartsExhausted);
        }

        tracker.consecutive = next;
        tracker.total += 1;
        tracker.last_restart = Some(SystemTime::now());

        RestartDecision::Restart {
            delay: self.restart_delay,
        }
    }
}

/// Restart counters for one instance
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    consecutive: u32,
    total: u32,
    last_restart: Option<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts since the last stable run
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Restarts granted over the tracker's lifetime
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.last_restart
    }

    /// Clear the consecutive counter (stable run or manual intervention)
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
