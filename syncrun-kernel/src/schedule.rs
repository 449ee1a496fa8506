//! Planification du poll : prochaine échéance monotone + état de backoff explicite.

use crate::config::ScheduleConf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Avant le premier cycle
    Startup,
    Steady,
    Backoff { consecutive_failures: u32 },
}

#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    startup_delay: Duration,
    backoff: Duration,
    state: ScheduleState,
}

impl PollSchedule {
    pub fn new(conf: &ScheduleConf) -> Self {
        Self {
            interval: conf.pull_interval(),
            startup_delay: conf.startup_delay(),
            backoff: conf.failure_backoff(),
            state: ScheduleState::Startup,
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn first_fire(&mut self, now: Instant) -> Instant {
        self.state = ScheduleState::Startup;
        now + self.startup_delay
    }

    /// Cycle réussi : l'intervalle court depuis le début du cycle, jamais dans le passé
    pub fn after_success(&mut self, started: Instant, now: Instant) -> Instant {
        self.state = ScheduleState::Steady;
        (started + self.interval).max(now)
    }

    /// Cycle en échec : backoff fixe depuis maintenant, indépendant du temps écoulé
    pub fn after_failure(&mut self, now: Instant) -> Instant {
        let consecutive_failures = match self.state {
            ScheduleState::Backoff { consecutive_failures } => consecutive_failures.saturating_add(1),
            _ => 1,
        };
        self.state = ScheduleState::Backoff { consecutive_failures };
        now + self.backoff
    }
}
