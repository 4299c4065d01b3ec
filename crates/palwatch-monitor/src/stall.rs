//! Save stall detection.
//!
//! Watches the modification time of the world save file. A server whose
//! save has stopped advancing for several consecutive samples is restarted
//! through the control API.
//!
//! ```text
//! WarmingUp ──first sample──▶ Observing ──grace elapsed──▶ Armed
//!                                 ▲                          │
//!                                 └──────── escalation ──────┘
//! ```

use std::time::Duration;

use palwatch_core::{HealthApi, RemoteError, RemoteResult, SaveConfig, UnreachablePolicy};
use tracing::{debug, error, info, warn};

use crate::error::{MonitorError, MonitorResult};

/// Escalation never fires on a single failed stat, whatever the threshold.
const MIN_UNREACHABLE_STREAK: u32 = 2;

/// Detector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPhase {
    /// No sample seen yet.
    WarmingUp,
    /// Collecting samples inside the grace period.
    Observing,
    /// Comparing samples; stalls count toward escalation.
    Armed,
}

/// Why a restart was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    /// The save file stopped changing.
    Stalled,
    /// The save file could not be checked repeatedly.
    Unreachable,
}

impl EscalationReason {
    /// In-game announcement shown with the shutdown countdown.
    pub fn message(self, delay_secs: u32) -> String {
        match self {
            EscalationReason::Stalled => {
                format!("Save stalled! Restarting in {delay_secs} seconds!")
            }
            EscalationReason::Unreachable => {
                format!("Save check failed repeatedly. Restarting in {delay_secs} seconds.")
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::Stalled => "stalled",
            EscalationReason::Unreachable => "unreachable",
        }
    }
}

/// Result of feeding one sample to the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallVerdict {
    /// First sample recorded.
    WarmingUp,
    /// Inside the grace period.
    Observing,
    /// Save advanced (or is recent enough).
    Healthy,
    /// Save unchanged and stale; `count` of `threshold` observations so far.
    Stalling { count: u32, threshold: u32 },
    /// The stat failed; `count` consecutive failures counted so far.
    Unreachable { count: u32 },
    /// The stat failed and the policy ignores failures.
    Skipped,
    /// Threshold reached; a restart must be requested.
    Escalate(EscalationReason),
}

/// Tuning for one detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallSettings {
    pub threshold: u32,
    pub grace: Duration,
    pub quiet: Duration,
    pub shutdown_delay_secs: u32,
    pub unreachable: UnreachablePolicy,
}

impl Default for StallSettings {
    fn default() -> Self {
        Self {
            threshold: 3,
            grace: Duration::from_secs(300),
            quiet: Duration::from_secs(300),
            shutdown_delay_secs: 30,
            unreachable: UnreachablePolicy::Shared,
        }
    }
}

impl From<&SaveConfig> for StallSettings {
    fn from(config: &SaveConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            grace: config.grace(),
            quiet: config.quiet(),
            shutdown_delay_secs: config.shutdown_delay_secs,
            unreachable: config.unreachable,
        }
    }
}

/// Mutable detector state. Owned by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallState {
    pub phase: StallPhase,
    /// Start of the current observation cycle (epoch seconds).
    pub first_observation: Option<u64>,
    pub last_known_mtime: Option<u64>,
    pub stall_count: u32,
    /// Consecutive failed stats, when tracked separately.
    pub unreachable_count: u32,
}

impl Default for StallState {
    fn default() -> Self {
        Self {
            phase: StallPhase::WarmingUp,
            first_observation: None,
            last_known_mtime: None,
            stall_count: 0,
            unreachable_count: 0,
        }
    }
}

/// Stall detector for one server's save file.
#[derive(Debug)]
pub struct StallDetector {
    server: String,
    settings: StallSettings,
    state: StallState,
}

impl StallDetector {
    pub fn new(server: impl Into<String>, settings: StallSettings) -> Self {
        Self {
            server: server.into(),
            settings,
            state: StallState::default(),
        }
    }

    pub fn state(&self) -> &StallState {
        &self.state
    }

    pub fn settings(&self) -> &StallSettings {
        &self.settings
    }

    /// Feed one mtime sample (or the failure to get one) taken at `now`.
    ///
    /// Pure state transition: performs no I/O. On `Escalate` the caller must
    /// request the restart and then call [`StallDetector::complete_escalation`].
    pub fn observe(&mut self, now: u64, sample: RemoteResult<u64>) -> StallVerdict {
        match sample {
            Ok(mtime) => self.observe_mtime(now, mtime),
            Err(e) => self.observe_failure(&e),
        }
    }

    fn observe_mtime(&mut self, now: u64, mtime: u64) -> StallVerdict {
        let s = &mut self.state;
        s.unreachable_count = 0;

        // Only armed samples build a streak. Failures counted under the
        // shared policy before arming are dropped by the next good sample.
        if s.phase != StallPhase::Armed {
            s.stall_count = 0;
        }

        let first = match (s.phase, s.first_observation) {
            (StallPhase::WarmingUp, _) | (_, None) => {
                s.first_observation = Some(now);
                s.last_known_mtime = Some(mtime);
                s.phase = StallPhase::Observing;
                debug!(server = %self.server, mtime, "save monitor warming up");
                return StallVerdict::WarmingUp;
            }
            (_, Some(first)) => first,
        };

        if s.phase == StallPhase::Observing {
            if now.saturating_sub(first) < self.settings.grace.as_secs() {
                s.last_known_mtime = Some(mtime);
                return StallVerdict::Observing;
            }
            s.phase = StallPhase::Armed;
            debug!(server = %self.server, "save monitor armed");
        }

        let stale = now.saturating_sub(mtime) > self.settings.quiet.as_secs();
        let unchanged = s.last_known_mtime == Some(mtime);
        s.last_known_mtime = Some(mtime);

        if stale && unchanged {
            s.stall_count += 1;
            warn!(
                server = %self.server,
                count = s.stall_count,
                threshold = self.settings.threshold,
                age_secs = now.saturating_sub(mtime),
                "save stall observed"
            );
        } else {
            s.stall_count = 0;
        }

        if s.stall_count >= self.settings.threshold {
            return StallVerdict::Escalate(EscalationReason::Stalled);
        }
        if s.stall_count > 0 {
            StallVerdict::Stalling {
                count: s.stall_count,
                threshold: self.settings.threshold,
            }
        } else {
            StallVerdict::Healthy
        }
    }

    fn observe_failure(&mut self, e: &RemoteError) -> StallVerdict {
        let limit = self.settings.threshold.max(MIN_UNREACHABLE_STREAK);
        let s = &mut self.state;

        let count = match self.settings.unreachable {
            UnreachablePolicy::Ignore => {
                warn!(server = %self.server, error = %e, kind = e.kind(), "save mtime check failed");
                return StallVerdict::Skipped;
            }
            UnreachablePolicy::Shared => {
                s.stall_count += 1;
                s.stall_count
            }
            UnreachablePolicy::Separate => {
                s.unreachable_count += 1;
                s.unreachable_count
            }
        };

        warn!(
            server = %self.server,
            error = %e,
            kind = e.kind(),
            count,
            threshold = limit,
            "save mtime check failed"
        );

        if count >= limit {
            StallVerdict::Escalate(EscalationReason::Unreachable)
        } else {
            StallVerdict::Unreachable { count }
        }
    }

    /// Reset counters after a restart request and re-enter the grace period.
    pub fn complete_escalation(&mut self, now: u64) {
        let s = &mut self.state;
        s.stall_count = 0;
        s.unreachable_count = 0;
        s.first_observation = Some(now);
        s.phase = if s.last_known_mtime.is_some() {
            StallPhase::Observing
        } else {
            StallPhase::WarmingUp
        };
    }

    /// Feed a sample and, when the threshold is reached, ask the server to
    /// shut down.
    ///
    /// Counters are reset whether or not the shutdown request succeeds, so a
    /// broken API cannot cause a restart storm.
    pub async fn poll(
        &mut self,
        api: &dyn HealthApi,
        now: u64,
        sample: RemoteResult<u64>,
    ) -> MonitorResult<StallVerdict> {
        let verdict = self.observe(now, sample);
        let StallVerdict::Escalate(reason) = verdict else {
            return Ok(verdict);
        };

        let delay = self.settings.shutdown_delay_secs;
        let result = api.shutdown(delay, &reason.message(delay)).await;
        self.complete_escalation(now);

        match result {
            Ok(()) => {
                info!(server = %self.server, reason = reason.as_str(), delay, "restart requested");
                Ok(verdict)
            }
            Err(source) => {
                error!(
                    server = %self.server,
                    reason = reason.as_str(),
                    error = %source,
                    kind = source.kind(),
                    "restart request failed"
                );
                Err(MonitorError::EscalationFailed {
                    server: self.server.clone(),
                    source,
                })
            }
        }
    }
}
