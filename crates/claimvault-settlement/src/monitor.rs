//! Advisory conflict-rate monitor.
//!
//! Lost races (`AlreadyUsed`, `Conflict`, duplicate references) are normal,
//! but a burst of them from one subject usually means someone is replaying
//! a claim or hammering an action. The monitor keeps a sliding window of
//! conflict timestamps per subject and emits a `warn` on target
//! `claimvault::fraud` when the window overflows.
//!
//! It never rejects anything. Use-once semantics live in the ledger; this is
//! only a signal, and losing it on restart is harmless.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use claimvault_types::{EngineConfig, Subject};

/// Which use-once check the caller lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    AlreadyUsed,
    ActionConflict,
    DuplicateReference,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyUsed => "already_used",
            Self::ActionConflict => "action_conflict",
            Self::DuplicateReference => "duplicate_reference",
        })
    }
}

/// Sliding-window conflict counter keyed by subject.
pub struct ConflictMonitor {
    /// `Subject → timestamps (ms) of recent conflicts`, oldest first. Each
    /// holds at most `threshold + 1` entries; more would not change the alert.
    windows: Mutex<HashMap<Subject, VecDeque<i64>>>,
    window_ms: i64,
    /// Alert once a subject has more than this many conflicts in the window.
    threshold: usize,
}

impl ConflictMonitor {
    #[must_use]
    pub fn new(window_ms: u64, threshold: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            threshold,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.conflict_window_ms, config.conflict_alert_threshold)
    }

    /// Record a lost race for `subject` at `now`.
    ///
    /// Returns `true` when this conflict pushed the subject over the
    /// threshold (the alert fires once per crossing, not on every event).
    pub fn record(&self, subject: &Subject, kind: ConflictKind, now: DateTime<Utc>) -> bool {
        let now_ms = now.timestamp_millis();
        let mut windows = self.lock();
        let window = windows.entry(subject.clone()).or_default();
        prune(window, now_ms.saturating_sub(self.window_ms));
        let was_over = window.len() > self.threshold;
        window.push_back(now_ms);
        if window.len() > self.threshold.saturating_add(1) {
            window.pop_front();
        }

        let count = window.len();
        let crossed = !was_over && count > self.threshold;
        if crossed {
            tracing::warn!(
                target: "claimvault::fraud",
                subject = %subject,
                kind = %kind,
                count,
                window_ms = self.window_ms,
                threshold = self.threshold,
                "Conflict rate above threshold"
            );
        }
        crossed
    }

    /// Conflicts recorded for `subject` inside the window ending at `now`,
    /// saturating at `threshold + 1`.
    #[must_use]
    pub fn recent(&self, subject: &Subject, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp_millis().saturating_sub(self.window_ms);
        self.lock()
            .get(subject)
            .map_or(0, |w| w.iter().filter(|&&t| t >= cutoff).count())
    }

    /// Drop subjects with no conflicts inside the window. Returns how many
    /// subjects are still tracked.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp_millis().saturating_sub(self.window_ms);
        let mut windows = self.lock();
        windows.retain(|_, window| {
            prune(window, cutoff);
            !window.is_empty()
        });
        windows.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Subject, VecDeque<i64>>> {
        // Counters stay usable after a panic elsewhere.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune(window: &mut VecDeque<i64>, cutoff: i64) {
    while let Some(&front) = window.front() {
        if front < cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}
