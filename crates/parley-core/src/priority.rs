//! Transition request priorities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority bucket for a state-transition request.
///
/// Variants are declared lowest-first so the derived [`Ord`] ranks
/// `Critical` greatest. The scheduler drains buckets in
/// [`TransitionPriority::descending`] order, one request per bucket per pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPriority {
    /// Housekeeping; may wait indefinitely behind real work.
    Background,
    /// Degradation notices and other non-urgent signals.
    Low,
    /// Ordinary pipeline progress.
    Normal,
    /// User-visible stage changes (auth, manager readiness).
    High,
    /// Failures and teardown; always drained first.
    Critical,
}

/// All priorities, lowest first (declaration order).
pub const ALL_TRANSITION_PRIORITIES: [TransitionPriority; 5] = [
    TransitionPriority::Background,
    TransitionPriority::Low,
    TransitionPriority::Normal,
    TransitionPriority::High,
    TransitionPriority::Critical,
];

impl TransitionPriority {
    /// Wire string for this priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Bucket index (0 = `Background` .. 4 = `Critical`).
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Scheduler scan order: highest priority first.
    #[must_use]
    pub fn descending() -> [Self; 5] {
        [
            Self::Critical,
            Self::High,
            Self::Normal,
            Self::Low,
            Self::Background,
        ]
    }
}

impl Default for TransitionPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TransitionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
