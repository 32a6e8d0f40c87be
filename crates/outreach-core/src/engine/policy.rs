//! Outcome policy: what a classified outcome does to the target and the task

use outreach_common::types::ActionOutcome;
use outreach_storage::models::{TargetCounts, TargetStatus, TaskStatus};

/// What happens to a target after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Final status, no further attempts
    Finish(TargetStatus),
    /// Back to `pending`. Rate-limit outcomes are the account's fault and do not count.
    Retry { count_attempt: bool },
}

impl Disposition {
    /// Whether the attempt is charged to the target's attempt ceiling
    pub fn counts_attempt(&self) -> bool {
        match self {
            Disposition::Finish(_) => true,
            Disposition::Retry { count_attempt } => *count_attempt,
        }
    }
}

/// Decide a target's fate; `attempt_count` is the count before this attempt
pub fn disposition(outcome: &ActionOutcome, attempt_count: i32, max_attempts: i32) -> Disposition {
    match outcome {
        ActionOutcome::Succeeded => Disposition::Finish(TargetStatus::Succeeded),
        ActionOutcome::TargetInvalid => Disposition::Finish(TargetStatus::Failed),
        ActionOutcome::TargetUnreachable => Disposition::Finish(TargetStatus::Skipped),
        ActionOutcome::RateLimited
        | ActionOutcome::FloodWait { .. }
        | ActionOutcome::AccountRestricted => Disposition::Retry {
            count_attempt: false,
        },
        ActionOutcome::TransientNetworkError | ActionOutcome::UnknownError => {
            if attempt_count.saturating_add(1) >= max_attempts {
                Disposition::Finish(TargetStatus::Failed)
            } else {
                Disposition::Retry {
                    count_attempt: true,
                }
            }
        }
    }
}

/// Terminal status for a drained task: `failed` once failed/total exceeds the threshold
pub fn final_status(counts: &TargetCounts, failure_ratio_threshold: f64) -> TaskStatus {
    let total = counts.total();
    if total > 0 && counts.failed as f64 / total as f64 > failure_ratio_threshold {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    }
}
