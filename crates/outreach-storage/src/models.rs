//! Database models

use chrono::{DateTime, Duration, NaiveDate, Utc};
use outreach_common::string_enum;
use outreach_common::types::{
    AccountId, ActionKind, ActionOutcome, LogEntryId, OutcomeKind, OwnerId, TargetId, TaskId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task priority; affects which task's queue is drained first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

string_enum!(TaskPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

impl TaskPriority {
    /// Numeric rank, higher is drained first
    pub fn rank(&self) -> i16 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(TaskStatus {
    Pending => "pending",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl TaskStatus {
    /// No transition leaves this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Per-task engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Courtesy pacing between two actions of this task
    #[serde(default)]
    pub delay_between_actions_ms: u64,

    /// Consecutive steps a worker performs on this task before yielding
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Ask the platform to add invited users as contacts
    #[serde(default)]
    pub auto_add_contacts: bool,

    /// Message a target that cannot be invited
    #[serde(default)]
    pub fallback_to_message: bool,
}

fn default_batch_size() -> u32 {
    10
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            delay_between_actions_ms: 0,
            batch_size: default_batch_size(),
            auto_add_contacts: false,
            fallback_to_message: false,
        }
    }
}

impl TaskSettings {
    pub fn delay_between_actions(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_between_actions_ms)
    }
}

/// Task model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: OwnerId,
    pub platform: String,
    pub action_type: ActionKind,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub settings: TaskSettings,
    /// Opaque action payload forwarded to the platform (group handle, message text)
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Create task input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: OwnerId,
    pub platform: String,
    pub action_type: ActionKind,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub settings: TaskSettings,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Target status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

string_enum!(TargetStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Succeeded => "succeeded",
    Failed => "failed",
    Skipped => "skipped",
});

impl TargetStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TargetStatus::Succeeded | TargetStatus::Failed | TargetStatus::Skipped
        )
    }
}

/// Where a target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    Manual,
    Import,
    ParsingImport,
}

string_enum!(TargetSource {
    Manual => "manual",
    Import => "import",
    ParsingImport => "parsing_import",
});

impl Default for TargetSource {
    fn default() -> Self {
        TargetSource::Manual
    }
}

/// Target model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub task_id: TaskId,
    pub external_identifier: String,
    pub status: TargetStatus,
    pub source: TargetSource,
    /// Insertion order within the task
    pub position: i64,
    pub last_attempted_account_id: Option<AccountId>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create target input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub external_identifier: String,
    #[serde(default)]
    pub source: TargetSource,
}

impl NewTarget {
    pub fn manual(external_identifier: impl Into<String>) -> Self {
        Self {
            external_identifier: external_identifier.into(),
            source: TargetSource::Manual,
        }
    }
}

/// Per-status target counts for one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl TargetCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.succeeded + self.failed + self.skipped
    }

    /// Increment the bucket for a status
    pub fn add(&mut self, status: TargetStatus, n: i64) {
        match status {
            TargetStatus::Pending => self.pending += n,
            TargetStatus::InProgress => self.in_progress += n,
            TargetStatus::Succeeded => self.succeeded += n,
            TargetStatus::Failed => self.failed += n,
            TargetStatus::Skipped => self.skipped += n,
        }
    }
}

/// What happened to a claimed target, written together with its log entries
#[derive(Debug, Clone, Default)]
pub struct AttemptRecord {
    /// Account used for the attempt, if one was reserved
    pub account_id: Option<AccountId>,
    /// Stored as the target's `last_error`
    pub error: Option<String>,
    /// Whether the attempt counts against the target's attempt ceiling
    pub count_attempt: bool,
    pub log: Vec<NewLogEntry>,
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    CoolingDown,
    Suspended,
    Disabled,
}

string_enum!(AccountStatus {
    Active => "active",
    CoolingDown => "cooling_down",
    Suspended => "suspended",
    Disabled => "disabled",
});

/// Platform account model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub platform: String,
    /// Opaque handle into the credential store
    pub credential_reference: String,
    pub status: AccountStatus,
    pub daily_action_limit: i32,
    pub actions_used_today: i32,
    /// Platform-local day the daily counter belongs to
    pub quota_day: NaiveDate,
    pub hourly_action_limit: Option<i32>,
    pub actions_this_hour: i32,
    pub hour_window_start: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Consecutive penalised outcomes; reset on success
    pub failure_streak: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create account input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner_id: OwnerId,
    pub platform: String,
    pub credential_reference: String,
    pub daily_action_limit: i32,
    #[serde(default)]
    pub hourly_action_limit: Option<i32>,
    pub quota_day: NaiveDate,
}

/// Why an account cannot perform an action right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligible {
    Status { status: AccountStatus },
    Cooldown { until: DateTime<Utc> },
    DailyQuotaExhausted,
    HourlyQuotaExhausted,
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligible::Status { status } => write!(f, "account is {}", status),
            Ineligible::Cooldown { until } => write!(f, "cooling down until {}", until),
            Ineligible::DailyQuotaExhausted => f.write_str("daily quota exhausted"),
            Ineligible::HourlyQuotaExhausted => f.write_str("hourly quota exhausted"),
        }
    }
}

impl Account {
    fn hour_window_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.hour_window_start, Some(start) if now - start < Duration::hours(1))
    }

    /// Actions counted against the hourly limit as of `now`
    pub fn actions_in_current_hour(&self, now: DateTime<Utc>) -> i32 {
        if self.hour_window_open(now) {
            self.actions_this_hour
        } else {
            0
        }
    }

    /// Check whether the account may perform one more action at `now`
    pub fn check_eligible(&self, now: DateTime<Utc>) -> Result<(), Ineligible> {
        if self.status != AccountStatus::Active {
            return Err(Ineligible::Status {
                status: self.status,
            });
        }
        if let Some(until) = self.cooldown_until {
            if until > now {
                return Err(Ineligible::Cooldown { until });
            }
        }
        if self.actions_used_today >= self.daily_action_limit {
            return Err(Ineligible::DailyQuotaExhausted);
        }
        if let Some(limit) = self.hourly_action_limit {
            if self.actions_in_current_hour(now) >= limit {
                return Err(Ineligible::HourlyQuotaExhausted);
            }
        }
        Ok(())
    }

    /// Take one unit of quota. Callers must hold the row exclusively.
    pub fn apply_reserve(&mut self, now: DateTime<Utc>) -> Result<Reservation, Ineligible> {
        self.check_eligible(now)?;

        if !self.hour_window_open(now) {
            self.hour_window_start = Some(now);
            self.actions_this_hour = 0;
        }
        self.actions_used_today += 1;
        self.actions_this_hour += 1;
        self.updated_at = now;

        Ok(Reservation {
            id: Uuid::now_v7(),
            account_id: self.id,
            reserved_at: now,
            quota_day: self.quota_day,
            hour_window_start: self.hour_window_start,
        })
    }

    /// Give back the unit taken by `reservation`, unless the counters were reset since
    pub fn apply_release(&mut self, reservation: &Reservation, now: DateTime<Utc>) {
        if self.quota_day == reservation.quota_day && self.actions_used_today > 0 {
            self.actions_used_today -= 1;
        }
        if self.hour_window_start == reservation.hour_window_start && self.actions_this_hour > 0 {
            self.actions_this_hour -= 1;
        }
        self.updated_at = now;
    }

    /// Confirm a reservation with the classified effect of the action
    pub fn apply_settlement(
        &mut self,
        reservation: &Reservation,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) {
        if settlement.executed {
            self.last_used_at = Some(now);
        } else {
            self.apply_release(reservation, now);
        }

        match &settlement.effect {
            AccountEffect::Success => self.failure_streak = 0,
            AccountEffect::Neutral => {}
            AccountEffect::Penalized { cooldown, status } => {
                self.failure_streak = self.failure_streak.saturating_add(1);
                let until = now + Duration::seconds(cooldown.resolve(self.failure_streak));
                // A platform-imposed wait is never shortened by a later, smaller one
                self.cooldown_until = Some(match self.cooldown_until {
                    Some(existing) if existing > until => existing,
                    _ => until,
                });
                if let Some(status) = status {
                    self.status = *status;
                }
            }
        }
        self.updated_at = now;
    }

    /// Zero the daily counter if it belongs to an earlier day. Returns whether it changed.
    pub fn apply_daily_reset(&mut self, day: NaiveDate, now: DateTime<Utc>) -> bool {
        if self.quota_day >= day {
            return false;
        }
        self.quota_day = day;
        self.actions_used_today = 0;
        self.updated_at = now;
        true
    }

    /// Return a cooled-down account to service once its cooldown has passed
    pub fn apply_reactivation(&mut self, now: DateTime<Utc>) -> bool {
        let expired = self.cooldown_until.map_or(true, |until| until <= now);
        if self.status != AccountStatus::CoolingDown || !expired {
            return false;
        }
        self.status = AccountStatus::Active;
        self.updated_at = now;
        true
    }
}

/// Optimistic claim on one unit of an account's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub account_id: AccountId,
    pub reserved_at: DateTime<Utc>,
    /// Day the reserved unit was counted against
    pub quota_day: NaiveDate,
    /// Hourly window the reserved unit was counted against
    pub hour_window_start: Option<DateTime<Utc>>,
}

/// Result of an atomic reservation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    Rejected(Ineligible),
    NotFound,
}

/// Escalating cooldown: `base * 2^(streak - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    pub base_secs: i64,
    pub max_secs: i64,
}

impl BackoffSchedule {
    /// Delay for the given consecutive-failure streak (1 = first offense)
    pub fn delay_for(&self, streak: i32) -> i64 {
        let exponent = (streak.max(1) - 1).min(32) as u32;
        self.base_secs
            .saturating_mul(2_i64.saturating_pow(exponent))
            .min(self.max_secs)
    }
}

/// How long an account cools down after a penalised outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CooldownDelay {
    /// Platform-reported or fixed number of seconds
    Exact { secs: i64 },
    /// Computed from the streak under the row lock
    Escalating { schedule: BackoffSchedule },
}

/// Upper bound for any single cooldown
pub const MAX_COOLDOWN_SECS: i64 = 30 * 24 * 60 * 60;

impl CooldownDelay {
    /// Cooldown in seconds, within `0..=MAX_COOLDOWN_SECS`
    pub fn resolve(&self, streak: i32) -> i64 {
        let secs = match self {
            CooldownDelay::Exact { secs } => *secs,
            CooldownDelay::Escalating { schedule } => schedule.delay_for(streak),
        };
        secs.clamp(0, MAX_COOLDOWN_SECS)
    }
}

/// Effect of a classified outcome on the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEffect {
    /// Streak reset
    Success,
    /// Account not to blame, nothing changes besides usage
    Neutral,
    /// Streak incremented, cooldown applied, optional status flip
    Penalized {
        cooldown: CooldownDelay,
        status: Option<AccountStatus>,
    },
}

/// Everything `commit` needs to settle a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// The action reached the platform; only then is quota consumed
    pub executed: bool,
    pub effect: AccountEffect,
}

/// Execution log entry model (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: LogEntryId,
    pub task_id: TaskId,
    pub target_id: TargetId,
    pub account_id: Option<AccountId>,
    pub action_kind: ActionKind,
    pub outcome: OutcomeKind,
    pub wait_seconds: Option<i64>,
    pub attempt: i32,
    pub duration_ms: Option<i64>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    /// Outcome with its flood-wait payload restored
    pub fn action_outcome(&self) -> ActionOutcome {
        ActionOutcome::from_parts(
            self.outcome,
            self.wait_seconds.map(|s| s.max(0) as u64),
        )
    }
}

/// Create log entry input
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub task_id: TaskId,
    pub target_id: TargetId,
    pub account_id: Option<AccountId>,
    pub action_kind: ActionKind,
    pub outcome: ActionOutcome,
    pub attempt: i32,
    pub duration_ms: Option<i64>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewLogEntry {
    pub(crate) fn into_entry(self) -> ExecutionLogEntry {
        ExecutionLogEntry {
            id: Uuid::now_v7(),
            task_id: self.task_id,
            target_id: self.target_id,
            account_id: self.account_id,
            action_kind: self.action_kind,
            outcome: self.outcome.kind(),
            wait_seconds: self.outcome.wait_seconds().map(|s| s as i64),
            attempt: self.attempt,
            duration_ms: self.duration_ms,
            detail: self.detail,
            created_at: self.created_at,
        }
    }
}

/// Aggregates over a task's execution log
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub entries: i64,
    /// Entries whose outcome blamed the account (rate limit, flood wait, restriction)
    pub rate_limited: i64,
    pub avg_duration_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn account(now: DateTime<Utc>) -> Account {
        Account {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            platform: "telegram".to_string(),
            credential_reference: "cred-1".to_string(),
            status: AccountStatus::Active,
            daily_action_limit: 2,
            actions_used_today: 0,
            quota_day: now.date_naive(),
            hourly_action_limit: None,
            actions_this_hour: 0,
            hour_window_start: None,
            cooldown_until: None,
            last_used_at: None,
            failure_streak: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TargetStatus::InProgress.as_str(), "in_progress");
        assert_eq!(
            "cooling_down".parse::<AccountStatus>().unwrap(),
            AccountStatus::CoolingDown
        );
        assert_eq!(TargetSource::ParsingImport.to_string(), "parsing_import");
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn test_priority_order() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::Low.rank() < TaskPriority::Normal.rank());
    }

    #[test]
    fn test_backoff_schedule() {
        let schedule = BackoffSchedule {
            base_secs: 300,
            max_secs: 1000,
        };
        assert_eq!(schedule.delay_for(0), 300);
        assert_eq!(schedule.delay_for(1), 300);
        assert_eq!(schedule.delay_for(2), 600);
        assert_eq!(schedule.delay_for(3), 1000);
        assert_eq!(schedule.delay_for(i32::MAX), 1000);
    }

    #[test]
    fn test_reserve_respects_daily_limit() {
        let now = Utc::now();
        let mut acc = account(now);

        assert!(acc.apply_reserve(now).is_ok());
        assert!(acc.apply_reserve(now).is_ok());
        assert_eq!(
            acc.apply_reserve(now).unwrap_err(),
            Ineligible::DailyQuotaExhausted
        );
        assert_eq!(acc.actions_used_today, 2);
    }

    #[test]
    fn test_hourly_window_rolls() {
        let now = Utc::now();
        let mut acc = account(now);
        acc.daily_action_limit = 10;
        acc.hourly_action_limit = Some(1);

        acc.apply_reserve(now).unwrap();
        assert_eq!(
            acc.check_eligible(now + Duration::minutes(59)),
            Err(Ineligible::HourlyQuotaExhausted)
        );

        let later = now + Duration::minutes(61);
        assert!(acc.check_eligible(later).is_ok());
        let reservation = acc.apply_reserve(later).unwrap();
        assert_eq!(reservation.hour_window_start, Some(later));
        assert_eq!(acc.actions_this_hour, 1);
        assert_eq!(acc.actions_used_today, 2);
    }

    #[test]
    fn test_settle_not_executed_rolls_back() {
        let now = Utc::now();
        let mut acc = account(now);
        let reservation = acc.apply_reserve(now).unwrap();

        acc.apply_settlement(
            &reservation,
            &Settlement {
                executed: false,
                effect: AccountEffect::Penalized {
                    cooldown: CooldownDelay::Exact { secs: 120 },
                    status: None,
                },
            },
            now,
        );

        assert_eq!(acc.actions_used_today, 0);
        assert_eq!(acc.cooldown_until, Some(now + Duration::seconds(120)));
        assert_eq!(acc.failure_streak, 1);
        assert_eq!(acc.last_used_at, None);
    }

    #[test]
    fn test_release_after_daily_reset_is_noop() {
        let now = Utc::now();
        let mut acc = account(now);
        let reservation = acc.apply_reserve(now).unwrap();

        let tomorrow = now.date_naive().succ_opt().unwrap();
        assert!(acc.apply_daily_reset(tomorrow, now));
        assert!(!acc.apply_daily_reset(tomorrow, now));

        acc.apply_release(&reservation, now);
        assert_eq!(acc.actions_used_today, 0);
    }

    #[test]
    fn test_longer_cooldown_is_kept() {
        let now = Utc::now();
        let mut acc = account(now);
        acc.cooldown_until = Some(now + Duration::hours(12));
        let reservation = Reservation {
            id: Uuid::now_v7(),
            account_id: acc.id,
            reserved_at: now,
            quota_day: acc.quota_day,
            hour_window_start: None,
        };

        acc.apply_settlement(
            &reservation,
            &Settlement {
                executed: true,
                effect: AccountEffect::Penalized {
                    cooldown: CooldownDelay::Exact { secs: 60 },
                    status: None,
                },
            },
            now,
        );
        assert_eq!(acc.cooldown_until, Some(now + Duration::hours(12)));
    }

    #[test]
    fn test_reactivation() {
        let now = Utc::now();
        let mut acc = account(now);
        acc.status = AccountStatus::CoolingDown;
        acc.cooldown_until = Some(now + Duration::seconds(10));

        assert!(!acc.apply_reactivation(now));
        assert!(acc.apply_reactivation(now + Duration::seconds(10)));
        assert_eq!(acc.status, AccountStatus::Active);
    }
}
