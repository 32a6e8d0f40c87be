//! Common types for Outreach

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for task owners
pub type OwnerId = Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Unique identifier for targets
pub type TargetId = Uuid;

/// Unique identifier for platform accounts
pub type AccountId = Uuid;

/// Unique identifier for execution log entries
pub type LogEntryId = Uuid;

/// Declares the canonical snake_case string form of a fieldless enum.
///
/// The same string is used for database columns, JSON and logs.
#[macro_export]
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Canonical string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }

        impl ::std::convert::TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> ::std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

/// Action performed against the external platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    InviteToGroup,
    SendMessage,
}

string_enum!(ActionKind {
    InviteToGroup => "invite_to_group",
    SendMessage => "send_message",
});

/// Canonical outcome of one platform action.
///
/// Closed taxonomy: every raw platform response maps to exactly one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    RateLimited,
    FloodWait { seconds: u64 },
    AccountRestricted,
    TargetUnreachable,
    TargetInvalid,
    TransientNetworkError,
    UnknownError,
}

impl ActionOutcome {
    /// Storage discriminant, without the flood-wait payload
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ActionOutcome::Succeeded => OutcomeKind::Succeeded,
            ActionOutcome::RateLimited => OutcomeKind::RateLimited,
            ActionOutcome::FloodWait { .. } => OutcomeKind::FloodWait,
            ActionOutcome::AccountRestricted => OutcomeKind::AccountRestricted,
            ActionOutcome::TargetUnreachable => OutcomeKind::TargetUnreachable,
            ActionOutcome::TargetInvalid => OutcomeKind::TargetInvalid,
            ActionOutcome::TransientNetworkError => OutcomeKind::TransientNetworkError,
            ActionOutcome::UnknownError => OutcomeKind::UnknownError,
        }
    }

    /// Platform-reported wait, if any
    pub fn wait_seconds(&self) -> Option<u64> {
        match self {
            ActionOutcome::FloodWait { seconds } => Some(*seconds),
            _ => None,
        }
    }

    /// Rebuild an outcome from its stored parts
    pub fn from_parts(kind: OutcomeKind, wait_seconds: Option<u64>) -> Self {
        match kind {
            OutcomeKind::Succeeded => ActionOutcome::Succeeded,
            OutcomeKind::RateLimited => ActionOutcome::RateLimited,
            OutcomeKind::FloodWait => ActionOutcome::FloodWait {
                seconds: wait_seconds.unwrap_or(0),
            },
            OutcomeKind::AccountRestricted => ActionOutcome::AccountRestricted,
            OutcomeKind::TargetUnreachable => ActionOutcome::TargetUnreachable,
            OutcomeKind::TargetInvalid => ActionOutcome::TargetInvalid,
            OutcomeKind::TransientNetworkError => ActionOutcome::TransientNetworkError,
            OutcomeKind::UnknownError => ActionOutcome::UnknownError,
        }
    }

    /// The account, not the target, is to blame
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ActionOutcome::RateLimited
                | ActionOutcome::FloodWait { .. }
                | ActionOutcome::AccountRestricted
        )
    }
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionOutcome::FloodWait { seconds } => write!(f, "flood_wait({})", seconds),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Fieldless outcome discriminant, as stored in the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    RateLimited,
    FloodWait,
    AccountRestricted,
    TargetUnreachable,
    TargetInvalid,
    TransientNetworkError,
    UnknownError,
}

string_enum!(OutcomeKind {
    Succeeded => "succeeded",
    RateLimited => "rate_limited",
    FloodWait => "flood_wait",
    AccountRestricted => "account_restricted",
    TargetUnreachable => "target_unreachable",
    TargetInvalid => "target_invalid",
    TransientNetworkError => "transient_network_error",
    UnknownError => "unknown_error",
});

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl<T> Paginated<T> {
    /// Build a page from a result fetched with `limit + 1` rows
    pub fn from_overfetch(mut rows: Vec<T>, limit: i64, offset: i64) -> Self {
        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit.max(0) as usize);
        Self {
            data: rows,
            limit,
            offset,
            has_more,
        }
    }
}
