//! Quota Guard - pure eligibility and backoff decisions

use crate::classifier::Classification;
use chrono::{DateTime, Duration, Utc};
use outreach_common::config::QuotaConfig;
use outreach_common::types::ActionOutcome;
use outreach_storage::models::{
    Account, AccountEffect, AccountStatus, BackoffSchedule, CooldownDelay, Ineligible, Settlement,
};

/// Decides whether an account may act and how long it cools down after a penalised outcome.
///
/// Holds no state beyond configuration; the streak it escalates on lives on the account row.
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    default_backoff: BackoffSchedule,
    restricted_cooldown_secs: i64,
}

impl QuotaGuard {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            default_backoff: BackoffSchedule {
                base_secs: config.default_backoff_base_secs,
                max_secs: config.default_backoff_max_secs,
            },
            restricted_cooldown_secs: config.restricted_cooldown_secs,
        }
    }

    /// `status == active`, cooldown passed, and daily and hourly quota left
    pub fn eligible(&self, account: &Account, now: DateTime<Utc>) -> bool {
        self.ineligibility(account, now).is_none()
    }

    /// Why the account cannot act, if it cannot
    pub fn ineligibility(&self, account: &Account, now: DateTime<Utc>) -> Option<Ineligible> {
        account.check_eligible(now).err()
    }

    /// Cooldown for an outcome given the account's streak including this offense.
    ///
    /// `None` for outcomes that do not penalise the account.
    pub fn backoff(&self, outcome: &ActionOutcome, streak: i32) -> Option<Duration> {
        self.cooldown(outcome)
            .map(|delay| Duration::seconds(delay.resolve(streak)))
    }

    fn cooldown(&self, outcome: &ActionOutcome) -> Option<CooldownDelay> {
        match outcome {
            ActionOutcome::FloodWait { seconds } => Some(CooldownDelay::Exact {
                secs: i64::try_from(*seconds).unwrap_or(i64::MAX),
            }),
            ActionOutcome::RateLimited | ActionOutcome::UnknownError => {
                Some(CooldownDelay::Escalating {
                    schedule: self.default_backoff,
                })
            }
            ActionOutcome::AccountRestricted => Some(CooldownDelay::Exact {
                secs: self.restricted_cooldown_secs,
            }),
            ActionOutcome::Succeeded
            | ActionOutcome::TargetUnreachable
            | ActionOutcome::TargetInvalid
            | ActionOutcome::TransientNetworkError => None,
        }
    }

    /// Effect of an outcome on the account that performed it
    pub fn account_effect(&self, outcome: &ActionOutcome) -> AccountEffect {
        if *outcome == ActionOutcome::Succeeded {
            return AccountEffect::Success;
        }
        match self.cooldown(outcome) {
            Some(cooldown) => AccountEffect::Penalized {
                cooldown,
                status: (*outcome == ActionOutcome::AccountRestricted)
                    .then_some(AccountStatus::CoolingDown),
            },
            None => AccountEffect::Neutral,
        }
    }

    /// Settlement for a classified action
    pub fn settlement(&self, classification: &Classification) -> Settlement {
        Settlement {
            executed: classification.executed,
            effect: self.account_effect(&classification.outcome),
        }
    }
}
