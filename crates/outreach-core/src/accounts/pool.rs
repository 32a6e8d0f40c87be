//! Account Pool - eligible-account snapshots and the reserve/commit/release protocol

use super::quota::QuotaGuard;
use crate::classifier::Classification;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use outreach_common::config::QuotaConfig;
use outreach_common::types::{AccountId, OwnerId};
use outreach_storage::models::{Account, AccountStatus, Ineligible, ReserveOutcome, Reservation};
use outreach_storage::repository::AccountRepository;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Account pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Account quota exhausted")]
    QuotaExhausted,

    #[error("Account cooling down until {until}")]
    Cooldown { until: DateTime<Utc> },

    #[error("Account not found")]
    NotFound,

    #[error("Account is {status}")]
    Unavailable { status: AccountStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] outreach_common::Error),
}

impl From<Ineligible> for PoolError {
    fn from(reason: Ineligible) -> Self {
        match reason {
            Ineligible::DailyQuotaExhausted | Ineligible::HourlyQuotaExhausted => {
                PoolError::QuotaExhausted
            }
            Ineligible::Cooldown { until } => PoolError::Cooldown { until },
            Ineligible::Status { status } => PoolError::Unavailable { status },
        }
    }
}

impl From<PoolError> for outreach_common::Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Storage(e) => e,
            PoolError::NotFound => outreach_common::Error::NotFound("Account".to_string()),
            other => outreach_common::Error::Conflict(other.to_string()),
        }
    }
}

/// Account Pool
///
/// Quota counters only change through [`AccountPool::reserve`], [`AccountPool::commit`]
/// and [`AccountPool::release`]; each is one atomic repository operation.
pub struct AccountPool {
    repo: Arc<dyn AccountRepository>,
    guard: QuotaGuard,
    reset_offset: Duration,
}

impl AccountPool {
    /// Create a new account pool
    pub fn new(repo: Arc<dyn AccountRepository>, config: &QuotaConfig) -> Self {
        Self {
            repo,
            guard: QuotaGuard::new(config),
            reset_offset: Duration::minutes(i64::from(config.reset_utc_offset_minutes)),
        }
    }

    pub fn guard(&self) -> &QuotaGuard {
        &self.guard
    }

    /// Snapshot of the owner's accounts able to act at `as_of`, least recently used first.
    ///
    /// Reserves nothing.
    pub async fn list_eligible(
        &self,
        owner_id: OwnerId,
        platform: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Account>, PoolError> {
        Ok(self.repo.list_eligible(owner_id, platform, as_of).await?)
    }

    /// Take one unit of the account's quota, failing if a concurrent reservation got there first
    pub async fn reserve(
        &self,
        account_id: AccountId,
        as_of: DateTime<Utc>,
    ) -> Result<Reservation, PoolError> {
        match self.repo.try_reserve(account_id, as_of).await? {
            ReserveOutcome::Reserved(reservation) => {
                debug!(
                    account_id = %account_id,
                    reservation_id = %reservation.id,
                    "Reserved account quota"
                );
                Ok(reservation)
            }
            ReserveOutcome::Rejected(reason) => {
                debug!(account_id = %account_id, reason = %reason, "Reservation rejected");
                Err(reason.into())
            }
            ReserveOutcome::NotFound => Err(PoolError::NotFound),
        }
    }

    /// Settle a reservation with the classified outcome of the action it paid for
    pub async fn commit(
        &self,
        reservation: &Reservation,
        classification: &Classification,
        as_of: DateTime<Utc>,
    ) -> Result<Account, PoolError> {
        let settlement = self.guard.settlement(classification);
        let account = self.repo.settle(reservation, settlement, as_of).await?;

        if let Some(until) = account.cooldown_until.filter(|until| *until > as_of) {
            if classification.outcome.is_rate_limit() {
                warn!(
                    account_id = %account.id,
                    outcome = %classification.outcome,
                    streak = account.failure_streak,
                    cooldown_until = %until,
                    status = %account.status,
                    "Account cooling down"
                );
            }
        }
        if let Some(reason) = self.guard.ineligibility(&account, as_of) {
            debug!(account_id = %account.id, reason = %reason, "Account no longer eligible");
        }
        Ok(account)
    }

    /// Give an unused reservation back
    pub async fn release(
        &self,
        reservation: &Reservation,
        as_of: DateTime<Utc>,
    ) -> Result<Account, PoolError> {
        debug!(
            account_id = %reservation.account_id,
            reservation_id = %reservation.id,
            "Releasing reservation"
        );
        Ok(self.repo.release(reservation, as_of).await?)
    }

    /// Platform-local day `as_of` falls on
    pub fn quota_day(&self, as_of: DateTime<Utc>) -> NaiveDate {
        (as_of + self.reset_offset).date_naive()
    }

    /// Zero counters left over from earlier days; running it twice on one day changes nothing
    pub async fn reset_daily_counters(&self, as_of: DateTime<Utc>) -> Result<u64, PoolError> {
        let day = self.quota_day(as_of);
        let reset = self.repo.reset_daily_counters(day, as_of).await?;
        if reset > 0 {
            info!(day = %day, accounts = reset, "Daily account counters reset");
        }
        Ok(reset)
    }

    /// Return `cooling_down` accounts whose cooldown has passed to `active`
    pub async fn reactivate_cooled(&self, as_of: DateTime<Utc>) -> Result<u64, PoolError> {
        let reactivated = self.repo.reactivate_cooled(as_of).await?;
        if reactivated > 0 {
            info!(accounts = reactivated, "Cooled-down accounts reactivated");
        }
        Ok(reactivated)
    }
}
