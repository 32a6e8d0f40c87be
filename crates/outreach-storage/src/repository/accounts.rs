//! Account repository
//!
//! Quota counters are only changed while the account row is locked
//! (`SELECT ... FOR UPDATE`), and the lock is never held across a platform call:
//! `try_reserve`, `settle` and `release` each run in their own short transaction.

use crate::db::DatabasePool;
use crate::models::{Account, NewAccount, ReserveOutcome, Reservation, Settlement};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use outreach_common::types::{AccountId, OwnerId};
use outreach_common::{Error, Result};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, input: NewAccount) -> Result<Account>;
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;
    async fn list(&self, owner_id: OwnerId, platform: &str) -> Result<Vec<Account>>;

    /// Point-in-time snapshot of accounts able to act at `now`, least recently used first
    async fn list_eligible(
        &self,
        owner_id: OwnerId,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>>;

    /// Atomically take one unit of quota, failing instead of blocking
    async fn try_reserve(&self, id: AccountId, now: DateTime<Utc>) -> Result<ReserveOutcome>;

    /// Confirm a reservation with the classified effect of the action
    async fn settle(
        &self,
        reservation: &Reservation,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    /// Return an unused reservation
    async fn release(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Account>;

    /// Zero daily counters belonging to days before `day`; idempotent per day
    async fn reset_daily_counters(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<u64>;

    /// Move `cooling_down` accounts whose cooldown expired back to `active`
    async fn reactivate_cooled(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    owner_id: Uuid,
    platform: String,
    credential_reference: String,
    status: String,
    daily_action_limit: i32,
    actions_used_today: i32,
    quota_day: NaiveDate,
    hourly_action_limit: Option<i32>,
    actions_this_hour: i32,
    hour_window_start: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    failure_streak: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = Error;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: row.id,
            owner_id: row.owner_id,
            platform: row.platform,
            credential_reference: row.credential_reference,
            status: row.status.parse().map_err(Error::Database)?,
            daily_action_limit: row.daily_action_limit,
            actions_used_today: row.actions_used_today,
            quota_day: row.quota_day,
            hourly_action_limit: row.hourly_action_limit,
            actions_this_hour: row.actions_this_hour,
            hour_window_start: row.hour_window_start,
            cooldown_until: row.cooldown_until,
            last_used_at: row.last_used_at,
            failure_streak: row.failure_streak,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn lock_account(conn: &mut PgConnection, id: AccountId) -> Result<Option<Account>> {
    sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .map(Account::try_from)
        .transpose()
}

async fn write_back(conn: &mut PgConnection, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE accounts SET
            status = $2,
            actions_used_today = $3,
            quota_day = $4,
            actions_this_hour = $5,
            hour_window_start = $6,
            cooldown_until = $7,
            last_used_at = $8,
            failure_streak = $9,
            updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(account.id)
    .bind(account.status.as_str())
    .bind(account.actions_used_today)
    .bind(account.quota_day)
    .bind(account.actions_this_hour)
    .bind(account.hour_window_start)
    .bind(account.cooldown_until)
    .bind(account.last_used_at)
    .bind(account.failure_streak)
    .bind(account.updated_at)
    .execute(conn)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Database account repository
pub struct DbAccountRepository {
    pool: DatabasePool,
}

impl DbAccountRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Lock the row, apply `f`, write the result back, all in one transaction
    async fn with_locked<T, F>(&self, id: AccountId, f: F) -> Result<Option<(Account, T)>>
    where
        F: FnOnce(&mut Account) -> T + Send,
        T: Send,
    {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let Some(mut account) = lock_account(&mut *tx, id).await? else {
            return Ok(None);
        };

        let before = account.clone();
        let value = f(&mut account);
        if account != before {
            write_back(&mut *tx, &account).await?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Some((account, value)))
    }
}

#[async_trait]
impl AccountRepository for DbAccountRepository {
    async fn create(&self, input: NewAccount) -> Result<Account> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (
                id, owner_id, platform, credential_reference, status,
                daily_action_limit, hourly_action_limit, quota_day
            )
            VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.owner_id)
        .bind(&input.platform)
        .bind(&input.credential_reference)
        .bind(input.daily_action_limit)
        .bind(input.hourly_action_limit)
        .bind(input.quota_day)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .try_into()
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(Account::try_from)
            .transpose()
    }

    async fn list(&self, owner_id: OwnerId, platform: &str) -> Result<Vec<Account>> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE owner_id = $1 AND platform = $2 ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .bind(platform)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .into_iter()
        .map(Account::try_from)
        .collect()
    }

    async fn list_eligible(
        &self,
        owner_id: OwnerId,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT * FROM accounts
            WHERE owner_id = $1
              AND platform = $2
              AND status = 'active'
              AND (cooldown_until IS NULL OR cooldown_until <= $3)
              AND actions_used_today < daily_action_limit
              AND (
                  hourly_action_limit IS NULL
                  OR hour_window_start IS NULL
                  OR hour_window_start <= $3 - INTERVAL '1 hour'
                  OR actions_this_hour < hourly_action_limit
              )
            ORDER BY last_used_at ASC NULLS FIRST, id ASC
            "#,
        )
        .bind(owner_id)
        .bind(platform)
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .into_iter()
        .map(Account::try_from)
        .collect()
    }

    async fn try_reserve(&self, id: AccountId, now: DateTime<Utc>) -> Result<ReserveOutcome> {
        let result = self
            .with_locked(id, |account| account.apply_reserve(now))
            .await?;

        Ok(match result {
            None => ReserveOutcome::NotFound,
            Some((_, Ok(reservation))) => ReserveOutcome::Reserved(reservation),
            Some((_, Err(reason))) => ReserveOutcome::Rejected(reason),
        })
    }

    async fn settle(
        &self,
        reservation: &Reservation,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        self.with_locked(reservation.account_id, |account| {
            account.apply_settlement(reservation, &settlement, now)
        })
        .await?
        .map(|(account, _)| account)
        .ok_or_else(|| Error::NotFound(format!("Account {}", reservation.account_id)))
    }

    async fn release(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Account> {
        self.with_locked(reservation.account_id, |account| {
            account.apply_release(reservation, now)
        })
        .await?
        .map(|(account, _)| account)
        .ok_or_else(|| Error::NotFound(format!("Account {}", reservation.account_id)))
    }

    async fn reset_daily_counters(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                actions_used_today = 0,
                quota_day = $1,
                updated_at = $2
            WHERE quota_day < $1
            "#,
        )
        .bind(day)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn reactivate_cooled(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                status = 'active',
                updated_at = $1
            WHERE status = 'cooling_down'
              AND (cooldown_until IS NULL OR cooldown_until <= $1)
            "#,
        )
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
