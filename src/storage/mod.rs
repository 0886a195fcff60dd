//! Persistence layer
//!
//! `Storage` is implemented by:
//! - [`PgStorage`]: PostgreSQL through a deadpool pool (DATABASE_URL)
//! - [`SqliteStorage`]: a single rusqlite connection, for small deployments and tests

mod postgres;
mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Config;
use crate::models::{
    Bug, BugChange, BugFilters, BugUpdate, CreditOutcome, LogPage, NewBug, NewRegistrationCode,
    NewReward, NewUser, PendingCommand, RedeemOutcome, RedemptionLog, Reward, RewardUpdate, User,
    UserSummary,
};

pub use postgres::PgStorage;
pub use sqlite::SqliteStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for health output
    fn backend(&self) -> &'static str;

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn find_user(&self, minecraft_username: &str) -> Result<Option<User>>;

    /// First user whose email or username collides with the given pair
    async fn find_conflicting_user(
        &self,
        email: &str,
        minecraft_username: &str,
    ) -> Result<Option<User>>;

    async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserSummary>>;

    async fn set_admin(&self, minecraft_username: &str, is_admin: bool) -> Result<bool>;

    async fn get_balance(&self, minecraft_username: &str) -> Result<Option<i64>>;

    /// Add a positive amount of coins. Credits that would overflow the balance
    /// are refused without touching the row.
    async fn credit_balance(&self, minecraft_username: &str, amount: i64) -> Result<CreditOutcome>;

    // ------------------------------------------------------------------------
    // Registration codes
    // ------------------------------------------------------------------------

    async fn delete_unused_codes(&self, player_uuid: &str) -> Result<u64>;

    /// `false` when the code hash already exists
    async fn insert_registration_code(&self, code: NewRegistrationCode) -> Result<bool>;

    /// Consume a matching, unused, unexpired code and create the user in one
    /// transaction. `None` when no code matches; the code survives a failed insert.
    async fn create_user_with_code(
        &self,
        user: NewUser,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    /// Drop codes that expired or were used
    async fn purge_registration_codes(&self, now: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------------
    // Bug reports
    // ------------------------------------------------------------------------

    async fn list_bugs(&self, filters: &BugFilters) -> Result<Vec<Bug>>;

    async fn get_bug(&self, id: &str, include_hidden: bool) -> Result<Option<Bug>>;

    async fn create_bug(&self, bug: NewBug) -> Result<Bug>;

    /// Apply an update and, on the transition into FIXED, credit the reporter
    /// in the same transaction.
    async fn update_bug(&self, id: &str, update: &BugUpdate) -> Result<Option<BugChange>>;

    async fn delete_bug(&self, id: &str) -> Result<bool>;

    // ------------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------------

    async fn list_rewards(&self, include_inactive: bool) -> Result<Vec<Reward>>;

    async fn create_reward(&self, reward: NewReward) -> Result<Reward>;

    async fn update_reward(&self, id: &str, update: &RewardUpdate) -> Result<Option<Reward>>;

    async fn delete_reward(&self, id: &str) -> Result<bool>;

    /// Debit, decrement stock and enqueue the resolved command atomically
    async fn redeem(&self, minecraft_username: &str, reward_id: &str) -> Result<RedeemOutcome>;

    // ------------------------------------------------------------------------
    // Redemptions
    // ------------------------------------------------------------------------

    /// Oldest undelivered commands, marked delivered in the same transaction
    async fn claim_pending_commands(&self, limit: i64) -> Result<Vec<PendingCommand>>;

    async fn redemption_logs(&self, page: LogPage) -> Result<(Vec<RedemptionLog>, i64)>;

    async fn delete_redemption(&self, id: &str) -> Result<bool>;

    async fn clear_redemptions(&self) -> Result<u64>;
}

/// PostgreSQL when DATABASE_URL is configured, SQLite otherwise
pub async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.database.url {
        Some(url) => {
            let storage = PgStorage::new(url, config.database.pool_max_size).await?;
            Ok(Arc::new(storage))
        }
        None => {
            info!(
                "DATABASE_URL not set, using SQLite at {}",
                config.database.sqlite_path.display()
            );
            let storage = SqliteStorage::new(&config.database.sqlite_path)?;
            Ok(Arc::new(storage))
        }
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
