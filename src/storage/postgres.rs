//! PostgreSQL storage
//!
//! Used when DATABASE_URL is set. Row locks (`FOR UPDATE`) keep redemption,
//! fix credit and command claiming safe across server instances.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

use super::{new_id, Storage};
use crate::models::{
    Bug, BugChange, BugFilters, BugUpdate, CreditOutcome, LogPage, NewBug, NewRegistrationCode, NewReward,
    NewUser, PendingCommand, RedeemOutcome, RedemptionLog, RedemptionReceipt, Reward, RewardRef,
    RewardUpdate, User, UserSummary,
};
use crate::rewards;

const DB_QUERY_TIMEOUT_SECS: u64 = 30;

const MIGRATIONS: &[(i32, &str, &str)] = &[(
    1,
    "001_schema",
    include_str!("../../migrations/postgres/001_schema.sql"),
)];

const USER_COLUMNS: &str =
    "id, email, minecraft_username, password_hash, is_admin, reward_balance, created_at";
const BUG_COLUMNS: &str = "id, created_at, discord_id, minecraft_ign, title, description, \
     reproduction_steps, evidence_links, video_evidence, severity, status, hidden";
const REWARD_COLUMNS: &str =
    "id, created_at, name, description, icon_url, cost, command, active, stock";

const INSERT_USER: &str = "INSERT INTO users (id, email, minecraft_username, password_hash, \
     is_admin, reward_balance, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)";

/// `$3` is `i64::MAX`; a credit that would overflow matches no row
const ADD_COINS: &str = "UPDATE users SET reward_balance = reward_balance + $2
     WHERE minecraft_username = $1 AND reward_balance <= $3 - $2
     RETURNING reward_balance";

#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    pub async fn new(database_url: &str, pool_max_size: usize) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: pool_max_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client
            .execute(
                &format!("SET statement_timeout = '{}s'", DB_QUERY_TIMEOUT_SECS),
                &[],
            )
            .await?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            pool_max_size, DB_QUERY_TIMEOUT_SECS
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .await?;

        for (version, name, sql) in MIGRATIONS {
            let applied: bool = client
                .query_one(
                    "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = $1)",
                    &[version],
                )
                .await?
                .get(0);

            if !applied {
                client.batch_execute(sql).await?;
                info!("Applied migration {}", name);
            }
        }
        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn new_user_row(user: NewUser) -> User {
    User {
        id: new_id(),
        email: user.email,
        minecraft_username: user.minecraft_username,
        password_hash: user.password_hash,
        is_admin: user.is_admin,
        reward_balance: 0,
        created_at: Utc::now(),
    }
}

fn user_params(user: &User) -> [&(dyn ToSql + Sync); 7] {
    [
        &user.id,
        &user.email,
        &user.minecraft_username,
        &user.password_hash,
        &user.is_admin,
        &user.reward_balance,
        &user.created_at,
    ]
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        email: row.get(1),
        minecraft_username: row.get(2),
        password_hash: row.get(3),
        is_admin: row.get(4),
        reward_balance: row.get(5),
        created_at: row.get(6),
    }
}

fn bug_from_row(row: &Row) -> Result<Bug> {
    Ok(Bug {
        id: row.get(0),
        created_at: row.get(1),
        discord_id: row.get(2),
        minecraft_ign: row.get(3),
        title: row.get(4),
        description: row.get(5),
        reproduction_steps: row.get(6),
        evidence_links: row.get(7),
        video_evidence: row.get(8),
        severity: row.get::<_, String>(9).parse()?,
        status: row.get::<_, String>(10).parse()?,
        hidden: row.get(11),
    })
}

fn reward_from_row(row: &Row) -> Reward {
    Reward {
        id: row.get(0),
        created_at: row.get(1),
        name: row.get(2),
        description: row.get(3),
        icon_url: row.get(4),
        cost: row.get(5),
        command: row.get(6),
        active: row.get(7),
        stock: row.get(8),
    }
}

#[async_trait]
impl Storage for PgStorage {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    // ========================================================================
    // USERS
    // ========================================================================

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let client = self.pool.get().await?;
        let created = new_user_row(user);

        client.execute(INSERT_USER, &user_params(&created)).await?;

        info!("Created account {}", created.minecraft_username);
        Ok(created)
    }

    async fn find_user(&self, minecraft_username: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM users WHERE minecraft_username = $1",
                    USER_COLUMNS
                ),
                &[&minecraft_username],
            )
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_conflicting_user(
        &self,
        email: &str,
        minecraft_username: &str,
    ) -> Result<Option<User>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM users WHERE email = $1 OR minecraft_username = $2 LIMIT 1",
                    USER_COLUMNS
                ),
                &[&email, &minecraft_username],
            )
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserSummary>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                "SELECT id, email, minecraft_username, reward_balance, is_admin
                 FROM users
                 WHERE ($1::TEXT IS NULL
                        OR minecraft_username ILIKE '%' || $1 || '%'
                        OR email ILIKE '%' || $1 || '%')
                 ORDER BY minecraft_username ASC",
                &[&search],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| UserSummary {
                id: r.get(0),
                email: r.get(1),
                minecraft_username: r.get(2),
                reward_balance: r.get(3),
                is_admin: r.get(4),
            })
            .collect())
    }

    async fn set_admin(&self, minecraft_username: &str, is_admin: bool) -> Result<bool> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE users SET is_admin = $2 WHERE minecraft_username = $1",
                &[&minecraft_username, &is_admin],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn get_balance(&self, minecraft_username: &str) -> Result<Option<i64>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT reward_balance FROM users WHERE minecraft_username = $1",
                &[&minecraft_username],
            )
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn credit_balance(&self, minecraft_username: &str, amount: i64) -> Result<CreditOutcome> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(ADD_COINS, &[&minecraft_username, &amount, &i64::MAX])
            .await?;
        if let Some(row) = row {
            return Ok(CreditOutcome::Credited(row.get(0)));
        }

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE minecraft_username = $1)",
                &[&minecraft_username],
            )
            .await?
            .get(0);
        Ok(if exists {
            CreditOutcome::Overflow
        } else {
            CreditOutcome::UserNotFound
        })
    }

    // ========================================================================
    // REGISTRATION CODES
    // ========================================================================

    async fn delete_unused_codes(&self, player_uuid: &str) -> Result<u64> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute(
                "DELETE FROM registration_codes WHERE player_uuid = $1 AND used_at IS NULL",
                &[&player_uuid],
            )
            .await?;

        Ok(deleted)
    }

    async fn insert_registration_code(&self, code: NewRegistrationCode) -> Result<bool> {
        let client = self.pool.get().await?;

        let inserted = client
            .execute(
                "INSERT INTO registration_codes
                    (id, minecraft_username, player_uuid, code_hash, expires_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (code_hash) DO NOTHING",
                &[
                    &new_id(),
                    &code.minecraft_username,
                    &code.player_uuid,
                    &code.code_hash,
                    &code.expires_at,
                ],
            )
            .await?;

        Ok(inserted > 0)
    }

    async fn create_user_with_code(
        &self,
        user: NewUser,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let consumed = tx
            .execute(
                "UPDATE registration_codes SET used_at = $3
                 WHERE code_hash = $1
                   AND LOWER(minecraft_username) = LOWER($2)
                   AND used_at IS NULL
                   AND expires_at > $3",
                &[&code_hash, &user.minecraft_username, &now],
            )
            .await?;
        if consumed == 0 {
            return Ok(None);
        }

        // Dropping the transaction on a failed insert rolls the code back
        let created = new_user_row(user);
        tx.execute(INSERT_USER, &user_params(&created)).await?;
        tx.commit().await?;

        info!("Created account {}", created.minecraft_username);
        Ok(Some(created))
    }

    async fn purge_registration_codes(&self, now: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;

        let purged = client
            .execute(
                "DELETE FROM registration_codes WHERE expires_at <= $1 OR used_at IS NOT NULL",
                &[&now],
            )
            .await?;

        Ok(purged)
    }

    // ========================================================================
    // BUG REPORTS
    // ========================================================================

    async fn list_bugs(&self, filters: &BugFilters) -> Result<Vec<Bug>> {
        let client = self.pool.get().await?;
        let status = filters.status.map(|s| s.as_str());
        let severity = filters.severity.map(|s| s.as_str());

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM bugs
                     WHERE ($1::TEXT IS NULL OR status = $1)
                       AND ($2::TEXT IS NULL OR severity = $2)
                       AND ($3::TEXT IS NULL OR discord_id = $3)
                       AND ($4::TEXT IS NULL OR minecraft_ign = $4)
                       AND ($5::BOOLEAN OR hidden = FALSE)
                     ORDER BY created_at DESC",
                    BUG_COLUMNS
                ),
                &[
                    &status,
                    &severity,
                    &filters.discord_id,
                    &filters.minecraft_ign,
                    &filters.include_hidden,
                ],
            )
            .await?;

        rows.iter().map(bug_from_row).collect()
    }

    async fn get_bug(&self, id: &str, include_hidden: bool) -> Result<Option<Bug>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM bugs WHERE id = $1 AND ($2::BOOLEAN OR hidden = FALSE)",
                    BUG_COLUMNS
                ),
                &[&id, &include_hidden],
            )
            .await?;

        row.as_ref().map(bug_from_row).transpose()
    }

    async fn create_bug(&self, bug: NewBug) -> Result<Bug> {
        let client = self.pool.get().await?;
        let created = Bug {
            id: new_id(),
            created_at: Utc::now(),
            discord_id: bug.discord_id,
            minecraft_ign: bug.minecraft_ign,
            title: bug.title,
            description: bug.description,
            reproduction_steps: bug.reproduction_steps,
            evidence_links: bug.evidence_links,
            video_evidence: bug.video_evidence,
            severity: bug.severity,
            status: bug.status,
            hidden: false,
        };

        client
            .execute(
                &format!(
                    "INSERT INTO bugs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                    BUG_COLUMNS
                ),
                &[
                    &created.id,
                    &created.created_at,
                    &created.discord_id,
                    &created.minecraft_ign,
                    &created.title,
                    &created.description,
                    &created.reproduction_steps,
                    &created.evidence_links,
                    &created.video_evidence,
                    &created.severity.as_str(),
                    &created.status.as_str(),
                    &created.hidden,
                ],
            )
            .await?;

        Ok(created)
    }

    async fn update_bug(&self, id: &str, update: &BugUpdate) -> Result<Option<BugChange>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM bugs WHERE id = $1 FOR UPDATE", BUG_COLUMNS),
                &[&id],
            )
            .await?;
        let Some(existing) = row.as_ref().map(bug_from_row).transpose()? else {
            return Ok(None);
        };
        let credit = update.fix_credit(&existing);

        let status = update.status.map(|s| s.as_str());
        let severity = update.severity.map(|s| s.as_str());
        let row = tx
            .query_one(
                &format!(
                    "UPDATE bugs SET
                        status = COALESCE($2::TEXT, status),
                        hidden = COALESCE($3::BOOLEAN, hidden),
                        title = COALESCE($4::TEXT, title),
                        description = COALESCE($5::TEXT, description),
                        reproduction_steps = COALESCE($6::TEXT, reproduction_steps),
                        severity = COALESCE($7::TEXT, severity),
                        evidence_links = COALESCE($8::TEXT[], evidence_links)
                     WHERE id = $1
                     RETURNING {}",
                    BUG_COLUMNS
                ),
                &[
                    &id,
                    &status,
                    &update.hidden,
                    &update.title,
                    &update.description,
                    &update.reproduction_steps,
                    &severity,
                    &update.evidence_links,
                ],
            )
            .await?;
        let bug = bug_from_row(&row)?;

        let coins_awarded = match credit {
            Some(coins) => {
                let credited = tx
                    .query_opt(ADD_COINS, &[&existing.minecraft_ign, &coins, &i64::MAX])
                    .await?;
                if credited.is_none() {
                    let exists: bool = tx
                        .query_one(
                            "SELECT EXISTS(SELECT 1 FROM users WHERE minecraft_username = $1)",
                            &[&existing.minecraft_ign],
                        )
                        .await?
                        .get(0);
                    if exists {
                        warn!(
                            "Bug {} fixed but crediting {} would overflow their balance",
                            id, existing.minecraft_ign
                        );
                    } else {
                        debug!(
                            "Bug {} fixed but reporter {} has no account",
                            id, existing.minecraft_ign
                        );
                    }
                }
                credited.map(|_| coins)
            }
            None => None,
        };

        tx.commit().await?;

        if let Some(coins) = coins_awarded {
            info!(
                "Credited {} coins to {} for bug {}",
                coins, existing.minecraft_ign, id
            );
        }
        Ok(Some(BugChange { bug, coins_awarded }))
    }

    async fn delete_bug(&self, id: &str) -> Result<bool> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute("DELETE FROM bugs WHERE id = $1", &[&id])
            .await?;

        Ok(deleted > 0)
    }

    // ========================================================================
    // REWARDS
    // ========================================================================

    async fn list_rewards(&self, include_inactive: bool) -> Result<Vec<Reward>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM rewards
                     WHERE ($1::BOOLEAN OR active = TRUE)
                     ORDER BY cost ASC, created_at ASC",
                    REWARD_COLUMNS
                ),
                &[&include_inactive],
            )
            .await?;

        Ok(rows.iter().map(reward_from_row).collect())
    }

    async fn create_reward(&self, reward: NewReward) -> Result<Reward> {
        let client = self.pool.get().await?;
        let created = Reward {
            id: new_id(),
            created_at: Utc::now(),
            name: reward.name,
            description: reward.description,
            icon_url: reward.icon_url,
            cost: reward.cost,
            command: reward.command,
            active: reward.active,
            stock: reward.stock,
        };

        client
            .execute(
                &format!(
                    "INSERT INTO rewards ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    REWARD_COLUMNS
                ),
                &[
                    &created.id,
                    &created.created_at,
                    &created.name,
                    &created.description,
                    &created.icon_url,
                    &created.cost,
                    &created.command,
                    &created.active,
                    &created.stock,
                ],
            )
            .await?;

        info!("Created reward {} ({} coins)", created.name, created.cost);
        Ok(created)
    }

    async fn update_reward(&self, id: &str, update: &RewardUpdate) -> Result<Option<Reward>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!(
                    "SELECT {} FROM rewards WHERE id = $1 FOR UPDATE",
                    REWARD_COLUMNS
                ),
                &[&id],
            )
            .await?;
        let Some(mut reward) = row.as_ref().map(reward_from_row) else {
            return Ok(None);
        };
        update.apply(&mut reward);

        tx.execute(
            "UPDATE rewards SET name = $2, description = $3, icon_url = $4, cost = $5,
                command = $6, active = $7, stock = $8
             WHERE id = $1",
            &[
                &id,
                &reward.name,
                &reward.description,
                &reward.icon_url,
                &reward.cost,
                &reward.command,
                &reward.active,
                &reward.stock,
            ],
        )
        .await?;
        tx.commit().await?;

        Ok(Some(reward))
    }

    async fn delete_reward(&self, id: &str) -> Result<bool> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute("DELETE FROM rewards WHERE id = $1", &[&id])
            .await?;

        Ok(deleted > 0)
    }

    async fn redeem(&self, minecraft_username: &str, reward_id: &str) -> Result<RedeemOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!(
                    "SELECT {} FROM rewards WHERE id = $1 FOR UPDATE",
                    REWARD_COLUMNS
                ),
                &[&reward_id],
            )
            .await?;
        let reward = row.as_ref().map(reward_from_row);
        let reward = match rewards::check_reward(reward.as_ref()) {
            Ok(reward) => reward,
            Err(rejected) => return Ok(rejected),
        };

        let balance: Option<i64> = tx
            .query_opt(
                "SELECT reward_balance FROM users WHERE minecraft_username = $1 FOR UPDATE",
                &[&minecraft_username],
            )
            .await?
            .map(|r| r.get(0));
        let balance = match rewards::check_balance(balance, reward.cost) {
            Ok(balance) => balance,
            Err(rejected) => return Ok(rejected),
        };

        tx.execute(
            "UPDATE users SET reward_balance = $2 WHERE minecraft_username = $1",
            &[&minecraft_username, &balance],
        )
        .await?;

        let remaining_stock = reward.stock.map(|left| left - 1);
        if let Some(left) = remaining_stock {
            tx.execute(
                "UPDATE rewards SET stock = $2 WHERE id = $1",
                &[&reward_id, &left],
            )
            .await?;
        }

        let command = rewards::resolve_command(&reward.command, minecraft_username);
        tx.execute(
            "INSERT INTO reward_redemptions (id, minecraft_username, reward_id, command)
             VALUES ($1, $2, $3, $4)",
            &[&new_id(), &minecraft_username, &reward_id, &command],
        )
        .await?;
        tx.commit().await?;

        info!(
            "{} redeemed {} ({} coins left)",
            minecraft_username, reward.name, balance
        );
        Ok(RedeemOutcome::Redeemed(RedemptionReceipt {
            balance,
            remaining_stock,
        }))
    }

    // ========================================================================
    // REDEMPTIONS
    // ========================================================================

    async fn claim_pending_commands(&self, limit: i64) -> Result<Vec<PendingCommand>> {
        let client = self.pool.get().await?;

        // SKIP LOCKED lets concurrent pollers split the queue instead of
        // delivering the same command twice.
        let rows = client
            .query(
                "WITH batch AS (
                    SELECT id FROM reward_redemptions
                    WHERE delivered_at IS NULL
                    ORDER BY created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                 )
                 UPDATE reward_redemptions r SET delivered_at = NOW()
                 FROM batch
                 WHERE r.id = batch.id
                 RETURNING r.id, r.command, r.created_at",
                &[&limit],
            )
            .await?;

        let mut claimed: Vec<(DateTime<Utc>, PendingCommand)> = rows
            .iter()
            .map(|r| {
                (
                    r.get(2),
                    PendingCommand {
                        id: r.get(0),
                        command: r.get(1),
                    },
                )
            })
            .collect();
        claimed.sort_by_key(|(created_at, _)| *created_at);

        if !claimed.is_empty() {
            debug!("Delivered {} reward commands", claimed.len());
        }
        Ok(claimed.into_iter().map(|(_, command)| command).collect())
    }

    async fn redemption_logs(&self, page: LogPage) -> Result<(Vec<RedemptionLog>, i64)> {
        let client = self.pool.get().await?;

        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM reward_redemptions
                 WHERE ($1::TIMESTAMPTZ IS NULL OR created_at >= $1)",
                &[&page.since],
            )
            .await?
            .get(0);

        let rows = client
            .query(
                "SELECT r.id, r.minecraft_username, r.reward_id, r.command, r.created_at,
                        r.delivered_at, w.id, w.name, w.cost
                 FROM reward_redemptions r
                 LEFT JOIN rewards w ON w.id = r.reward_id
                 WHERE ($1::TIMESTAMPTZ IS NULL OR r.created_at >= $1)
                 ORDER BY r.created_at DESC
                 LIMIT $2 OFFSET $3",
                &[&page.since, &page.limit, &page.offset],
            )
            .await?;

        let logs = rows
            .iter()
            .map(|r| RedemptionLog {
                id: r.get(0),
                minecraft_username: r.get(1),
                reward_id: r.get(2),
                command: r.get(3),
                created_at: r.get(4),
                delivered_at: r.get(5),
                reward: r.get::<_, Option<String>>(6).map(|id| RewardRef {
                    id,
                    name: r.get(7),
                    cost: r.get(8),
                }),
            })
            .collect();

        Ok((logs, total))
    }

    async fn delete_redemption(&self, id: &str) -> Result<bool> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute("DELETE FROM reward_redemptions WHERE id = $1", &[&id])
            .await?;

        Ok(deleted > 0)
    }

    async fn clear_redemptions(&self) -> Result<u64> {
        let client = self.pool.get().await?;

        let deleted = client
            .execute("DELETE FROM reward_redemptions", &[])
            .await?;

        info!("Cleared {} redemption logs", deleted);
        Ok(deleted)
    }
}
