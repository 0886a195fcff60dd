//! SQLite storage
//!
//! One connection behind a mutex. rusqlite is synchronous, so every trait
//! method hands its query to the blocking pool and holds the lock only there.
//! Multi-statement operations use immediate transactions to stay atomic if the
//! file is shared with another process.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use super::{new_id, Storage};
use crate::models::{
    Bug, BugChange, BugFilters, BugUpdate, CreditOutcome, LogPage, NewBug, NewRegistrationCode,
    NewReward, NewUser, PendingCommand, RedeemOutcome, RedemptionLog, RedemptionReceipt, Reward,
    RewardRef, RewardUpdate, User, UserSummary,
};
use crate::rewards;

const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_schema",
    include_str!("../../migrations/sqlite/001_schema.sql"),
)];

const USER_COLUMNS: &str =
    "id, email, minecraft_username, password_hash, is_admin, reward_balance, created_at";
const BUG_COLUMNS: &str = "id, created_at, discord_id, minecraft_ign, title, description, \
     reproduction_steps, evidence_links, video_evidence, severity, status, hidden";
const REWARD_COLUMNS: &str =
    "id, created_at, name, description, icon_url, cost, command, active, stock";

pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        for (version, name, sql) in MIGRATIONS {
            let applied: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                params![version],
                |row| row.get(0),
            )?;
            if !applied {
                conn.execute_batch(sql)?;
                info!("Applied SQLite migration {}", name);
            }
        }
        Ok(())
    }

    /// Run `f` with the connection on the blocking pool
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut *conn)
        })
        .await
        .context("SQLite task failed")?
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        minecraft_username: row.get(2)?,
        password_hash: row.get(3)?,
        is_admin: row.get(4)?,
        reward_balance: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn bug_from_row(row: &Row) -> rusqlite::Result<Bug> {
    Ok(Bug {
        id: row.get(0)?,
        created_at: row.get(1)?,
        discord_id: row.get(2)?,
        minecraft_ign: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        reproduction_steps: row.get(6)?,
        evidence_links: json_column(row, 7)?,
        video_evidence: row.get(8)?,
        severity: parse_column(row, 9)?,
        status: parse_column(row, 10)?,
        hidden: row.get(11)?,
    })
}

fn reward_from_row(row: &Row) -> rusqlite::Result<Reward> {
    Ok(Reward {
        id: row.get(0)?,
        created_at: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        icon_url: row.get(4)?,
        cost: row.get(5)?,
        command: row.get(6)?,
        active: row.get(7)?,
        stock: row.get(8)?,
    })
}

// ============================================================================
// USERS
// ============================================================================

fn insert_user(conn: &Connection, user: NewUser) -> Result<User> {
    let created = User {
        id: new_id(),
        email: user.email,
        minecraft_username: user.minecraft_username,
        password_hash: user.password_hash,
        is_admin: user.is_admin,
        reward_balance: 0,
        created_at: Utc::now(),
    };
    conn.execute(
        &format!(
            "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            USER_COLUMNS
        ),
        params![
            created.id,
            created.email,
            created.minecraft_username,
            created.password_hash,
            created.is_admin,
            created.reward_balance,
            created.created_at,
        ],
    )?;
    Ok(created)
}

fn find_user(conn: &Connection, minecraft_username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!(
                "SELECT {} FROM users WHERE minecraft_username = ?1",
                USER_COLUMNS
            ),
            params![minecraft_username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn find_conflicting_user(
    conn: &Connection,
    email: &str,
    minecraft_username: &str,
) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!(
                "SELECT {} FROM users WHERE email = ?1 OR minecraft_username = ?2 LIMIT 1",
                USER_COLUMNS
            ),
            params![email, minecraft_username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn list_users(conn: &Connection, search: Option<&str>) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, minecraft_username, reward_balance, is_admin
         FROM users
         WHERE (?1 IS NULL
                OR minecraft_username LIKE '%' || ?1 || '%'
                OR email LIKE '%' || ?1 || '%')
         ORDER BY minecraft_username ASC",
    )?;
    let users = stmt
        .query_map(params![search], |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                email: row.get(1)?,
                minecraft_username: row.get(2)?,
                reward_balance: row.get(3)?,
                is_admin: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

fn get_balance(conn: &Connection, minecraft_username: &str) -> Result<Option<i64>> {
    let balance = conn
        .query_row(
            "SELECT reward_balance FROM users WHERE minecraft_username = ?1",
            params![minecraft_username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance)
}

/// Add coins unless the sum would leave the i64 range. SQLite would silently
/// turn the column into a REAL otherwise.
fn add_coins(conn: &Connection, minecraft_username: &str, amount: i64) -> Result<Option<i64>> {
    let balance = conn
        .query_row(
            "UPDATE users SET reward_balance = reward_balance + ?2
             WHERE minecraft_username = ?1 AND reward_balance <= ?3 - ?2
             RETURNING reward_balance",
            params![minecraft_username, amount, i64::MAX],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance)
}

fn credit_balance(conn: &Connection, minecraft_username: &str, amount: i64) -> Result<CreditOutcome> {
    if let Some(balance) = add_coins(conn, minecraft_username, amount)? {
        return Ok(CreditOutcome::Credited(balance));
    }
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE minecraft_username = ?1)",
        params![minecraft_username],
        |row| row.get(0),
    )?;
    Ok(if exists {
        CreditOutcome::Overflow
    } else {
        CreditOutcome::UserNotFound
    })
}

// ============================================================================
// REGISTRATION CODES
// ============================================================================

fn create_user_with_code(
    conn: &mut Connection,
    user: NewUser,
    code_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let consumed = tx.execute(
        "UPDATE registration_codes SET used_at = ?3
         WHERE code_hash = ?1
           AND LOWER(minecraft_username) = LOWER(?2)
           AND used_at IS NULL
           AND expires_at > ?3",
        params![code_hash, user.minecraft_username, now],
    )?;
    if consumed == 0 {
        return Ok(None);
    }

    // A failed insert drops the transaction and with it the code update
    let created = insert_user(&tx, user)?;
    tx.commit()?;
    Ok(Some(created))
}

fn insert_registration_code(conn: &Connection, code: NewRegistrationCode) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO registration_codes
            (id, minecraft_username, player_uuid, code_hash, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new_id(),
            code.minecraft_username,
            code.player_uuid,
            code.code_hash,
            code.expires_at,
            Utc::now(),
        ],
    )?;
    Ok(inserted > 0)
}

// ============================================================================
// BUG REPORTS
// ============================================================================

fn list_bugs(conn: &Connection, filters: &BugFilters) -> Result<Vec<Bug>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bugs
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR severity = ?2)
           AND (?3 IS NULL OR discord_id = ?3)
           AND (?4 IS NULL OR minecraft_ign = ?4)
           AND (?5 OR hidden = 0)
         ORDER BY created_at DESC, rowid DESC",
        BUG_COLUMNS
    ))?;
    let bugs = stmt
        .query_map(
            params![
                filters.status.map(|s| s.as_str()),
                filters.severity.map(|s| s.as_str()),
                filters.discord_id,
                filters.minecraft_ign,
                filters.include_hidden,
            ],
            bug_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(bugs)
}

fn get_bug(conn: &Connection, id: &str, include_hidden: bool) -> Result<Option<Bug>> {
    let bug = conn
        .query_row(
            &format!(
                "SELECT {} FROM bugs WHERE id = ?1 AND (?2 OR hidden = 0)",
                BUG_COLUMNS
            ),
            params![id, include_hidden],
            bug_from_row,
        )
        .optional()?;
    Ok(bug)
}

fn create_bug(conn: &Connection, bug: NewBug) -> Result<Bug> {
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
    conn.execute(
        &format!(
            "INSERT INTO bugs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            BUG_COLUMNS
        ),
        params![
            created.id,
            created.created_at,
            created.discord_id,
            created.minecraft_ign,
            created.title,
            created.description,
            created.reproduction_steps,
            serde_json::to_string(&created.evidence_links)?,
            created.video_evidence,
            created.severity.as_str(),
            created.status.as_str(),
            created.hidden,
        ],
    )?;
    Ok(created)
}

fn update_bug(conn: &mut Connection, id: &str, update: &BugUpdate) -> Result<Option<BugChange>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(existing) = get_bug(&tx, id, true)? else {
        return Ok(None);
    };
    let credit = update.fix_credit(&existing);
    let evidence_links = update
        .evidence_links
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    tx.execute(
        "UPDATE bugs SET
            status = COALESCE(?2, status),
            hidden = COALESCE(?3, hidden),
            title = COALESCE(?4, title),
            description = COALESCE(?5, description),
            reproduction_steps = COALESCE(?6, reproduction_steps),
            severity = COALESCE(?7, severity),
            evidence_links = COALESCE(?8, evidence_links)
         WHERE id = ?1",
        params![
            id,
            update.status.map(|s| s.as_str()),
            update.hidden,
            update.title,
            update.description,
            update.reproduction_steps,
            update.severity.map(|s| s.as_str()),
            evidence_links,
        ],
    )?;

    let coins_awarded = match credit {
        Some(coins) => match credit_balance(&tx, &existing.minecraft_ign, coins)? {
            CreditOutcome::Credited(_) => Some(coins),
            CreditOutcome::UserNotFound => {
                debug!(
                    "Bug {} fixed but reporter {} has no account",
                    id, existing.minecraft_ign
                );
                None
            }
            CreditOutcome::Overflow => {
                warn!(
                    "Bug {} fixed but {}'s balance cannot hold {} more coins",
                    id, existing.minecraft_ign, coins
                );
                None
            }
        },
        None => None,
    };

    let bug = get_bug(&tx, id, true)?.ok_or_else(|| anyhow!("bug {} vanished during update", id))?;
    tx.commit()?;

    Ok(Some(BugChange { bug, coins_awarded }))
}

// ============================================================================
// REWARDS
// ============================================================================

fn list_rewards(conn: &Connection, include_inactive: bool) -> Result<Vec<Reward>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM rewards WHERE (?1 OR active = 1) ORDER BY cost ASC, created_at ASC",
        REWARD_COLUMNS
    ))?;
    let rewards = stmt
        .query_map(params![include_inactive], reward_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rewards)
}

fn get_reward(conn: &Connection, id: &str) -> Result<Option<Reward>> {
    let reward = conn
        .query_row(
            &format!("SELECT {} FROM rewards WHERE id = ?1", REWARD_COLUMNS),
            params![id],
            reward_from_row,
        )
        .optional()?;
    Ok(reward)
}

fn create_reward(conn: &Connection, reward: NewReward) -> Result<Reward> {
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
    conn.execute(
        &format!(
            "INSERT INTO rewards ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            REWARD_COLUMNS
        ),
        params![
            created.id,
            created.created_at,
            created.name,
            created.description,
            created.icon_url,
            created.cost,
            created.command,
            created.active,
            created.stock,
        ],
    )?;
    Ok(created)
}

fn update_reward(conn: &mut Connection, id: &str, update: &RewardUpdate) -> Result<Option<Reward>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(mut reward) = get_reward(&tx, id)? else {
        return Ok(None);
    };
    update.apply(&mut reward);
    tx.execute(
        "UPDATE rewards SET name = ?2, description = ?3, icon_url = ?4, cost = ?5,
            command = ?6, active = ?7, stock = ?8
         WHERE id = ?1",
        params![
            id,
            reward.name,
            reward.description,
            reward.icon_url,
            reward.cost,
            reward.command,
            reward.active,
            reward.stock,
        ],
    )?;
    tx.commit()?;
    Ok(Some(reward))
}

fn redeem(conn: &mut Connection, minecraft_username: &str, reward_id: &str) -> Result<RedeemOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let reward = get_reward(&tx, reward_id)?;
    let reward = match rewards::check_reward(reward.as_ref()) {
        Ok(reward) => reward,
        Err(rejected) => return Ok(rejected),
    };

    let balance = get_balance(&tx, minecraft_username)?;
    let balance = match rewards::check_balance(balance, reward.cost) {
        Ok(balance) => balance,
        Err(rejected) => return Ok(rejected),
    };

    tx.execute(
        "UPDATE users SET reward_balance = ?2 WHERE minecraft_username = ?1",
        params![minecraft_username, balance],
    )?;

    let remaining_stock = reward.stock.map(|left| left - 1);
    if let Some(left) = remaining_stock {
        tx.execute(
            "UPDATE rewards SET stock = ?2 WHERE id = ?1",
            params![reward_id, left],
        )?;
    }

    tx.execute(
        "INSERT INTO reward_redemptions (id, created_at, minecraft_username, reward_id, command)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new_id(),
            Utc::now(),
            minecraft_username,
            reward_id,
            rewards::resolve_command(&reward.command, minecraft_username),
        ],
    )?;
    tx.commit()?;

    Ok(RedeemOutcome::Redeemed(RedemptionReceipt {
        balance,
        remaining_stock,
    }))
}

// ============================================================================
// REDEMPTIONS
// ============================================================================

fn claim_pending_commands(conn: &mut Connection, limit: i64) -> Result<Vec<PendingCommand>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let pending = {
        let mut stmt = tx.prepare(
            "SELECT id, command FROM reward_redemptions
             WHERE delivered_at IS NULL
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(PendingCommand {
                id: row.get(0)?,
                command: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let now = Utc::now();
    for command in &pending {
        tx.execute(
            "UPDATE reward_redemptions SET delivered_at = ?2 WHERE id = ?1",
            params![command.id, now],
        )?;
    }
    tx.commit()?;

    Ok(pending)
}

fn redemption_logs(conn: &Connection, page: LogPage) -> Result<(Vec<RedemptionLog>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reward_redemptions WHERE (?1 IS NULL OR created_at >= ?1)",
        params![page.since],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT r.id, r.minecraft_username, r.reward_id, r.command, r.created_at, r.delivered_at,
                w.id, w.name, w.cost
         FROM reward_redemptions r
         LEFT JOIN rewards w ON w.id = r.reward_id
         WHERE (?1 IS NULL OR r.created_at >= ?1)
         ORDER BY r.created_at DESC, r.rowid DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let logs = stmt
        .query_map(params![page.since, page.limit, page.offset], |row| {
            let reward = match row.get::<_, Option<String>>(6)? {
                Some(id) => Some(RewardRef {
                    id,
                    name: row.get(7)?,
                    cost: row.get(8)?,
                }),
                None => None,
            };
            Ok(RedemptionLog {
                id: row.get(0)?,
                minecraft_username: row.get(1)?,
                reward_id: row.get(2)?,
                command: row.get(3)?,
                created_at: row.get(4)?,
                delivered_at: row.get(5)?,
                reward,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((logs, total))
}

// ============================================================================
// STORAGE IMPL
// ============================================================================

#[async_trait]
impl Storage for SqliteStorage {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        self.run(move |conn| insert_user(conn, user)).await
    }

    async fn find_user(&self, minecraft_username: &str) -> Result<Option<User>> {
        let minecraft_username = minecraft_username.to_string();
        self.run(move |conn| find_user(conn, &minecraft_username))
            .await
    }

    async fn find_conflicting_user(
        &self,
        email: &str,
        minecraft_username: &str,
    ) -> Result<Option<User>> {
        let (email, minecraft_username) = (email.to_string(), minecraft_username.to_string());
        self.run(move |conn| find_conflicting_user(conn, &email, &minecraft_username))
            .await
    }

    async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserSummary>> {
        let search = search.map(str::to_string);
        self.run(move |conn| list_users(conn, search.as_deref()))
            .await
    }

    async fn set_admin(&self, minecraft_username: &str, is_admin: bool) -> Result<bool> {
        let minecraft_username = minecraft_username.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET is_admin = ?2 WHERE minecraft_username = ?1",
                params![minecraft_username, is_admin],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn get_balance(&self, minecraft_username: &str) -> Result<Option<i64>> {
        let minecraft_username = minecraft_username.to_string();
        self.run(move |conn| get_balance(conn, &minecraft_username))
            .await
    }

    async fn credit_balance(&self, minecraft_username: &str, amount: i64) -> Result<CreditOutcome> {
        let minecraft_username = minecraft_username.to_string();
        self.run(move |conn| credit_balance(conn, &minecraft_username, amount))
            .await
    }

    async fn delete_unused_codes(&self, player_uuid: &str) -> Result<u64> {
        let player_uuid = player_uuid.to_string();
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM registration_codes WHERE player_uuid = ?1 AND used_at IS NULL",
                params![player_uuid],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn insert_registration_code(&self, code: NewRegistrationCode) -> Result<bool> {
        self.run(move |conn| insert_registration_code(conn, code))
            .await
    }

    async fn create_user_with_code(
        &self,
        user: NewUser,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let code_hash = code_hash.to_string();
        self.run(move |conn| create_user_with_code(conn, user, &code_hash, now))
            .await
    }

    async fn purge_registration_codes(&self, now: DateTime<Utc>) -> Result<u64> {
        self.run(move |conn| {
            let purged = conn.execute(
                "DELETE FROM registration_codes WHERE expires_at <= ?1 OR used_at IS NOT NULL",
                params![now],
            )?;
            Ok(purged as u64)
        })
        .await
    }

    async fn list_bugs(&self, filters: &BugFilters) -> Result<Vec<Bug>> {
        let filters = filters.clone();
        self.run(move |conn| list_bugs(conn, &filters)).await
    }

    async fn get_bug(&self, id: &str, include_hidden: bool) -> Result<Option<Bug>> {
        let id = id.to_string();
        self.run(move |conn| get_bug(conn, &id, include_hidden))
            .await
    }

    async fn create_bug(&self, bug: NewBug) -> Result<Bug> {
        self.run(move |conn| create_bug(conn, bug)).await
    }

    async fn update_bug(&self, id: &str, update: &BugUpdate) -> Result<Option<BugChange>> {
        let (id, update) = (id.to_string(), update.clone());
        self.run(move |conn| update_bug(conn, &id, &update)).await
    }

    async fn delete_bug(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let deleted = conn.execute("DELETE FROM bugs WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_rewards(&self, include_inactive: bool) -> Result<Vec<Reward>> {
        self.run(move |conn| list_rewards(conn, include_inactive))
            .await
    }

    async fn create_reward(&self, reward: NewReward) -> Result<Reward> {
        self.run(move |conn| create_reward(conn, reward)).await
    }

    async fn update_reward(&self, id: &str, update: &RewardUpdate) -> Result<Option<Reward>> {
        let (id, update) = (id.to_string(), update.clone());
        self.run(move |conn| update_reward(conn, &id, &update))
            .await
    }

    async fn delete_reward(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let deleted = conn.execute("DELETE FROM rewards WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn redeem(&self, minecraft_username: &str, reward_id: &str) -> Result<RedeemOutcome> {
        let (minecraft_username, reward_id) = (minecraft_username.to_string(), reward_id.to_string());
        self.run(move |conn| redeem(conn, &minecraft_username, &reward_id))
            .await
    }

    async fn claim_pending_commands(&self, limit: i64) -> Result<Vec<PendingCommand>> {
        self.run(move |conn| claim_pending_commands(conn, limit))
            .await
    }

    async fn redemption_logs(&self, page: LogPage) -> Result<(Vec<RedemptionLog>, i64)> {
        self.run(move |conn| redemption_logs(conn, page)).await
    }

    async fn delete_redemption(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let deleted =
                conn.execute("DELETE FROM reward_redemptions WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn clear_redemptions(&self) -> Result<u64> {
        self.run(|conn| {
            let deleted = conn.execute("DELETE FROM reward_redemptions", [])?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, Status};
    use chrono::Duration as ChronoDuration;
    use tokio_test::block_on;

    fn storage() -> SqliteStorage {
        SqliteStorage::in_memory().unwrap()
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            email: format!("{}@thecamp.net", name.to_lowercase()),
            minecraft_username: name.to_string(),
            password_hash: "salt:hash".to_string(),
            is_admin: false,
        }
    }

    fn new_bug(owner: &str, severity: Severity) -> NewBug {
        NewBug {
            discord_id: format!("{}#0001", owner),
            minecraft_ign: owner.to_string(),
            title: "Chest duplication".to_string(),
            description: "Items duplicate when the chunk reloads".to_string(),
            reproduction_steps: "Open chest, relog".to_string(),
            evidence_links: vec!["shot.png".to_string()],
            video_evidence: None,
            severity,
            status: Status::Bug,
        }
    }

    fn new_reward(cost: i64, stock: Option<i64>) -> NewReward {
        NewReward {
            name: "Diamond".to_string(),
            description: "One shiny diamond".to_string(),
            icon_url: "/icons/diamond.png".to_string(),
            cost,
            command: "/give {player} diamond 1".to_string(),
            active: true,
            stock,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let storage = storage();
        storage.run_migrations().unwrap();
        storage.run_migrations().unwrap();
    }

    #[test]
    fn test_user_roundtrip_and_conflicts() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();

        let found = block_on(storage.find_user("Steve")).unwrap().unwrap();
        assert_eq!(found.email, "steve@thecamp.net");
        assert_eq!(found.reward_balance, 0);
        assert!(!found.is_admin);

        let by_email = block_on(storage.find_conflicting_user("steve@thecamp.net", "Other"))
            .unwrap()
            .unwrap();
        assert_eq!(by_email.minecraft_username, "Steve");
        assert!(block_on(storage.find_conflicting_user("x@y.z", "Alex"))
            .unwrap()
            .is_none());

        // Unique constraint backs up the pre-check
        assert!(block_on(storage.create_user(new_user("Steve"))).is_err());
    }

    #[test]
    fn test_list_users_search() {
        let storage = storage();
        for name in ["Steve", "Alex", "Herobrine"] {
            block_on(storage.create_user(new_user(name))).unwrap();
        }
        let all = block_on(storage.list_users(None)).unwrap();
        let names: Vec<_> = all.iter().map(|u| u.minecraft_username.as_str()).collect();
        assert_eq!(names, vec!["Alex", "Herobrine", "Steve"]);

        let hits = block_on(storage.list_users(Some("STEV"))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].minecraft_username, "Steve");

        let by_email = block_on(storage.list_users(Some("herobrine@"))).unwrap();
        assert_eq!(by_email.len(), 1);
    }

    #[test]
    fn test_balance_and_admin() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();

        assert_eq!(
            block_on(storage.credit_balance("Steve", 5)).unwrap(),
            CreditOutcome::Credited(5)
        );
        assert_eq!(
            block_on(storage.credit_balance("Steve", 2)).unwrap(),
            CreditOutcome::Credited(7)
        );
        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(7));
        assert_eq!(
            block_on(storage.credit_balance("Nobody", 5)).unwrap(),
            CreditOutcome::UserNotFound
        );
        assert_eq!(block_on(storage.get_balance("Nobody")).unwrap(), None);

        assert!(block_on(storage.set_admin("Steve", true)).unwrap());
        assert!(block_on(storage.find_user("Steve")).unwrap().unwrap().is_admin);
        assert!(!block_on(storage.set_admin("Nobody", true)).unwrap());
    }

    #[test]
    fn test_credit_refuses_overflow() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();

        assert_eq!(
            block_on(storage.credit_balance("Steve", i64::MAX)).unwrap(),
            CreditOutcome::Credited(i64::MAX)
        );
        assert_eq!(
            block_on(storage.credit_balance("Steve", 1)).unwrap(),
            CreditOutcome::Overflow
        );
        // The balance is still a readable integer
        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(i64::MAX));

        // A fix on a full wallet changes the bug but pays nothing
        let bug = block_on(storage.create_bug(new_bug("Steve", Severity::Low))).unwrap();
        let fix = BugUpdate {
            status: Some(Status::Fixed),
            ..Default::default()
        };
        let change = block_on(storage.update_bug(&bug.id, &fix)).unwrap().unwrap();
        assert_eq!(change.bug.status, Status::Fixed);
        assert_eq!(change.coins_awarded, None);
        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(i64::MAX));
    }

    #[test]
    fn test_bug_filters_and_hidden() {
        let storage = storage();
        let a = block_on(storage.create_bug(new_bug("Steve", Severity::Low))).unwrap();
        let b = block_on(storage.create_bug(new_bug("Alex", Severity::High))).unwrap();

        let all = block_on(storage.list_bugs(&BugFilters::default())).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id, "newest first");

        let high = BugFilters {
            severity: Some(Severity::High),
            ..Default::default()
        };
        assert_eq!(block_on(storage.list_bugs(&high)).unwrap().len(), 1);

        let steve = BugFilters {
            minecraft_ign: Some("Steve".into()),
            ..Default::default()
        };
        assert_eq!(block_on(storage.list_bugs(&steve)).unwrap()[0].id, a.id);

        let hide = BugUpdate {
            hidden: Some(true),
            ..Default::default()
        };
        block_on(storage.update_bug(&a.id, &hide)).unwrap().unwrap();

        assert_eq!(block_on(storage.list_bugs(&BugFilters::default())).unwrap().len(), 1);
        let with_hidden = BugFilters {
            include_hidden: true,
            ..Default::default()
        };
        assert_eq!(block_on(storage.list_bugs(&with_hidden)).unwrap().len(), 2);
        assert!(block_on(storage.get_bug(&a.id, false)).unwrap().is_none());
        let hidden = block_on(storage.get_bug(&a.id, true)).unwrap().unwrap();
        assert_eq!(hidden.evidence_links, vec!["shot.png".to_string()]);
    }

    #[test]
    fn test_fix_credits_reporter_once() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        let bug = block_on(storage.create_bug(new_bug("Steve", Severity::Medium))).unwrap();

        let fix = BugUpdate {
            status: Some(Status::Fixed),
            ..Default::default()
        };
        let change = block_on(storage.update_bug(&bug.id, &fix)).unwrap().unwrap();
        assert_eq!(change.bug.status, Status::Fixed);
        assert_eq!(change.coins_awarded, Some(2));
        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(2));

        // Re-marking FIXED pays nothing
        let again = block_on(storage.update_bug(&bug.id, &fix)).unwrap().unwrap();
        assert_eq!(again.coins_awarded, None);
        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(2));
    }

    #[test]
    fn test_fix_without_account_awards_nothing() {
        let storage = storage();
        let bug = block_on(storage.create_bug(new_bug("Ghost", Severity::Urgent))).unwrap();
        let fix = BugUpdate {
            status: Some(Status::Fixed),
            ..Default::default()
        };
        let change = block_on(storage.update_bug(&bug.id, &fix)).unwrap().unwrap();
        assert_eq!(change.bug.status, Status::Fixed);
        assert_eq!(change.coins_awarded, None);
        assert!(block_on(storage.update_bug("missing", &fix)).unwrap().is_none());
    }

    #[test]
    fn test_redeem_debits_and_enqueues() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        block_on(storage.credit_balance("Steve", 10)).unwrap();
        let reward = block_on(storage.create_reward(new_reward(4, Some(2)))).unwrap();

        let outcome = block_on(storage.redeem("Steve", &reward.id)).unwrap();
        assert_eq!(
            outcome,
            RedeemOutcome::Redeemed(RedemptionReceipt {
                balance: 6,
                remaining_stock: Some(1),
            })
        );

        let commands = block_on(storage.claim_pending_commands(25)).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "give Steve diamond 1");

        // Claimed commands are not handed out twice
        assert!(block_on(storage.claim_pending_commands(25)).unwrap().is_empty());
    }

    #[test]
    fn test_redeem_rejections_leave_state_untouched() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        block_on(storage.credit_balance("Steve", 3)).unwrap();
        let pricey = block_on(storage.create_reward(new_reward(5, None))).unwrap();
        let sold_out = block_on(storage.create_reward(new_reward(1, Some(0)))).unwrap();
        let mut unconfigured = new_reward(1, None);
        unconfigured.command = "  ".to_string();
        let unconfigured = block_on(storage.create_reward(unconfigured)).unwrap();

        assert_eq!(
            block_on(storage.redeem("Steve", &pricey.id)).unwrap(),
            RedeemOutcome::InsufficientBalance
        );
        assert_eq!(
            block_on(storage.redeem("Steve", &sold_out.id)).unwrap(),
            RedeemOutcome::OutOfStock
        );
        assert_eq!(
            block_on(storage.redeem("Steve", &unconfigured.id)).unwrap(),
            RedeemOutcome::RewardNotConfigured
        );
        assert_eq!(
            block_on(storage.redeem("Nobody", &pricey.id)).unwrap(),
            RedeemOutcome::UserNotFound
        );
        assert_eq!(
            block_on(storage.redeem("Steve", "missing")).unwrap(),
            RedeemOutcome::RewardUnavailable
        );

        assert_eq!(block_on(storage.get_balance("Steve")).unwrap(), Some(3));
        let (logs, total) = block_on(storage.redemption_logs(LogPage {
            since: None,
            limit: 20,
            offset: 0,
        }))
        .unwrap();
        assert!(logs.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_inactive_reward_hidden_and_unredeemable() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        block_on(storage.credit_balance("Steve", 10)).unwrap();
        let reward = block_on(storage.create_reward(new_reward(1, None))).unwrap();
        let deactivate = RewardUpdate {
            active: Some(false),
            ..Default::default()
        };
        block_on(storage.update_reward(&reward.id, &deactivate))
            .unwrap()
            .unwrap();

        assert!(block_on(storage.list_rewards(false)).unwrap().is_empty());
        assert_eq!(block_on(storage.list_rewards(true)).unwrap().len(), 1);
        assert_eq!(
            block_on(storage.redeem("Steve", &reward.id)).unwrap(),
            RedeemOutcome::RewardUnavailable
        );
    }

    #[test]
    fn test_rewards_sorted_by_cost() {
        let storage = storage();
        for cost in [5, 1, 3] {
            block_on(storage.create_reward(new_reward(cost, None))).unwrap();
        }
        let costs: Vec<i64> = block_on(storage.list_rewards(false))
            .unwrap()
            .iter()
            .map(|r| r.cost)
            .collect();
        assert_eq!(costs, vec![1, 3, 5]);
    }

    #[test]
    fn test_logs_paging_and_deleted_reward() {
        let storage = storage();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        block_on(storage.credit_balance("Steve", 100)).unwrap();
        let reward = block_on(storage.create_reward(new_reward(1, None))).unwrap();
        for _ in 0..3 {
            block_on(storage.redeem("Steve", &reward.id)).unwrap();
        }

        let (logs, total) = block_on(storage.redemption_logs(LogPage {
            since: None,
            limit: 2,
            offset: 0,
        }))
        .unwrap();
        assert_eq!(total, 3);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].reward.as_ref().unwrap().name, "Diamond");
        assert!(logs[0].delivered_at.is_none());

        let (future, total) = block_on(storage.redemption_logs(LogPage {
            since: Some(Utc::now() + ChronoDuration::hours(1)),
            limit: 20,
            offset: 0,
        }))
        .unwrap();
        assert!(future.is_empty());
        assert_eq!(total, 0);

        assert!(block_on(storage.delete_reward(&reward.id)).unwrap());
        let (logs, _) = block_on(storage.redemption_logs(LogPage {
            since: None,
            limit: 20,
            offset: 0,
        }))
        .unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.reward.is_none()));

        assert!(block_on(storage.delete_redemption(&logs[0].id)).unwrap());
        assert!(!block_on(storage.delete_redemption(&logs[0].id)).unwrap());
        assert_eq!(block_on(storage.clear_redemptions()).unwrap(), 2);
    }

    #[test]
    fn test_registration_codes() {
        let storage = storage();
        let now = Utc::now();
        let code = NewRegistrationCode {
            minecraft_username: "Steve".to_string(),
            player_uuid: "uuid-1".to_string(),
            code_hash: "hash-1".to_string(),
            expires_at: now + ChronoDuration::minutes(10),
        };
        assert!(block_on(storage.insert_registration_code(code.clone())).unwrap());
        // Same hash collides
        assert!(!block_on(storage.insert_registration_code(code.clone())).unwrap());

        // The code belongs to Steve, matched case-insensitively
        assert!(block_on(storage.create_user_with_code(new_user("Alex"), "hash-1", now))
            .unwrap()
            .is_none());
        assert!(block_on(storage.find_user("Alex")).unwrap().is_none());
        let created = block_on(storage.create_user_with_code(new_user("steve"), "hash-1", now))
            .unwrap()
            .unwrap();
        assert_eq!(created.minecraft_username, "steve");
        assert!(block_on(storage.create_user_with_code(new_user("Steve"), "hash-1", now))
            .unwrap()
            .is_none());

        let expired = NewRegistrationCode {
            code_hash: "hash-2".to_string(),
            expires_at: now - ChronoDuration::minutes(1),
            ..code.clone()
        };
        block_on(storage.insert_registration_code(expired)).unwrap();
        assert!(block_on(storage.create_user_with_code(new_user("Steve"), "hash-2", now))
            .unwrap()
            .is_none());

        let fresh = NewRegistrationCode {
            code_hash: "hash-3".to_string(),
            ..code
        };
        block_on(storage.insert_registration_code(fresh)).unwrap();
        assert_eq!(block_on(storage.delete_unused_codes("uuid-1")).unwrap(), 2);

        // Only the used code remains, and it is purgeable
        assert_eq!(block_on(storage.purge_registration_codes(now)).unwrap(), 1);
    }

    #[test]
    fn test_failed_signup_keeps_code() {
        let storage = storage();
        let now = Utc::now();
        block_on(storage.create_user(new_user("Steve"))).unwrap();
        let code = NewRegistrationCode {
            minecraft_username: "Steve".to_string(),
            player_uuid: "uuid-1".to_string(),
            code_hash: "hash-1".to_string(),
            expires_at: now + ChronoDuration::minutes(10),
        };
        block_on(storage.insert_registration_code(code)).unwrap();

        // Username is already taken, so the insert fails inside the transaction
        let other = NewUser {
            email: "other@thecamp.net".to_string(),
            ..new_user("Steve")
        };
        assert!(block_on(storage.create_user_with_code(other, "hash-1", now)).is_err());
        assert_eq!(block_on(storage.delete_unused_codes("uuid-1")).unwrap(), 1);
    }
}
