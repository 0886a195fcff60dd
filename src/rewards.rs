//! Reward rules shared by both storage backends
//!
//! - Command template resolution for the Minecraft plugin
//! - Redemption eligibility (checked inside the storage transaction)
//! - Redemption log paging and time ranges

use chrono::{DateTime, Duration, Months, Utc};

use crate::models::{LogPage, RedeemOutcome, Reward};

const PLAYER_PLACEHOLDERS: [&str; 3] = ["{player}", "{username}", "{minecraftUsername}"];

pub const DEFAULT_LOG_LIMIT: i64 = 20;
pub const MAX_LOG_LIMIT: i64 = 100;

/// Substitute the player name into a reward command.
///
/// The plugin dispatches commands from the console, so a leading slash is dropped.
pub fn resolve_command(template: &str, minecraft_username: &str) -> String {
    let mut command = template.trim().to_string();
    for placeholder in PLAYER_PLACEHOLDERS {
        command = command.replace(placeholder, minecraft_username);
    }
    let command = command.trim();
    match command.strip_prefix('/') {
        Some(rest) => rest.trim().to_string(),
        None => command.to_string(),
    }
}

/// Reward-side checks, in the order the API reports them.
pub fn check_reward(reward: Option<&Reward>) -> Result<&Reward, RedeemOutcome> {
    let reward = match reward {
        Some(r) if r.active => r,
        _ => return Err(RedeemOutcome::RewardUnavailable),
    };
    if reward.command.trim().is_empty() {
        return Err(RedeemOutcome::RewardNotConfigured);
    }
    if matches!(reward.stock, Some(left) if left <= 0) {
        return Err(RedeemOutcome::OutOfStock);
    }
    Ok(reward)
}

/// User-side check. Returns the balance after the debit.
pub fn check_balance(balance: Option<i64>, cost: i64) -> Result<i64, RedeemOutcome> {
    match balance {
        None => Err(RedeemOutcome::UserNotFound),
        Some(b) if b < cost => Err(RedeemOutcome::InsufficientBalance),
        Some(b) => Ok(b - cost),
    }
}

/// Time window for the redemption log view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogRange {
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl LogRange {
    /// Unknown values fall back to `All`
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("day") => LogRange::Day,
            Some("week") => LogRange::Week,
            Some("month") => LogRange::Month,
            Some("year") => LogRange::Year,
            _ => LogRange::All,
        }
    }

    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            LogRange::Day => Some(now - Duration::hours(24)),
            LogRange::Week => Some(now - Duration::days(7)),
            LogRange::Month => now.checked_sub_months(Months::new(1)),
            LogRange::Year => now.checked_sub_months(Months::new(12)),
            LogRange::All => None,
        }
    }
}

/// Clamp raw paging parameters: limit to [1, 100] (default 20), page to >= 1.
/// Pages past the end of i64 offsets saturate and come back empty.
pub fn log_page(
    limit: Option<i64>,
    page: Option<i64>,
    range: LogRange,
    now: DateTime<Utc>,
) -> (i64, LogPage) {
    let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let page = page.unwrap_or(1).max(1);
    (
        page,
        LogPage {
            since: range.start(now),
            limit,
            offset: (page - 1).saturating_mul(limit),
        },
    )
}

pub fn page_count(total: i64, limit: i64) -> i64 {
    ((total + limit - 1) / limit).max(1)
}
