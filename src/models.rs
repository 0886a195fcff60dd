//! Domain types shared by the API and the storage backends.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// BUG REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Urgent => "URGENT",
        }
    }

    /// Reward coins granted when a report of this severity is fixed
    pub fn reward_coins(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Urgent => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Bug,
    OnInvestigation,
    Fixed,
    NotABug,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Bug => "BUG",
            Status::OnInvestigation => "ON_INVESTIGATION",
            Status::Fixed => "FIXED",
            Status::NotABug => "NOT_A_BUG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError(pub String);

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value: {}", self.0)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "URGENT" => Ok(Severity::Urgent),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUG" => Ok(Status::Bug),
            "ON_INVESTIGATION" => Ok(Status::OnInvestigation),
            "FIXED" => Ok(Status::Fixed),
            "NOT_A_BUG" => Ok(Status::NotABug),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub discord_id: String,
    pub minecraft_ign: String,
    pub title: String,
    pub description: String,
    pub reproduction_steps: String,
    pub evidence_links: Vec<String>,
    pub video_evidence: Option<String>,
    pub severity: Severity,
    pub status: Status,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct NewBug {
    pub discord_id: String,
    pub minecraft_ign: String,
    pub title: String,
    pub description: String,
    pub reproduction_steps: String,
    pub evidence_links: Vec<String>,
    pub video_evidence: Option<String>,
    pub severity: Severity,
    pub status: Status,
}

/// Partial update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct BugUpdate {
    pub status: Option<Status>,
    pub hidden: Option<bool>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub reproduction_steps: Option<String>,
    pub severity: Option<Severity>,
    pub evidence_links: Option<Vec<String>>,
}

impl BugUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.hidden.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.reproduction_steps.is_none()
            && self.severity.is_none()
            && self.evidence_links.is_none()
    }

    /// Coins owed to the reporter if this update is applied to `existing`.
    ///
    /// Only the transition into FIXED pays out, valued at the severity in
    /// effect after the update.
    pub fn fix_credit(&self, existing: &Bug) -> Option<i64> {
        match self.status {
            Some(Status::Fixed) if existing.status != Status::Fixed => Some(
                self.severity
                    .unwrap_or(existing.severity)
                    .reward_coins(),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BugFilters {
    pub status: Option<Status>,
    pub severity: Option<Severity>,
    pub discord_id: Option<String>,
    pub minecraft_ign: Option<String>,
    pub include_hidden: bool,
}

/// Result of a bug update, including any coins credited to the reporter
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BugChange {
    #[serde(flatten)]
    pub bug: Bug,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coins_awarded: Option<i64>,
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub minecraft_username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub reward_balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub minecraft_username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// Public account view returned by register and login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub email: String,
    pub minecraft_username: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for Account {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            minecraft_username: user.minecraft_username.clone(),
            created_at: user.created_at,
        }
    }
}

/// Row in the admin user list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub minecraft_username: String,
    pub reward_balance: i64,
    pub is_admin: bool,
}

/// Outcome of crediting coins to a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited(i64),
    UserNotFound,
    /// The balance would exceed `i64::MAX`; nothing was written
    Overflow,
}

#[derive(Debug, Clone)]
pub struct NewRegistrationCode {
    pub minecraft_username: String,
    pub player_uuid: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// REWARDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub icon_url: String,
    pub cost: i64,
    pub command: String,
    pub active: bool,
    /// Remaining units; `None` means unlimited
    pub stock: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewReward {
    pub name: String,
    pub description: String,
    pub icon_url: String,
    pub cost: i64,
    pub command: String,
    pub active: bool,
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RewardUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub cost: Option<i64>,
    pub command: Option<String>,
    pub active: Option<bool>,
    /// `Some(None)` clears the stock limit
    pub stock: Option<Option<i64>>,
}

impl RewardUpdate {
    pub fn apply(&self, reward: &mut Reward) {
        if let Some(name) = &self.name {
            reward.name = name.clone();
        }
        if let Some(description) = &self.description {
            reward.description = description.clone();
        }
        if let Some(icon_url) = &self.icon_url {
            reward.icon_url = icon_url.clone();
        }
        if let Some(cost) = self.cost {
            reward.cost = cost;
        }
        if let Some(command) = &self.command {
            reward.command = command.clone();
        }
        if let Some(active) = self.active {
            reward.active = active;
        }
        if let Some(stock) = self.stock {
            reward.stock = stock;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub id: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRef {
    pub id: String,
    pub name: String,
    pub cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionLog {
    pub id: String,
    pub minecraft_username: String,
    pub reward_id: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub reward: Option<RewardRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub balance: i64,
    pub remaining_stock: Option<i64>,
}

/// Outcome of a redemption attempt. Rejections leave every row untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed(RedemptionReceipt),
    RewardUnavailable,
    RewardNotConfigured,
    OutOfStock,
    UserNotFound,
    InsufficientBalance,
}

#[derive(Debug, Clone, Copy)]
pub struct LogPage {
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bug(status: Status, severity: Severity) -> Bug {
        Bug {
            id: "b1".into(),
            created_at: Utc::now(),
            discord_id: "disc#1".into(),
            minecraft_ign: "Steve".into(),
            title: "Falling through floor".into(),
            description: "At spawn".into(),
            reproduction_steps: "Jump".into(),
            evidence_links: vec![],
            video_evidence: None,
            severity,
            status,
            hidden: false,
        }
    }

    #[test]
    fn test_severity_coins() {
        assert_eq!(Severity::Low.reward_coins(), 1);
        assert_eq!(Severity::Medium.reward_coins(), 2);
        assert_eq!(Severity::High.reward_coins(), 3);
        assert_eq!(Severity::Urgent.reward_coins(), 4);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&Status::OnInvestigation).unwrap(),
            "\"ON_INVESTIGATION\""
        );
        assert_eq!(serde_json::to_string(&Status::NotABug).unwrap(), "\"NOT_A_BUG\"");
        let severity: Severity = serde_json::from_str("\"URGENT\"").unwrap();
        assert_eq!(severity, Severity::Urgent);
        assert_eq!("NOT_A_BUG".parse::<Status>().unwrap(), Status::NotABug);
        assert!("fixed".parse::<Status>().is_err());
        assert_eq!(Severity::High.as_str().parse::<Severity>().unwrap(), Severity::High);
    }

    #[test]
    fn test_fix_credit_only_on_transition() {
        let open = sample_bug(Status::OnInvestigation, Severity::High);
        let fix = BugUpdate {
            status: Some(Status::Fixed),
            ..Default::default()
        };
        assert_eq!(fix.fix_credit(&open), Some(3));

        let already_fixed = sample_bug(Status::Fixed, Severity::High);
        assert_eq!(fix.fix_credit(&already_fixed), None);

        let unrelated = BugUpdate {
            hidden: Some(true),
            ..Default::default()
        };
        assert_eq!(unrelated.fix_credit(&open), None);
    }

    #[test]
    fn test_fix_credit_uses_new_severity() {
        let open = sample_bug(Status::Bug, Severity::Low);
        let fix = BugUpdate {
            status: Some(Status::Fixed),
            severity: Some(Severity::Urgent),
            ..Default::default()
        };
        assert_eq!(fix.fix_credit(&open), Some(4));
    }

    #[test]
    fn test_bug_change_flattens() {
        let change = BugChange {
            bug: sample_bug(Status::Fixed, Severity::Low),
            coins_awarded: Some(1),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["minecraftIgn"], "Steve");
        assert_eq!(value["coinsAwarded"], 1);
        assert_eq!(value["status"], "FIXED");
    }

    #[test]
    fn test_reward_update_clears_stock() {
        let mut reward = Reward {
            id: "r1".into(),
            created_at: Utc::now(),
            name: "Diamond".into(),
            description: "One diamond".into(),
            icon_url: "/icons/diamond.png".into(),
            cost: 3,
            command: "give {player} diamond 1".into(),
            active: true,
            stock: Some(5),
        };
        RewardUpdate {
            stock: Some(None),
            cost: Some(4),
            ..Default::default()
        }
        .apply(&mut reward);
        assert_eq!(reward.stock, None);
        assert_eq!(reward.cost, 4);
        assert_eq!(reward.name, "Diamond");
    }
}
