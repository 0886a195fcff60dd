//! Reward catalogue, balances and redemption

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{flag, non_blank, JsonBody, MaybeAdmin, QueryParams, RequireAdmin};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CreditOutcome, NewReward, RedeemOutcome, RedemptionReceipt, Reward, RewardUpdate,
};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub include_inactive: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub minecraft_username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRewardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub cost: Option<i64>,
    pub command: Option<String>,
    pub stock: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRewardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub cost: Option<i64>,
    pub command: Option<String>,
    pub active: Option<bool>,
    /// Absent leaves stock alone, `null` makes the reward unlimited
    #[serde(default, deserialize_with = "present")]
    pub stock: Option<Option<i64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub minecraft_username: Option<String>,
    pub reward_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    pub minecraft_username: Option<String>,
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    QueryParams(query): QueryParams<ListQuery>,
) -> ApiResult<Json<Vec<Reward>>> {
    let include_inactive = flag(&query.include_inactive);
    if include_inactive && !admin.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(state.storage.list_rewards(include_inactive).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    JsonBody(body): JsonBody<CreateRewardRequest>,
) -> ApiResult<Json<Reward>> {
    let (Some(name), Some(description), Some(icon_url)) = (
        non_blank(&body.name),
        non_blank(&body.description),
        non_blank(&body.icon_url),
    ) else {
        return Err(ApiError::invalid_payload());
    };
    let cost = body
        .cost
        .filter(|c| *c > 0)
        .ok_or_else(ApiError::invalid_payload)?;
    if matches!(body.stock, Some(s) if s < 0) {
        return Err(ApiError::invalid_payload());
    }

    let reward = state
        .storage
        .create_reward(NewReward {
            name,
            description,
            icon_url,
            cost,
            command: body.command.as_deref().map(str::trim).unwrap_or_default().to_string(),
            active: body.active.unwrap_or(true),
            stock: body.stock,
        })
        .await?;

    info!("Created reward {} ({} coins)", reward.name, reward.cost);
    Ok(Json(reward))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateRewardRequest>,
) -> ApiResult<Json<Reward>> {
    // Blank text would leave the catalogue entry unusable
    let text = |value: &Option<String>| -> ApiResult<Option<String>> {
        match value {
            None => Ok(None),
            Some(_) => non_blank(value).map(Some).ok_or_else(ApiError::invalid_payload),
        }
    };

    let update = RewardUpdate {
        name: text(&body.name)?,
        description: text(&body.description)?,
        icon_url: text(&body.icon_url)?,
        cost: match body.cost {
            Some(c) if c <= 0 => return Err(ApiError::invalid_payload()),
            other => other,
        },
        command: body.command.as_deref().map(|c| c.trim().to_string()),
        active: body.active,
        stock: match body.stock {
            Some(Some(s)) if s < 0 => return Err(ApiError::invalid_payload()),
            other => other,
        },
    };

    state
        .storage
        .update_reward(&id, &update)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.storage.delete_reward(&id).await? {
        return Err(ApiError::NotFound);
    }
    info!("Deleted reward {}", id);
    Ok(Json(json!({ "ok": true })))
}

pub async fn balance(
    State(state): State<Arc<AppState>>,
    QueryParams(query): QueryParams<BalanceQuery>,
) -> ApiResult<Json<BalanceResponse>> {
    let minecraft_username =
        non_blank(&query.minecraft_username).ok_or_else(|| ApiError::bad_request("Missing user"))?;
    let balance = state
        .storage
        .get_balance(&minecraft_username)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(BalanceResponse { balance }))
}

pub async fn redeem(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<RedeemRequest>,
) -> ApiResult<Json<RedemptionReceipt>> {
    let (Some(minecraft_username), Some(reward_id)) =
        (non_blank(&body.minecraft_username), non_blank(&body.reward_id))
    else {
        return Err(ApiError::invalid_payload());
    };

    match state.storage.redeem(&minecraft_username, &reward_id).await? {
        RedeemOutcome::Redeemed(receipt) => {
            info!(
                "{} redeemed reward {} ({} coins left)",
                minecraft_username, reward_id, receipt.balance
            );
            Ok(Json(receipt))
        }
        RedeemOutcome::RewardUnavailable | RedeemOutcome::UserNotFound => Err(ApiError::NotFound),
        RedeemOutcome::RewardNotConfigured => {
            Err(ApiError::bad_request("Reward not configured"))
        }
        RedeemOutcome::OutOfStock => Err(ApiError::Conflict("Out of stock".to_string())),
        RedeemOutcome::InsufficientBalance => {
            Err(ApiError::Conflict("Insufficient balance".to_string()))
        }
    }
}

pub async fn wallet(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    JsonBody(body): JsonBody<WalletRequest>,
) -> ApiResult<Json<BalanceResponse>> {
    let Some(minecraft_username) = non_blank(&body.minecraft_username) else {
        return Err(ApiError::invalid_payload());
    };
    let amount = body
        .amount
        .filter(|a| *a > 0)
        .ok_or_else(ApiError::invalid_payload)?;

    let balance = match state
        .storage
        .credit_balance(&minecraft_username, amount)
        .await?
    {
        CreditOutcome::Credited(balance) => balance,
        CreditOutcome::UserNotFound => return Err(ApiError::NotFound),
        CreditOutcome::Overflow => {
            warn!(
                "Refused {} coins for {}: balance would overflow",
                amount, minecraft_username
            );
            return Err(ApiError::invalid_payload());
        }
    };

    info!(
        "{} granted {} coins to {}",
        admin.0.minecraft_username, amount, minecraft_username
    );
    Ok(Json(BalanceResponse { balance }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_stock_distinguishes_null_from_absent() {
        let absent: UpdateRewardRequest = serde_json::from_str(r#"{"cost": 3}"#).unwrap();
        assert_eq!(absent.stock, None);

        let cleared: UpdateRewardRequest = serde_json::from_str(r#"{"stock": null}"#).unwrap();
        assert_eq!(cleared.stock, Some(None));

        let set: UpdateRewardRequest = serde_json::from_str(r#"{"stock": 7}"#).unwrap();
        assert_eq!(set.stock, Some(Some(7)));
    }
}
