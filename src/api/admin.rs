//! Administration endpoints: user search and the redemption log

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{non_blank, QueryParams, RequireAdmin};
use crate::error::{ApiError, ApiResult};
use crate::models::{RedemptionLog, UserSummary};
use crate::rewards::{log_page, page_count, LogRange};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    pub search: Option<String>,
}

/// Paging values arrive as free text; anything unparsable falls back to defaults
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteLogsRequest {
    pub id: Option<String>,
    pub clear: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub logs: Vec<RedemptionLog>,
    pub page: i64,
    pub total: i64,
    pub page_count: i64,
}

fn parse_number(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

pub async fn users(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    QueryParams(query): QueryParams<UsersQuery>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let search = non_blank(&query.search);
    Ok(Json(state.storage.list_users(search.as_deref()).await?))
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    QueryParams(query): QueryParams<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let range = LogRange::parse(query.range.as_deref());
    let (page, window) = log_page(
        parse_number(&query.limit),
        parse_number(&query.page),
        range,
        Utc::now(),
    );

    let (logs, total) = state.storage.redemption_logs(window).await?;
    Ok(Json(LogsResponse {
        logs,
        page,
        total,
        page_count: page_count(total, window.limit),
    }))
}

pub async fn delete_logs(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    body: Option<Json<DeleteLogsRequest>>,
) -> ApiResult<Json<Value>> {
    // A missing or unreadable body falls through to "Invalid payload"
    let body = body.map(|Json(body)| body).unwrap_or_default();

    if let Some(id) = non_blank(&body.id) {
        if !state.storage.delete_redemption(&id).await? {
            return Err(ApiError::NotFound);
        }
        return Ok(Json(json!({ "ok": true })));
    }

    if body.clear == Some(true) {
        let deleted = state.storage.clear_redemptions().await?;
        info!(
            "{} cleared {} redemption log(s)",
            admin.0.minecraft_username, deleted
        );
        return Ok(Json(json!({ "ok": true })));
    }

    Err(ApiError::invalid_payload())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_is_lenient() {
        assert_eq!(parse_number(&Some("25".into())), Some(25));
        assert_eq!(parse_number(&Some(" 3 ".into())), Some(3));
        assert_eq!(parse_number(&Some("abc".into())), None);
        assert_eq!(parse_number(&None), None);
    }
}
