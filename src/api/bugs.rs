//! Bug report endpoints

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{flag, non_blank, required, JsonBody, MaybeAdmin, QueryParams};
use crate::error::{ApiError, ApiResult};
use crate::models::{Bug, BugChange, BugFilters, BugUpdate, NewBug, Severity, Status};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub discord_id: Option<String>,
    pub minecraft_ign: Option<String>,
    pub include_hidden: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityQuery {
    pub include_hidden: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub minecraft_ign: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBugRequest {
    pub discord_id: Option<String>,
    pub minecraft_ign: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub reproduction_steps: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    #[serde(default, alias = "evidenceFileNames")]
    pub evidence_links: Vec<String>,
    pub video_evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBugRequest {
    pub status: Option<String>,
    pub hidden: Option<bool>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub reproduction_steps: Option<String>,
    pub severity: Option<String>,
    pub evidence_links: Option<Vec<String>>,
    /// Claimed owner, checked for non-admin edits
    pub minecraft_ign: Option<String>,
}

fn parse_enum<T: FromStr>(value: Option<&str>, what: &str) -> ApiResult<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("Invalid {}: {}", what, raw))),
        None => Ok(None),
    }
}

fn clean_links(links: &[String]) -> Vec<String> {
    links
        .iter()
        .map(|link| link.trim())
        .filter(|link| !link.is_empty())
        .map(str::to_string)
        .collect()
}

/// Non-admins must name the report's owner exactly
fn check_owner(bug: &Bug, claimed: &Option<String>) -> ApiResult<()> {
    let owner = non_blank(claimed).ok_or_else(|| ApiError::bad_request("Missing owner"))?;
    if owner != bug.minecraft_ign {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    QueryParams(query): QueryParams<ListQuery>,
) -> ApiResult<Json<Vec<Bug>>> {
    let include_hidden = flag(&query.include_hidden);
    if include_hidden && !admin.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let filters = BugFilters {
        status: parse_enum::<Status>(query.status.as_deref(), "status")?,
        severity: parse_enum::<Severity>(query.severity.as_deref(), "severity")?,
        discord_id: non_blank(&query.discord_id),
        minecraft_ign: non_blank(&query.minecraft_ign),
        include_hidden,
    };
    Ok(Json(state.storage.list_bugs(&filters).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    JsonBody(body): JsonBody<CreateBugRequest>,
) -> ApiResult<(StatusCode, Json<Bug>)> {
    let discord_id = required(&body.discord_id, "discordId")?.to_string();
    let minecraft_ign = required(&body.minecraft_ign, "minecraftIgn")?.to_string();
    let title = required(&body.title, "title")?.to_string();
    let description = required(&body.description, "description")?.to_string();
    let reproduction_steps = required(&body.reproduction_steps, "reproductionSteps")?.to_string();
    let severity = parse_enum::<Severity>(body.severity.as_deref(), "severity")?
        .ok_or_else(|| ApiError::missing_field("severity"))?;

    // Reporters always start at BUG; triage is an admin decision
    let status = if admin.is_admin() {
        parse_enum::<Status>(body.status.as_deref(), "status")?.unwrap_or_default()
    } else {
        Status::default()
    };

    let bug = state
        .storage
        .create_bug(NewBug {
            discord_id,
            minecraft_ign,
            title,
            description,
            reproduction_steps,
            evidence_links: clean_links(&body.evidence_links),
            video_evidence: non_blank(&body.video_evidence),
            severity,
            status,
        })
        .await?;

    info!(
        "New {} bug report {} from {}",
        bug.severity.as_str(),
        bug.id,
        bug.minecraft_ign
    );
    Ok((StatusCode::CREATED, Json(bug)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    Path(id): Path<String>,
    QueryParams(query): QueryParams<VisibilityQuery>,
) -> ApiResult<Json<Bug>> {
    let include_hidden = flag(&query.include_hidden);
    if include_hidden && !admin.is_admin() {
        return Err(ApiError::Forbidden);
    }

    state
        .storage
        .get_bug(&id, include_hidden)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateBugRequest>,
) -> ApiResult<Json<BugChange>> {
    let is_admin = admin.is_admin();

    let update = BugUpdate {
        status: if is_admin {
            parse_enum::<Status>(body.status.as_deref(), "status")?
        } else {
            None
        },
        hidden: body.hidden.filter(|_| is_admin),
        title: non_blank(&body.title),
        description: non_blank(&body.description),
        reproduction_steps: non_blank(&body.reproduction_steps),
        severity: parse_enum::<Severity>(body.severity.as_deref(), "severity")?,
        evidence_links: body.evidence_links.as_deref().map(clean_links),
    };

    let existing = state
        .storage
        .get_bug(&id, true)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !is_admin {
        check_owner(&existing, &body.minecraft_ign)?;
    }
    if update.is_empty() {
        return Err(ApiError::bad_request("Missing update fields"));
    }

    let change = state
        .storage
        .update_bug(&id, &update)
        .await?
        .ok_or(ApiError::NotFound)?;

    if let Some(coins) = change.coins_awarded {
        info!(
            "Bug {} fixed, {} coins credited to {}",
            id, coins, change.bug.minecraft_ign
        );
    }
    Ok(Json(change))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    admin: MaybeAdmin,
    Path(id): Path<String>,
    QueryParams(query): QueryParams<OwnerQuery>,
) -> ApiResult<Json<Value>> {
    if !admin.is_admin() {
        if non_blank(&query.minecraft_ign).is_none() {
            return Err(ApiError::bad_request("Missing owner"));
        }
        let existing = state
            .storage
            .get_bug(&id, true)
            .await?
            .ok_or(ApiError::NotFound)?;
        check_owner(&existing, &query.minecraft_ign)?;
    }

    if !state.storage.delete_bug(&id).await? {
        return Err(ApiError::NotFound);
    }
    info!("Deleted bug {}", id);
    Ok(Json(json!({ "ok": true })))
}
