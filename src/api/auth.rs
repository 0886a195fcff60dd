//! Account registration, login and admin session endpoints

use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{HeaderValue, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{required, JsonBody, MaybeAdmin};
use crate::codes::hash_code;
use crate::error::{ApiError, ApiResult};
use crate::models::{Account, NewUser};
use crate::password::{hash_password_blocking, policy_violations, verify_password_blocking};
use crate::server::AppState;
use crate::session::clear_cookie;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub minecraft_username: Option<String>,
    pub password: Option<String>,
    /// One-time code issued in game by the plugin
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub minecraft_username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub account: Account,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub admin: bool,
    pub id: String,
    pub minecraft_username: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Loose shape check, `something@something.tld`
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < domain.len(),
        None => false,
    }
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let email = required(&body.email, "email")?.to_lowercase();
    let minecraft_username = required(&body.minecraft_username, "minecraftUsername")?.to_string();
    let password = match body.password.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ApiError::missing_field("password")),
    };

    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }
    let violations = policy_violations(password);
    if !violations.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Password requirements not met: {}",
            violations.join(", ")
        )));
    }

    if let Some(existing) = state
        .storage
        .find_conflicting_user(&email, &minecraft_username)
        .await?
    {
        let conflict = if existing.email == email {
            "Email already in use"
        } else {
            "Minecraft username already in use"
        };
        return Err(ApiError::Conflict(conflict.to_string()));
    }

    let code = body.code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if code.is_none() && state.config.registration.require_code {
        return Err(ApiError::missing_field("code"));
    }

    let password_hash = hash_password_blocking(password.to_string()).await?;
    let new_user = NewUser {
        email,
        minecraft_username,
        password_hash,
        is_admin: false,
    };
    let user = match code {
        Some(code) => state
            .storage
            .create_user_with_code(new_user, &hash_code(code), Utc::now())
            .await?
            .ok_or_else(|| ApiError::bad_request("Invalid or expired code"))?,
        None => state.storage.create_user(new_user).await?,
    };

    info!("Registered {}", user.minecraft_username);
    Ok((StatusCode::CREATED, Json(Account::from(&user))))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> ApiResult<(HeaderMap, Json<LoginResponse>)> {
    let minecraft_username = required(&body.minecraft_username, "minecraftUsername")?;
    let password = match body.password.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ApiError::missing_field("password")),
    };

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let user = state
        .storage
        .find_user(minecraft_username)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password_blocking(password.to_string(), user.password_hash.clone()).await? {
        debug!("Failed login for {}", minecraft_username);
        return Err(invalid());
    }

    let mut headers = HeaderMap::new();
    if let Some(token) = state.sessions.issue(&user) {
        let cookie = state
            .sessions
            .cookie(&token, state.config.auth.secure_cookie);
        let value = HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.into()))?;
        headers.insert(SET_COOKIE, value);
        info!("Admin session issued to {}", user.minecraft_username);
    }

    Ok((
        headers,
        Json(LoginResponse {
            account: Account::from(&user),
            is_admin: user.is_admin,
        }),
    ))
}

pub async fn logout() -> ([(axum::http::HeaderName, String); 1], Json<Value>) {
    ([(SET_COOKIE, clear_cookie())], Json(json!({ "ok": true })))
}

pub async fn session(admin: MaybeAdmin) -> ApiResult<Json<SessionResponse>> {
    let session = admin
        .0
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;
    Ok(Json(SessionResponse {
        admin: true,
        id: session.id,
        minecraft_username: session.minecraft_username,
        expires_at: DateTime::from_timestamp_millis(session.exp),
    }))
}
