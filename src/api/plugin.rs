//! Endpoints called by the Minecraft plugin

use std::sync::Arc;

use anyhow::anyhow;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{required, JsonBody, PluginAuth};
use crate::codes::{expiry_from, generate_code, hash_code, MAX_CODE_ATTEMPTS};
use crate::error::{ApiError, ApiResult};
use crate::models::{NewRegistrationCode, PendingCommand};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCodeRequest {
    pub minecraft_username: Option<String>,
    pub player_uuid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommandsResponse {
    pub commands: Vec<PendingCommand>,
}

pub async fn register_code(
    State(state): State<Arc<AppState>>,
    _plugin: PluginAuth,
    JsonBody(body): JsonBody<RegisterCodeRequest>,
) -> ApiResult<(StatusCode, Json<RegisterCodeResponse>)> {
    let minecraft_username = required(&body.minecraft_username, "minecraftUsername")?;
    let player_uuid = required(&body.player_uuid, "playerUuid")?;

    let replaced = state.storage.delete_unused_codes(player_uuid).await?;
    if replaced > 0 {
        debug!("Replaced {} unused code(s) for {}", replaced, minecraft_username);
    }

    let expires_at = expiry_from(Utc::now(), state.config.registration.code_ttl_minutes);
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_code();
        let inserted = state
            .storage
            .insert_registration_code(NewRegistrationCode {
                minecraft_username: minecraft_username.to_string(),
                player_uuid: player_uuid.to_string(),
                code_hash: hash_code(&code),
                expires_at,
            })
            .await?;
        if inserted {
            info!("Issued registration code for {}", minecraft_username);
            return Ok((
                StatusCode::CREATED,
                Json(RegisterCodeResponse { code, expires_at }),
            ));
        }
    }

    Err(ApiError::Internal(anyhow!(
        "Unable to create code after {} attempts",
        MAX_CODE_ATTEMPTS
    )))
}

pub async fn commands(
    State(state): State<Arc<AppState>>,
    _plugin: PluginAuth,
) -> ApiResult<Json<CommandsResponse>> {
    let commands = state
        .storage
        .claim_pending_commands(state.config.plugin.poll_batch_size)
        .await?;
    if !commands.is_empty() {
        info!("Handed {} command(s) to the plugin", commands.len());
    }
    Ok(Json(CommandsResponse { commands }))
}
