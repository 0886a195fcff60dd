//! JSON API
//!
//! Routes mirror the paths the web front end and the Minecraft plugin call.

pub mod admin;
pub mod auth;
pub mod bugs;
pub mod evidence;
mod extract;
pub mod plugin;
pub mod rewards;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use crate::server::AppState;

pub use extract::{
    flag, non_blank, required, JsonBody, MaybeAdmin, PluginAuth, QueryParams, RequireAdmin,
    PLUGIN_TOKEN_HEADER,
};

pub fn routes(max_file_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        // Accounts
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session))
        .route(
            "/api/auth/minecraft/register-code",
            post(plugin::register_code),
        )
        // Bug reports
        .route("/api/bugs", get(bugs::list).post(bugs::create))
        .route(
            "/api/bugs/:id",
            get(bugs::get).patch(bugs::update).delete(bugs::delete),
        )
        .route(
            "/api/evidence/upload",
            post(evidence::upload).layer(DefaultBodyLimit::max(evidence::body_limit(
                max_file_bytes,
            ))),
        )
        // Rewards
        .route("/api/rewards", get(rewards::list).post(rewards::create))
        .route("/api/rewards/balance", get(rewards::balance))
        .route("/api/rewards/redeem", post(rewards::redeem))
        .route("/api/rewards/wallet", post(rewards::wallet))
        .route("/api/rewards/commands", get(plugin::commands))
        .route(
            "/api/rewards/:id",
            patch(rewards::update).delete(rewards::delete),
        )
        // Administration
        .route("/api/admin/users", get(admin::users))
        .route(
            "/api/admin/rewards/logs",
            get(admin::logs).delete(admin::delete_logs),
        )
}
