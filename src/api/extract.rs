//! Request extractors shared by the handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::{header::COOKIE, request::Parts},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;
use crate::session::{cookie_value, AdminSession, ADMIN_COOKIE_NAME};

pub const PLUGIN_TOKEN_HEADER: &str = "x-plugin-token";

/// `Json` whose rejection renders as an [`ApiError`]
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// `Query` whose rejection renders as an [`ApiError`]
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

/// Admin session from the `camp_admin` cookie, if it verifies
pub struct MaybeAdmin(pub Option<AdminSession>);

impl MaybeAdmin {
    pub fn is_admin(&self) -> bool {
        self.0.is_some()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAdmin {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| cookie_value(header, ADMIN_COOKIE_NAME))
            .and_then(|token| state.sessions.verify(token));
        Ok(MaybeAdmin(session))
    }
}

/// Rejects with 403 unless a valid admin session is present
pub struct RequireAdmin(pub AdminSession);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeAdmin(session) = MaybeAdmin::from_request_parts(parts, state)
            .await
            .unwrap_or(MaybeAdmin(None));
        session.map(RequireAdmin).ok_or(ApiError::Forbidden)
    }
}

/// Minecraft plugin authentication via `x-plugin-token`.
///
/// Open when no plugin token is configured.
pub struct PluginAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for PluginAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.plugin.token.as_deref() else {
            return Ok(PluginAuth);
        };

        let provided = parts
            .headers
            .get(PLUGIN_TOKEN_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        if bool::from(provided.ct_eq(expected.as_bytes())) {
            Ok(PluginAuth)
        } else {
            warn!("Rejected plugin request with a bad token");
            Err(ApiError::Unauthorized("Unauthorized".to_string()))
        }
    }
}

/// Trimmed value of a required string field; missing or blank is a 400.
pub fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::missing_field(name)),
    }
}

/// Trimmed value, with blank strings treated as absent
pub fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Query flags follow the web convention: only the literal `true` enables them.
pub fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert_eq!(required(&Some("  Steve ".into()), "minecraftIgn").unwrap(), "Steve");
        assert_eq!(
            required(&Some("   ".into()), "title").unwrap_err().to_string(),
            "Missing field: title"
        );
        assert!(required(&None, "title").is_err());
    }

    #[test]
    fn test_non_blank_and_flag() {
        assert_eq!(non_blank(&Some(" x ".into())), Some("x".to_string()));
        assert_eq!(non_blank(&Some("  ".into())), None);
        assert!(flag(&Some("true".into())));
        assert!(!flag(&Some("1".into())));
        assert!(!flag(&None));
    }
}
