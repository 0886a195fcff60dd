//! Admin sessions
//!
//! An admin session is a cookie value `<payload>.<signature>` where payload is
//! the unpadded URL-safe base64 of a JSON claim set and signature is the
//! unpadded URL-safe base64 of HMAC-SHA256(secret, payload). Without a secret
//! no session is ever issued or accepted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::models::User;

type HmacSha256 = Hmac<Sha256>;

pub const ADMIN_COOKIE_NAME: &str = "camp_admin";
/// Used when the configured TTL is not a positive number of hours chrono can represent
pub const DEFAULT_TTL_HOURS: i64 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub id: String,
    pub minecraft_username: String,
    pub is_admin: bool,
    /// Expiry in epoch milliseconds
    pub exp: i64,
}

#[derive(Clone)]
pub struct SessionSigner {
    secret: Option<Vec<u8>>,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: Option<&str>, ttl_hours: i64) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
            ttl: Duration::try_hours(ttl_hours)
                .filter(|ttl| *ttl > Duration::zero())
                .unwrap_or_else(|| Duration::hours(DEFAULT_TTL_HOURS)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    fn mac(&self, payload: &str) -> Option<HmacSha256> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(payload.as_bytes());
        Some(mac)
    }

    /// Issue a token for an admin user. Returns `None` for non-admins or when disabled.
    pub fn issue(&self, user: &User) -> Option<String> {
        if !user.is_admin {
            return None;
        }
        let claims = AdminSession {
            id: user.id.clone(),
            minecraft_username: user.minecraft_username.clone(),
            is_admin: true,
            exp: (Utc::now() + self.ttl).timestamp_millis(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &AdminSession) -> Option<String> {
        let json = serde_json::to_vec(claims).ok()?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());
        Some(format!("{}.{}", payload, signature))
    }

    /// Validate a token; the MAC comparison is constant-time.
    pub fn verify(&self, token: &str) -> Option<AdminSession> {
        let mut parts = token.split('.');
        let (payload, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(s), None) if !p.is_empty() && !s.is_empty() => (p, s),
            _ => return None,
        };

        let provided = URL_SAFE_NO_PAD.decode(signature).ok()?;
        if self.mac(payload)?.verify_slice(&provided).is_err() {
            debug!("Admin session signature mismatch");
            return None;
        }

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let session: AdminSession = serde_json::from_slice(&json).ok()?;
        if !session.is_admin || session.exp < Utc::now().timestamp_millis() {
            return None;
        }
        Some(session)
    }

    /// `Set-Cookie` value carrying a fresh token
    pub fn cookie(&self, token: &str, secure: bool) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            ADMIN_COOKIE_NAME,
            token,
            self.ttl_secs()
        );
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// `Set-Cookie` value that removes the admin cookie
pub fn clear_cookie() -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        ADMIN_COOKIE_NAME
    )
}

/// Find a cookie value in a `Cookie` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> User {
        User {
            id: "u1".into(),
            email: "ops@thecamp.net".into(),
            minecraft_username: "CampOps".into(),
            password_hash: String::new(),
            is_admin: true,
            reward_balance: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        let token = signer.issue(&admin()).unwrap();
        let session = signer.verify(&token).unwrap();
        assert_eq!(session.id, "u1");
        assert_eq!(session.minecraft_username, "CampOps");
        assert!(session.exp > Utc::now().timestamp_millis());
    }

    #[test]
    fn test_non_admin_gets_no_session() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        let mut user = admin();
        user.is_admin = false;
        assert!(signer.issue(&user).is_none());
    }

    #[test]
    fn test_disabled_without_secret() {
        let signer = SessionSigner::new(None, 8);
        assert!(!signer.is_enabled());
        assert!(signer.issue(&admin()).is_none());

        let other = SessionSigner::new(Some("s3cret"), 8);
        let token = other.issue(&admin()).unwrap();
        assert!(signer.verify(&token).is_none());
        assert!(!SessionSigner::new(Some(""), 8).is_enabled());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        let token = signer.issue(&admin()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged = AdminSession {
            id: "u2".into(),
            minecraft_username: "Mallory".into(),
            is_admin: true,
            exp: Utc::now().timestamp_millis() + 60_000,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        assert!(signer.verify(&format!("{}.{}", payload, signature)).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = SessionSigner::new(Some("one"), 8).issue(&admin()).unwrap();
        assert!(SessionSigner::new(Some("two"), 8).verify(&token).is_none());
    }

    #[test]
    fn test_expired_rejected() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        let claims = AdminSession {
            id: "u1".into(),
            minecraft_username: "CampOps".into(),
            is_admin: true,
            exp: Utc::now().timestamp_millis() - 1,
        };
        let token = signer.sign(&claims).unwrap();
        assert!(signer.verify(&token).is_none());
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        assert!(signer.verify("").is_none());
        assert!(signer.verify("abc").is_none());
        assert!(signer.verify("a.b.c").is_none());
        assert!(signer.verify(".sig").is_none());
        assert!(signer.verify("payload.").is_none());
    }

    #[test]
    fn test_cookie_helpers() {
        let signer = SessionSigner::new(Some("s3cret"), 8);
        let cookie = signer.cookie("tok", true);
        assert!(cookie.starts_with("camp_admin=tok;"));
        assert!(cookie.contains("Max-Age=28800"));
        assert!(cookie.ends_with("; Secure"));
        assert!(clear_cookie().contains("Max-Age=0"));

        let header = "theme=dark; camp_admin=abc.def; other=1";
        assert_eq!(cookie_value(header, ADMIN_COOKIE_NAME), Some("abc.def"));
        assert_eq!(cookie_value(header, "missing"), None);
    }

    #[test]
    fn test_out_of_range_ttl_falls_back() {
        for hours in [i64::MAX, i64::MIN, 0, -5] {
            let signer = SessionSigner::new(Some("s3cret"), hours);
            assert_eq!(signer.ttl_secs(), DEFAULT_TTL_HOURS * 3600);
        }
        assert_eq!(SessionSigner::new(Some("s3cret"), 2).ttl_secs(), 7200);
    }
}
