//! In-game registration codes
//!
//! The Minecraft plugin asks for a short code on behalf of a player; the player
//! types it into the registration form. Only the SHA-256 of the code is stored.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// No 0/O or 1/I to keep codes readable in chat
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 8;
/// Attempts before giving up on hash collisions
pub const MAX_CODE_ATTEMPTS: usize = 5;

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Hex SHA-256 of the normalized (trimmed, upper-cased) code
pub fn hash_code(code: &str) -> String {
    let normalized = code.trim().to_uppercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

pub fn expiry_from(now: DateTime<Utc>, ttl_minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(ttl_minutes)
}
