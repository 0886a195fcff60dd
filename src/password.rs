//! Password hashing
//!
//! Stored format is `salt:hash`: a 16-byte random salt in hex, and the hex of
//! scrypt(password, salt_hex, N=2^14, r=8, p=1) with a 64-byte output. The salt
//! is fed to scrypt as its hex string.

use anyhow::{anyhow, Result};
use rand::RngCore;
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;

const SALT_BYTES: usize = 16;
const KEY_LEN: usize = 64;
const LOG_N: u8 = 14;
const R: u32 = 8;
const P: u32 = 1;

const MIN_PASSWORD_LEN: usize = 8;

fn derive(password: &str, salt: &str) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(LOG_N, R, P, KEY_LEN).map_err(|e| anyhow!("scrypt params: {}", e))?;
    let mut out = [0u8; KEY_LEN];
    scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut out)
        .map_err(|e| anyhow!("scrypt: {}", e))?;
    Ok(out)
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    let hash = derive(password, &salt)?;
    Ok(format!("{}:{}", salt, hex::encode(hash)))
}

/// Constant-time check against a stored `salt:hash`. Malformed values never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, hash)) = stored.split_once(':') else {
        return false;
    };
    if salt.is_empty() || hash.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(hash) else {
        return false;
    };
    if expected.len() != KEY_LEN {
        return false;
    }
    match derive(password, salt) {
        Ok(actual) => bool::from(actual[..].ct_eq(&expected[..])),
        Err(_) => false,
    }
}

/// `hash_password` on the blocking pool. scrypt takes tens of milliseconds.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

/// `verify_password` on the blocking pool
pub async fn verify_password_blocking(password: String, stored: String) -> Result<bool> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await?)
}

/// Registration password policy. Returns the unmet requirements.
pub fn policy_violations(password: &str) -> Vec<&'static str> {
    let mut unmet = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        unmet.push("At least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        unmet.push("One uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        unmet.push("One lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        unmet.push("One number");
    }
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        unmet.push("One special character");
    }
    unmet
}
