//! HMAC-SHA256 signing as pure functions over explicit byte buffers and keys.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use utoipa::ToSchema;

pub(crate) type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_ALGORITHM: &str = "HMAC-SHA256";
/// Hex length of an HMAC-SHA256 tag.
pub const SIGNATURE_HEX_LEN: usize = 64;

/// Key used for usage summaries and heartbeats. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// `None` for an empty or whitespace-only key.
    pub fn new(raw: impl AsRef<[u8]>) -> Option<Self> {
        let raw = raw.as_ref();
        if raw.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(Self(raw.to_vec()))
    }

    /// `USAGE_SIGNING_KEY`, falling back to `LOG_SALT`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup("USAGE_SIGNING_KEY")
            .and_then(|value| Self::new(value.trim()))
            .or_else(|| lookup("LOG_SALT").and_then(|value| Self::new(value.trim())))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verification {
    Valid,
    Invalid,
}

impl Verification {
    pub fn as_str(self) -> &'static str {
        match self {
            Verification::Valid => "VALID",
            Verification::Invalid => "INVALID",
        }
    }

    pub fn is_valid(self) -> bool {
        self == Verification::Valid
    }
}

pub(crate) fn mac_for(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length")
}

pub(crate) fn hmac_hex(key: &[u8], bytes: &[u8]) -> String {
    let mut mac = mac_for(key);
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Lowercase hex HMAC-SHA256 of `bytes`.
pub fn sign(bytes: &[u8], key: &SigningKey) -> String {
    hmac_hex(key.as_bytes(), bytes)
}

/// Constant-time check of `signature` against `bytes`.
///
/// The signature must be exactly 64 lowercase hex characters; it is not
/// trimmed or case-folded, so any altered byte yields INVALID.
pub fn verify(bytes: &[u8], signature: &str, key: &SigningKey) -> Verification {
    if !is_signature_hex(signature) {
        return Verification::Invalid;
    }
    let Ok(tag) = hex::decode(signature) else {
        return Verification::Invalid;
    };
    let mut mac = mac_for(key.as_bytes());
    mac.update(bytes);
    match mac.verify_slice(&tag) {
        Ok(()) => Verification::Valid,
        Err(_) => Verification::Invalid,
    }
}

pub fn is_signature_hex(value: &str) -> bool {
    value.len() == SIGNATURE_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
