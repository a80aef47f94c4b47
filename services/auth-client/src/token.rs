//! Bearer token inspection
//!
//! Decodes the claims of a JWT without verifying its signature and
//! classifies how much lifetime the token has left. Signature checks are the
//! issuing server's job; the client only needs `exp` to decide when to
//! refresh.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

/// Seconds before expiry at which a token counts as expiring soon
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 300;

/// Decoded, unverified token payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenClaims {
    /// Expiration time (unix seconds)
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at time (unix seconds)
    #[serde(default)]
    pub iat: Option<i64>,
    /// Subject
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,
}

/// Remaining validity of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    ExpiringSoon,
    Expired,
    Invalid,
}

impl TokenStatus {
    /// Whether a refresh should be attempted for an access token in this state
    pub fn needs_refresh(&self) -> bool {
        matches!(self, TokenStatus::ExpiringSoon | TokenStatus::Expired)
    }

    /// Whether a refresh token in this state can no longer be used
    pub fn is_unusable(&self) -> bool {
        matches!(self, TokenStatus::Expired | TokenStatus::Invalid)
    }
}

/// Decode-only JWT inspector
#[derive(Clone)]
pub struct TokenInspector {
    decoding_key: DecodingKey,
    validation: Validation,
    refresh_threshold_secs: i64,
}

impl TokenInspector {
    /// Initialize a new inspector with the given expiring-soon window
    pub fn new(refresh_threshold_secs: i64) -> Self {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            decoding_key: DecodingKey::from_secret(&[]),
            validation,
            refresh_threshold_secs,
        }
    }

    pub fn refresh_threshold_secs(&self) -> i64 {
        self.refresh_threshold_secs
    }

    /// Decode a token's claims, or `None` if the token is malformed
    pub fn decode(&self, token: &str) -> Option<TokenClaims> {
        if token.is_empty() {
            return None;
        }

        match decode::<TokenClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Failed to decode token: {}", e);
                None
            }
        }
    }

    /// Classify a token against the current time
    pub fn classify(&self, token: Option<&str>) -> TokenStatus {
        self.classify_at(token, now_unix())
    }

    /// Classify a token against an explicit time
    pub fn classify_at(&self, token: Option<&str>, now: i64) -> TokenStatus {
        let claims = token.and_then(|t| self.decode(t));
        classify(claims.as_ref(), now, self.refresh_threshold_secs)
    }

    /// Lifetime left before `exp`, zero when the token is absent, invalid or expired
    pub fn remaining(&self, token: Option<&str>) -> Duration {
        let exp = token.and_then(|t| self.decode(t)).and_then(|c| c.exp);

        match exp {
            Some(exp) => {
                let secs = exp.saturating_sub(now_unix()).max(0);
                Duration::from_secs(secs as u64)
            }
            None => Duration::ZERO,
        }
    }
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_THRESHOLD_SECS)
    }
}

/// Pure classification of decoded claims
pub fn classify(claims: Option<&TokenClaims>, now: i64, refresh_threshold_secs: i64) -> TokenStatus {
    let Some(exp) = claims.and_then(|c| c.exp) else {
        return TokenStatus::Invalid;
    };

    let time_until_expiry = exp.saturating_sub(now);

    if time_until_expiry <= 0 {
        TokenStatus::Expired
    } else if time_until_expiry <= refresh_threshold_secs {
        TokenStatus::ExpiringSoon
    } else {
        TokenStatus::Valid
    }
}

/// Current time in unix seconds
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Subject>::deserialize(deserializer)?.map(|s| match s {
        Subject::Text(s) => s,
        Subject::Number(n) => n.to_string(),
    }))
}
