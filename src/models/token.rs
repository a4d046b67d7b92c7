use chrono::{DateTime, Duration, Utc};

use crate::errors::AppError;

/// One session token record. There is at most one per client identity.
///
/// `value` holds whichever representation the holder is entitled to: the
/// codec-encoded form inside the store, the plain form once handed back to
/// the client by issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub associated_identity: String,
    pub created: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub times_used: u64,
    pub max_usage: u64,
}

impl Token {
    pub fn quota_reached(&self) -> bool {
        self.times_used >= self.max_usage
    }

    /// True when the token has not been used for longer than `window`.
    pub fn idle_longer_than(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_used) > window
    }
}

/// Classification of a presented credential. Derived on every lookup, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Expired,
    ReachedLimit,
    Invalid,
    Empty,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "VALID",
            TokenStatus::Expired => "EXPIRED",
            TokenStatus::ReachedLimit => "REACHED_LIMIT",
            TokenStatus::Invalid => "INVALID",
            TokenStatus::Empty => "EMPTY",
        }
    }

    /// `Ok` only for `Valid`; every other status maps to its rejection.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            TokenStatus::Valid => Ok(()),
            TokenStatus::Expired => Err(AppError::CredentialExpired),
            TokenStatus::ReachedLimit => Err(AppError::QuotaExhausted),
            TokenStatus::Invalid => Err(AppError::CredentialUnknown),
            TokenStatus::Empty => Err(AppError::CredentialAbsent),
        }
    }
}
