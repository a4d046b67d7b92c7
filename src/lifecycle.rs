//! Session token lifecycle: issuance, status determination and usage accounting.
//!
//! Status is never stored. It is derived on every lookup from `times_used`,
//! `max_usage`, `last_used` and the current time, in this order:
//! EMPTY → INVALID → REACHED_LIMIT → EXPIRED → VALID.
//!
//! The quota is best-effort: `status` and `record_use` are separate store
//! calls, so concurrent requests for one identity can all be classified VALID
//! before any of their increments land.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::codec::TokenCodec;
use crate::errors::AppError;
use crate::models::token::{Token, TokenStatus};
use crate::store::TokenStore;

#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Quota assigned to every newly issued token.
    pub max_usage: u64,
    /// Idle time after which a token is EXPIRED.
    pub expiration: Duration,
}

#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn TokenStore>,
    codec: TokenCodec,
    policy: TokenPolicy,
}

impl TokenLifecycle {
    pub fn new(store: Arc<dyn TokenStore>, codec: TokenCodec, policy: TokenPolicy) -> Self {
        Self {
            store,
            codec,
            policy,
        }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Issues a fresh token for `identity`, replacing any token it already holds.
    /// The returned token carries the plain value.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, identity: Option<&str>) -> Result<Token, AppError> {
        let identity = identity
            .filter(|id| !id.is_empty())
            .ok_or(AppError::NoIdentity)?;

        if let Some(existing) = self.store.find_by_identity(identity).await? {
            self.store.delete(&existing).await?;
            tracing::debug!("replaced existing token for identity");
        }

        let now = Utc::now();
        let plain = URL_SAFE_NO_PAD.encode(Uuid::new_v4().to_string());
        let record = Token {
            value: self.codec.encode(&plain),
            associated_identity: identity.to_string(),
            created: now,
            last_used: now,
            times_used: 0,
            max_usage: self.policy.max_usage,
        };
        self.store.insert(&record).await?;

        tracing::info!(max_usage = record.max_usage, "issued session token");

        let value = self.codec.decode(&record.value)?;
        Ok(Token { value, ..record })
    }

    /// Classifies the credential `presented` by `identity`.
    pub async fn status(
        &self,
        identity: Option<&str>,
        presented: Option<&str>,
    ) -> Result<TokenStatus, AppError> {
        let (Some(identity), Some(presented)) = (
            identity.filter(|id| !id.is_empty()),
            presented.filter(|v| !v.is_empty()),
        ) else {
            return Ok(TokenStatus::Empty);
        };

        let stored = self.codec.encode(presented);
        match self
            .store
            .find_by_identity_and_value(identity, &stored)
            .await?
        {
            Some(token) => Ok(self.classify(&token, Utc::now())),
            None => Ok(TokenStatus::Invalid),
        }
    }

    /// Status of an existing record at `now`. The quota check
    /// precedes the expiry check.
    pub fn classify(&self, token: &Token, now: DateTime<Utc>) -> TokenStatus {
        if token.quota_reached() {
            TokenStatus::ReachedLimit
        } else if token.idle_longer_than(self.policy.expiration, now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        }
    }

    /// Counts one use of the plain value `presented` and refreshes `last_used`.
    pub async fn record_use(&self, presented: &str) -> anyhow::Result<()> {
        let stored = self.codec.encode(presented);
        self.store.increment_usage(&stored, Utc::now()).await
    }
}
