use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::TokenStore;
use crate::models::token::Token;

/// In-process token store keyed by client identity, so an identity holds at
/// most one record no matter how issuance calls interleave.
///
/// Per-record atomicity comes from DashMap's shard locks. Contents are lost
/// when the process exits.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<DashMap<String, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with the given stored value, if any.
    pub fn get(&self, stored_value: &str) -> Option<Token> {
        self.tokens
            .iter()
            .find(|t| t.value == stored_value)
            .map(|t| t.value().clone())
    }

    /// Snapshot of every record.
    pub fn tokens(&self) -> Vec<Token> {
        self.tokens.iter().map(|t| t.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find_by_identity(&self, identity: &str) -> anyhow::Result<Option<Token>> {
        Ok(self.tokens.get(identity).map(|t| t.value().clone()))
    }

    async fn find_by_identity_and_value(
        &self,
        identity: &str,
        stored_value: &str,
    ) -> anyhow::Result<Option<Token>> {
        Ok(self
            .tokens
            .get(identity)
            .filter(|t| t.value == stored_value)
            .map(|t| t.value().clone()))
    }

    /// Replaces any record the identity already holds.
    async fn insert(&self, token: &Token) -> anyhow::Result<()> {
        self.tokens
            .insert(token.associated_identity.clone(), token.clone());
        Ok(())
    }

    async fn delete(&self, token: &Token) -> anyhow::Result<()> {
        self.tokens
            .remove_if(&token.associated_identity, |_, t| t.value == token.value);
        Ok(())
    }

    async fn increment_usage(&self, stored_value: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        match self.tokens.iter_mut().find(|t| t.value == stored_value) {
            Some(mut t) => {
                t.times_used += 1;
                t.last_used = t.last_used.max(now);
            }
            None => tracing::debug!("usage recorded for a token that no longer exists"),
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.last_used >= cutoff);
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}
