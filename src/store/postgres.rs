use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::TokenStore;
use crate::config::StoreConfig;
use crate::models::token::Token;

/// PostgreSQL-backed token store. The table name is configurable, so queries
/// are built at runtime; it is validated before it is ever interpolated.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
    table: String,
}

impl PgTokenStore {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        if !is_valid_table_name(&config.tokens_table) {
            anyhow::bail!("invalid tokens table name: '{}'", config.tokens_table);
        }
        let url = config.connection_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url.as_str())
            .await
            .with_context(|| format!("failed to connect to token store at {}", config.server))?;
        Ok(Self {
            pool,
            table: config.tokens_table.clone(),
        })
    }

    /// Create the tokens table and its lookup indexes if missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let t = &self.table;
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS {t} (
                    value TEXT PRIMARY KEY,
                    associated_identity TEXT NOT NULL,
                    created TIMESTAMPTZ NOT NULL,
                    last_used TIMESTAMPTZ NOT NULL,
                    times_used BIGINT NOT NULL DEFAULT 0,
                    max_usage BIGINT NOT NULL
                )"#
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {t}_identity_key ON {t} (associated_identity)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {t}_last_used_idx ON {t} (last_used)"),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn find_by_identity(&self, identity: &str) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE associated_identity = $1 LIMIT 1",
            self.table
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Token::from))
    }

    async fn find_by_identity_and_value(
        &self,
        identity: &str,
        stored_value: &str,
    ) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE associated_identity = $1 AND value = $2",
            self.table
        ))
        .bind(identity)
        .bind(stored_value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Token::from))
    }

    /// Replaces any record the identity already holds.
    async fn insert(&self, token: &Token) -> anyhow::Result<()> {
        sqlx::query(&insert_sql(&self.table))
        .bind(&token.value)
        .bind(&token.associated_identity)
        .bind(token.created)
        .bind(token.last_used)
        .bind(i64::try_from(token.times_used).context("times_used out of range")?)
        .bind(i64::try_from(token.max_usage).context("max_usage out of range")?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, token: &Token) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE value = $1 AND associated_identity = $2",
            self.table
        ))
        .bind(&token.value)
        .bind(&token.associated_identity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_usage(&self, stored_value: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let result = sqlx::query(&format!(
            r#"UPDATE {}
               SET times_used = times_used + 1,
                   last_used = GREATEST(last_used, $2)
               WHERE value = $1"#,
            self.table
        ))
        .bind(stored_value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("usage recorded for a token that no longer exists");
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE last_used < $1", self.table))
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn insert_sql(table: &str) -> String {
    format!(
        r#"INSERT INTO {table} ({COLUMNS})
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (associated_identity) DO UPDATE
           SET value = EXCLUDED.value,
               created = EXCLUDED.created,
               last_used = EXCLUDED.last_used,
               times_used = EXCLUDED.times_used,
               max_usage = EXCLUDED.max_usage"#
    )
}

const COLUMNS: &str = "value, associated_identity, created, last_used, times_used, max_usage";

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    value: String,
    associated_identity: String,
    created: DateTime<Utc>,
    last_used: DateTime<Utc>,
    times_used: i64,
    max_usage: i64,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Token {
            value: row.value,
            associated_identity: row.associated_identity,
            created: row.created,
            last_used: row.last_used,
            times_used: u64::try_from(row.times_used).unwrap_or(0),
            max_usage: u64::try_from(row.max_usage).unwrap_or(0),
        }
    }
}

/// Unquoted PostgreSQL identifier: ASCII letter or `_` first, then letters,
/// digits or `_`, at most 63 bytes.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
