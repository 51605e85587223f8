use crate::domain::response::{AiResponseKind, AiResponseRecord, NewAiResponse};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait AiResponseStore: Send + Sync {
    /// Appends one audit record and returns it with its generated id.
    async fn insert(&self, new: NewAiResponse) -> anyhow::Result<AiResponseRecord>;

    /// Newest active record for each restorable response kind, queried
    /// independently per kind; kinds with no stored record are omitted.
    async fn latest_for_profile(
        &self,
        profile_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<BTreeMap<AiResponseKind, AiResponseRecord>>;

    /// Up to `limit` most-recent active records for a user, optionally
    /// filtered to one profile, newest first.
    async fn history(
        &self,
        user_id: Uuid,
        profile_id: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<AiResponseRecord>>;
}

#[derive(Debug, Clone)]
pub struct PgAiResponseStore {
    pool: sqlx::PgPool,
}

impl PgAiResponseStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AiResponseStore for PgAiResponseStore {
    async fn insert(&self, new: NewAiResponse) -> anyhow::Result<AiResponseRecord> {
        let record = AiResponseRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            profile_id: new.profile_id,
            response_type: new.response_type,
            request_data: new.request_data,
            ai_response: new.ai_response,
            ai_provider: new.ai_provider,
            created_at: Utc::now(),
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO ai_responses \
               (id, user_id, profile_id, response_type, request_data, ai_response, ai_provider, \
                created_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.profile_id)
        .bind(record.response_type.as_str())
        .bind(&record.request_data)
        .bind(&record.ai_response)
        .bind(&record.ai_provider)
        .bind(record.created_at)
        .bind(record.is_active)
        .execute(&self.pool)
        .await
        .context("insert ai_responses failed")?;

        Ok(record)
    }

    async fn latest_for_profile(
        &self,
        profile_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<BTreeMap<AiResponseKind, AiResponseRecord>> {
        let mut out = BTreeMap::new();

        for kind in AiResponseKind::LATEST_KINDS {
            let row = sqlx::query_as::<_, AiResponseRow>(
                "SELECT id, user_id, profile_id, response_type, request_data, ai_response, \
                        ai_provider, created_at, is_active \
                 FROM ai_responses \
                 WHERE profile_id = $1 AND user_id = $2 AND response_type = $3 AND is_active \
                 ORDER BY created_at DESC \
                 LIMIT 1",
            )
            .bind(profile_id)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("select latest ai_responses ({kind}) failed"))?;

            if let Some(row) = row {
                out.insert(kind, row.into_record()?);
            }
        }

        Ok(out)
    }

    async fn history(
        &self,
        user_id: Uuid,
        profile_id: Option<Uuid>,
        limit: i64,
    ) -> anyhow::Result<Vec<AiResponseRecord>> {
        let rows = match profile_id {
            Some(profile_id) => {
                sqlx::query_as::<_, AiResponseRow>(
                    "SELECT id, user_id, profile_id, response_type, request_data, ai_response, \
                            ai_provider, created_at, is_active \
                     FROM ai_responses \
                     WHERE user_id = $1 AND profile_id = $2 AND is_active \
                     ORDER BY created_at DESC \
                     LIMIT $3",
                )
                .bind(user_id)
                .bind(profile_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AiResponseRow>(
                    "SELECT id, user_id, profile_id, response_type, request_data, ai_response, \
                            ai_provider, created_at, is_active \
                     FROM ai_responses \
                     WHERE user_id = $1 AND is_active \
                     ORDER BY created_at DESC \
                     LIMIT $2",
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_record()?);
        }
        Ok(out)
    }
}

#[derive(sqlx::FromRow)]
struct AiResponseRow {
    id: Uuid,
    user_id: Uuid,
    profile_id: Uuid,
    response_type: String,
    request_data: Value,
    ai_response: String,
    ai_provider: String,
    created_at: DateTime<Utc>,
    is_active: bool,
}

impl AiResponseRow {
    fn into_record(self) -> anyhow::Result<AiResponseRecord> {
        let response_type = AiResponseKind::parse(&self.response_type)
            .with_context(|| format!("unknown response_type '{}' in ai_responses", self.response_type))?;

        Ok(AiResponseRecord {
            id: self.id,
            user_id: self.user_id,
            profile_id: self.profile_id,
            response_type,
            request_data: self.request_data,
            ai_response: self.ai_response,
            ai_provider: self.ai_provider,
            created_at: self.created_at,
            is_active: self.is_active,
        })
    }
}
