// Postgres persistence: one row per entity, profile and score as JSONB.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use dcp_common::{EntityKey, MergedProfile, ProfileRecord, Score};

use super::ProfileStore;

pub struct PgProfileStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    profile: serde_json::Value,
    score: serde_json::Value,
    refreshed_at: DateTime<Utc>,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Create the profile table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_profiles (
                entity_kind  TEXT        NOT NULL,
                entity_name  TEXT        NOT NULL,
                profile      JSONB       NOT NULL,
                score        JSONB       NOT NULL,
                composite    DOUBLE PRECISION NOT NULL,
                refreshed_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (entity_kind, entity_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create entity_profiles")?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn load_profile(&self, key: &EntityKey) -> Result<Option<ProfileRecord>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT profile, score, refreshed_at
            FROM entity_profiles
            WHERE entity_kind = $1 AND entity_name = $2
            "#,
        )
        .bind(key.kind().as_str())
        .bind(key.name())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load profile for {key}"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let profile: MergedProfile =
            serde_json::from_value(row.profile).context("Corrupt stored profile")?;
        let score: Score = serde_json::from_value(row.score).context("Corrupt stored score")?;
        Ok(Some(ProfileRecord {
            profile,
            score,
            refreshed_at: row.refreshed_at,
        }))
    }

    async fn save_profile(&self, record: &ProfileRecord) -> Result<()> {
        let key = &record.profile.entity;
        let profile = serde_json::to_value(&record.profile)?;
        let score = serde_json::to_value(&record.score)?;

        // Single statement so profile and score land together; the WHERE
        // clause keeps a late writer from regressing freshness.
        sqlx::query(
            r#"
            INSERT INTO entity_profiles
                (entity_kind, entity_name, profile, score, composite, refreshed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_kind, entity_name) DO UPDATE
            SET profile = EXCLUDED.profile,
                score = EXCLUDED.score,
                composite = EXCLUDED.composite,
                refreshed_at = EXCLUDED.refreshed_at
            WHERE entity_profiles.refreshed_at <= EXCLUDED.refreshed_at
            "#,
        )
        .bind(key.kind().as_str())
        .bind(key.name())
        .bind(&profile)
        .bind(&score)
        .bind(record.score.composite)
        .bind(record.refreshed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save profile for {key}"))?;
        Ok(())
    }
}
