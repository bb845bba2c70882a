use anyhow::{Context, Result};
use signalbox_core::{RecordKey, RecordKind, ScopeKey};
use sqlx::{types::Json, FromRow};

use crate::StoragePool;

/// Postgres access to `scoped_records`.
///
/// Each insert is a single-row statement, so siblings created concurrently
/// under one scope never clobber each other. Reads go to the same primary and
/// observe every committed insert for the scope.
#[derive(Clone)]
pub struct ScopedRecordRepository {
    pool: StoragePool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScopedRecordRow {
    pub sequence: i64,
    pub scope_kind: String,
    pub scope_id: String,
    pub record_kind: String,
    pub body: serde_json::Value,
}

impl ScopedRecordRow {
    pub fn key(&self) -> Result<RecordKey> {
        let scope_kind = self
            .scope_kind
            .parse()
            .with_context(|| format!("row {} has a corrupt scope kind", self.sequence))?;
        let kind = self
            .record_kind
            .parse()
            .with_context(|| format!("row {} has a corrupt record kind", self.sequence))?;
        Ok(RecordKey {
            scope: ScopeKey::new(scope_kind, self.scope_id.clone()),
            kind,
            sequence: self.sequence,
        })
    }
}

impl ScopedRecordRepository {
    pub fn new(pool: StoragePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
        body: &serde_json::Value,
    ) -> Result<ScopedRecordRow> {
        let row = sqlx::query_as::<_, ScopedRecordRow>(
            r#"
            INSERT INTO scoped_records (scope_kind, scope_id, record_kind, body)
            VALUES ($1, $2, $3, $4)
            RETURNING sequence, scope_kind, scope_id, record_kind, body
            "#,
        )
        .bind(scope.kind().as_str())
        .bind(scope.id())
        .bind(kind.as_str())
        .bind(Json(body))
        .fetch_one(self.pool.pool())
        .await?;
        Ok(row)
    }

    pub async fn list(&self, scope: &ScopeKey, kind: RecordKind) -> Result<Vec<ScopedRecordRow>> {
        let rows = sqlx::query_as::<_, ScopedRecordRow>(
            r#"
            SELECT sequence, scope_kind, scope_id, record_kind, body
            FROM scoped_records
            WHERE scope_kind = $1 AND scope_id = $2 AND record_kind = $3
            ORDER BY sequence ASC
            "#,
        )
        .bind(scope.kind().as_str())
        .bind(scope.id())
        .bind(kind.as_str())
        .fetch_all(self.pool.pool())
        .await?;
        Ok(rows)
    }
}
