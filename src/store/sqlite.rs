//! SQLite request store
//!
//! The request body is stored as JSON. The conditional update guards on the
//! `status` and `version` columns; `claimed_by` mirrors the current claim
//! holder so operators can query claims without decoding bodies.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{RequestStore, Versioned};
use crate::error::{AppError, Result};
use crate::ids::RequestId;
use crate::workflow::request::Request;
use crate::workflow::state::RequestStatus;

#[derive(Clone)]
pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn exists(&self, id: RequestId) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT id FROM review_requests WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn insert(&self, request: &Request) -> Result<Versioned<Request>> {
        let body = serde_json::to_string(request)?;

        let result = sqlx::query(
            r#"
            INSERT INTO review_requests (id, status, version, claimed_by, body, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(request.id().to_string())
        .bind(request.status().as_str())
        .bind(request.claimed_by().map(|c| c.actor.to_string()))
        .bind(&body)
        .bind(request.created_at())
        .bind(request.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(request.id(), "request already exists"));
        }

        Ok(Versioned::new(1, request.clone()))
    }

    async fn get(&self, id: RequestId) -> Result<Option<Versioned<Request>>> {
        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, status, version, body
            FROM review_requests
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Versioned::<Request>::try_from).transpose()
    }

    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: u64,
        expected_status: RequestStatus,
        next: &Request,
    ) -> Result<u64> {
        if next.id() != id {
            return Err(AppError::Internal(format!(
                "request {} written under id {}",
                next.id(),
                id
            )));
        }

        let expected = i64::try_from(expected_version)
            .map_err(|_| AppError::Internal(format!("version {} out of range", expected_version)))?;
        let body = serde_json::to_string(next)?;

        let result = sqlx::query(
            r#"
            UPDATE review_requests
            SET status = ?, version = version + 1, claimed_by = ?, body = ?, updated_at = ?
            WHERE id = ? AND version = ? AND status = ?
            "#,
        )
        .bind(next.status().as_str())
        .bind(next.claimed_by().map(|c| c.actor.to_string()))
        .bind(&body)
        .bind(next.updated_at())
        .bind(id.to_string())
        .bind(expected)
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(AppError::NotFound(format!("Request {} not found", id)));
            }
            return Err(AppError::conflict(
                id,
                format!(
                    "version {} ({}) is no longer current",
                    expected_version, expected_status
                ),
            ));
        }

        Ok(expected_version + 1)
    }

    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<Versioned<Request>>> {
        let rows = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, status, version, body
            FROM review_requests
            WHERE status = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Versioned::<Request>::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    status: String,
    version: i64,
    body: String,
}

impl TryFrom<RequestRow> for Versioned<Request> {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let request: Request = serde_json::from_str(&row.body)?;
        let status: RequestStatus = row.status.parse().map_err(AppError::Internal)?;
        if request.status() != status || request.id().to_string() != row.id {
            return Err(AppError::Internal(format!(
                "Row {} disagrees with its body",
                row.id
            )));
        }
        let version = u64::try_from(row.version)
            .map_err(|_| AppError::Internal(format!("Invalid version {}", row.version)))?;
        Ok(Versioned::new(version, request))
    }
}
