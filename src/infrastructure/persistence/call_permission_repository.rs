/// PostgreSQL implementation of CallPermissionRepository
use crate::domain::call_permission::{CallPermission, CallPermissionRepository, CallPermissionStatus};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::error;
use uuid::Uuid;

pub struct PgCallPermissionRepository {
    pool: PgPool,
}

impl PgCallPermissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_permission(row: &PgRow) -> Result<CallPermission> {
    let status: String = row.try_get("status")?;
    Ok(CallPermission {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        contact_id: row.try_get("contact_id")?,
        account_name: row.try_get("account_name")?,
        status: CallPermissionStatus::from_str(&status)
            .ok_or_else(|| DomainError::Persistence(format!("unknown permission status '{}'", status)))?,
        message_id: row.try_get("message_id")?,
        requested_at: row.try_get("requested_at")?,
        responded_at: row.try_get("responded_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl CallPermissionRepository for PgCallPermissionRepository {
    async fn create(&self, permission: &CallPermission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_permissions
            (id, organization_id, contact_id, account_name, status, message_id,
             requested_at, responded_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(permission.id)
        .bind(permission.organization_id)
        .bind(permission.contact_id)
        .bind(&permission.account_name)
        .bind(permission.status.as_str())
        .bind(permission.message_id.as_ref())
        .bind(permission.requested_at)
        .bind(permission.responded_at)
        .bind(permission.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create call permission: {}", e);
            DomainError::from(e)
        })?;
        Ok(())
    }

    async fn update(&self, permission: &CallPermission) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE call_permissions
            SET status = $2, message_id = $3, responded_at = $4, expires_at = $5
            WHERE id = $1
            "#,
        )
        .bind(permission.id)
        .bind(permission.status.as_str())
        .bind(permission.message_id.as_ref())
        .bind(permission.responded_at)
        .bind(permission.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("call permission {}", permission.id)));
        }
        Ok(())
    }

    async fn latest_for_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<CallPermission>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, contact_id, account_name, status, message_id,
                   requested_at, responded_at, expires_at
            FROM call_permissions
            WHERE organization_id = $1 AND contact_id = $2
            ORDER BY requested_at DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_permission).transpose()
    }
}
