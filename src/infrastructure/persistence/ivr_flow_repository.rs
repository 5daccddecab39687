/// PostgreSQL implementation of IvrFlowRepository
use crate::domain::ivr_flow::{IvrFlow, IvrFlowRepository};
use crate::domain::shared::Result;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgIvrFlowRepository {
    pool: PgPool,
}

impl PgIvrFlowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_flow(row: &PgRow) -> Result<IvrFlow> {
    Ok(IvrFlow {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        account_name: row.try_get("account_name")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        menu: row.try_get("menu")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl IvrFlowRepository for PgIvrFlowRepository {
    async fn get(&self, id: Uuid) -> Result<Option<IvrFlow>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, account_name, name, is_active, menu, created_at, updated_at
            FROM ivr_flows WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_flow).transpose()
    }

    async fn active_for_account(&self, organization_id: Uuid, account_name: &str) -> Result<Option<IvrFlow>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, account_name, name, is_active, menu, created_at, updated_at
            FROM ivr_flows
            WHERE organization_id = $1 AND account_name = $2 AND is_active
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(account_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_flow).transpose()
    }
}
