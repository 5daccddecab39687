/// PostgreSQL read access to accounts, contacts and the agent directory
use crate::domain::account::{AccountRepository, Contact, WhatsAppAccount};
use crate::domain::agent_transfer::{AgentDirectory, QueueSettings};
use crate::domain::shared::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn get_account(&self, organization_id: Uuid, name: &str) -> Result<Option<WhatsAppAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, phone_id, business_id, api_version, access_token
            FROM whatsapp_accounts
            WHERE organization_id = $1 AND name = $2
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(WhatsAppAccount {
                id: row.try_get("id")?,
                organization_id: row.try_get("organization_id")?,
                name: row.try_get("name")?,
                phone_id: row.try_get("phone_id")?,
                business_id: row.try_get("business_id")?,
                api_version: row.try_get("api_version")?,
                access_token: row.try_get("access_token")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<Contact>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, phone_number, profile_name
            FROM contacts
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(organization_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Contact {
                id: row.try_get("id")?,
                organization_id: row.try_get("organization_id")?,
                phone_number: row.try_get("phone_number")?,
                profile_name: row.try_get("profile_name")?,
            })),
            None => Ok(None),
        }
    }
}

pub struct PgAgentDirectory {
    pool: PgPool,
}

impl PgAgentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentDirectory for PgAgentDirectory {
    async fn is_available(&self, organization_id: Uuid, agent_id: Uuid) -> Result<bool> {
        let available: Option<bool> = sqlx::query_scalar(
            "SELECT is_available FROM agents WHERE organization_id = $1 AND id = $2",
        )
        .bind(organization_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(available.unwrap_or(false))
    }

    async fn team_ids(&self, organization_id: Uuid, agent_id: Uuid) -> Result<Vec<Uuid>> {
        let teams = sqlx::query_scalar(
            r#"
            SELECT t.team_id FROM agent_teams t
            JOIN agents a ON a.id = t.agent_id
            WHERE a.organization_id = $1 AND t.agent_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    async fn queue_settings(&self, organization_id: Uuid) -> Result<QueueSettings> {
        let row = sqlx::query(
            r#"
            SELECT allow_agent_queue_pickup, team_queue_pickup
            FROM organization_queue_settings
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(QueueSettings {
                allow_agent_queue_pickup: row.try_get("allow_agent_queue_pickup")?,
                team_queue_pickup: row.try_get("team_queue_pickup")?,
            }),
            None => Ok(QueueSettings::default()),
        }
    }
}
