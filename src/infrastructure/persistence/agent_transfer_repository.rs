/// PostgreSQL implementation of AgentTransferRepository
use crate::domain::agent_transfer::{
    AgentTransfer, AgentTransferRepository, AgentTransferStatus, NewAgentTransfer, PickScope, TransferError,
    TransferSource,
};
use crate::domain::shared::DomainError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

const TRANSFER_COLUMNS: &str = r#"
    id, seq, organization_id, contact_id, account_name, phone_number, status, source,
    team_id, agent_id, call_log_id, notes, transferred_by, transferred_at,
    resumed_at, resumed_by, connected_at, ended_at, talk_duration_secs
"#;

pub struct PgAgentTransferRepository {
    pool: PgPool,
}

impl PgAgentTransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_transfer(row: &PgRow) -> Result<AgentTransfer, DomainError> {
    let status: String = row.try_get("status")?;
    let status = AgentTransferStatus::from_str(&status)
        .ok_or_else(|| DomainError::Persistence(format!("unknown transfer status '{}'", status)))?;
    let source: String = row.try_get("source")?;
    let source = TransferSource::from_str(&source)
        .ok_or_else(|| DomainError::Persistence(format!("unknown transfer source '{}'", source)))?;

    Ok(AgentTransfer {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        contact_id: row.try_get("contact_id")?,
        account_name: row.try_get("account_name")?,
        phone_number: row.try_get("phone_number")?,
        status,
        source,
        team_id: row.try_get("team_id")?,
        agent_id: row.try_get("agent_id")?,
        call_log_id: row.try_get("call_log_id")?,
        notes: row.try_get("notes")?,
        transferred_by: row.try_get("transferred_by")?,
        transferred_at: row.try_get("transferred_at")?,
        resumed_at: row.try_get("resumed_at")?,
        resumed_by: row.try_get("resumed_by")?,
        connected_at: row.try_get("connected_at")?,
        ended_at: row.try_get("ended_at")?,
        talk_duration_secs: row.try_get("talk_duration_secs")?,
        seq: row.try_get("seq")?,
    })
}

/// Split a scope into "general queue visible" and the visible team ids
fn scope_filter(scope: &PickScope) -> (bool, Vec<Uuid>) {
    match scope {
        PickScope::General => (true, Vec::new()),
        PickScope::Team(team) => (false, vec![*team]),
        PickScope::GeneralAndTeams(teams) => (true, teams.clone()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl AgentTransferRepository for PgAgentTransferRepository {
    async fn create_active(&self, new: NewAgentTransfer) -> Result<AgentTransfer, TransferError> {
        let mut tx = self.pool.begin().await.map_err(DomainError::from)?;

        let existing = sqlx::query(
            r#"
            SELECT id FROM agent_transfers
            WHERE organization_id = $1 AND contact_id = $2 AND status = 'active'
            FOR UPDATE
            "#,
        )
        .bind(new.organization_id)
        .bind(new.contact_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DomainError::from)?;

        if existing.is_some() {
            return Err(TransferError::ActiveTransferExists {
                contact_id: new.contact_id,
            });
        }

        let mut transfer = AgentTransfer::from_new(new, Utc::now(), 0);
        let result = sqlx::query(
            r#"
            INSERT INTO agent_transfers
            (id, organization_id, contact_id, account_name, phone_number, status, source,
             team_id, agent_id, call_log_id, notes, transferred_by, transferred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING seq
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.organization_id)
        .bind(transfer.contact_id)
        .bind(&transfer.account_name)
        .bind(&transfer.phone_number)
        .bind(transfer.status.as_str())
        .bind(transfer.source.as_str())
        .bind(transfer.team_id)
        .bind(transfer.agent_id)
        .bind(transfer.call_log_id)
        .bind(transfer.notes.as_ref())
        .bind(transfer.transferred_by)
        .bind(transfer.transferred_at)
        .fetch_one(&mut *tx)
        .await;

        match result {
            Ok(row) => {
                transfer.seq = row.try_get("seq").map_err(DomainError::from)?;
            }
            // A concurrent insert won the partial unique index
            Err(e) if is_unique_violation(&e) => {
                return Err(TransferError::ActiveTransferExists {
                    contact_id: transfer.contact_id,
                });
            }
            Err(e) => {
                error!("Failed to create agent transfer: {}", e);
                return Err(DomainError::from(e).into());
            }
        }

        tx.commit().await.map_err(DomainError::from)?;
        debug!("Created agent transfer {} (seq {})", transfer.id, transfer.seq);
        Ok(transfer)
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<AgentTransfer>, DomainError> {
        let query = format!(
            "SELECT {} FROM agent_transfers WHERE organization_id = $1 AND id = $2",
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn update(&self, transfer: &AgentTransfer) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_transfers
            SET status = $2, team_id = $3, agent_id = $4, notes = $5,
                resumed_at = $6, resumed_by = $7, connected_at = $8,
                ended_at = $9, talk_duration_secs = $10
            WHERE id = $1
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.status.as_str())
        .bind(transfer.team_id)
        .bind(transfer.agent_id)
        .bind(transfer.notes.as_ref())
        .bind(transfer.resumed_at)
        .bind(transfer.resumed_by)
        .bind(transfer.connected_at)
        .bind(transfer.ended_at)
        .bind(transfer.talk_duration_secs)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(DomainError::NotFound(format!("agent transfer {}", transfer.id))),
            Ok(_) => {
                debug!("Updated agent transfer {}", transfer.id);
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DomainError::Conflict(format!(
                "contact {} already has an active transfer",
                transfer.contact_id
            ))),
            Err(e) => {
                error!("Failed to update agent transfer: {}", e);
                Err(e.into())
            }
        }
    }

    async fn pick_next(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        scope: PickScope,
    ) -> Result<Option<AgentTransfer>, DomainError> {
        let (include_general, teams) = scope_filter(&scope);
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED keeps concurrent pickers from blocking on, or
        // receiving, the row another picker is assigning
        let query = format!(
            r#"
            UPDATE agent_transfers SET agent_id = $2
            WHERE id = (
                SELECT id FROM agent_transfers
                WHERE organization_id = $1
                  AND status = 'active'
                  AND agent_id IS NULL
                  AND (($3 AND team_id IS NULL) OR team_id = ANY($4))
                ORDER BY transferred_at, seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(organization_id)
            .bind(agent_id)
            .bind(include_general)
            .bind(&teams)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn return_to_queue(&self, organization_id: Uuid, agent_id: Uuid) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_transfers SET agent_id = NULL
            WHERE organization_id = $1 AND agent_id = $2 AND status = 'active'
            "#,
        )
        .bind(organization_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn active_for_contact(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<AgentTransfer>, DomainError> {
        let query = format!(
            "SELECT {} FROM agent_transfers WHERE organization_id = $1 AND contact_id = $2 AND status = 'active'",
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(organization_id)
            .bind(contact_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn list_active(&self, organization_id: Uuid) -> Result<Vec<AgentTransfer>, DomainError> {
        let query = format!(
            r#"
            SELECT {} FROM agent_transfers
            WHERE organization_id = $1 AND status = 'active'
            ORDER BY transferred_at, seq
            "#,
            TRANSFER_COLUMNS
        );
        let rows = sqlx::query(&query).bind(organization_id).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_transfer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_filter() {
        let team = Uuid::new_v4();
        assert_eq!(scope_filter(&PickScope::General), (true, vec![]));
        assert_eq!(scope_filter(&PickScope::Team(team)), (false, vec![team]));
        assert_eq!(
            scope_filter(&PickScope::GeneralAndTeams(vec![team])),
            (true, vec![team])
        );
    }
}
