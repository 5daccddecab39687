/// PostgreSQL implementation of CallLogRepository
use crate::domain::call::{CallDirection, CallLog, CallLogRepository, CallStatus};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

const CALL_LOG_COLUMNS: &str = r#"
    id, organization_id, call_id, account_name, contact_id, caller_phone, direction, status,
    agent_id, ivr_flow_id, started_at, answered_at, ended_at, duration_secs,
    error_message, recording_url, created_at, updated_at
"#;

pub struct PgCallLogRepository {
    pool: PgPool,
}

impl PgCallLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_call_log(row: &PgRow) -> Result<CallLog> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;

    Ok(CallLog {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        call_id: row.try_get("call_id")?,
        account_name: row.try_get("account_name")?,
        contact_id: row.try_get("contact_id")?,
        caller_phone: row.try_get("caller_phone")?,
        direction: CallDirection::from_str(&direction)
            .ok_or_else(|| DomainError::Persistence(format!("unknown call direction '{}'", direction)))?,
        status: CallStatus::from_str(&status)
            .ok_or_else(|| DomainError::Persistence(format!("unknown call status '{}'", status)))?,
        agent_id: row.try_get("agent_id")?,
        ivr_flow_id: row.try_get("ivr_flow_id")?,
        started_at: row.try_get("started_at")?,
        answered_at: row.try_get("answered_at")?,
        ended_at: row.try_get("ended_at")?,
        duration_secs: row.try_get("duration_secs")?,
        error_message: row.try_get("error_message")?,
        recording_url: row.try_get("recording_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CallLogRepository for PgCallLogRepository {
    async fn create(&self, log: &CallLog) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO call_logs
            (id, organization_id, call_id, account_name, contact_id, caller_phone, direction, status,
             agent_id, ivr_flow_id, started_at, answered_at, ended_at, duration_secs,
             error_message, recording_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(log.id)
        .bind(log.organization_id)
        .bind(&log.call_id)
        .bind(&log.account_name)
        .bind(log.contact_id)
        .bind(&log.caller_phone)
        .bind(log.direction.as_str())
        .bind(log.status.as_str())
        .bind(log.agent_id)
        .bind(log.ivr_flow_id)
        .bind(log.started_at)
        .bind(log.answered_at)
        .bind(log.ended_at)
        .bind(log.duration_secs)
        .bind(log.error_message.as_ref())
        .bind(log.recording_url.as_ref())
        .bind(log.created_at)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Created call log {} for call {}", log.id, log.call_id);
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DomainError::AlreadyExists(format!("call log for {}", log.call_id)))
            }
            Err(e) => {
                error!("Failed to create call log: {}", e);
                Err(e.into())
            }
        }
    }

    async fn update(&self, log: &CallLog) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE call_logs
            SET status = $2, agent_id = $3, ivr_flow_id = $4, answered_at = $5, ended_at = $6,
                duration_secs = $7, error_message = $8, recording_url = $9, updated_at = $10, call_id = $11
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.status.as_str())
        .bind(log.agent_id)
        .bind(log.ivr_flow_id)
        .bind(log.answered_at)
        .bind(log.ended_at)
        .bind(log.duration_secs)
        .bind(log.error_message.as_ref())
        .bind(log.recording_url.as_ref())
        .bind(log.updated_at)
        .bind(&log.call_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(DomainError::NotFound(format!("call log {}", log.id))),
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to update call log {}: {}", log.id, e);
                Err(e.into())
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<CallLog>> {
        let query = format!("SELECT {} FROM call_logs WHERE id = $1", CALL_LOG_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_call_log).transpose()
    }

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallLog>> {
        let query = format!("SELECT {} FROM call_logs WHERE call_id = $1", CALL_LOG_COLUMNS);
        let row = sqlx::query(&query).bind(call_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_call_log).transpose()
    }
}
