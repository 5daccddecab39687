//! Persisted IVR flow definitions

use crate::domain::shared::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An IVR flow row; `menu` holds the nested menu tree as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IvrFlow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub account_name: String,
    pub name: String,
    pub is_active: bool,
    pub menu: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IvrFlow {
    pub fn new(
        organization_id: Uuid,
        account_name: impl Into<String>,
        name: impl Into<String>,
        menu: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            account_name: account_name.into(),
            name: name.into(),
            is_active: true,
            menu,
            created_at: now,
            updated_at: now,
        }
    }
}

/// IVR flow repository
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IvrFlowRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<IvrFlow>>;

    /// The flow currently switched on for an account, if any
    async fn active_for_account(&self, organization_id: Uuid, account_name: &str) -> Result<Option<IvrFlow>>;
}
