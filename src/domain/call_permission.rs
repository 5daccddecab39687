//! Consent records for business-initiated calls
//!
//! A contact must accept a call permission request before an agent may call
//! them. Accepted permissions lapse 72 hours after the contact responded.

use crate::domain::shared::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long an accepted permission stays valid
pub const PERMISSION_VALIDITY_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPermissionStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl CallPermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPermissionStatus::Pending => "pending",
            CallPermissionStatus::Accepted => "accepted",
            CallPermissionStatus::Declined => "declined",
            CallPermissionStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallPermissionStatus::Pending),
            "accepted" => Some(CallPermissionStatus::Accepted),
            "declined" => Some(CallPermissionStatus::Declined),
            "expired" => Some(CallPermissionStatus::Expired),
            _ => None,
        }
    }
}

/// Call permission record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallPermission {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub account_name: String,
    pub status: CallPermissionStatus,
    /// Provider id of the consent request message
    pub message_id: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CallPermission {
    pub fn pending(
        organization_id: Uuid,
        contact_id: Uuid,
        account_name: impl Into<String>,
        message_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            contact_id,
            account_name: account_name.into(),
            status: CallPermissionStatus::Pending,
            message_id,
            requested_at: Utc::now(),
            responded_at: None,
            expires_at: None,
        }
    }

    /// Record the contact's answer to the request
    pub fn respond(&mut self, accepted: bool, at: DateTime<Utc>) {
        self.responded_at = Some(at);
        if accepted {
            self.status = CallPermissionStatus::Accepted;
            self.expires_at = Some(at + Duration::hours(PERMISSION_VALIDITY_HOURS));
        } else {
            self.status = CallPermissionStatus::Declined;
            self.expires_at = None;
        }
    }

    /// Status as of `now`; accepted permissions past their window read as expired
    pub fn effective_status(&self, now: DateTime<Utc>) -> CallPermissionStatus {
        match (self.status, self.expires_at) {
            (CallPermissionStatus::Accepted, Some(expires)) if now >= expires => {
                CallPermissionStatus::Expired
            }
            (status, _) => status,
        }
    }

    pub fn allows_call(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == CallPermissionStatus::Accepted
    }
}

/// Call permission repository
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CallPermissionRepository: Send + Sync {
    async fn create(&self, permission: &CallPermission) -> Result<()>;

    async fn update(&self, permission: &CallPermission) -> Result<()>;

    /// Most recently requested permission for a contact
    async fn latest_for_contact(
        &self,
        organization_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<CallPermission>>;
}
