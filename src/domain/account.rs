//! Business accounts and contacts the calling core works with
//!
//! Both are owned by the surrounding system; the calling core only reads them.

use crate::domain::shared::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provider business phone number with its API credentials
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhatsAppAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub phone_id: String,
    pub business_id: String,
    pub api_version: String,
    #[serde(skip_serializing)]
    pub access_token: String,
}

impl std::fmt::Debug for WhatsAppAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppAccount")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("name", &self.name)
            .field("phone_id", &self.phone_id)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

/// Contact on the other end of a call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub phone_number: String,
    pub profile_name: Option<String>,
}

/// Read access to accounts and contacts
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_account(&self, organization_id: Uuid, name: &str) -> Result<Option<WhatsAppAccount>>;

    async fn get_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<Option<Contact>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_debug_hides_token() {
        let account = WhatsAppAccount {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "support".to_string(),
            phone_id: "1234".to_string(),
            business_id: "5678".to_string(),
            api_version: "v21.0".to_string(),
            access_token: "EAAG-secret".to_string(),
        };

        let debug = format!("{:?}", account);
        assert!(debug.contains("support"));
        assert!(!debug.contains("EAAG-secret"));
    }
}
