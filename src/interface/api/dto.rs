//! Request and response bodies of the calling API

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard API envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutgoingCallBody {
    pub contact_id: Uuid,
    pub account_name: String,
    pub sdp_offer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutgoingCallResponse {
    pub call_log_id: Uuid,
    pub call_id: String,
    pub sdp_answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionRequestBody {
    pub contact_id: Uuid,
    pub account_name: String,
    /// Custom request text; the provider default is used when absent
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PickTransferBody {
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnedTransfers {
    pub returned: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptTransferBody {
    pub sdp_offer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp_answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_calls: usize,
}
