//! WhatsApp Business Calling API client
//!
//! Call control goes to `POST {base}/{version}/{phone_id}/calls`; the call
//! permission request is an interactive message on `/messages`.

use super::error::{parse_api_error, ProviderError};
use crate::config::WhatsAppConfig;
use crate::domain::account::WhatsAppAccount;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default text of the call permission prompt
pub const DEFAULT_PERMISSION_BODY: &str = "We'd like to call you to assist with your query.";

/// Call control operations of the external calling provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallingProvider: Send + Sync {
    /// Tell the provider an answer is ready; media may start flowing
    async fn pre_accept(&self, account: &WhatsAppAccount, call_id: &str, sdp_answer: &str) -> Result<(), ProviderError>;

    async fn accept(&self, account: &WhatsAppAccount, call_id: &str, sdp_answer: &str) -> Result<(), ProviderError>;

    async fn reject(&self, account: &WhatsAppAccount, call_id: &str) -> Result<(), ProviderError>;

    async fn terminate(&self, account: &WhatsAppAccount, call_id: &str) -> Result<(), ProviderError>;

    /// Place a call; returns the provider-assigned call id
    async fn initiate_outgoing(
        &self,
        account: &WhatsAppAccount,
        phone_number: &str,
        sdp_offer: &str,
    ) -> Result<String, ProviderError>;

    /// Ask a contact for consent to be called; returns the message id when reported
    async fn send_call_permission_request(
        &self,
        account: &WhatsAppAccount,
        phone_number: &str,
        body: &str,
    ) -> Result<Option<String>, ProviderError>;
}

/// HTTP client for the Graph API
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    calls: Vec<CallRef>,
}

#[derive(Debug, Deserialize)]
struct CallRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn calls_url(&self, account: &WhatsAppAccount) -> String {
        format!("{}/{}/{}/calls", self.base_url, account.api_version, account.phone_id)
    }

    fn messages_url(&self, account: &WhatsAppAccount) -> String {
        format!("{}/{}/{}/messages", self.base_url, account.api_version, account.phone_id)
    }

    async fn post(&self, url: &str, token: &str, payload: &Value) -> Result<String, ProviderError> {
        let response = self.http.post(url).bearer_auth(token).json(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = parse_api_error(status.as_u16(), &body);
            warn!("Calling API returned {}: {}", status, err);
            return Err(ProviderError::Api(err));
        }
        Ok(body)
    }

    async fn call_action(
        &self,
        account: &WhatsAppAccount,
        call_id: &str,
        action: &str,
        sdp_answer: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "call_id": call_id,
            "action": action,
        });
        if let Some(sdp) = sdp_answer {
            payload["session"] = json!({ "sdp_type": "answer", "sdp": sdp });
        }

        debug!("Sending {} for call {}", action, call_id);
        self.post(&self.calls_url(account), &account.access_token, &payload).await?;
        info!("Call {} {}", call_id, action);
        Ok(())
    }
}

#[async_trait]
impl CallingProvider for WhatsAppClient {
    async fn pre_accept(&self, account: &WhatsAppAccount, call_id: &str, sdp_answer: &str) -> Result<(), ProviderError> {
        self.call_action(account, call_id, "pre_accept", Some(sdp_answer)).await
    }

    async fn accept(&self, account: &WhatsAppAccount, call_id: &str, sdp_answer: &str) -> Result<(), ProviderError> {
        self.call_action(account, call_id, "accept", Some(sdp_answer)).await
    }

    async fn reject(&self, account: &WhatsAppAccount, call_id: &str) -> Result<(), ProviderError> {
        self.call_action(account, call_id, "reject", None).await
    }

    async fn terminate(&self, account: &WhatsAppAccount, call_id: &str) -> Result<(), ProviderError> {
        self.call_action(account, call_id, "terminate", None).await
    }

    async fn initiate_outgoing(
        &self,
        account: &WhatsAppAccount,
        phone_number: &str,
        sdp_offer: &str,
    ) -> Result<String, ProviderError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": phone_number,
            "action": "connect",
            "session": { "sdp_type": "offer", "sdp": sdp_offer },
        });

        info!("Initiating outgoing call to {}", phone_number);
        let body = self.post(&self.calls_url(account), &account.access_token, &payload).await?;
        let response: InitiateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", e, body)))?;

        let call_id = response
            .call_id
            .filter(|id| !id.is_empty())
            .or_else(|| response.calls.into_iter().next().map(|c| c.id))
            .ok_or_else(|| ProviderError::InvalidResponse(format!("no call_id in response: {}", body)))?;

        info!("Outgoing call to {} initiated: {}", phone_number, call_id);
        Ok(call_id)
    }

    async fn send_call_permission_request(
        &self,
        account: &WhatsAppAccount,
        phone_number: &str,
        body: &str,
    ) -> Result<Option<String>, ProviderError> {
        let text = if body.is_empty() { DEFAULT_PERMISSION_BODY } else { body };
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": phone_number,
            "type": "interactive",
            "interactive": {
                "type": "call_permission_request",
                "body": { "text": text },
                "action": { "name": "voice_call", "parameters": {} },
            },
        });

        let response = self.post(&self.messages_url(account), &account.access_token, &payload).await?;
        let message_id = serde_json::from_str::<MessagesResponse>(&response)
            .ok()
            .and_then(|r| r.messages.into_iter().next())
            .map(|m| m.id);
        info!("Call permission request sent to {}: {:?}", phone_number, message_id);
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> WhatsAppAccount {
        WhatsAppAccount {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "support".to_string(),
            phone_id: "1099".to_string(),
            business_id: "2088".to_string(),
            api_version: "v21.0".to_string(),
            access_token: "token-abc".to_string(),
        }
    }

    fn client(server: &MockServer) -> WhatsAppClient {
        WhatsAppClient::new(&WhatsAppConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_accept_sends_answer_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/1099/calls"))
            .and(header("authorization", "Bearer token-abc"))
            .and(body_partial_json(json!({
                "messaging_product": "whatsapp",
                "call_id": "wacid.1",
                "action": "accept",
                "session": { "sdp_type": "answer", "sdp": "v=0" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).accept(&account(), "wacid.1", "v=0").await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_has_no_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/1099/calls"))
            .and(body_partial_json(json!({ "action": "terminate", "call_id": "wacid.2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).terminate(&account(), "wacid.2").await.unwrap();
    }

    #[tokio::test]
    async fn test_initiate_returns_call_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/1099/calls"))
            .and(body_partial_json(json!({
                "to": "15550001111",
                "session": { "sdp_type": "offer", "sdp": "v=0 offer" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "calls": [{ "id": "wacid.out" }],
            })))
            .mount(&server)
            .await;

        let call_id = client(&server)
            .initiate_outgoing(&account(), "15550001111", "v=0 offer")
            .await
            .unwrap();
        assert_eq!(call_id, "wacid.out");
    }

    #[tokio::test]
    async fn test_api_error_is_structured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Call not permitted",
                    "code": 138006,
                    "error_user_msg": "Consumer has not granted call permission",
                    "error_data": { "details": "No approved call permission" },
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .initiate_outgoing(&account(), "15550001111", "v=0")
            .await
            .unwrap_err();
        match err {
            ProviderError::Api(api) => {
                assert_eq!(api.status, 400);
                assert_eq!(api.code, 138006);
                assert_eq!(api.details.as_deref(), Some("No approved call permission"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permission_request_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/1099/messages"))
            .and(body_partial_json(json!({
                "type": "interactive",
                "interactive": {
                    "type": "call_permission_request",
                    "body": { "text": DEFAULT_PERMISSION_BODY },
                    "action": { "name": "voice_call" },
                },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.perm" }],
            })))
            .mount(&server)
            .await;

        let message_id = client(&server)
            .send_call_permission_request(&account(), "15550001111", "")
            .await
            .unwrap();
        assert_eq!(message_id.as_deref(), Some("wamid.perm"));
    }
}
