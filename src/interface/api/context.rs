//! Caller identity of an API request
//!
//! Authentication happens upstream; the gateway forwards the resolved
//! organization and agent as headers.

use super::error::HttpError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use uuid::Uuid;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const AGENT_HEADER: &str = "x-agent-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentContext {
    pub organization_id: Uuid,
    pub agent_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AgentContext
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            organization_id: uuid_header(parts, ORGANIZATION_HEADER)?,
            agent_id: uuid_header(parts, AGENT_HEADER)?,
        })
    }
}

fn uuid_header(parts: &Parts, name: &str) -> Result<Uuid, HttpError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, format!("missing {} header", name)))?;
    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, format!("invalid {} header", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<AgentContext, HttpError> {
        let (mut parts, _) = request.into_parts();
        AgentContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_reads_identity_headers() {
        let org = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let request = Request::builder()
            .header(ORGANIZATION_HEADER, org.to_string())
            .header(AGENT_HEADER, agent.to_string())
            .body(())
            .unwrap();

        let ctx = extract(request).await.unwrap();
        assert_eq!(ctx.organization_id, org);
        assert_eq!(ctx.agent_id, agent);
    }

    #[tokio::test]
    async fn test_rejects_missing_or_malformed_headers() {
        let missing = Request::builder()
            .header(ORGANIZATION_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        let err = extract(missing).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains(AGENT_HEADER));

        let malformed = Request::builder()
            .header(ORGANIZATION_HEADER, "not-a-uuid")
            .header(AGENT_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        let err = extract(malformed).await.unwrap_err();
        assert!(err.message.contains("invalid"));
    }
}
