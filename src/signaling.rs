//! Client view of the relay.
//!
//! The handshake driver depends on [`SignalingApi`] only. [`HttpSignaling`]
//! talks to a remote relay over HTTP; [`Relay`] itself implements the trait
//! for in-process use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::relay::routes::{AnswerResponse, CandidatesResponse, CreatedSession, OfferResponse};
use crate::relay::{Relay, RelayError};
use crate::session::{IceCandidate, Role, SessionDescription, SessionId};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("session not found")]
    NotFound,

    #[error("rejected by relay: {0}")]
    Validation(String),

    #[error("relay upstream unavailable: {0}")]
    Upstream(String),

    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected relay response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SignalingApi: Send + Sync {
    async fn create_session(&self) -> Result<SessionId, SignalingError>;

    async fn close_session(&self, id: &SessionId) -> Result<(), SignalingError>;

    async fn publish_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), SignalingError>;

    async fn fetch_offer(&self, id: &SessionId)
        -> Result<Option<SessionDescription>, SignalingError>;

    async fn publish_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), SignalingError>;

    async fn fetch_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError>;

    async fn publish_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError>;

    /// Candidates published by the counterpart of `role`
    async fn fetch_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, SignalingError>;
}

/// reqwest client for a relay reachable at `base_url`
#[derive(Clone)]
pub struct HttpSignaling {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpSignaling {
    /// Every request, including reading the body, is bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SignalingError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SignalingError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| SignalingError::Decode(e.to_string()));
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        debug!("Relay answered {status}: {message}");

        Err(match status {
            StatusCode::NOT_FOUND => SignalingError::NotFound,
            s if s.is_client_error() => SignalingError::Validation(message),
            _ => SignalingError::Upstream(message),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SignalingError> {
        let resp = self.client.get(self.url(path)).query(query).send().await?;
        Self::decode(resp).await
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), SignalingError> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }
}

#[async_trait]
impl SignalingApi for HttpSignaling {
    async fn create_session(&self) -> Result<SessionId, SignalingError> {
        let resp = self.client.post(self.url("/session")).send().await?;
        let created: CreatedSession = Self::decode(resp).await?;
        Ok(created.session_id)
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), SignalingError> {
        let resp = self
            .client
            .delete(self.url("/session"))
            .query(&[("sessionId", id.as_str())])
            .send()
            .await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    async fn publish_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.post("/offer", json!({ "sessionId": id, "offer": offer }))
            .await
    }

    async fn fetch_offer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        let resp: OfferResponse = self.get("/offer", &[("sessionId", id.as_str())]).await?;
        Ok(resp.offer)
    }

    async fn publish_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.post("/answer", json!({ "sessionId": id, "answer": answer }))
            .await
    }

    async fn fetch_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        let resp: AnswerResponse = self.get("/answer", &[("sessionId", id.as_str())]).await?;
        Ok(resp.answer)
    }

    async fn publish_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.post(
            "/candidate",
            json!({ "sessionId": id, "role": role, "candidate": candidate }),
        )
        .await
    }

    async fn fetch_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        let resp: CandidatesResponse = self
            .get(
                "/candidates",
                &[("sessionId", id.as_str()), ("role", role.as_str())],
            )
            .await?;
        Ok(resp.candidates)
    }
}

impl From<RelayError> for SignalingError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound => SignalingError::NotFound,
            RelayError::Validation(msg) => SignalingError::Validation(msg),
            RelayError::UpstreamUnavailable(msg) => SignalingError::Upstream(msg),
        }
    }
}

#[async_trait]
impl SignalingApi for Relay {
    async fn create_session(&self) -> Result<SessionId, SignalingError> {
        Ok(Relay::create_session(self).await?)
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), SignalingError> {
        Ok(Relay::close_session(self, id.as_str()).await?)
    }

    async fn publish_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        Ok(Relay::publish_offer(self, id.as_str(), offer.clone()).await?)
    }

    async fn fetch_offer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        Ok(Relay::fetch_offer(self, id.as_str()).await?)
    }

    async fn publish_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        Ok(Relay::publish_answer(self, id.as_str(), answer.clone()).await?)
    }

    async fn fetch_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        Ok(Relay::fetch_answer(self, id.as_str()).await?)
    }

    async fn publish_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        Ok(Relay::publish_candidate(self, id.as_str(), role, candidate.clone()).await?)
    }

    async fn fetch_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        Ok(Relay::fetch_candidates(self, id.as_str(), role).await?)
    }
}
