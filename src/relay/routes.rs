use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use super::{Relay, RelayError};
use crate::session::{IceCandidate, Role, SessionDescription, SessionId};

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    session_id: Option<String>,
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOffer {
    session_id: Option<String>,
    offer: Option<SessionDescription>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAnswer {
    session_id: Option<String>,
    answer: Option<SessionDescription>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishCandidate {
    session_id: Option<String>,
    role: Option<Role>,
    candidate: Option<IceCandidate>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: SessionId,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OfferResponse {
    pub offer: Option<SessionDescription>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AnswerResponse {
    pub answer: Option<SessionDescription>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CandidatesResponse {
    pub candidates: Vec<IceCandidate>,
}

pub fn router(relay: Relay, cors_max_age: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(cors_max_age);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/session",
            post(create_session_handler).delete(close_session_handler),
        )
        .route("/offer", post(publish_offer_handler).get(fetch_offer_handler))
        .route(
            "/answer",
            post(publish_answer_handler).get(fetch_answer_handler),
        )
        .route("/candidate", post(publish_candidate_handler))
        .route("/candidates", get(fetch_candidates_handler))
        .layer(cors)
        .with_state(relay)
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, RelayError> {
    value.ok_or_else(|| RelayError::Validation(format!("{name} is required")))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, RelayError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| RelayError::Validation(e.body_text()))
}

fn query(params: Result<Query<SessionQuery>, QueryRejection>) -> Result<SessionQuery, RelayError> {
    params
        .map(|Query(q)| q)
        .map_err(|e| RelayError::Validation(e.body_text()))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_session_handler(
    State(relay): State<Relay>,
) -> Result<Json<CreatedSession>, RelayError> {
    let session_id = relay.create_session().await?;
    Ok(Json(CreatedSession { session_id }))
}

async fn close_session_handler(
    State(relay): State<Relay>,
    params: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<Ack>, RelayError> {
    let q = query(params)?;
    relay
        .close_session(&required(q.session_id, "sessionId")?)
        .await?;
    Ok(Json(Ack { ok: true }))
}

async fn publish_offer_handler(
    State(relay): State<Relay>,
    payload: Result<Json<PublishOffer>, JsonRejection>,
) -> Result<Json<Ack>, RelayError> {
    let req = body(payload)?;
    let session_id = required(req.session_id, "sessionId")?;
    let offer = required(req.offer, "offer")?;

    relay.publish_offer(&session_id, offer).await?;
    Ok(Json(Ack { ok: true }))
}

async fn fetch_offer_handler(
    State(relay): State<Relay>,
    params: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<OfferResponse>, RelayError> {
    let q = query(params)?;
    let offer = relay
        .fetch_offer(&required(q.session_id, "sessionId")?)
        .await?;
    Ok(Json(OfferResponse { offer }))
}

async fn publish_answer_handler(
    State(relay): State<Relay>,
    payload: Result<Json<PublishAnswer>, JsonRejection>,
) -> Result<Json<Ack>, RelayError> {
    let req = body(payload)?;
    let session_id = required(req.session_id, "sessionId")?;
    let answer = required(req.answer, "answer")?;

    relay.publish_answer(&session_id, answer).await?;
    Ok(Json(Ack { ok: true }))
}

async fn fetch_answer_handler(
    State(relay): State<Relay>,
    params: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<AnswerResponse>, RelayError> {
    let q = query(params)?;
    let answer = relay
        .fetch_answer(&required(q.session_id, "sessionId")?)
        .await?;
    Ok(Json(AnswerResponse { answer }))
}

async fn publish_candidate_handler(
    State(relay): State<Relay>,
    payload: Result<Json<PublishCandidate>, JsonRejection>,
) -> Result<Json<Ack>, RelayError> {
    let req = body(payload)?;
    let session_id = required(req.session_id, "sessionId")?;
    let role = required(req.role, "role")?;
    let candidate = required(req.candidate, "candidate")?;

    relay.publish_candidate(&session_id, role, candidate).await?;
    Ok(Json(Ack { ok: true }))
}

async fn fetch_candidates_handler(
    State(relay): State<Relay>,
    params: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<CandidatesResponse>, RelayError> {
    let q = query(params)?;
    let session_id = required(q.session_id, "sessionId")?;
    let role: Role = required(q.role, "role")?
        .parse()
        .map_err(|e: crate::session::RoleError| RelayError::Validation(e.to_string()))?;

    let candidates = relay.fetch_candidates(&session_id, role).await?;
    Ok(Json(CandidatesResponse { candidates }))
}
