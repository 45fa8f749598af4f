//! # Redis
//!
//! Shared store so every relay instance sees the same sessions.
//!
//! ## Layout
//!
//! - `{prefix}:session:{id}`: hash with `created_at` (unix millis) and the
//!   optional `offer` / `answer` JSON. Expires after the session TTL,
//!   counted from creation; later writes never extend it.
//! - `{prefix}:session:{id}:candidates:A` and `...:B`: candidate JSON
//!   lists. Pushed by a script that checks the session hash first and copies
//!   its remaining TTL, so a list never outlives its session.
//!
//! Writes against a missing hash are rejected inside the scripts, so an
//! expired session is never resurrected by a late publish.
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{SignalingStore, StoreError, MAX_CREATE_ATTEMPTS};
use crate::session::{IceCandidate, Role, Session, SessionDescription, SessionId};

const FIELD_CREATED_AT: &str = "created_at";
const FIELD_OFFER: &str = "offer";
const FIELD_ANSWER: &str = "answer";

/// KEYS[1] session hash; ARGV[1] created_at; ARGV[2] ttl millis
static CREATE_SESSION: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], 'created_at', ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
",
    )
});

/// KEYS[1] session hash; ARGV[1] field; ARGV[2] value
static SET_FIELD_IF_EXISTS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
",
    )
});

/// KEYS[1] session hash; KEYS[2] candidate list; ARGV[1] candidate
static PUSH_IF_EXISTS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local ttl = redis.call('PTTL', KEYS[1])
if ttl == -2 then return 0 end
redis.call('RPUSH', KEYS[2], ARGV[1])
if ttl > 0 then redis.call('PEXPIRE', KEYS[2], ttl) end
return 1
",
    )
});

pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<ConnectionManager>>,
    prefix: String,
    ttl: Duration,
    op_timeout: Duration,
}

impl RedisStore {
    /// Parses the URL only; the connection is made on first use so an
    /// unreachable Redis surfaces as `Unavailable` per request.
    pub fn open(
        redis_url: &str,
        prefix: &str,
        ttl: Duration,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix: prefix.to_string(),
            ttl,
            op_timeout,
        })
    }

    fn session_key(&self, id: &SessionId) -> String {
        format!("{}:session:{}", self.prefix, id)
    }

    fn candidates_key(&self, id: &SessionId, role: Role) -> String {
        format!("{}:session:{}:candidates:{}", self.prefix, id, role)
    }

    /// Waiting for the slot counts against the same timeout as connecting,
    /// so callers queued behind a stuck connect give up together
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        timeout(self.op_timeout, self.connect())
            .await
            .map_err(|_| StoreError::Unavailable("redis connect timed out".into()))?
    }

    async fn connect(&self) -> Result<ConnectionManager, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("Connected to redis");

        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T>(&self, op: impl Future<Output = RedisResult<T>>) -> Result<T, StoreError> {
        match timeout(self.op_timeout, op).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                warn!("Redis command failed: {e}");
                Err(StoreError::Unavailable(e.to_string()))
            }
            Err(_) => Err(StoreError::Unavailable("redis command timed out".into())),
        }
    }

    async fn set_field(&self, id: &SessionId, field: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.session_key(id);

        let written: i32 = self
            .bounded(
                SET_FIELD_IF_EXISTS
                    .key(&key)
                    .arg(field)
                    .arg(value)
                    .invoke_async(&mut conn),
            )
            .await?;

        if written == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn get_description(
        &self,
        id: &SessionId,
        field: &str,
    ) -> Result<Option<SessionDescription>, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.session_key(id);

        let (created_at, value): (Option<String>, Option<String>) = self
            .bounded(
                redis::cmd("HMGET")
                    .arg(&key)
                    .arg(FIELD_CREATED_AT)
                    .arg(field)
                    .query_async(&mut conn),
            )
            .await?;

        if created_at.is_none() {
            return Err(StoreError::NotFound);
        }
        value.as_deref().map(decode).transpose()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(raw: &[String]) -> Result<Vec<T>, StoreError> {
    raw.iter().map(|s| decode(s)).collect()
}

#[async_trait]
impl SignalingStore for RedisStore {
    async fn create_session(&self) -> Result<SessionId, StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = self.ttl.as_millis() as u64;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = SessionId::generate();
            let key = self.session_key(&id);
            let created: i32 = self
                .bounded(
                    CREATE_SESSION
                        .key(&key)
                        .arg(Utc::now().timestamp_millis())
                        .arg(ttl_ms)
                        .invoke_async(&mut conn),
                )
                .await?;

            if created == 1 {
                return Ok(id);
            }
            debug!("Session code {id} already taken, drawing another");
        }

        Err(StoreError::Unavailable(
            "could not allocate an unused session code".into(),
        ))
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.session_key(id);

        let (fields, list_a, list_b): (HashMap<String, String>, Vec<String>, Vec<String>) = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .hgetall(&key)
                    .lrange(self.candidates_key(id, Role::A), 0, -1)
                    .lrange(self.candidates_key(id, Role::B), 0, -1)
                    .query_async(&mut conn),
            )
            .await?;

        let created_ms: i64 = fields
            .get(FIELD_CREATED_AT)
            .ok_or(StoreError::NotFound)?
            .parse()
            .map_err(|e: std::num::ParseIntError| StoreError::Corrupt(e.to_string()))?;
        let created_at = Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| StoreError::Corrupt(format!("bad created_at {created_ms}")))?;

        let mut session = Session::new(id.clone(), created_at);
        session.offer = fields.get(FIELD_OFFER).map(|s| decode(s)).transpose()?;
        session.answer = fields.get(FIELD_ANSWER).map(|s| decode(s)).transpose()?;
        session.candidates_a = decode_all(&list_a)?;
        session.candidates_b = decode_all(&list_b)?;
        Ok(session)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let keys = [
            self.session_key(id),
            self.candidates_key(id, Role::A),
            self.candidates_key(id, Role::B),
        ];

        let removed: i64 = self.bounded(conn.del(&keys[..])).await?;
        if removed == 0 {
            return Err(StoreError::NotFound);
        }
        info!("Session {id} deleted");
        Ok(())
    }

    async fn set_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), StoreError> {
        self.set_field(id, FIELD_OFFER, encode(offer)?).await
    }

    async fn get_offer(&self, id: &SessionId) -> Result<Option<SessionDescription>, StoreError> {
        self.get_description(id, FIELD_OFFER).await
    }

    async fn set_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), StoreError> {
        self.set_field(id, FIELD_ANSWER, encode(answer)?).await
    }

    async fn get_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, StoreError> {
        self.get_description(id, FIELD_ANSWER).await
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pushed: i32 = self
            .bounded(
                PUSH_IF_EXISTS
                    .key(self.session_key(id))
                    .key(self.candidates_key(id, role))
                    .arg(encode(candidate)?)
                    .invoke_async(&mut conn),
            )
            .await?;

        if pushed == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn list_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, StoreError> {
        let mut conn = self.connection().await?;

        let (exists, raw): (bool, Vec<String>) = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .exists(self.session_key(id))
                    .lrange(self.candidates_key(id, role), 0, -1)
                    .query_async(&mut conn),
            )
            .await?;

        if !exists {
            return Err(StoreError::NotFound);
        }
        decode_all(&raw)
    }
}
