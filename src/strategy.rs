//! Connection strategy port.
//!
//! A strategy supplies the endpoint, static body fields and headers for each
//! turn. The engine consults it exactly once per turn, at the moment the turn
//! begins, so a strategy backed by short-lived credentials can refresh them
//! between turns.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{EngineError, Result};

/// Wire encoding used to carry a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Polling REST: one or more POST/JSON exchanges per turn.
    Rest,
    /// One streaming POST per turn, answered with `text/event-stream`.
    ServerSentEvents,
}

/// Everything the engine needs to issue the requests of one turn.
///
/// The query string and fragment of `base_url` are preserved verbatim on
/// every URL derived from it during the turn.
#[derive(Debug, Clone)]
pub struct RequestPrep {
    pub base_url: Url,
    pub body: Option<Map<String, Value>>,
    pub headers: HeaderMap,
    pub transport: Transport,
}

impl RequestPrep {
    #[must_use]
    pub fn new(base_url: Url, transport: Transport) -> Self {
        Self {
            base_url,
            body: None,
            headers: HeaderMap::new(),
            transport,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Supplies request preparation per direction, once per turn.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    /// Preparation for opening a brand new conversation.
    async fn prepare_start_conversation(&self) -> Result<RequestPrep>;

    /// Preparation for posting a user turn into an existing conversation.
    async fn prepare_execute_turn(&self) -> Result<RequestPrep>;
}

/// Asynchronous token source, opaque to the engine.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A token that never changes.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Strategy that answers every prepare call with the same fixed preparation.
pub struct StaticStrategy {
    prep: RequestPrep,
}

impl StaticStrategy {
    #[must_use]
    pub fn new(prep: RequestPrep) -> Self {
        Self { prep }
    }
}

#[async_trait]
impl ConnectionStrategy for StaticStrategy {
    async fn prepare_start_conversation(&self) -> Result<RequestPrep> {
        Ok(self.prep.clone())
    }

    async fn prepare_execute_turn(&self) -> Result<RequestPrep> {
        Ok(self.prep.clone())
    }
}

/// Strategy that fetches a bearer token from a [`TokenProvider`] on every
/// prepare call and presents it as an `authorization` header.
pub struct BearerTokenStrategy {
    base_url: Url,
    transport: Transport,
    tokens: Arc<dyn TokenProvider>,
}

impl BearerTokenStrategy {
    #[must_use]
    pub fn new(base_url: Url, transport: Transport, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            base_url,
            transport,
            tokens,
        }
    }

    async fn prepare(&self) -> Result<RequestPrep> {
        let token = self.tokens.token().await?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| EngineError::Token("token is not a valid header value".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value);

        Ok(RequestPrep::new(self.base_url.clone(), self.transport).with_headers(headers))
    }
}

#[async_trait]
impl ConnectionStrategy for BearerTokenStrategy {
    async fn prepare_start_conversation(&self) -> Result<RequestPrep> {
        self.prepare().await
    }

    async fn prepare_execute_turn(&self) -> Result<RequestPrep> {
        self.prepare().await
    }
}
