//! Half-duplex protocol engine.
//!
//! Owns the conversation identity and drives one turn at a time: consult the
//! strategy, issue the turn's requests over the transport it picked, and
//! surface the bot's activities as a lazy stream terminated by the handle
//! for the next turn.

mod rest;
mod stream;

use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use futures::Stream;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::activity::Activity;
use crate::error::{EngineError, Result};
use crate::retry::RetryConfig;
use crate::strategy::{ConnectionStrategy, Transport};
use crate::telemetry::TelemetryClient;
use crate::turn::TurnStream;

/// Header naming the conversation on every request after the id is known.
pub(crate) const CONVERSATION_ID_HEADER: &str = "x-ms-conversationid";

/// Buffer between a turn's producer task and its consumer.
///
/// Bounded so the producer suspends instead of running arbitrarily far ahead
/// of the consumer's pulls.
const TURN_CHANNEL_BUFFER: usize = 32;

/// The raw per-turn activity sequence, before the next-turn handle is
/// attached by [`TurnStream`].
pub(crate) type ActivityStream = Pin<Box<dyn Stream<Item = Result<Activity>> + Send>>;

pub(crate) struct Shared {
    pub(crate) http: reqwest::Client,
    pub(crate) strategy: Arc<dyn ConnectionStrategy>,
    pub(crate) retry: RetryConfig,
    pub(crate) telemetry: Option<Arc<dyn TelemetryClient>>,
    conversation_id: OnceLock<String>,
}

impl Shared {
    pub(crate) fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.get().map(String::as_str)
    }

    /// Learn the conversation id. A no-op once an id is set: the identity of
    /// an engine never changes.
    pub(crate) fn adopt_conversation_id(&self, id: String) {
        let _ = self.conversation_id.set(id);
    }

    /// A JSON POST carrying the strategy headers and, once known, the
    /// conversation id header.
    pub(crate) fn post(
        &self,
        url: Url,
        headers: &HeaderMap,
        payload: &Value,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.post(url).headers(headers.clone()).json(payload);
        if let Some(id) = self.conversation_id() {
            request = request.header(CONVERSATION_ID_HEADER, id);
        }
        request
    }
}

/// Derive the request URL for a turn.
///
/// The path is `conversations/{id}` (bare `conversations/` while no id is
/// known) resolved against the strategy's base URL; the base URL's query
/// string and fragment are then re-applied verbatim, overwriting whatever
/// the resolution produced.
pub(crate) fn turn_url(base: &Url, conversation_id: Option<&str>) -> Result<Url> {
    let path = match conversation_id {
        Some(id) => format!("conversations/{id}"),
        None => "conversations/".to_string(),
    };
    let mut url = base.join(&path)?;
    url.set_query(base.query());
    url.set_fragment(base.fragment());
    Ok(url)
}

enum TurnKind {
    Start { emit_start_conversation_event: bool },
    Execute { activity: Activity },
}

/// Protocol engine for one conversation.
///
/// Cheap to clone; clones share the conversation identity. An engine does
/// not police overlapping turns; the turn handles and the chat adapter
/// guarantee sequential use.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// An engine over the given strategy with default HTTP client and retry
    /// tuning and no telemetry.
    #[must_use]
    pub fn new(strategy: Arc<dyn ConnectionStrategy>) -> Self {
        Self::builder(strategy).build()
    }

    #[must_use]
    pub fn builder(strategy: Arc<dyn ConnectionStrategy>) -> EngineBuilder {
        EngineBuilder {
            strategy,
            http: None,
            retry: RetryConfig::default(),
            telemetry: None,
        }
    }

    /// The conversation id, once the server has assigned one.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.shared.conversation_id()
    }

    /// Open a new conversation.
    ///
    /// Consults the strategy's start preparation, merges
    /// `emitStartConversationEvent` into the request body and dispatches on
    /// the transport the strategy chose. The returned stream yields the
    /// bot's activities and, after the bot starts waiting for input, the
    /// handle for the first user turn.
    pub fn start_conversation(&self, emit_start_conversation_event: bool) -> TurnStream {
        self.open_turn(TurnKind::Start {
            emit_start_conversation_event,
        })
    }

    /// Post a user activity, opening the next turn.
    ///
    /// Fails on the first pull when no conversation has been started. This
    /// is the low-level entry point; the blessed path is the
    /// [`TurnHandle`](crate::turn::TurnHandle) yielded by the previous turn.
    pub fn execute_turn(&self, activity: Activity) -> TurnStream {
        self.open_turn(TurnKind::Execute { activity })
    }

    fn open_turn(&self, kind: TurnKind) -> TurnStream {
        let shared = Arc::clone(&self.shared);
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_BUFFER);

        tokio::spawn(async move {
            if let Err(error) = drive_turn(&shared, kind, &tx).await {
                let _ = tx.send(Err(error)).await;
            }
        });

        TurnStream::new(Box::pin(ReceiverStream::new(rx)), self.clone())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("conversation_id", &self.conversation_id())
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    strategy: Arc<dyn ConnectionStrategy>,
    http: Option<reqwest::Client>,
    retry: RetryConfig,
    telemetry: Option<Arc<dyn TelemetryClient>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryClient>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        Engine {
            shared: Arc::new(Shared {
                http: self.http.unwrap_or_default(),
                strategy: self.strategy,
                retry: self.retry,
                telemetry: self.telemetry,
                conversation_id: OnceLock::new(),
            }),
        }
    }
}

async fn drive_turn(
    shared: &Shared,
    kind: TurnKind,
    tx: &mpsc::Sender<Result<Activity>>,
) -> Result<()> {
    let (prep, body) = match kind {
        TurnKind::Start {
            emit_start_conversation_event,
        } => {
            let prep = shared.strategy.prepare_start_conversation().await?;
            let mut body = prep.body.clone().unwrap_or_default();
            body.insert(
                "emitStartConversationEvent".to_string(),
                Value::Bool(emit_start_conversation_event),
            );
            (prep, body)
        }
        TurnKind::Execute { activity } => {
            if shared.conversation_id().is_none() {
                return Err(EngineError::ConversationNotStarted);
            }
            let prep = shared.strategy.prepare_execute_turn().await?;
            let mut body = prep.body.clone().unwrap_or_default();
            body.insert("activity".to_string(), serde_json::to_value(activity)?);
            (prep, body)
        }
    };

    match prep.transport {
        Transport::Rest => rest::run_turn(shared, &prep, body, tx).await,
        Transport::ServerSentEvents => stream::run_turn(shared, &prep, body, tx).await,
    }
}
