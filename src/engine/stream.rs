//! Server-Sent Events turn reader.
//!
//! A turn over the streaming transport is a single POST answered with a
//! `text/event-stream` body: `activity` events carry JSON activities, `end`
//! closes the turn. Only the opening request is retried; once the response
//! headers are accepted, a failure mid-body fails the turn outright.

use futures::StreamExt;
use reqwest::header;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::activity::Activity;
use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::sse::SseEventStream;
use crate::strategy::RequestPrep;

use super::{Shared, turn_url};

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

const ACTIVITY_EVENT: &str = "activity";
const END_EVENT: &str = "end";

/// Whether a `content-type` header denotes an event stream, with or without
/// parameters.
fn is_event_stream(content_type: &str) -> bool {
    content_type == EVENT_STREAM_CONTENT_TYPE
        || content_type.starts_with("text/event-stream;")
}

pub(super) async fn run_turn(
    shared: &Shared,
    prep: &RequestPrep,
    body: Map<String, Value>,
    tx: &mpsc::Sender<Result<Activity>>,
) -> Result<()> {
    let url = turn_url(&prep.base_url, shared.conversation_id())?;
    let payload = Value::Object(body);

    let response = with_retries(&shared.retry, shared.telemetry.as_deref(), || {
        let request = shared
            .post(url.clone(), &prep.headers, &payload)
            .header(header::ACCEPT, EVENT_STREAM_CONTENT_TYPE);
        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(EngineError::Status {
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            if !is_event_stream(content_type) {
                return Err(EngineError::ContentType {
                    expected: EVENT_STREAM_CONTENT_TYPE,
                    actual: content_type.to_string(),
                });
            }

            Ok(response)
        }
    })
    .await?;

    let mut events = SseEventStream::new(response.bytes_stream());
    while let Some(event) = events.next().await {
        let event = event.map_err(EngineError::Http)?;
        match event.event.as_deref() {
            Some(ACTIVITY_EVENT) => {
                let activity: Activity = serde_json::from_str(&event.data)?;
                if shared.conversation_id().is_none()
                    && let Some(id) = activity.conversation_id()
                {
                    shared.adopt_conversation_id(id.to_string());
                }
                if tx.send(Ok(activity)).await.is_err() {
                    return Ok(());
                }
            }
            Some(END_EVENT) => return Ok(()),
            _ => {}
        }
    }

    // A 2xx whose body closed without delivering a single byte is a missing
    // body, whether or not a content-length was declared.
    if !events.saw_bytes() {
        return Err(EngineError::EmptyBody);
    }

    // The server closed the stream without an `end` event; the turn still
    // ends cleanly.
    tracing::debug!("event stream ended without a terminal event");
    Ok(())
}
