//! Common test utilities: a scripted mock bot service.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::Uri;
use axum::response::Response;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

use turnlink::{
    Activity, EngineError, RequestPrep, StaticStrategy, Transport, TurnEvent, TurnStream,
};

/// One scripted reply. Replies are consumed in order; when the script runs
/// dry the fallback (if any) answers every further request.
#[derive(Clone)]
pub enum Reply {
    Json(Value),
    Status(u16),
    Raw {
        content_type: &'static str,
        body: String,
    },
    /// A 200 with a streamed body and no `Content-Length` header, the wire
    /// shape of a live streaming response.
    Chunked {
        content_type: &'static str,
        body: String,
    },
}

/// A request the mock bot saw, for wire-level assertions.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct BotState {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    requests: Vec<Recorded>,
}

/// Scripted bot service served on a random local port.
#[derive(Clone, Default)]
pub struct MockBot {
    state: Arc<Mutex<BotState>>,
}

impl MockBot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    pub fn set_fallback(&self, reply: Reply) {
        self.state.lock().unwrap().fallback = Some(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Bind and serve; returns the service base URL.
    pub async fn serve(&self) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Catch every path; the tests assert the recorded paths themselves.
        let app = Router::new().fallback(handle).with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{addr}/")).unwrap()
    }
}

async fn handle(
    State(bot): State<MockBot>,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    let reply = {
        let mut state = bot.state.lock().unwrap();
        state.requests.push(Recorded {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });
        state.replies.pop_front().or_else(|| state.fallback.clone())
    };

    match reply {
        Some(Reply::Json(value)) => {
            respond(200, Some("application/json"), Body::from(value.to_string()))
        }
        Some(Reply::Status(code)) => respond(code, None, Body::empty()),
        Some(Reply::Raw { content_type, body }) => {
            respond(200, Some(content_type), Body::from(body))
        }
        Some(Reply::Chunked { content_type, body }) => {
            respond(200, Some(content_type), Body::from_stream(chunks(body)))
        }
        None => respond(500, None, Body::from("unscripted request")),
    }
}

fn respond(status: u16, content_type: Option<&str>, body: Body) -> Response {
    let mut builder = axum::http::Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(body).unwrap()
}

/// A body stream with no size hint, so the response goes out chunked.
fn chunks(body: String) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    let parts: Vec<Result<Bytes, std::io::Error>> = if body.is_empty() {
        Vec::new()
    } else {
        vec![Ok(Bytes::from(body))]
    };
    futures::stream::iter(parts)
}

/// A fixed strategy with recognizable fixtures: `x-dummy: dummy` header,
/// `{"dummy": "dummy"}` body.
pub fn dummy_strategy(base: &Url, transport: Transport) -> Arc<StaticStrategy> {
    let mut headers = HeaderMap::new();
    headers.insert("x-dummy", HeaderValue::from_static("dummy"));

    let mut body = Map::new();
    body.insert("dummy".to_string(), Value::String("dummy".to_string()));

    Arc::new(StaticStrategy::new(
        RequestPrep::new(base.clone(), transport)
            .with_body(body)
            .with_headers(headers),
    ))
}

/// Render `event:`/`data:` pairs as an event-stream body.
pub fn sse_body(events: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (event, data) in events {
        body.push_str(&format!("event: {event}\ndata: {data}\n\n"));
    }
    body
}

/// Drain a turn expected to succeed: its activities and the next-turn handle.
pub async fn drain_ok(mut turn: TurnStream) -> (Vec<Activity>, turnlink::TurnHandle) {
    let mut activities = Vec::new();
    let mut handle = None;
    while let Some(event) = turn.next().await {
        match event.expect("turn failed") {
            TurnEvent::Activity(activity) => activities.push(activity),
            TurnEvent::Waiting(next) => handle = Some(next),
        }
    }
    (activities, handle.expect("turn ended without a handle"))
}

/// Drain a turn expected to fail: the activities seen before the error, and
/// the error.
pub async fn drain_err(mut turn: TurnStream) -> (Vec<Activity>, EngineError) {
    let mut activities = Vec::new();
    while let Some(event) = turn.next().await {
        match event {
            Ok(TurnEvent::Activity(activity)) => activities.push(activity),
            Ok(TurnEvent::Waiting(_)) => panic!("turn unexpectedly produced a handle"),
            Err(error) => return (activities, error),
        }
    }
    panic!("turn ended without failing");
}

/// The `text` of each activity, in order.
pub fn texts(activities: &[Activity]) -> Vec<&str> {
    activities.iter().filter_map(Activity::text).collect()
}
