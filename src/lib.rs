//! Turnlink - a client adapter for half-duplex, turn-based bot conversations.
//!
//! A conversation alternates strictly: the caller opens a turn (the initial
//! start, or a posted user activity), consumes the bot's activities as a
//! lazy stream, and receives a single-use [`TurnHandle`](turn::TurnHandle)
//! once the bot is waiting for input. Turns travel over one of two wire
//! encodings, polling REST or Server-Sent Events, chosen per turn by a
//! [`ConnectionStrategy`](strategy::ConnectionStrategy).
//!
//! The [`Engine`](engine::Engine) is the protocol core; the
//! [`ChatAdapter`](adapter::ChatAdapter) pumps it for reactive consumers
//! that want an activity feed, a connection-status feed and a fire-and-await
//! `post_activity`.

// ============================================================================
// Protocol Core
// ============================================================================

pub mod activity;
pub mod engine;
pub mod error;
pub mod retry;
pub mod sse;
pub mod turn;

// ============================================================================
// Ports & Façade
// ============================================================================

pub mod adapter;
pub mod strategy;
pub mod telemetry;

pub use activity::Activity;
pub use adapter::{ActivityFeed, AdapterError, ChatAdapter, ConnectionStatus, StatusFeed};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use retry::RetryConfig;
pub use strategy::{
    BearerTokenStrategy, ConnectionStrategy, RequestPrep, StaticStrategy, StaticToken,
    TokenProvider, Transport,
};
pub use telemetry::TelemetryClient;
pub use turn::{TurnEvent, TurnHandle, TurnStream};
