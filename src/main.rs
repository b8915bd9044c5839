use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

use turnlink::{
    Activity, BearerTokenStrategy, Engine, RequestPrep, StaticStrategy, StaticToken, Transport,
    TurnEvent, TurnHandle, TurnStream,
};

/// Turnlink - chat with a turn-based bot service from the terminal
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bot service base URL; its query string and fragment are preserved on
    /// every request
    url: Url,

    /// Wire encoding to request from the service
    #[arg(long, value_enum, default_value = "rest")]
    transport: TransportArg,

    /// Bearer token presented on every request
    #[arg(long, env = "TURNLINK_TOKEN")]
    token: Option<String>,

    /// Ask the service to emit its conversation start event
    #[arg(long)]
    emit_start_event: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Rest,
    Sse,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Rest => Transport::Rest,
            TransportArg::Sse => Transport::ServerSentEvents,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let transport = Transport::from(cli.transport);

    let engine = match cli.token {
        Some(token) => Engine::new(Arc::new(BearerTokenStrategy::new(
            cli.url,
            transport,
            Arc::new(StaticToken(token)),
        ))),
        None => Engine::new(Arc::new(StaticStrategy::new(RequestPrep::new(
            cli.url, transport,
        )))),
    };

    let mut handle = drain_turn(engine.start_conversation(cli.emit_start_event)).await?;
    if let Some(id) = engine.conversation_id() {
        tracing::info!(conversation_id = id, "conversation started");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let Some(next) = handle.take() else {
            break;
        };
        handle = drain_turn(next.execute(Activity::message(text))).await?;
    }

    Ok(())
}

/// Print a turn's activities and return the handle for the next one.
async fn drain_turn(mut turn: TurnStream) -> Result<Option<TurnHandle>> {
    let mut handle = None;
    while let Some(event) = turn.next().await {
        match event? {
            TurnEvent::Activity(activity) => match activity.text() {
                Some(text) => println!("bot: {text}"),
                None => println!("bot: [{}]", activity.activity_type),
            },
            TurnEvent::Waiting(next) => handle = Some(next),
        }
    }
    Ok(handle)
}
