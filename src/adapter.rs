//! Chat-adapter façade.
//!
//! Pumps the protocol engine on behalf of reactive consumers: an activity
//! feed, a connection-status feed and `post_activity`. Implemented as an
//! actor: commands travel over an `mpsc` channel with `oneshot` replies,
//! activities and statuses fan out over broadcast channels, and the latest
//! status is mirrored in a `watch` channel so new subscribers replay it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use ulid::Ulid;

use crate::activity::Activity;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::turn::{TurnEvent, TurnHandle, TurnStream};

/// Queued-but-unserved posts tolerated before `post_activity` applies
/// backpressure.
const COMMAND_CHANNEL_BUFFER: usize = 16;

/// Activities buffered per subscriber before a slow subscriber starts
/// skipping.
const ACTIVITY_CHANNEL_CAPACITY: usize = 256;

/// Status transitions buffered per subscriber. The full lifecycle is at
/// most four values.
const STATUS_CHANNEL_CAPACITY: usize = 8;

/// Connection lifecycle, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStatus {
    Uninitialized = 0,
    Connecting = 1,
    Online = 2,
    /// The credential the connection was opened with no longer works.
    ExpiredToken = 3,
    FailedToConnect = 4,
    Ended = 5,
}

/// Errors surfaced by [`ChatAdapter::post_activity`].
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The conversation failed. Every post after the first failure carries
    /// the same shared error.
    #[error("conversation failed: {0}")]
    Failed(Arc<EngineError>),

    /// The conversation was shut down cleanly.
    #[error("conversation ended")]
    Ended,
}

enum Command {
    Post {
        activity: Activity,
        reply: oneshot::Sender<std::result::Result<String, AdapterError>>,
    },
    End {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running conversation pump.
///
/// Cheap to clone; all clones observe the same conversation.
pub struct ChatAdapter {
    commands: mpsc::Sender<Command>,
    activities: broadcast::Receiver<Activity>,
    status_current: watch::Receiver<ConnectionStatus>,
    status_feed: broadcast::Receiver<ConnectionStatus>,
}

impl ChatAdapter {
    /// Start pumping a conversation obtained from `start`.
    ///
    /// `start` is the asynchronous "start conversation" callable; its stream
    /// is consumed turn by turn, each terminal [`TurnHandle`] feeding the
    /// next [`post_activity`](Self::post_activity).
    pub fn connect<F>(start: F) -> Self
    where
        F: Future<Output = Result<TurnStream>> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (activity_tx, activity_rx) = broadcast::channel(ACTIVITY_CHANNEL_CAPACITY);
        let (status_current_tx, status_current_rx) = watch::channel(ConnectionStatus::Uninitialized);
        let (status_feed_tx, status_feed_rx) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let channels = AdapterChannels {
            commands: command_rx,
            status_current: status_current_tx,
            status_feed: status_feed_tx,
            activities: activity_tx,
        };
        tokio::spawn(run(start, channels));

        Self {
            commands: command_tx,
            activities: activity_rx,
            status_current: status_current_rx,
            status_feed: status_feed_rx,
        }
    }

    /// Start pumping a fresh conversation on `engine`.
    pub fn connect_engine(engine: &Engine, emit_start_conversation_event: bool) -> Self {
        let engine = engine.clone();
        Self::connect(async move { Ok(engine.start_conversation(emit_start_conversation_event)) })
    }

    /// Every activity of every turn, in order, from subscription onward.
    ///
    /// Completes when the conversation fails or ends.
    #[must_use]
    pub fn activities(&self) -> ActivityFeed {
        ActivityFeed {
            inner: BroadcastStream::new(self.activities.resubscribe()),
        }
    }

    /// Connection lifecycle: the current status first, then each later
    /// transition. Completes after a terminal status.
    #[must_use]
    pub fn connection_status(&self) -> StatusFeed {
        let inner = BroadcastStream::new(self.status_feed.resubscribe());
        let current = *self.status_current.borrow();
        StatusFeed {
            replay: Some(current),
            last: None,
            inner,
        }
    }

    /// The most recently emitted connection status.
    #[must_use]
    pub fn current_status(&self) -> ConnectionStatus {
        *self.status_current.borrow()
    }

    /// Post a user activity.
    ///
    /// Posts queue; exactly one turn is in flight at a time, and the turn's
    /// activities are pumped to subscribers before the next queued post
    /// runs. Resolves with a synthetic activity id once the turn completes,
    /// or with the conversation's failure.
    pub async fn post_activity(
        &self,
        activity: Activity,
    ) -> std::result::Result<String, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Post {
                activity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AdapterError::Ended)?;
        reply_rx.await.map_err(|_| AdapterError::Ended)?
    }

    /// Shut the conversation down cleanly: emits [`ConnectionStatus::Ended`]
    /// and completes both feeds.
    pub async fn end(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::End { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

impl Clone for ChatAdapter {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            activities: self.activities.resubscribe(),
            status_current: self.status_current.clone(),
            status_feed: self.status_feed.resubscribe(),
        }
    }
}

impl std::fmt::Debug for ChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAdapter")
            .field("status", &self.current_status())
            .finish()
    }
}

/// Activity subscription. A subscriber that falls more than the channel
/// capacity behind skips the overwritten activities.
pub struct ActivityFeed {
    inner: BroadcastStream<Activity>,
}

impl Stream for ActivityFeed {
    type Item = Activity;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(activity))) => return Poll::Ready(Some(activity)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(skipped, "activity subscriber lagged, skipping");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Status subscription: replays the latest status, then yields each later
/// transition exactly once, in order.
pub struct StatusFeed {
    replay: Option<ConnectionStatus>,
    last: Option<ConnectionStatus>,
    inner: BroadcastStream<ConnectionStatus>,
}

impl Stream for StatusFeed {
    type Item = ConnectionStatus;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(status) = this.replay.take() {
            this.last = Some(status);
            return Poll::Ready(Some(status));
        }

        loop {
            match this.inner.poll_next_unpin(cx) {
                // Statuses are strictly monotonic; dropping anything at or
                // below the last seen value dedups the replayed head.
                Poll::Ready(Some(Ok(status))) => {
                    if this.last.is_none_or(|last| status > last) {
                        this.last = Some(status);
                        return Poll::Ready(Some(status));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

struct AdapterChannels {
    commands: mpsc::Receiver<Command>,
    status_current: watch::Sender<ConnectionStatus>,
    status_feed: broadcast::Sender<ConnectionStatus>,
    activities: broadcast::Sender<Activity>,
}

impl AdapterChannels {
    fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status_current.send(status);
        let _ = self.status_feed.send(status);
    }
}

async fn run<F>(start: F, mut channels: AdapterChannels)
where
    F: Future<Output = Result<TurnStream>>,
{
    channels.set_status(ConnectionStatus::Connecting);

    let initial = match start.await {
        Ok(stream) => stream,
        Err(error) => return fail(channels, Arc::new(error)).await,
    };
    channels.set_status(ConnectionStatus::Online);

    let mut handle: Option<TurnHandle> = None;
    if let Err(error) = pump_turn(initial, &channels.activities, &mut handle).await {
        return fail(channels, Arc::new(error)).await;
    }

    while let Some(command) = channels.commands.recv().await {
        match command {
            Command::Post { activity, reply } => {
                // A turn that completes without an error always ends by
                // storing the next handle, and a failed turn tears this loop
                // down, so a handle is present whenever a post is dequeued.
                let next = handle
                    .take()
                    .expect("completed turn did not leave a next-turn handle");

                let id = Ulid::new().to_string();
                match pump_turn(next.execute(activity), &channels.activities, &mut handle).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(id));
                    }
                    Err(error) => {
                        let error = Arc::new(error);
                        let _ = reply.send(Err(AdapterError::Failed(Arc::clone(&error))));
                        return fail(channels, error).await;
                    }
                }
            }
            Command::End { reply } => {
                channels.set_status(ConnectionStatus::Ended);
                let _ = reply.send(());
                return;
            }
        }
    }
}

/// Republish one turn, stashing its terminal handle.
async fn pump_turn(
    mut turn: TurnStream,
    activities: &broadcast::Sender<Activity>,
    slot: &mut Option<TurnHandle>,
) -> Result<()> {
    while let Some(event) = turn.next().await {
        match event? {
            TurnEvent::Activity(activity) => {
                let _ = activities.send(activity);
            }
            TurnEvent::Waiting(handle) => *slot = Some(handle),
        }
    }
    Ok(())
}

/// Terminal failure: emit the final status, complete both feeds and answer
/// every remaining post with the same shared error.
async fn fail(channels: AdapterChannels, error: Arc<EngineError>) {
    let AdapterChannels {
        mut commands,
        status_current,
        status_feed,
        activities,
    } = channels;

    let _ = status_current.send(ConnectionStatus::FailedToConnect);
    let _ = status_feed.send(ConnectionStatus::FailedToConnect);
    drop(status_feed);
    drop(activities);

    tracing::warn!(error = %error, "conversation failed, adapter is terminal");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Post { reply, .. } => {
                let _ = reply.send(Err(AdapterError::Failed(Arc::clone(&error))));
            }
            Command::End { reply } => {
                let _ = reply.send(());
                return;
            }
        }
    }
}
