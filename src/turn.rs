//! Turn streams and the single-use next-turn handle.
//!
//! Every engine turn is surfaced as a [`TurnStream`]: the bot's activities
//! in order, then a single [`TurnHandle`] as the terminal element once the
//! bot is waiting for user input. The handle is the capability to
//! post the next user turn; `execute` consumes it, so each handle advances
//! the protocol at most once and at most one live handle exists at a time.
//! A turn that fails forfeits its handle.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::activity::Activity;
use crate::engine::{ActivityStream, Engine};
use crate::error::EngineError;

/// One pull from a turn.
pub enum TurnEvent {
    /// A bot-produced activity.
    Activity(Activity),
    /// The bot is waiting for user input; here is the next-turn capability.
    Waiting(TurnHandle),
}

impl std::fmt::Debug for TurnEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnEvent::Activity(activity) => f.debug_tuple("Activity").field(activity).finish(),
            TurnEvent::Waiting(_) => f.debug_tuple("Waiting").finish(),
        }
    }
}

/// Single-use capability to post the next user turn.
pub struct TurnHandle {
    engine: Engine,
}

impl TurnHandle {
    /// Post `activity`, opening the next turn.
    ///
    /// Consumes the handle: the returned stream ends with the handle for the
    /// turn after this one.
    pub fn execute(self, activity: Activity) -> TurnStream {
        self.engine.execute_turn(activity)
    }
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("conversation_id", &self.engine.conversation_id())
            .finish()
    }
}

/// A lazy turn: activities in server order, then the next-turn handle.
pub struct TurnStream {
    inner: ActivityStream,
    /// Present until the handle is emitted or the turn fails.
    engine: Option<Engine>,
}

impl TurnStream {
    pub(crate) fn new(inner: ActivityStream, engine: Engine) -> Self {
        Self {
            inner,
            engine: Some(engine),
        }
    }
}

impl Stream for TurnStream {
    type Item = Result<TurnEvent, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(activity))) => {
                Poll::Ready(Some(Ok(TurnEvent::Activity(activity))))
            }
            Poll::Ready(Some(Err(error))) => {
                // A failed turn yields no handle.
                this.engine = None;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => match this.engine.take() {
                Some(engine) => Poll::Ready(Some(Ok(TurnEvent::Waiting(TurnHandle { engine })))),
                None => Poll::Ready(None),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("exhausted", &self.engine.is_none())
            .finish()
    }
}
