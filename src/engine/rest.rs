//! REST turn loop.
//!
//! A turn over the polling transport is one or more POST/JSON exchanges:
//! the first carries the strategy body, every continuation hop carries `{}`,
//! and the loop runs while the server answers `action: "continue"`.

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::activity::Activity;
use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::strategy::RequestPrep;

use super::{Shared, turn_url};

/// Ceiling on continuation hops within one turn. Reaching it closes the
/// turn without an error.
const MAX_TURN_HOPS: usize = 1_000;

/// One REST reply from the bot service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotResponse {
    action: TurnAction,
    activities: Vec<Activity>,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TurnAction {
    /// The bot has more to say; POST again to advance the turn.
    Continue,
    /// The bot is waiting for user input; the turn is over.
    Waiting,
}

pub(super) async fn run_turn(
    shared: &Shared,
    prep: &RequestPrep,
    body: Map<String, Value>,
    tx: &mpsc::Sender<Result<Activity>>,
) -> Result<()> {
    let mut with_body = true;

    for _ in 0..MAX_TURN_HOPS {
        let url = turn_url(&prep.base_url, shared.conversation_id())?;
        let payload = if with_body {
            Value::Object(body.clone())
        } else {
            Value::Object(Map::new())
        };

        let text = with_retries(&shared.retry, shared.telemetry.as_deref(), || {
            let request = shared.post(url.clone(), &prep.headers, &payload);
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EngineError::Status {
                        status: status.as_u16(),
                    });
                }
                Ok(response.text().await?)
            }
        })
        .await?;

        let response: BotResponse = serde_json::from_str(&text)?;
        if let Some(id) = response.conversation_id {
            shared.adopt_conversation_id(id);
        }

        for activity in response.activities {
            if tx.send(Ok(activity)).await.is_err() {
                // Consumer dropped the turn; stop issuing requests.
                return Ok(());
            }
        }

        with_body = false;
        if response.action == TurnAction::Waiting {
            return Ok(());
        }
    }

    tracing::warn!(
        limit = MAX_TURN_HOPS,
        "turn exceeded the continuation hop ceiling, closing the turn"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_hop_response() {
        let json = r#"{
            "action": "continue",
            "activities": [{"type": "message", "text": "Hello, World!"}],
            "conversationId": "c-00001"
        }"#;

        let response: BotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.action, TurnAction::Continue);
        assert_eq!(response.activities.len(), 1);
        assert_eq!(response.conversation_id.as_deref(), Some("c-00001"));
    }

    #[test]
    fn conversation_id_is_optional_on_later_hops() {
        let json = r#"{"action": "waiting", "activities": []}"#;
        let response: BotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.action, TurnAction::Waiting);
        assert!(response.conversation_id.is_none());
    }

    #[test]
    fn unknown_action_is_rejected() {
        let json = r#"{"action": "dance", "activities": []}"#;
        assert!(serde_json::from_str::<BotResponse>(json).is_err());
    }

    #[test]
    fn missing_activities_is_rejected() {
        let json = r#"{"action": "waiting"}"#;
        assert!(serde_json::from_str::<BotResponse>(json).is_err());
    }

    #[test]
    fn extra_top_level_fields_are_tolerated() {
        let json = r#"{"action": "waiting", "activities": [], "watermark": 7}"#;
        assert!(serde_json::from_str::<BotResponse>(json).is_ok());
    }
}
