use serde::{Deserialize, Serialize};

use quarry_runtime::{AgentOutcome, HistoryMessage, ProgressKind, ProgressUpdate, QueryRequest, TerminationReason};

/// Fallback user id when the client does not send one
pub const ANONYMOUS_USER: &str = "anonymous";

/// Ask request
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
}

impl AskRequest {
    pub fn user(&self) -> &str {
        self.user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(ANONYMOUS_USER)
    }

    pub fn into_query(self) -> QueryRequest {
        QueryRequest {
            query: self.query,
            thread_id: self.thread_id,
            history: self.history,
        }
    }
}

/// Ask / continue response
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub termination: TerminationReason,
    pub hit_turn_limit: bool,
    pub turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
}

impl AskResponse {
    pub fn new(outcome: &AgentOutcome, continuation_id: Option<String>) -> Self {
        Self {
            answer: outcome.answer.clone(),
            termination: outcome.termination,
            hit_turn_limit: outcome.hit_turn_limit,
            turns: outcome.turns,
            continuation_id,
        }
    }
}

/// WebSocket client message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ask(AskRequest),
    Continue { continuation_id: String },
}

/// WebSocket server event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Progress {
        kind: ProgressKind,
        text: String,
        is_final: bool,
        hit_turn_limit: bool,
    },
    Done {
        termination: TerminationReason,
        turns: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        continuation_id: Option<String>,
    },
    Error {
        message: String,
    },
}

impl From<ProgressUpdate> for ServerEvent {
    fn from(update: ProgressUpdate) -> Self {
        ServerEvent::Progress {
            kind: update.kind,
            text: update.text,
            is_final: update.is_final,
            hit_turn_limit: update.hit_turn_limit,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// The index could not be opened; searches return nothing
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ask_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"ask","query":"hi","user_id":"u1","history":[{"text":"a","is_bot":true}]}"#)
                .unwrap();
        let ClientMessage::Ask(req) = msg else {
            panic!("expected ask");
        };
        assert_eq!(req.user(), "u1");
        assert_eq!(req.history.len(), 1);
        assert!(req.thread_id.is_none());
    }

    #[test]
    fn test_missing_user_is_anonymous() {
        let req: AskRequest = serde_json::from_str(r#"{"query":"hi","user_id":""}"#).unwrap();
        assert_eq!(req.user(), ANONYMOUS_USER);
    }

    #[test]
    fn test_progress_event_shape() {
        let event = ServerEvent::from(ProgressUpdate::response("answer", true, false));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["kind"], "response");
        assert_eq!(json["is_final"], true);

        let done = ServerEvent::Done {
            termination: TerminationReason::TurnLimit,
            turns: 5,
            continuation_id: None,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["termination"], "turn_limit");
        assert!(json.get("continuation_id").is_none());
    }
}
