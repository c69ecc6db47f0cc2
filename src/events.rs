use crate::models::Answers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const QUIZ_COMPLETED: &str = "quiz_completed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionPayload {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "quizId")]
    pub quiz_id: String,
    #[serde(default)]
    pub answers: Answers,
    pub score: f64,
}

/// Immutable record of one finished attempt, as stored in the event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionEvent {
    pub id: Uuid,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub payload: CompletionPayload,
}

impl CompletionEvent {
    pub fn quiz_completed(payload: CompletionPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: QUIZ_COMPLETED.to_string(),
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn is_quiz_completed(&self) -> bool {
        self.event_type == QUIZ_COMPLETED
    }
}
