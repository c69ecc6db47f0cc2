use crate::models::ValidationIssue;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QuizError {
    #[error("option {option_key:?} is not valid for question {question_id:?}")]
    InvalidOption {
        question_id: String,
        option_key: String,
    },

    #[error("no answer selected for question {0:?}")]
    NoAnswerSelected(String),

    #[error("session already finished")]
    SessionFinished,

    #[error("quiz {0:?} has no questions")]
    EmptyQuiz(String),

    #[error("quiz {quiz_id:?} is invalid")]
    InvalidQuiz {
        quiz_id: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("quiz {0:?} not found")]
    QuizNotFound(String),

    #[error("completion event was not written: {0}")]
    EventWriteFailure(String),

    #[error("event log unavailable: {0}")]
    LogUnavailable(String),
}

impl QuizError {
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::InvalidOption { .. } => "INVALID_OPTION",
            QuizError::NoAnswerSelected(_) => "NO_ANSWER_SELECTED",
            QuizError::SessionFinished => "SESSION_FINISHED",
            QuizError::EmptyQuiz(_) => "EMPTY_QUIZ",
            QuizError::InvalidQuiz { .. } => "VALIDATION_ERROR",
            QuizError::QuizNotFound(_) => "NOT_FOUND",
            QuizError::EventWriteFailure(_) => "EVENT_WRITE_FAILED",
            QuizError::LogUnavailable(_) => "LOG_UNAVAILABLE",
        }
    }

    /// Boundary failures with an external system; the caller may retry them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuizError::EventWriteFailure(_) | QuizError::LogUnavailable(_)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ValidationIssue>,
}

impl From<&QuizError> for ErrorBody {
    fn from(err: &QuizError) -> Self {
        let details = match err {
            QuizError::InvalidQuiz { issues, .. } => issues.clone(),
            _ => Vec::new(),
        };
        ErrorBody {
            error: ErrorPayload {
                code: err.code(),
                message: err.to_string(),
                details,
            },
        }
    }
}
