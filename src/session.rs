use crate::error::QuizError;
use crate::events::CompletionPayload;
use crate::models::{count_correct, score_percent, validate_quiz, Answers, Question, Quiz};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Scoring,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next { index: usize },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running { remaining_secs: u32 },
    Expired,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub score: f64,
    pub correct: usize,
    pub total: usize,
    pub answers: Answers,
}

#[derive(Debug)]
pub struct Session {
    quiz: Arc<Quiz>,
    user_id: String,
    current: usize,
    answers: Answers,
    remaining_secs: u32,
    state: SessionState,
    result: Option<SessionResult>,
}

impl Session {
    pub fn start(quiz: Arc<Quiz>, user_id: impl Into<String>) -> Result<Self, QuizError> {
        if quiz.questions.is_empty() {
            return Err(QuizError::EmptyQuiz(quiz.id.clone()));
        }
        validate_quiz(&quiz).map_err(|issues| QuizError::InvalidQuiz {
            quiz_id: quiz.id.clone(),
            issues,
        })?;
        Ok(Self {
            remaining_secs: quiz.time_limit_secs,
            quiz,
            user_id: user_id.into(),
            current: 0,
            answers: Answers::new(),
            state: SessionState::Active,
            result: None,
        })
    }

    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> &Question {
        &self.quiz.questions[self.current]
    }

    pub fn is_last_question(&self) -> bool {
        self.current + 1 == self.quiz.questions.len()
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }

    fn ensure_active(&self) -> Result<(), QuizError> {
        match self.state {
            SessionState::Active => Ok(()),
            _ => Err(QuizError::SessionFinished),
        }
    }

    pub fn select_answer(&mut self, question_id: &str, option_key: &str) -> Result<(), QuizError> {
        self.ensure_active()?;
        let question = self.current_question();
        if question.id != question_id || !question.has_option(option_key) {
            return Err(QuizError::InvalidOption {
                question_id: question_id.to_string(),
                option_key: option_key.to_string(),
            });
        }
        self.answers
            .insert(question_id.to_string(), option_key.to_string());
        Ok(())
    }

    pub fn advance(&mut self) -> Result<Advance, QuizError> {
        self.ensure_active()?;
        let question_id = &self.current_question().id;
        if !self.answers.contains_key(question_id) {
            return Err(QuizError::NoAnswerSelected(question_id.clone()));
        }
        if self.is_last_question() {
            self.state = SessionState::Scoring;
            Ok(Advance::Finished)
        } else {
            self.current += 1;
            Ok(Advance::Next {
                index: self.current,
            })
        }
    }

    pub fn tick(&mut self) -> Tick {
        if self.state != SessionState::Active {
            return Tick::Idle;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.state = SessionState::Scoring;
            Tick::Expired
        } else {
            Tick::Running {
                remaining_secs: self.remaining_secs,
            }
        }
    }

    /// Returns the event payload only on the call that moves `Scoring` to
    /// `Completed`.
    pub fn complete(&mut self) -> Option<CompletionPayload> {
        if self.state != SessionState::Scoring {
            return None;
        }
        let total = self.quiz.questions.len();
        let correct = count_correct(&self.quiz, &self.answers);
        let score = score_percent(correct, total);
        self.result = Some(SessionResult {
            score,
            correct,
            total,
            answers: self.answers.clone(),
        });
        self.state = SessionState::Completed;
        Some(CompletionPayload {
            user_id: self.user_id.clone(),
            quiz_id: self.quiz.id.clone(),
            answers: self.answers.clone(),
            score,
        })
    }
}
