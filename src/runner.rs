use crate::error::QuizError;
use crate::events::CompletionEvent;
use crate::models::{Answers, Question, Quiz};
use crate::session::{Advance, Session, SessionResult, SessionState, Tick};
use crate::state::{AppState, EventLog};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionStatus {
    Written,
    Failed(QuizError),
}

/// The score stands even when the event did not reach the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub result: SessionResult,
    pub event_id: Uuid,
    pub status: SubmissionStatus,
}

impl Completion {
    pub fn score(&self) -> f64 {
        self.result.score
    }

    pub fn is_written(&self) -> bool {
        self.status == SubmissionStatus::Written
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Next { index: usize },
    Completed(Completion),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub quiz_id: String,
    pub title: String,
    pub state: SessionState,
    pub current_index: usize,
    pub total_questions: usize,
    pub question: Question,
    pub selected: Option<String>,
    pub remaining_secs: u32,
    pub answers: Answers,
}

enum Submission {
    Pending,
    Written(CompletionEvent),
    Failed {
        event: CompletionEvent,
        error: QuizError,
    },
}

struct Attempt {
    session: Session,
    submission: Submission,
}

impl Attempt {
    fn completion(&self) -> Option<Completion> {
        let result = self.session.result()?.clone();
        let (event_id, status) = match &self.submission {
            Submission::Pending => return None,
            Submission::Written(event) => (event.id, SubmissionStatus::Written),
            Submission::Failed { event, error } => {
                (event.id, SubmissionStatus::Failed(error.clone()))
            }
        };
        Some(Completion {
            result,
            event_id,
            status,
        })
    }
}

struct Shared {
    attempt: Mutex<Attempt>,
    event_log: Arc<dyn EventLog>,
    cancel: CancellationToken,
    done: watch::Sender<Option<Completion>>,
}

impl Shared {
    async fn submit(&self, event: CompletionEvent) -> Submission {
        match self.event_log.append_event(event.clone()).await {
            Ok(()) => {
                info!(
                    event_id = %event.id,
                    user_id = %event.payload.user_id,
                    quiz_id = %event.payload.quiz_id,
                    score = event.payload.score,
                    "completion event written"
                );
                Submission::Written(event)
            }
            Err(error) => {
                warn!(event_id = %event.id, "completion event not written: {}", error);
                Submission::Failed { event, error }
            }
        }
    }

    async fn finish(&self, attempt: &mut Attempt) -> Option<Completion> {
        if let Some(payload) = attempt.session.complete() {
            self.cancel.cancel();
            let event = CompletionEvent::quiz_completed(payload);
            attempt.submission = self.submit(event).await;
            let completion = attempt.completion();
            self.done.send_replace(completion.clone());
            return completion;
        }
        attempt.completion()
    }
}

pub struct SessionEngine {
    state: AppState,
}

impl SessionEngine {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn start(&self, quiz_id: &str, user_id: &str) -> Result<SessionHandle, QuizError> {
        let quiz = self.state.catalog.get_quiz(quiz_id).await?;
        self.start_with_quiz(quiz, user_id)
    }

    /// Must be called within a tokio runtime.
    pub fn start_with_quiz(&self, quiz: Quiz, user_id: &str) -> Result<SessionHandle, QuizError> {
        let session = Session::start(Arc::new(quiz), user_id)?;
        info!(
            quiz_id = %session.quiz().id,
            user_id = %user_id,
            time_limit_secs = session.remaining_secs(),
            "session started"
        );
        let (done, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            attempt: Mutex::new(Attempt {
                session,
                submission: Submission::Pending,
            }),
            event_log: self.state.event_log.clone(),
            cancel: CancellationToken::new(),
            done,
        });
        tokio::spawn(run_ticker(shared.clone(), self.state.tick_interval));
        Ok(SessionHandle { shared })
    }
}

async fn run_ticker(shared: Arc<Shared>, period: Duration) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                debug!("tick task stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let mut attempt = shared.attempt.lock().await;
        // Abandoned while waiting for the lock.
        if shared.cancel.is_cancelled() {
            return;
        }
        match attempt.session.tick() {
            Tick::Running { remaining_secs } => debug!(remaining_secs, "tick"),
            Tick::Expired => {
                info!(quiz_id = %attempt.session.quiz().id, "time is up, submitting");
                shared.finish(&mut attempt).await;
                return;
            }
            Tick::Idle => return,
        }
    }
}

/// Owner-side handle to one attempt. Dropping it stops the timer.
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub async fn select_answer(&self, question_id: &str, option_key: &str) -> Result<(), QuizError> {
        let mut attempt = self.shared.attempt.lock().await;
        attempt.session.select_answer(question_id, option_key)
    }

    pub async fn advance(&self) -> Result<AdvanceOutcome, QuizError> {
        let mut attempt = self.shared.attempt.lock().await;
        match attempt.session.advance()? {
            Advance::Next { index } => Ok(AdvanceOutcome::Next { index }),
            Advance::Finished => {
                let completion = self
                    .shared
                    .finish(&mut attempt)
                    .await
                    .ok_or(QuizError::SessionFinished)?;
                Ok(AdvanceOutcome::Completed(completion))
            }
        }
    }

    pub async fn view(&self) -> SessionView {
        let attempt = self.shared.attempt.lock().await;
        let session = &attempt.session;
        let question = session.current_question().clone();
        SessionView {
            quiz_id: session.quiz().id.clone(),
            title: session.quiz().title.clone(),
            state: session.state(),
            current_index: session.current_index(),
            total_questions: session.quiz().questions.len(),
            selected: session.answer_for(&question.id).map(str::to_string),
            question,
            remaining_secs: session.remaining_secs(),
            answers: session.answers().clone(),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.attempt.lock().await.session.state()
    }

    pub async fn completion(&self) -> Option<Completion> {
        self.shared.attempt.lock().await.completion()
    }

    pub async fn finished(&self) -> Option<Completion> {
        let mut rx = self.shared.done.subscribe();
        let completion = rx.wait_for(Option::is_some).await.ok()?;
        (*completion).clone()
    }

    /// Re-sends the same event (same id and timestamp) after a failed write.
    pub async fn retry_submit(&self) -> Option<Completion> {
        let mut attempt = self.shared.attempt.lock().await;
        let event = match &attempt.submission {
            Submission::Failed { event, .. } => event.clone(),
            _ => return attempt.completion(),
        };
        attempt.submission = self.shared.submit(event).await;
        let completion = attempt.completion();
        self.shared.done.send_replace(completion.clone());
        completion
    }

    pub fn abandon(self) {
        debug!("session abandoned");
    }

    pub fn is_timer_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::quiz;
    use crate::state::{InMemoryCatalog, InMemoryEventLog};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyLog {
        fail: AtomicBool,
        inner: InMemoryEventLog,
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn list_events(&self) -> Result<Vec<CompletionEvent>, QuizError> {
            self.inner.list_events().await
        }

        async fn append_event(&self, event: CompletionEvent) -> Result<(), QuizError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(QuizError::EventWriteFailure("connection refused".into()));
            }
            self.inner.append_event(event).await
        }
    }

    fn engine_with(log: Arc<dyn EventLog>) -> SessionEngine {
        let catalog = InMemoryCatalog::new();
        catalog.insert(quiz(2, 60)).unwrap();
        SessionEngine::new(AppState::new(log, Arc::new(catalog)))
    }

    #[tokio::test]
    async fn manual_completion_writes_one_event() {
        let log = Arc::new(InMemoryEventLog::in_memory());
        let engine = engine_with(log.clone());
        let handle = engine.start("quiz-1", "alice").await.unwrap();

        handle.select_answer("q1", "A").await.unwrap();
        assert_eq!(handle.advance().await.unwrap(), AdvanceOutcome::Next { index: 1 });
        handle.select_answer("q2", "C").await.unwrap();
        let AdvanceOutcome::Completed(completion) = handle.advance().await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(completion.score(), 50.0);
        assert!(completion.is_written());
        assert!(handle.is_timer_stopped());
        assert_eq!(handle.advance().await.unwrap_err(), QuizError::SessionFinished);

        let events = log.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, completion.event_id);
        assert_eq!(handle.finished().await, Some(completion));
    }

    #[tokio::test]
    async fn unknown_quiz_is_not_found() {
        let engine = engine_with(Arc::new(InMemoryEventLog::in_memory()));
        let err = engine.start("nope", "alice").await.err().unwrap();
        assert_eq!(err, QuizError::QuizNotFound("nope".into()));
    }

    #[tokio::test]
    async fn failed_write_keeps_score_and_retries_same_event() {
        let log = Arc::new(FlakyLog {
            fail: AtomicBool::new(true),
            inner: InMemoryEventLog::in_memory(),
        });
        let engine = engine_with(log.clone());
        let handle = engine.start("quiz-1", "alice").await.unwrap();
        handle.select_answer("q1", "A").await.unwrap();
        handle.advance().await.unwrap();
        handle.select_answer("q2", "A").await.unwrap();

        let AdvanceOutcome::Completed(first) = handle.advance().await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(first.score(), 100.0);
        assert!(matches!(first.status, SubmissionStatus::Failed(QuizError::EventWriteFailure(_))));
        assert_eq!(handle.state().await, SessionState::Completed);

        log.fail.store(false, Ordering::SeqCst);
        let retried = handle.retry_submit().await.unwrap();
        assert!(retried.is_written());
        assert_eq!(retried.event_id, first.event_id);

        // already written: nothing is resent
        handle.retry_submit().await.unwrap();
        assert_eq!(log.inner.len().await, 1);
    }

    // Holds the attempt lock across the 3s deadline so the tick and the
    // final advance queue up on it in a chosen order.
    async fn contended_finish(
        tick_first: bool,
    ) -> (
        Result<AdvanceOutcome, QuizError>,
        Vec<CompletionEvent>,
        Option<Completion>,
    ) {
        let log = Arc::new(InMemoryEventLog::in_memory());
        let catalog = InMemoryCatalog::new();
        catalog.insert(quiz(2, 3)).unwrap();
        let engine = SessionEngine::new(AppState::new(log.clone(), Arc::new(catalog)));
        let handle = engine.start("quiz-1", "alice").await.unwrap();
        handle.select_answer("q1", "A").await.unwrap();
        handle.advance().await.unwrap();
        handle.select_answer("q2", "A").await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let shared = handle.shared.clone();
        let guard = shared.attempt.lock().await;
        if tick_first {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let manual = tokio::spawn(async move {
            let outcome = handle.advance().await;
            (outcome, handle)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !tick_first {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(guard.session.remaining_secs(), 1);
        drop(guard);

        let (outcome, handle) = manual.await.unwrap();
        let recorded = handle.finished().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        (outcome, log.list_events().await.unwrap(), recorded)
    }

    #[tokio::test(start_paused = true)]
    async fn tick_winning_the_lock_finishes_once() {
        let (outcome, events, recorded) = contended_finish(true).await;
        assert_eq!(outcome.unwrap_err(), QuizError::SessionFinished);
        let recorded = recorded.unwrap();
        assert_eq!(recorded.score(), 100.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, recorded.event_id);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_winning_the_lock_finishes_once() {
        let (outcome, events, recorded) = contended_finish(false).await;
        let completion = match outcome {
            Ok(AdvanceOutcome::Completed(completion)) => completion,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(Some(completion.clone()), recorded);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, completion.event_id);
    }

    #[tokio::test]
    async fn view_reflects_progress() {
        let engine = engine_with(Arc::new(InMemoryEventLog::in_memory()));
        let handle = engine.start("quiz-1", "alice").await.unwrap();
        handle.select_answer("q1", "B").await.unwrap();
        let view = handle.view().await;
        assert_eq!(view.state, SessionState::Active);
        assert_eq!(view.question.id, "q1");
        assert_eq!(view.selected.as_deref(), Some("B"));
        assert_eq!(view.total_questions, 2);
        assert!(handle.completion().await.is_none());
        assert!(handle.retry_submit().await.is_none());
    }
}
