use crate::config::Config;
use crate::error::QuizError;
use crate::events::CompletionEvent;
use crate::models::{validate_quiz, Quiz};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io, time::Duration};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Append-only store of completion events.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn list_events(&self) -> Result<Vec<CompletionEvent>, QuizError>;

    async fn append_event(&self, event: CompletionEvent) -> Result<(), QuizError>;
}

#[async_trait]
pub trait QuizCatalog: Send + Sync {
    async fn get_quiz(&self, quiz_id: &str) -> Result<Quiz, QuizError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EventSnapshot {
    events: Vec<CompletionEvent>,
}

pub struct InMemoryEventLog {
    events: RwLock<Vec<CompletionEvent>>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryEventLog {
    /// A missing snapshot is an empty log; an unreadable one is an error.
    pub fn new(snapshot_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let events = match snapshot_path.as_deref() {
            Some(path) => read_snapshot(path)?,
            None => Vec::new(),
        };
        Ok(Self {
            events: RwLock::new(events),
            snapshot_path,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            snapshot_path: None,
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn persist(&self, events: &[CompletionEvent]) -> anyhow::Result<()> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let serialized = serde_json::to_vec_pretty(&EventSnapshot {
            events: events.to_vec(),
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> anyhow::Result<Vec<CompletionEvent>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read event snapshot {}", path.display()))
        }
    };
    let snapshot: EventSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("corrupt event snapshot {}", path.display()))?;
    info!("loaded {} events from {}", snapshot.events.len(), path.display());
    Ok(snapshot.events)
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn list_events(&self) -> Result<Vec<CompletionEvent>, QuizError> {
        Ok(self.events.read().await.clone())
    }

    async fn append_event(&self, event: CompletionEvent) -> Result<(), QuizError> {
        let mut events = self.events.write().await;
        events.push(event);
        if let Err(err) = self.persist(&events).await {
            events.pop();
            warn!("failed to persist event snapshot: {}", err);
            return Err(QuizError::EventWriteFailure(err.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    quizzes: DashMap<String, Quiz>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of quizzes. Quizzes that fail validation are skipped.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let quizzes: Vec<Quiz> = serde_json::from_str(&raw)?;
        let catalog = Self::new();
        for quiz in quizzes {
            let id = quiz.id.clone();
            if let Err(err) = catalog.insert(quiz) {
                warn!("skipping quiz {} from {}: {}", id, path.display(), err);
            }
        }
        info!("loaded {} quizzes from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn insert(&self, quiz: Quiz) -> Result<(), QuizError> {
        validate_quiz(&quiz).map_err(|issues| QuizError::InvalidQuiz {
            quiz_id: quiz.id.clone(),
            issues,
        })?;
        self.quizzes.insert(quiz.id.clone(), quiz);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.quizzes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty()
    }
}

#[async_trait]
impl QuizCatalog for InMemoryCatalog {
    async fn get_quiz(&self, quiz_id: &str) -> Result<Quiz, QuizError> {
        self.quizzes
            .get(quiz_id)
            .map(|q| q.value().clone())
            .ok_or_else(|| QuizError::QuizNotFound(quiz_id.to_string()))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub event_log: Arc<dyn EventLog>,
    pub catalog: Arc<dyn QuizCatalog>,
    pub tick_interval: Duration,
}

impl AppState {
    pub fn new(event_log: Arc<dyn EventLog>, catalog: Arc<dyn QuizCatalog>) -> Self {
        Self {
            event_log,
            catalog,
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let event_log = Arc::new(InMemoryEventLog::new(Some(config.event_log_path.clone()))?);
        let catalog = match config.quiz_catalog_path.as_deref() {
            Some(path) => InMemoryCatalog::from_file(path)?,
            None => InMemoryCatalog::new(),
        };
        Ok(Self {
            event_log,
            catalog: Arc::new(catalog),
            tick_interval: Duration::from_secs(1),
        })
    }
}
