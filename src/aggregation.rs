use crate::error::QuizError;
use crate::events::CompletionEvent;
use crate::state::EventLog;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub const FIRST_QUIZ_ACHIEVEMENT: &str = "First Quiz!";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsBucket {
    #[serde(rename = "quizId")]
    pub quiz_id: String,
    #[serde(rename = "averageScore")]
    pub average_score: f64,
    pub completions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub quizzes_taken: usize,
    pub average_score: f64,
    pub achievements: Vec<String>,
}

fn completed(events: &[CompletionEvent]) -> impl Iterator<Item = &CompletionEvent> {
    events.iter().filter(|e| {
        if !e.is_quiz_completed() {
            return false;
        }
        if !e.payload.score.is_finite() {
            debug!(event_id = %e.id, "skipping event with non-finite score");
            return false;
        }
        true
    })
}

// Higher score, then earlier submission, then lower event id.
fn beats(new: &CompletionEvent, current: &CompletionEvent) -> bool {
    new.payload
        .score
        .total_cmp(&current.payload.score)
        .then_with(|| current.created_at.cmp(&new.created_at))
        .then_with(|| current.id.cmp(&new.id))
        == Ordering::Greater
}

fn rank_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

pub fn leaderboard(events: &[CompletionEvent], quiz_id: &str) -> Vec<LeaderboardEntry> {
    let mut best: HashMap<&str, &CompletionEvent> = HashMap::new();
    for event in completed(events).filter(|e| e.payload.quiz_id == quiz_id) {
        best.entry(event.payload.user_id.as_str())
            .and_modify(|current| {
                if beats(event, *current) {
                    *current = event;
                }
            })
            .or_insert(event);
    }

    let mut entries: Vec<LeaderboardEntry> = best
        .into_values()
        .map(|e| LeaderboardEntry {
            user_id: e.payload.user_id.clone(),
            score: e.payload.score,
            timestamp: e.created_at,
        })
        .collect();
    entries.sort_by(rank_order);
    entries
}

/// Quizzes without completions are absent.
pub fn analytics_buckets(
    events: &[CompletionEvent],
    quiz_ids: Option<&BTreeSet<String>>,
) -> Vec<AnalyticsBucket> {
    let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for event in completed(events) {
        let quiz_id = event.payload.quiz_id.as_str();
        if quiz_ids.is_some_and(|ids| !ids.contains(quiz_id)) {
            continue;
        }
        let slot = totals.entry(quiz_id).or_insert((0.0, 0));
        slot.0 += event.payload.score;
        slot.1 += 1;
    }
    totals
        .into_iter()
        .map(|(quiz_id, (sum, count))| AnalyticsBucket {
            quiz_id: quiz_id.to_string(),
            average_score: sum / count as f64,
            completions: count,
        })
        .collect()
}

pub fn analytics(
    events: &[CompletionEvent],
    quiz_ids: Option<&BTreeSet<String>>,
) -> BTreeMap<String, f64> {
    analytics_buckets(events, quiz_ids)
        .into_iter()
        .map(|b| (b.quiz_id, b.average_score))
        .collect()
}

pub fn user_profile(events: &[CompletionEvent], user_id: &str) -> UserProfile {
    let scores: Vec<f64> = completed(events)
        .filter(|e| e.payload.user_id == user_id)
        .map(|e| e.payload.score)
        .collect();
    let quizzes_taken = scores.len();
    let average_score = if quizzes_taken == 0 {
        0.0
    } else {
        scores.iter().sum::<f64>() / quizzes_taken as f64
    };
    let achievements = if quizzes_taken > 0 {
        vec![FIRST_QUIZ_ACHIEVEMENT.to_string()]
    } else {
        Vec::new()
    };
    UserProfile {
        user_id: user_id.to_string(),
        quizzes_taken,
        average_score,
        achievements,
    }
}

/// All completions, newest first.
pub fn submissions(events: &[CompletionEvent]) -> Vec<CompletionEvent> {
    let mut out: Vec<CompletionEvent> = completed(events).cloned().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

pub fn quizzes_with_submissions(events: &[CompletionEvent]) -> BTreeSet<String> {
    completed(events)
        .map(|e| e.payload.quiz_id.clone())
        .collect()
}

#[derive(Clone)]
pub struct AggregationEngine {
    event_log: Arc<dyn EventLog>,
}

impl AggregationEngine {
    pub fn new(event_log: Arc<dyn EventLog>) -> Self {
        Self { event_log }
    }

    async fn snapshot(&self) -> Result<Vec<CompletionEvent>, QuizError> {
        self.event_log.list_events().await.map_err(|err| {
            warn!("event log fetch failed: {}", err);
            match err {
                QuizError::LogUnavailable(_) => err,
                other => QuizError::LogUnavailable(other.to_string()),
            }
        })
    }

    pub async fn leaderboard(&self, quiz_id: &str) -> Result<Vec<LeaderboardEntry>, QuizError> {
        Ok(leaderboard(&self.snapshot().await?, quiz_id))
    }

    pub async fn analytics(
        &self,
        quiz_ids: Option<&BTreeSet<String>>,
    ) -> Result<BTreeMap<String, f64>, QuizError> {
        Ok(analytics(&self.snapshot().await?, quiz_ids))
    }

    pub async fn analytics_buckets(
        &self,
        quiz_ids: Option<&BTreeSet<String>>,
    ) -> Result<Vec<AnalyticsBucket>, QuizError> {
        Ok(analytics_buckets(&self.snapshot().await?, quiz_ids))
    }

    pub async fn user_profile(&self, user_id: &str) -> Result<UserProfile, QuizError> {
        Ok(user_profile(&self.snapshot().await?, user_id))
    }

    pub async fn submissions(&self) -> Result<Vec<CompletionEvent>, QuizError> {
        Ok(submissions(&self.snapshot().await?))
    }

    pub async fn quizzes_with_submissions(&self) -> Result<BTreeSet<String>, QuizError> {
        Ok(quizzes_with_submissions(&self.snapshot().await?))
    }
}
