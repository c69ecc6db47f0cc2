use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const DEFAULT_TIME_LIMIT_SECS: u32 = 600;

fn default_time_limit() -> u32 {
    DEFAULT_TIME_LIMIT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    #[serde(rename = "question_text")]
    pub prompt: String,
    /// Option key (e.g. "A") to option text.
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
}

impl Question {
    pub fn has_option(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "time_limit_seconds", default = "default_time_limit")]
    pub time_limit_secs: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// Selected option key per question id. At most one entry per question.
pub type Answers = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

pub fn validate_quiz(quiz: &Quiz) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if quiz.id.trim().is_empty() {
        issues.push(ValidationIssue::new("id", "must not be empty"));
    }
    if quiz.title.trim().is_empty() {
        issues.push(ValidationIssue::new("title", "must not be empty"));
    }
    if let Some(d) = &quiz.description {
        if d.trim().is_empty() {
            issues.push(ValidationIssue::new("description", "must not be empty when present"));
        }
    }
    if quiz.time_limit_secs == 0 {
        issues.push(ValidationIssue::new("time_limit_seconds", "must be positive"));
    }
    if quiz.questions.is_empty() {
        issues.push(ValidationIssue::new("questions", "must contain at least one question"));
    }

    let mut question_ids = HashSet::new();
    for (i, q) in quiz.questions.iter().enumerate() {
        if q.id.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must not be empty"));
        }
        if !question_ids.insert(q.id.as_str()) {
            issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must be unique"));
        }
        if q.prompt.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].question_text"),
                "must not be empty",
            ));
        }
        if q.options.len() < 2 {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].options"),
                "must contain at least 2 options",
            ));
        }
        for (key, text) in &q.options {
            if key.trim().is_empty() || text.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].options[{key}]"),
                    "key/text must not be empty",
                ));
            }
        }
        if !q.has_option(&q.correct_answer) {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].correct_answer"),
                "must reference existing option key",
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

pub fn count_correct(quiz: &Quiz, answers: &Answers) -> usize {
    quiz.questions
        .iter()
        .filter(|q| answers.get(&q.id) == Some(&q.correct_answer))
        .count()
}

pub fn score_percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (correct as f64) * 100.0 / (total as f64)
    }
}

pub fn format_score(score: f64) -> String {
    format!("{score:.2}")
}

/// Remaining time as `m:ss`.
pub fn format_remaining(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn validate_quiz_ok() {
        assert!(validate_quiz(&quiz(3, 60)).is_ok());
    }

    #[test]
    fn validate_quiz_negative() {
        let mut q = quiz(2, 0);
        q.questions[1].id = "q1".into();
        q.questions[0].correct_answer = "E".into();
        let issues = validate_quiz(&q).unwrap_err();
        assert!(issues.iter().any(|i| i.issue.contains("unique")));
        assert!(issues.iter().any(|i| i.field == "questions[0].correct_answer"));
        assert!(issues.iter().any(|i| i.field == "time_limit_seconds"));
    }

    #[test]
    fn validate_rejects_empty_question_set() {
        let issues = validate_quiz(&quiz(0, 60)).unwrap_err();
        assert_eq!(issues[0].field, "questions");
    }

    #[test]
    fn three_of_four_scores_seventy_five() {
        let q = quiz(4, 60);
        let answers: Answers = [("q1", "A"), ("q2", "A"), ("q3", "A"), ("q4", "B")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let correct = count_correct(&q, &answers);
        assert_eq!(correct, 3);
        assert_eq!(format_score(score_percent(correct, 4)), "75.00");
    }

    #[test]
    fn missing_answers_never_match() {
        let q = quiz(2, 60);
        let mut answers = Answers::new();
        answers.insert("q2".into(), "A".into());
        assert_eq!(count_correct(&q, &answers), 1);
    }

    #[test]
    fn remaining_time_format() {
        assert_eq!(format_remaining(600), "10:00");
        assert_eq!(format_remaining(65), "1:05");
        assert_eq!(format_remaining(0), "0:00");
    }

    #[test]
    fn quiz_wire_format_defaults_time_limit() {
        let raw = serde_json::json!({
            "id": "q",
            "title": "T",
            "questions": [{
                "id": "x",
                "question_text": "2+2",
                "options": {"A": "4", "B": "5"},
                "correct_answer": "A"
            }]
        });
        let quiz: Quiz = serde_json::from_value(raw).unwrap();
        assert_eq!(quiz.time_limit_secs, DEFAULT_TIME_LIMIT_SECS);
        assert_eq!(quiz.questions[0].prompt, "2+2");
    }
}
