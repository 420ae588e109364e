use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyError};
use crate::study::Flashcard;

/// Topic mastery requires this many consecutive scores at or above 80%.
const MASTERY_STREAK: usize = 3;
const MASTERY_THRESHOLD: f32 = 0.8;

/// One answered question, kept in session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub query: String,
    pub answer: String,
    /// Citation markers of the chunks the answer drew on.
    pub citations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// One completed quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub topic: String,
    pub score: usize,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

impl QuizAttempt {
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.score as f32 / self.total as f32 * 100.0
    }
}

/// Per-session study state: conversation history, quiz scores, flashcards
/// and progress. Owned by one logical session; torn down explicitly.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub chat_history: Vec<SessionRecord>,
    pub quiz_history: Vec<QuizAttempt>,
    pub flashcards: Vec<Flashcard>,
    /// Indexes into `flashcards` marked for later review.
    pub marked_cards: HashSet<usize>,
    pub topics_mastered: HashSet<String>,
    /// How many times a session has been started against this state.
    #[serde(default)]
    pub sessions_started: usize,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::default()
    }

    pub fn begin_session(&mut self) {
        self.sessions_started += 1;
    }

    pub fn record_answer(&mut self, query: &str, answer: &str, citations: Vec<String>) {
        self.chat_history.push(SessionRecord {
            query: query.to_string(),
            answer: answer.to_string(),
            citations,
            timestamp: Utc::now(),
        });
    }

    /// Record a quiz result and update topic mastery: three consecutive
    /// scores of 80% or better on the same topic mark it mastered.
    pub fn record_quiz(&mut self, topic: &str, score: usize, total: usize) {
        self.quiz_history.push(QuizAttempt {
            topic: topic.to_string(),
            score,
            total,
            timestamp: Utc::now(),
        });

        let recent: Vec<&QuizAttempt> = self
            .quiz_history
            .iter()
            .filter(|attempt| attempt.topic == topic)
            .rev()
            .take(MASTERY_STREAK)
            .collect();
        if recent.len() == MASTERY_STREAK
            && recent
                .iter()
                .all(|attempt| attempt.percentage() >= MASTERY_THRESHOLD * 100.0)
        {
            self.topics_mastered.insert(topic.to_string());
            info!("Topic mastered: {topic}");
        }
    }

    pub fn set_flashcards(&mut self, cards: Vec<Flashcard>) {
        self.flashcards = cards;
        self.marked_cards.clear();
    }

    /// Mark a flashcard for later review. Out-of-range indexes are ignored.
    pub fn mark_card(&mut self, index: usize) {
        if index < self.flashcards.len() {
            self.marked_cards.insert(index);
        }
    }

    pub fn marked_flashcards(&self) -> Vec<&Flashcard> {
        let mut indexes: Vec<usize> = self.marked_cards.iter().copied().collect();
        indexes.sort();
        indexes
            .into_iter()
            .filter_map(|index| self.flashcards.get(index))
            .collect()
    }

    pub fn average_quiz_score(&self) -> f32 {
        if self.quiz_history.is_empty() {
            return 0.0;
        }
        self.quiz_history
            .iter()
            .map(QuizAttempt::percentage)
            .sum::<f32>()
            / self.quiz_history.len() as f32
    }

    /// Consecutive days of quiz activity ending at the most recent one.
    pub fn study_streak(&self) -> usize {
        let mut days: Vec<NaiveDate> = self
            .quiz_history
            .iter()
            .map(|attempt| attempt.timestamp.date_naive())
            .collect();
        days.sort();
        days.dedup();
        days.reverse();

        let mut streak = 0;
        for (i, day) in days.iter().enumerate() {
            if i == 0 {
                streak = 1;
            } else if days[i - 1].signed_duration_since(*day).num_days() == 1 {
                streak += 1;
            } else {
                break;
            }
        }
        streak
    }

    /// Human-readable progress summary.
    pub fn summary(&self) -> String {
        if self.quiz_history.is_empty() && self.flashcards.is_empty() {
            return "Get started by uploading a PDF and asking your first question!".to_string();
        }
        format!(
            "Your Study Summary\n\
             - Sessions: {}\n\
             - Questions answered: {}\n\
             - Quizzes completed: {}\n\
             - Average score: {:.1}%\n\
             - Flashcards created: {} ({} marked for review)\n\
             - Topics mastered: {}\n\
             - Study streak: {} day(s)",
            self.sessions_started,
            self.chat_history.len(),
            self.quiz_history.len(),
            self.average_quiz_score(),
            self.flashcards.len(),
            self.marked_cards.len(),
            self.topics_mastered.len(),
            self.study_streak(),
        )
    }

    /// Persist session state as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StudyError::Session(format!("creating {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| StudyError::Session(format!("serializing session: {e}")))?;
        fs::write(path, json)
            .map_err(|e| StudyError::Session(format!("writing {}: {e}", path.display())))?;
        info!("Session state saved");
        Ok(())
    }

    /// Restore a previously saved session, if one exists.
    pub fn load(path: &Path) -> Result<Option<SessionState>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .map_err(|e| StudyError::Session(format!("reading {}: {e}", path.display())))?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => {
                info!("Session state restored");
                Ok(Some(state))
            }
            Err(e) => {
                error!("Discarding corrupt session file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Clear everything. Called on explicit reset or session end.
    pub fn reset(&mut self) {
        *self = SessionState::default();
        info!("Session state reset");
    }
}

/// Format a quiz score with a verdict, e.g. `9/10 (90.0%) - excellent`.
pub fn format_score(score: usize, total: usize) -> String {
    let percentage = if total > 0 {
        score as f32 / total as f32 * 100.0
    } else {
        0.0
    };
    let verdict = if percentage >= 90.0 {
        "excellent"
    } else if percentage >= 75.0 {
        "good"
    } else if percentage >= 60.0 {
        "fair"
    } else {
        "keep practicing"
    };
    format!("{score}/{total} ({percentage:.1}%) - {verdict}")
}
