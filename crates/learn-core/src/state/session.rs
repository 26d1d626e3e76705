//! The session aggregate: one user's single play-through of one game.
//!
//! All mutation goes through methods that keep the derived performance
//! statistics consistent. Callers must serialize access per session id; the
//! aggregate itself assumes a single logical writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::ids::new_id;

/// Errors raised by session mutation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} is closed ({status}) and can no longer be modified")]
    Closed { id: String, status: SessionStatus },

    #[error("session {id} is not in progress (status {status})")]
    NotInProgress { id: String, status: SessionStatus },

    #[error("session {id} is not paused (status {status})")]
    NotPaused { id: String, status: SessionStatus },
}

/// Session status. Monotonic except for the paused <-> in-progress pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// One recorded answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub answer: String,
    pub correct: bool,
    pub response_time_ms: u64,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub hint_used: bool,
    /// Resolved point delta; falls back to the default scoring if absent.
    #[serde(default)]
    pub points: Option<i32>,
    #[serde(default)]
    pub skill_area: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl QuestionResult {
    pub fn new(
        question_id: impl Into<String>,
        answer: impl Into<String>,
        correct: bool,
        response_time_ms: u64,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            answer: answer.into(),
            correct,
            response_time_ms,
            skipped: false,
            hint_used: false,
            points: None,
            skill_area: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_points(mut self, points: i32) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_skill_area(mut self, skill_area: impl Into<String>) -> Self {
        self.skill_area = Some(skill_area.into());
        self
    }

    pub fn with_skipped(mut self, skipped: bool) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn with_hint_used(mut self, hint_used: bool) -> Self {
        self.hint_used = hint_used;
        self
    }
}

/// Audit-trail entry for an applied AI adaptation. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adaptation {
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// A recorded difficulty change on the session's performance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyChange {
    pub from: u8,
    pub to: u8,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of resumable game state plus a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Session-local event log entry (observability, not gameplay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Positional progress through the game's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub current_level: u8,
    pub current_question: usize,
    pub total_questions: usize,
    pub completed_questions: Vec<String>,
    pub skipped_questions: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Default for SessionProgress {
    fn default() -> Self {
        Self {
            current_level: 1,
            current_question: 0,
            total_questions: 0,
            completed_questions: Vec::new(),
            skipped_questions: Vec::new(),
            checkpoints: Vec::new(),
        }
    }
}

/// Partial update to positional progress; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionProgressPatch {
    pub current_level: Option<u8>,
    pub current_question: Option<usize>,
    pub total_questions: Option<usize>,
}

/// Rolling performance statistics, maintained incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    /// totalCorrect / (totalCorrect + totalIncorrect), 0 when unanswered.
    pub accuracy: f64,
    pub average_response_time_ms: f64,
    pub total_correct: u32,
    pub total_incorrect: u32,
    pub total_skipped: u32,
    pub streak_current: u32,
    pub streak_best: u32,
    pub hints_used: u32,
    pub difficulty_changes: Vec<DifficultyChange>,
}

/// Final metadata computed when a session reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSummary {
    /// Active play time: elapsed minus accumulated paused time.
    pub total_play_time_secs: u64,
    pub final_score: i64,
    pub final_accuracy: f64,
    pub questions_attempted: usize,
}

/// One attempt at one game by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub game_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated paused duration in milliseconds.
    pub paused_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pause_started_at: Option<DateTime<Utc>>,
    pub progress: SessionProgress,
    pub results: Vec<QuestionResult>,
    pub score: i64,
    pub performance: Performance,
    pub ai_adaptations: Vec<Adaptation>,
    pub events: Vec<SessionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompletionSummary>,
}

impl Session {
    const DEFAULT_POINTS_CORRECT: i32 = 10;
    const DEFAULT_POINTS_INCORRECT: i32 = -5;

    pub fn new(game_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            game_id: game_id.into(),
            user_id: user_id.into(),
            status: SessionStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            paused_ms: 0,
            pause_started_at: None,
            progress: SessionProgress::default(),
            results: Vec::new(),
            score: 0,
            performance: Performance::default(),
            ai_adaptations: Vec::new(),
            events: Vec::new(),
            summary: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::InProgress | SessionStatus::Paused
        )
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            Err(SessionError::Closed {
                id: self.id.clone(),
                status: self.status,
            })
        } else {
            Ok(())
        }
    }

    /// Suspends the session, starting the paused-time clock.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionError::NotInProgress {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = SessionStatus::Paused;
        self.pause_started_at = Some(Utc::now());
        self.add_event("session_paused", Value::Null);
        Ok(())
    }

    /// Resumes a paused session, folding the pause into `paused_ms`.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Paused {
            return Err(SessionError::NotPaused {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if let Some(paused_at) = self.pause_started_at.take() {
            let paused = Utc::now().signed_duration_since(paused_at);
            self.paused_ms += paused.num_milliseconds().max(0) as u64;
        }
        self.status = SessionStatus::InProgress;
        self.add_event("session_resumed", Value::Null);
        Ok(())
    }

    /// Appends a result and updates all derived statistics as one logical
    /// operation.
    ///
    /// Fails without modification if the session is already closed.
    pub fn record_question_result(&mut self, result: QuestionResult) -> Result<(), SessionError> {
        self.ensure_open()?;

        let perf = &mut self.performance;
        if result.correct {
            perf.total_correct += 1;
            perf.streak_current += 1;
            perf.streak_best = perf.streak_best.max(perf.streak_current);
            self.score += result.points.unwrap_or(Self::DEFAULT_POINTS_CORRECT) as i64;
        } else {
            perf.total_incorrect += 1;
            perf.streak_current = 0;
            self.score += result.points.unwrap_or(Self::DEFAULT_POINTS_INCORRECT) as i64;
        }
        if result.skipped {
            perf.total_skipped += 1;
            self.progress.skipped_questions.push(result.question_id.clone());
        } else {
            self.progress.completed_questions.push(result.question_id.clone());
        }
        if result.hint_used {
            perf.hints_used += 1;
        }

        self.results.push(result);

        let answered = self.performance.total_correct + self.performance.total_incorrect;
        if answered > 0 {
            self.performance.accuracy =
                self.performance.total_correct as f64 / answered as f64;
        }
        let total_ms: u64 = self.results.iter().map(|r| r.response_time_ms).sum();
        self.performance.average_response_time_ms = total_ms as f64 / self.results.len() as f64;

        Ok(())
    }

    /// Marks the session completed and freezes final metadata.
    ///
    /// One-way and idempotent: calling again on an already-terminal session
    /// changes nothing and returns `false`.
    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.close(SessionStatus::Completed);
        self.add_event("session_completed", Value::Null);
        true
    }

    /// Marks the session abandoned. Same idempotence as [`Session::complete`].
    pub fn abandon(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.close(SessionStatus::Abandoned);
        self.add_event("session_abandoned", Value::Null);
        true
    }

    fn close(&mut self, status: SessionStatus) {
        // A session closed while paused still owes the open pause interval.
        if let Some(paused_at) = self.pause_started_at.take() {
            let paused = Utc::now().signed_duration_since(paused_at);
            self.paused_ms += paused.num_milliseconds().max(0) as u64;
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        self.summary = Some(CompletionSummary {
            total_play_time_secs: self.play_time_secs(),
            final_score: self.score,
            final_accuracy: self.performance.accuracy,
            questions_attempted: self.results.len(),
        });
    }

    /// Applies a partial progress update.
    pub fn apply_progress(&mut self, patch: SessionProgressPatch) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Some(level) = patch.current_level {
            self.progress.current_level = level;
        }
        if let Some(current) = patch.current_question {
            self.progress.current_question = current;
        }
        if let Some(total) = patch.total_questions {
            self.progress.total_questions = total;
        }
        Ok(())
    }

    /// Appends an adaptation to the audit trail.
    pub fn record_adaptation(
        &mut self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.ai_adaptations.push(Adaptation {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Records an applied difficulty change on the performance record.
    pub fn record_difficulty_change(
        &mut self,
        from: u8,
        to: u8,
        reason: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.performance.difficulty_changes.push(DifficultyChange {
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Increments the hints-used counter.
    pub fn record_hint(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.performance.hints_used += 1;
        Ok(())
    }

    /// Appends to the session-local event log.
    pub fn add_event(&mut self, name: impl Into<String>, payload: Value) {
        self.events.push(SessionEvent {
            name: name.into(),
            payload,
            timestamp: Utc::now(),
        });
    }

    /// Saves a resumable snapshot and returns its id.
    pub fn save_checkpoint(&mut self, data: Value) -> Result<String, SessionError> {
        self.ensure_open()?;
        let checkpoint = Checkpoint {
            id: new_id(),
            data,
            timestamp: Utc::now(),
        };
        let id = checkpoint.id.clone();
        self.progress.checkpoints.push(checkpoint);
        Ok(id)
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.progress.checkpoints.last()
    }

    /// Active play time in seconds: elapsed minus accumulated paused time.
    pub fn play_time_secs(&self) -> u64 {
        let until = self.end_time.unwrap_or_else(Utc::now);
        let elapsed_ms = until
            .signed_duration_since(self.start_time)
            .num_milliseconds()
            .max(0) as u64;
        elapsed_ms.saturating_sub(self.paused_ms) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("game-1", "user-1")
    }

    #[test]
    fn accuracy_tracks_correct_over_answered() {
        let mut s = session();
        s.record_question_result(QuestionResult::new("q1", "a", true, 1_000))
            .unwrap();
        assert_eq!(s.performance.accuracy, 1.0);

        s.record_question_result(QuestionResult::new("q2", "b", false, 1_000))
            .unwrap();
        assert_eq!(s.performance.accuracy, 0.5);
        assert!(s.performance.accuracy >= 0.0 && s.performance.accuracy <= 1.0);
        assert_eq!(s.performance.total_correct, 1);
        assert_eq!(s.performance.total_incorrect, 1);
    }

    #[test]
    fn streak_resets_on_incorrect_and_best_is_monotonic() {
        let mut s = session();
        for i in 0..3 {
            s.record_question_result(QuestionResult::new(format!("q{i}"), "a", true, 500))
                .unwrap();
        }
        assert_eq!(s.performance.streak_current, 3);
        assert_eq!(s.performance.streak_best, 3);

        s.record_question_result(QuestionResult::new("q3", "a", false, 500))
            .unwrap();
        assert_eq!(s.performance.streak_current, 0);
        assert_eq!(s.performance.streak_best, 3);
        assert!(s.performance.streak_best >= s.performance.streak_current);
    }

    #[test]
    fn score_uses_result_points_with_defaults() {
        let mut s = session();
        s.record_question_result(QuestionResult::new("q1", "a", true, 500).with_points(20))
            .unwrap();
        assert_eq!(s.score, 20);
        s.record_question_result(QuestionResult::new("q2", "a", false, 500))
            .unwrap();
        assert_eq!(s.score, 15);
    }

    #[test]
    fn complete_is_idempotent() {
        let mut s = session();
        s.record_question_result(QuestionResult::new("q1", "a", true, 500))
            .unwrap();

        assert!(s.complete());
        let end_time = s.end_time;
        let summary_score = s.summary.as_ref().map(|m| m.final_score);
        let results_len = s.results.len();
        let events_len = s.events.len();

        assert!(!s.complete());
        assert_eq!(s.end_time, end_time);
        assert_eq!(s.summary.as_ref().map(|m| m.final_score), summary_score);
        assert_eq!(s.results.len(), results_len);
        assert_eq!(s.events.len(), events_len);
    }

    #[test]
    fn closed_session_rejects_mutation() {
        let mut s = session();
        s.complete();

        let err = s
            .record_question_result(QuestionResult::new("q1", "a", true, 500))
            .unwrap_err();
        assert!(matches!(err, SessionError::Closed { .. }));
        assert!(s.results.is_empty());

        assert!(s.record_adaptation("difficulty_change", Value::Null).is_err());
        assert!(s.save_checkpoint(Value::Null).is_err());
    }

    #[test]
    fn pause_resume_cycle() {
        let mut s = session();
        s.pause().unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        assert!(s.pause().is_err());

        s.resume().unwrap();
        assert_eq!(s.status, SessionStatus::InProgress);
        assert!(s.resume().is_err());
    }

    #[test]
    fn skipped_and_hinted_results_update_counters() {
        let mut s = session();
        s.record_question_result(
            QuestionResult::new("q1", "", false, 0)
                .with_skipped(true)
                .with_points(0),
        )
        .unwrap();
        s.record_question_result(QuestionResult::new("q2", "a", true, 900).with_hint_used(true))
            .unwrap();

        assert_eq!(s.performance.total_skipped, 1);
        assert_eq!(s.performance.hints_used, 1);
        assert_eq!(s.progress.skipped_questions, vec!["q1".to_string()]);
        assert_eq!(s.progress.completed_questions, vec!["q2".to_string()]);
    }

    #[test]
    fn checkpoints_append_in_order() {
        let mut s = session();
        let first = s.save_checkpoint(serde_json::json!({"index": 1})).unwrap();
        let second = s.save_checkpoint(serde_json::json!({"index": 2})).unwrap();
        assert_ne!(first, second);
        assert_eq!(s.latest_checkpoint().unwrap().id, second);
        assert_eq!(s.progress.checkpoints.len(), 2);
    }

    #[test]
    fn adaptations_are_append_only() {
        let mut s = session();
        s.record_adaptation("difficulty_change", serde_json::json!({"to": 4}))
            .unwrap();
        assert_eq!(s.ai_adaptations.len(), 1);
        assert_eq!(s.ai_adaptations[0].kind, "difficulty_change");
    }
}
