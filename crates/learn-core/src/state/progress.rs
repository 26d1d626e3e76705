//! The progress aggregate: one user's longitudinal learning record for one
//! subject, folded forward from completed sessions.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::session::{Session, SessionStatus};
use crate::ids::new_id;

/// Experience points per level.
const EXPERIENCE_PER_LEVEL: u64 = 100;

/// Minimum attempts before a skill can be classified weak or strong.
const CLASSIFICATION_ATTEMPTS: u32 = 5;
const WEAK_MASTERY_CEILING: f64 = 0.5;
const STRONG_MASTERY_FLOOR: f64 = 0.8;

/// Errors raised by progress mutation.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("session {session_id} is not completed (status {status}); cannot fold into progress")]
    SessionNotCompleted {
        session_id: String,
        status: SessionStatus,
    },
}

/// Per-skill mastery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMastery {
    pub name: String,
    pub attempts: u32,
    pub correct: u32,
    /// correct / attempts.
    pub mastery: f64,
}

/// One completed session, summarized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedGame {
    pub game_id: String,
    pub session_id: String,
    pub completed_at: DateTime<Utc>,
    pub score: i64,
    pub accuracy: f64,
}

/// Timestamped achievement log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub kind: String,
    pub detail: Value,
    pub unlocked_at: DateTime<Utc>,
}

/// Timestamped study recommendation log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyRecommendation {
    pub id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Timestamped learning-path log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPathItem {
    pub id: String,
    pub payload: Value,
    pub added_at: DateTime<Utc>,
}

/// Monthly snapshot keyed by `YYYY-MM`, upserted in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySnapshot {
    pub month: String,
    pub play_time_secs: u64,
    pub games_completed: u32,
    pub accuracy: f64,
    pub level: u32,
}

/// Weekly study-time goal, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyGoal {
    pub target_minutes: u32,
    pub current_minutes: u32,
}

impl Default for WeeklyGoal {
    fn default() -> Self {
        Self {
            target_minutes: 300,
            current_minutes: 0,
        }
    }
}

/// Cumulative statistics for one user+subject pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total_play_time_secs: u64,
    pub games_completed: u32,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub average_accuracy: f64,
    /// Consecutive active days, date-based.
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_streak_date: Option<NaiveDate>,
    #[serde(default)]
    pub weekly_goal: WeeklyGoal,
    #[serde(default)]
    pub monthly: Vec<MonthlySnapshot>,
}

/// One user's cumulative learning record for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    /// Derived: floor(experience / 100) + 1. Kept in sync by mutation.
    pub level: u32,
    pub experience: u64,
    pub skill_mastery: Vec<SkillMastery>,
    pub weak_areas: Vec<String>,
    pub strong_areas: Vec<String>,
    pub completed_games: Vec<CompletedGame>,
    pub achievements: Vec<Achievement>,
    pub stats: ProgressStats,
    pub learning_path: Vec<LearningPathItem>,
    pub recommendations: Vec<StudyRecommendation>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    pub fn new(user_id: impl Into<String>, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            subject: subject.into(),
            level: 1,
            experience: 0,
            skill_mastery: Vec::new(),
            weak_areas: Vec::new(),
            strong_areas: Vec::new(),
            completed_games: Vec::new(),
            achievements: Vec::new(),
            stats: ProgressStats::default(),
            learning_path: Vec::new(),
            recommendations: Vec::new(),
            last_activity: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds one completed session into the longitudinal record.
    ///
    /// Updates cumulative counters, experience/level, skill mastery, the
    /// weak/strong classification, and the daily streak, then stamps
    /// `last_activity`.
    pub fn update_from_game_result(&mut self, session: &Session) -> Result<(), ProgressError> {
        if session.status != SessionStatus::Completed {
            return Err(ProgressError::SessionNotCompleted {
                session_id: session.id.clone(),
                status: session.status,
            });
        }

        self.stats.games_completed += 1;
        self.stats.total_play_time_secs += session.play_time_secs();
        self.stats.questions_answered += session.results.len() as u32;
        self.stats.correct_answers += session.performance.total_correct;
        if self.stats.questions_answered > 0 {
            self.stats.average_accuracy =
                self.stats.correct_answers as f64 / self.stats.questions_answered as f64;
        }

        self.add_experience(session.score);

        self.completed_games.push(CompletedGame {
            game_id: session.game_id.clone(),
            session_id: session.id.clone(),
            completed_at: session.end_time.unwrap_or_else(Utc::now),
            score: session.score,
            accuracy: session.performance.accuracy,
        });

        self.analyze_skills(session);
        self.update_streak_on(Utc::now().date_naive());
        self.record_monthly_snapshot();

        let now = Utc::now();
        self.last_activity = now;
        self.updated_at = now;
        Ok(())
    }

    /// Adds experience, never letting a negative score drain the record.
    ///
    /// The delta is floored at zero per call; level is recomputed and a
    /// level-up achievement appended when it rises.
    pub fn add_experience(&mut self, points: i64) {
        self.experience += points.max(0) as u64;

        let new_level = Self::level_for(self.experience);
        if new_level > self.level {
            self.level = new_level;
            self.add_achievement(
                "level_up",
                serde_json::json!({ "level": new_level }),
            );
        }
    }

    fn level_for(experience: u64) -> u32 {
        (experience / EXPERIENCE_PER_LEVEL) as u32 + 1
    }

    /// Replays the session's skill-tagged results into the mastery map and
    /// re-derives the weak/strong classification.
    fn analyze_skills(&mut self, session: &Session) {
        for result in &session.results {
            let Some(skill) = &result.skill_area else {
                continue;
            };
            match self.skill_mastery.iter_mut().find(|s| &s.name == skill) {
                Some(entry) => {
                    entry.attempts += 1;
                    if result.correct {
                        entry.correct += 1;
                    }
                    entry.mastery = entry.correct as f64 / entry.attempts as f64;
                }
                None => {
                    self.skill_mastery.push(SkillMastery {
                        name: skill.clone(),
                        attempts: 1,
                        correct: result.correct as u32,
                        mastery: if result.correct { 1.0 } else { 0.0 },
                    });
                }
            }
        }
        self.classify_skill_areas();
    }

    /// Recomputes the weak/strong sets from the mastery map.
    ///
    /// Skills below the attempt floor are never classified either way.
    fn classify_skill_areas(&mut self) {
        self.weak_areas = self
            .skill_mastery
            .iter()
            .filter(|s| s.attempts >= CLASSIFICATION_ATTEMPTS && s.mastery < WEAK_MASTERY_CEILING)
            .map(|s| s.name.clone())
            .collect();
        self.strong_areas = self
            .skill_mastery
            .iter()
            .filter(|s| s.attempts >= CLASSIFICATION_ATTEMPTS && s.mastery >= STRONG_MASTERY_FLOOR)
            .map(|s| s.name.clone())
            .collect();
    }

    /// Advances the daily-activity streak for `today`.
    ///
    /// Increments when the previous activity was exactly yesterday, resets
    /// to 1 on any gap, and no-ops when already counted today.
    pub fn update_streak_on(&mut self, today: NaiveDate) {
        if self.stats.last_streak_date == Some(today) {
            return;
        }
        let yesterday = today.pred_opt();
        if self.stats.last_streak_date.is_some() && self.stats.last_streak_date == yesterday {
            self.stats.current_streak += 1;
        } else {
            self.stats.current_streak = 1;
        }
        self.stats.last_streak_date = Some(today);
        self.stats.longest_streak = self.stats.longest_streak.max(self.stats.current_streak);
    }

    /// Upserts the snapshot for the current month.
    pub fn record_monthly_snapshot(&mut self) {
        let now = Utc::now();
        let month = format!("{:04}-{:02}", now.year(), now.month());
        let snapshot = MonthlySnapshot {
            month: month.clone(),
            play_time_secs: self.stats.total_play_time_secs,
            games_completed: self.stats.games_completed,
            accuracy: self.stats.average_accuracy,
            level: self.level,
        };
        match self.stats.monthly.iter_mut().find(|m| m.month == month) {
            Some(existing) => *existing = snapshot,
            None => self.stats.monthly.push(snapshot),
        }
    }

    pub fn add_achievement(&mut self, kind: impl Into<String>, detail: Value) {
        self.achievements.push(Achievement {
            id: new_id(),
            kind: kind.into(),
            detail,
            unlocked_at: Utc::now(),
        });
    }

    pub fn add_recommendation(&mut self, payload: Value) {
        self.recommendations.push(StudyRecommendation {
            id: new_id(),
            payload,
            created_at: Utc::now(),
        });
    }

    pub fn add_to_learning_path(&mut self, payload: Value) {
        self.learning_path.push(LearningPathItem {
            id: new_id(),
            payload,
            added_at: Utc::now(),
        });
    }

    /// Adds study minutes toward the weekly goal.
    pub fn update_weekly_progress(&mut self, minutes: u32) {
        self.stats.weekly_goal.current_minutes += minutes;
    }

    pub fn reset_weekly_goal(&mut self) {
        self.stats.weekly_goal.current_minutes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::QuestionResult;

    fn completed_session(score_results: &[(bool, Option<&str>)]) -> Session {
        let mut session = Session::new("game-1", "user-1");
        for (i, (correct, skill)) in score_results.iter().enumerate() {
            let mut result = QuestionResult::new(format!("q{i}"), "a", *correct, 1_000)
                .with_points(if *correct { 10 } else { -5 });
            if let Some(skill) = skill {
                result = result.with_skill_area(*skill);
            }
            session.record_question_result(result).unwrap();
        }
        session.complete();
        session
    }

    #[test]
    fn experience_and_level_follow_score() {
        let mut progress = Progress::new("user-1", "math");

        let mut first = Session::new("game-1", "user-1");
        for i in 0..5 {
            first
                .record_question_result(QuestionResult::new(format!("q{i}"), "a", true, 500))
                .unwrap();
        }
        first.complete();
        assert_eq!(first.score, 50);

        progress.update_from_game_result(&first).unwrap();
        assert_eq!(progress.experience, 50);
        assert_eq!(progress.level, 1);
        assert!(progress.achievements.is_empty());

        let mut second = Session::new("game-1", "user-1");
        for i in 0..6 {
            second
                .record_question_result(QuestionResult::new(format!("q{i}"), "a", true, 500))
                .unwrap();
        }
        second.complete();
        assert_eq!(second.score, 60);

        progress.update_from_game_result(&second).unwrap();
        assert_eq!(progress.experience, 110);
        assert_eq!(progress.level, 2);
        let level_ups: Vec<_> = progress
            .achievements
            .iter()
            .filter(|a| a.kind == "level_up")
            .collect();
        assert_eq!(level_ups.len(), 1);
    }

    #[test]
    fn negative_score_never_drains_experience() {
        let mut progress = Progress::new("user-1", "math");
        progress.add_experience(30);

        let session = completed_session(&[(false, None), (false, None)]);
        assert!(session.score < 0);
        progress.update_from_game_result(&session).unwrap();
        assert_eq!(progress.experience, 30);
    }

    #[test]
    fn skill_classification_respects_attempt_floor() {
        let mut progress = Progress::new("user-1", "math");

        // fractions: 5 attempts, 2 correct => mastery 0.4, weak.
        // algebra: 5 attempts, 4 correct => mastery 0.8, strong.
        // geometry: 3 attempts => unclassified.
        let results: Vec<(bool, Option<&str>)> = vec![
            (true, Some("fractions")),
            (true, Some("fractions")),
            (false, Some("fractions")),
            (false, Some("fractions")),
            (false, Some("fractions")),
            (true, Some("algebra")),
            (true, Some("algebra")),
            (true, Some("algebra")),
            (true, Some("algebra")),
            (false, Some("algebra")),
            (true, Some("geometry")),
            (true, Some("geometry")),
            (false, Some("geometry")),
        ];
        let session = completed_session(&results);
        progress.update_from_game_result(&session).unwrap();

        assert!(progress.weak_areas.contains(&"fractions".to_string()));
        assert!(progress.strong_areas.contains(&"algebra".to_string()));
        assert!(!progress.weak_areas.contains(&"geometry".to_string()));
        assert!(!progress.strong_areas.contains(&"geometry".to_string()));
    }

    #[test]
    fn daily_streak_increments_resets_and_dedupes() {
        let mut progress = Progress::new("user-1", "math");
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let day5 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        progress.update_streak_on(day1);
        assert_eq!(progress.stats.current_streak, 1);

        progress.update_streak_on(day2);
        assert_eq!(progress.stats.current_streak, 2);

        // Same day again: no-op.
        progress.update_streak_on(day2);
        assert_eq!(progress.stats.current_streak, 2);

        // Gap: reset to 1, longest retained.
        progress.update_streak_on(day5);
        assert_eq!(progress.stats.current_streak, 1);
        assert_eq!(progress.stats.longest_streak, 2);
    }

    #[test]
    fn monthly_snapshot_upserts() {
        let mut progress = Progress::new("user-1", "math");
        progress.stats.games_completed = 1;
        progress.record_monthly_snapshot();
        progress.stats.games_completed = 2;
        progress.record_monthly_snapshot();

        assert_eq!(progress.stats.monthly.len(), 1);
        assert_eq!(progress.stats.monthly[0].games_completed, 2);
    }

    #[test]
    fn rejects_sessions_that_are_not_completed() {
        let mut progress = Progress::new("user-1", "math");
        let session = Session::new("game-1", "user-1");
        let err = progress.update_from_game_result(&session).unwrap_err();
        assert!(matches!(err, ProgressError::SessionNotCompleted { .. }));
        assert_eq!(progress.stats.games_completed, 0);
    }

    #[test]
    fn cumulative_stats_accumulate() {
        let mut progress = Progress::new("user-1", "math");
        let first = completed_session(&[(true, None), (false, None)]);
        let second = completed_session(&[(true, None), (true, None)]);

        progress.update_from_game_result(&first).unwrap();
        progress.update_from_game_result(&second).unwrap();

        assert_eq!(progress.stats.games_completed, 2);
        assert_eq!(progress.stats.questions_answered, 4);
        assert_eq!(progress.stats.correct_answers, 3);
        assert!((progress.stats.average_accuracy - 0.75).abs() < 1e-9);
        assert_eq!(progress.completed_games.len(), 2);
    }
}
