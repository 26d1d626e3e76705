//! Static game content: definitions, questions, and scoring configuration.
//!
//! Content is read-only input supplied by an external definition source at
//! initialize time. The runtime never mutates it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adaptive::{MAX_DIFFICULTY, MIN_DIFFICULTY};

/// Errors raised when validating game content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("game definition is missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("game `{game_id}` has no questions")]
    NoQuestions { game_id: String },

    #[error("difficulty {value} outside valid range {MIN_DIFFICULTY}..={MAX_DIFFICULTY}")]
    DifficultyOutOfRange { value: u8 },
}

/// How a question is answered and how correctness is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    /// Exact match against one of the listed options.
    MultipleChoice,
    /// Exact match against "true" / "false".
    TrueFalse,
    /// Case-insensitive, whitespace-trimmed string comparison.
    FreeText,
}

/// One question within a game's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    /// 1..=5, matching the adaptive difficulty scale.
    pub difficulty: u8,
    #[serde(default)]
    pub skill_area: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    /// Per-question point override; falls back to the scoring config.
    #[serde(default)]
    pub points: Option<i32>,
}

impl Question {
    /// Judges a submitted answer against this question's correct answer.
    pub fn check_answer(&self, answer: &str) -> bool {
        match self.kind {
            QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
                answer == self.correct_answer
            }
            QuestionKind::FreeText => {
                answer.trim().to_lowercase() == self.correct_answer.trim().to_lowercase()
            }
        }
    }
}

/// Point values applied per recorded result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub points_per_correct: i32,
    pub points_per_incorrect: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points_per_correct: 10,
            points_per_incorrect: -5,
        }
    }
}

/// Per-game behavioral configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub randomize_questions: bool,
    #[serde(default)]
    pub allow_skip: bool,
    #[serde(default)]
    pub show_hints: bool,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            randomize_questions: false,
            allow_skip: false,
            show_hints: true,
            scoring: ScoringConfig::default(),
        }
    }
}

/// A complete, playable game definition keyed by id and type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDefinition {
    pub id: String,
    pub title: String,
    pub subject: String,
    /// Type tag used by the runtime registry to pick a game variant.
    pub game_type: String,
    pub difficulty: u8,
    #[serde(default)]
    pub config: GameConfig,
    pub questions: Vec<Question>,
}

impl GameDefinition {
    /// Validates that the definition is playable.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.id.is_empty() {
            return Err(ContentError::MissingField { field: "id" });
        }
        if self.title.is_empty() {
            return Err(ContentError::MissingField { field: "title" });
        }
        if self.subject.is_empty() {
            return Err(ContentError::MissingField { field: "subject" });
        }
        if self.game_type.is_empty() {
            return Err(ContentError::MissingField { field: "game_type" });
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(ContentError::DifficultyOutOfRange {
                value: self.difficulty,
            });
        }
        if self.questions.is_empty() {
            return Err(ContentError::NoQuestions {
                game_id: self.id.clone(),
            });
        }
        for question in &self.questions {
            if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&question.difficulty) {
                return Err(ContentError::DifficultyOutOfRange {
                    value: question.difficulty,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind, correct: &str) -> Question {
        Question {
            id: "q1".into(),
            prompt: "?".into(),
            kind,
            options: vec![],
            correct_answer: correct.into(),
            difficulty: 2,
            skill_area: None,
            hint: None,
            points: None,
        }
    }

    #[test]
    fn multiple_choice_requires_exact_match() {
        let q = question(QuestionKind::MultipleChoice, "Paris");
        assert!(q.check_answer("Paris"));
        assert!(!q.check_answer("paris"));
    }

    #[test]
    fn free_text_ignores_case_and_whitespace() {
        let q = question(QuestionKind::FreeText, "Paris");
        assert!(q.check_answer("  paris "));
        assert!(q.check_answer("PARIS"));
        assert!(!q.check_answer("London"));
    }

    #[test]
    fn definition_without_questions_is_rejected() {
        let def = GameDefinition {
            id: "g1".into(),
            title: "Capitals".into(),
            subject: "geography".into(),
            game_type: "quiz".into(),
            difficulty: 3,
            config: GameConfig::default(),
            questions: vec![],
        };
        assert!(matches!(
            def.validate(),
            Err(ContentError::NoQuestions { .. })
        ));
    }

    #[test]
    fn out_of_range_difficulty_is_rejected() {
        let def = GameDefinition {
            id: "g1".into(),
            title: "Capitals".into(),
            subject: "geography".into(),
            game_type: "quiz".into(),
            difficulty: 6,
            config: GameConfig::default(),
            questions: vec![question(QuestionKind::TrueFalse, "true")],
        };
        assert!(matches!(
            def.validate(),
            Err(ContentError::DifficultyOutOfRange { value: 6 })
        ));
    }
}
