//! Deterministic difficulty-adaptation rule and its input signals.
//!
//! The AI recommendation path lives in the `runtime` crate; this module is
//! the mandatory fallback. It must always produce a valid recommendation so
//! that a session is never left without a difficulty decision.

use serde::{Deserialize, Serialize};

use crate::state::QuestionResult;

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

/// How aggressively difficulty reacts to recent performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

/// Threshold table derived from a sensitivity setting.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Accuracy (0..1) at or above which difficulty increases.
    pub increase_accuracy: f64,
    /// Accuracy (0..1) at or below which difficulty decreases.
    pub decrease_accuracy: f64,
    /// Correct streak that triggers an increase on its own.
    pub streak_for_increase: u32,
    /// Response time considered slow, as a multiple of the running average.
    pub response_time_multiplier: f64,
}

impl Sensitivity {
    pub fn thresholds(self) -> Thresholds {
        match self {
            Sensitivity::Low => Thresholds {
                increase_accuracy: 0.90,
                decrease_accuracy: 0.40,
                streak_for_increase: 10,
                response_time_multiplier: 2.0,
            },
            Sensitivity::Medium => Thresholds {
                increase_accuracy: 0.80,
                decrease_accuracy: 0.50,
                streak_for_increase: 7,
                response_time_multiplier: 1.5,
            },
            Sensitivity::High => Thresholds {
                increase_accuracy: 0.70,
                decrease_accuracy: 0.60,
                streak_for_increase: 5,
                response_time_multiplier: 1.2,
            },
        }
    }
}

/// Recent performance signals fed to the difficulty decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSignals {
    /// Percentage, 0-100.
    pub recent_accuracy: f64,
    pub correct_streak: u32,
    pub average_response_time_secs: f64,
    pub hints_used: u32,
    pub current_difficulty: u8,
}

impl PerformanceSignals {
    /// Derives signals from the tail of a result sequence.
    ///
    /// `window` bounds how many trailing results are considered. The streak
    /// is counted backwards from the most recent result.
    pub fn from_results(
        results: &[QuestionResult],
        window: usize,
        hints_used: u32,
        current_difficulty: u8,
    ) -> Self {
        let start = results.len().saturating_sub(window);
        let recent = &results[start..];

        if recent.is_empty() {
            return Self {
                recent_accuracy: 0.0,
                correct_streak: 0,
                average_response_time_secs: 0.0,
                hints_used,
                current_difficulty,
            };
        }

        let correct = recent.iter().filter(|r| r.correct).count();
        let total_ms: u64 = recent.iter().map(|r| r.response_time_ms).sum();
        let streak = recent.iter().rev().take_while(|r| r.correct).count();

        Self {
            recent_accuracy: (correct as f64 / recent.len() as f64 * 100.0).round(),
            correct_streak: streak as u32,
            average_response_time_secs: total_ms as f64 / recent.len() as f64 / 1000.0,
            hints_used,
            current_difficulty,
        }
    }
}

/// A difficulty-change decision, AI-sourced or rule-based.
///
/// Immutable once produced; consumed exactly once and appended verbatim to
/// the session's adaptation audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub new_difficulty: u8,
    pub reason: String,
    /// 0..1.
    pub confidence: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Rule-based difficulty decision used when the AI path fails or is absent.
///
/// Increase wins over decrease: a long correct streak raises difficulty even
/// at a sensitivity where the accuracy thresholds would not.
pub fn fallback_recommendation(
    signals: &PerformanceSignals,
    sensitivity: Sensitivity,
) -> Recommendation {
    let thresholds = sensitivity.thresholds();
    let accuracy = (signals.recent_accuracy / 100.0).clamp(0.0, 1.0);
    let current = signals
        .current_difficulty
        .clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);

    if accuracy >= thresholds.increase_accuracy
        || signals.correct_streak >= thresholds.streak_for_increase
    {
        let reason = if signals.correct_streak >= thresholds.streak_for_increase {
            format!("{} correct answers in a row", signals.correct_streak)
        } else {
            format!(
                "recent accuracy {:.0}% at or above the {:.0}% threshold",
                signals.recent_accuracy,
                thresholds.increase_accuracy * 100.0
            )
        };
        Recommendation {
            new_difficulty: (current + 1).min(MAX_DIFFICULTY),
            reason,
            confidence: accuracy,
            suggestions: Vec::new(),
        }
    } else if accuracy <= thresholds.decrease_accuracy {
        Recommendation {
            new_difficulty: current.saturating_sub(1).max(MIN_DIFFICULTY),
            reason: format!(
                "recent accuracy {:.0}% at or below the {:.0}% threshold",
                signals.recent_accuracy,
                thresholds.decrease_accuracy * 100.0
            ),
            confidence: 1.0 - accuracy,
            suggestions: Vec::new(),
        }
    } else {
        Recommendation {
            new_difficulty: current,
            reason: "current difficulty level is appropriate".to_string(),
            confidence: 0.5,
            suggestions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(accuracy: f64, streak: u32, difficulty: u8) -> PerformanceSignals {
        PerformanceSignals {
            recent_accuracy: accuracy,
            correct_streak: streak,
            average_response_time_secs: 8.0,
            hints_used: 0,
            current_difficulty: difficulty,
        }
    }

    #[test]
    fn medium_sensitivity_increases_on_high_accuracy() {
        let rec = fallback_recommendation(&signals(85.0, 2, 3), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, 4);
        assert!(rec.reason.contains("80"), "reason was {:?}", rec.reason);
        assert!((rec.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn medium_sensitivity_decreases_on_low_accuracy() {
        let rec = fallback_recommendation(&signals(45.0, 0, 3), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, 2);
        assert!(rec.reason.contains("45"));
        assert!((rec.confidence - 0.55).abs() < 1e-9);
    }

    #[test]
    fn streak_alone_triggers_increase() {
        let rec = fallback_recommendation(&signals(60.0, 7, 2), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, 3);
        assert!(rec.reason.contains("7 correct"));
    }

    #[test]
    fn maintain_between_thresholds() {
        let rec = fallback_recommendation(&signals(65.0, 1, 3), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, 3);
        assert!((rec.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn increase_clamps_at_max() {
        let rec = fallback_recommendation(&signals(95.0, 0, 5), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, MAX_DIFFICULTY);
    }

    #[test]
    fn decrease_clamps_at_min() {
        let rec = fallback_recommendation(&signals(10.0, 0, 1), Sensitivity::Medium);
        assert_eq!(rec.new_difficulty, MIN_DIFFICULTY);
    }

    #[test]
    fn sensitivity_shifts_thresholds() {
        // 75% accuracy: high sensitivity increases, low does not.
        let high = fallback_recommendation(&signals(75.0, 0, 3), Sensitivity::High);
        let low = fallback_recommendation(&signals(75.0, 0, 3), Sensitivity::Low);
        assert_eq!(high.new_difficulty, 4);
        assert_eq!(low.new_difficulty, 3);
    }

    #[test]
    fn signals_from_result_tail() {
        use crate::state::QuestionResult;
        let results: Vec<QuestionResult> = [true, true, false, true, true]
            .iter()
            .enumerate()
            .map(|(i, &correct)| QuestionResult::new(format!("q{i}"), "a", correct, 2_000))
            .collect();

        let signals = PerformanceSignals::from_results(&results, 10, 1, 3);
        assert_eq!(signals.recent_accuracy, 80.0);
        assert_eq!(signals.correct_streak, 2);
        assert!((signals.average_response_time_secs - 2.0).abs() < 1e-9);
        assert_eq!(signals.hints_used, 1);
    }

    #[test]
    fn empty_results_yield_zero_signals() {
        let signals = PerformanceSignals::from_results(&[], 10, 0, 2);
        assert_eq!(signals.recent_accuracy, 0.0);
        assert_eq!(signals.correct_streak, 0);
    }
}
