//! AI-backed difficulty advisor with a mandatory deterministic fallback.
//!
//! The advisor never returns an error: any service failure or timeout is
//! logged and absorbed by `learn_core::fallback_recommendation`, so a session
//! is never left without a difficulty decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use learn_core::adaptive::{
    PerformanceSignals, Recommendation, Sensitivity, fallback_recommendation,
};
use learn_core::state::Session;

pub type RecommendationError = Box<dyn std::error::Error + Send + Sync>;

/// External AI recommendation collaborator.
///
/// May fail or stall; the advisor treats every failure mode uniformly.
#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn recommend_difficulty(
        &self,
        signals: &PerformanceSignals,
    ) -> Result<Recommendation, RecommendationError>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SIGNAL_WINDOW: usize = 10;

/// Produces difficulty recommendations from a session's recent performance.
pub struct DifficultyAdvisor {
    service: Option<Arc<dyn RecommendationService>>,
    sensitivity: Sensitivity,
    timeout: Duration,
    signal_window: usize,
}

impl DifficultyAdvisor {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Self {
            service: None,
            sensitivity,
            timeout: DEFAULT_TIMEOUT,
            signal_window: DEFAULT_SIGNAL_WINDOW,
        }
    }

    pub fn with_service(mut self, service: Arc<dyn RecommendationService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_signal_window(mut self, window: usize) -> Self {
        self.signal_window = window;
        self
    }

    /// Signals extracted from the tail of the session's results.
    pub fn signals(&self, session: &Session, current_difficulty: u8) -> PerformanceSignals {
        PerformanceSignals::from_results(
            &session.results,
            self.signal_window,
            session.performance.hints_used,
            current_difficulty,
        )
    }

    /// Produces a recommendation, falling back to the deterministic rule on
    /// any service failure or timeout.
    pub async fn advise(&self, session: &Session, current_difficulty: u8) -> Recommendation {
        let signals = self.signals(session, current_difficulty);

        if let Some(service) = &self.service {
            match tokio::time::timeout(self.timeout, service.recommend_difficulty(&signals)).await {
                Ok(Ok(recommendation)) => {
                    debug!(
                        target: "runtime::adaptive",
                        session = session.id,
                        difficulty = recommendation.new_difficulty,
                        confidence = recommendation.confidence,
                        "AI recommendation accepted"
                    );
                    return recommendation;
                }
                Ok(Err(err)) => {
                    warn!(
                        target: "runtime::adaptive",
                        session = session.id,
                        error = %err,
                        "AI recommendation failed, using fallback"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "runtime::adaptive",
                        session = session.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "AI recommendation timed out, using fallback"
                    );
                }
            }
        }

        fallback_recommendation(&signals, self.sensitivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learn_core::state::QuestionResult;

    struct FixedService(Recommendation);

    #[async_trait]
    impl RecommendationService for FixedService {
        async fn recommend_difficulty(
            &self,
            _signals: &PerformanceSignals,
        ) -> Result<Recommendation, RecommendationError> {
            Ok(self.0.clone())
        }
    }

    struct FailingService;

    #[async_trait]
    impl RecommendationService for FailingService {
        async fn recommend_difficulty(
            &self,
            _signals: &PerformanceSignals,
        ) -> Result<Recommendation, RecommendationError> {
            Err("rate limited".into())
        }
    }

    struct StallingService;

    #[async_trait]
    impl RecommendationService for StallingService {
        async fn recommend_difficulty(
            &self,
            _signals: &PerformanceSignals,
        ) -> Result<Recommendation, RecommendationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("the advisor times out first")
        }
    }

    fn session_with_accuracy(correct: usize, incorrect: usize) -> Session {
        let mut session = Session::new("game-1", "user-1");
        for i in 0..correct {
            session
                .record_question_result(QuestionResult::new(format!("c{i}"), "a", true, 1_000))
                .unwrap();
        }
        for i in 0..incorrect {
            session
                .record_question_result(QuestionResult::new(format!("w{i}"), "b", false, 1_000))
                .unwrap();
        }
        session
    }

    #[tokio::test]
    async fn service_recommendation_is_trusted_verbatim() {
        let rec = Recommendation {
            new_difficulty: 4,
            reason: "model says so".into(),
            confidence: 0.77,
            suggestions: vec!["practice fractions".into()],
        };
        let advisor =
            DifficultyAdvisor::new(Sensitivity::Medium).with_service(Arc::new(FixedService(rec)));

        let session = session_with_accuracy(1, 9);
        let out = advisor.advise(&session, 3).await;
        assert_eq!(out.new_difficulty, 4);
        assert_eq!(out.reason, "model says so");
    }

    #[tokio::test]
    async fn failure_falls_back_to_the_rule() {
        let advisor =
            DifficultyAdvisor::new(Sensitivity::Medium).with_service(Arc::new(FailingService));

        // 90% recent accuracy: the medium rule increases.
        let session = session_with_accuracy(9, 1);
        let out = advisor.advise(&session, 3).await;
        assert_eq!(out.new_difficulty, 4);

        // 10% recent accuracy: the medium rule decreases.
        let session = session_with_accuracy(1, 9);
        let out = advisor.advise(&session, 3).await;
        assert_eq!(out.new_difficulty, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_the_rule() {
        let advisor = DifficultyAdvisor::new(Sensitivity::Medium)
            .with_service(Arc::new(StallingService))
            .with_timeout(Duration::from_millis(50));

        let session = session_with_accuracy(9, 1);
        let out = advisor.advise(&session, 2).await;
        assert_eq!(out.new_difficulty, 3);
    }

    #[tokio::test]
    async fn no_service_uses_the_rule_directly() {
        let advisor = DifficultyAdvisor::new(Sensitivity::High);
        let session = session_with_accuracy(3, 1);
        let out = advisor.advise(&session, 2).await;
        // 75% accuracy clears the high-sensitivity 70% increase threshold.
        assert_eq!(out.new_difficulty, 3);
    }

    #[tokio::test]
    async fn signal_window_bounds_the_tail() {
        let advisor = DifficultyAdvisor::new(Sensitivity::Medium).with_signal_window(2);
        let mut session = session_with_accuracy(0, 8);
        // Two trailing correct answers dominate a window of 2.
        session
            .record_question_result(QuestionResult::new("t1", "a", true, 1_000))
            .unwrap();
        session
            .record_question_result(QuestionResult::new("t2", "a", true, 1_000))
            .unwrap();

        let signals = advisor.signals(&session, 3);
        assert_eq!(signals.recent_accuracy, 100.0);
        assert_eq!(signals.correct_streak, 2);
    }
}
