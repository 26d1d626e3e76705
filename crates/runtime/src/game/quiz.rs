//! The quiz variant: an ordered question queue with scoring and adaptive
//! question re-selection.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use learn_core::adaptive::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use learn_core::content::{GameDefinition, Question};
use learn_core::state::{Checkpoint, QuestionResult, Session, SessionProgressPatch};
use learn_core::Recommendation;

use crate::events::{EventBus, names};

use super::{AdaptOutcome, AnswerOutcome, GameError, GameResult, GameRuntime};

/// Accuracy floor below which upward difficulty adjustments are refused.
const ADAPT_UP_ACCURACY_FLOOR: f64 = 0.5;

/// Resumable variant state stored in session checkpoints.
#[derive(Serialize, Deserialize)]
struct QuizCheckpoint {
    index: usize,
    difficulty: u8,
    queue: Vec<Question>,
}

/// One quiz play-through over a game definition's question list.
pub struct QuizGame {
    definition: GameDefinition,
    queue: Vec<Question>,
    index: usize,
    difficulty: u8,
    initialized: bool,
    running: bool,
}

impl QuizGame {
    pub fn new(definition: GameDefinition) -> Self {
        let difficulty = definition.difficulty;
        Self {
            definition,
            queue: Vec::new(),
            index: 0,
            difficulty,
            initialized: false,
            running: false,
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.queue.get(self.index)
    }

    pub fn remaining_questions(&self) -> usize {
        self.queue.len().saturating_sub(self.index)
    }

    fn ensure_running(&self) -> GameResult<()> {
        if !self.initialized {
            return Err(GameError::NotInitialized {
                game_id: self.definition.id.clone(),
            });
        }
        if !self.running {
            return Err(GameError::NotRunning {
                game_id: self.definition.id.clone(),
            });
        }
        Ok(())
    }

    fn active_question(&self) -> GameResult<Question> {
        self.current_question().cloned().ok_or(GameError::NotRunning {
            game_id: self.definition.id.clone(),
        })
    }

    /// Records one result, advances the queue, and announces what comes next.
    async fn record_and_advance(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
        result: QuestionResult,
    ) -> GameResult<AnswerOutcome> {
        let correct = result.correct;
        let points = result.points.unwrap_or(0);
        let question_id = result.question_id.clone();
        let skipped = result.skipped;

        session.record_question_result(result)?;
        self.index += 1;
        session.apply_progress(SessionProgressPatch {
            current_question: Some(self.index),
            ..SessionProgressPatch::default()
        })?;

        bus.publish(
            names::ANSWER_RECORDED,
            json!({
                "game_id": self.definition.id,
                "session_id": session.id,
                "question_id": question_id,
                "correct": correct,
                "points": points,
                "skipped": skipped,
            }),
        )
        .await;

        let next_question = self.current_question().cloned();
        if let Some(question) = &next_question {
            self.announce_question(session, bus, question).await;
        }

        Ok(AnswerOutcome {
            correct,
            points,
            finished: next_question.is_none(),
            next_question,
        })
    }

    async fn announce_question(&self, session: &Session, bus: &EventBus, question: &Question) {
        bus.publish(
            names::QUESTION_SHOWN,
            json!({
                "game_id": self.definition.id,
                "session_id": session.id,
                "question_id": question.id,
                "prompt": question.prompt,
                "options": question.options,
                "index": self.index,
                "total": self.queue.len(),
            }),
        )
        .await;
    }

    /// Swaps the undelivered tail of the queue for same-game questions at the
    /// new difficulty. Delivered questions are never touched; with no
    /// candidates the queue stays as-is.
    fn substitute_remaining(&mut self, new_difficulty: u8) -> usize {
        let delivered: Vec<String> = self.queue[..self.index]
            .iter()
            .map(|q| q.id.clone())
            .collect();
        let candidates: Vec<Question> = self
            .definition
            .questions
            .iter()
            .filter(|q| q.difficulty == new_difficulty && !delivered.contains(&q.id))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return 0;
        }
        let replaced = candidates.len();
        self.queue.truncate(self.index);
        self.queue.extend(candidates);
        replaced
    }
}

#[async_trait]
impl GameRuntime for QuizGame {
    fn game_id(&self) -> &str {
        &self.definition.id
    }

    fn current_difficulty(&self) -> u8 {
        self.difficulty
    }

    async fn initialize(&mut self, session: &mut Session, _bus: &EventBus) -> GameResult<()> {
        self.definition.validate()?;

        self.queue = self.definition.questions.clone();
        if self.definition.config.randomize_questions {
            self.queue.shuffle(&mut thread_rng());
        }
        self.index = 0;
        self.difficulty = self.definition.difficulty;
        self.initialized = true;

        session.apply_progress(SessionProgressPatch {
            current_question: Some(0),
            total_questions: Some(self.queue.len()),
            ..SessionProgressPatch::default()
        })?;

        debug!(
            target: "runtime::game",
            game = self.definition.id,
            session = session.id,
            questions = self.queue.len(),
            "quiz initialized"
        );
        Ok(())
    }

    async fn start(&mut self, session: &mut Session, bus: &EventBus) -> GameResult<()> {
        if !self.initialized {
            return Err(GameError::NotInitialized {
                game_id: self.definition.id.clone(),
            });
        }
        self.running = true;
        if let Some(question) = self.current_question().cloned() {
            self.announce_question(session, bus, &question).await;
        }
        Ok(())
    }

    async fn pause(&mut self, _session: &mut Session, _bus: &EventBus) -> GameResult<()> {
        self.ensure_running()?;
        self.running = false;
        Ok(())
    }

    async fn resume(&mut self, _session: &mut Session, _bus: &EventBus) -> GameResult<()> {
        if !self.initialized {
            return Err(GameError::NotInitialized {
                game_id: self.definition.id.clone(),
            });
        }
        self.running = true;
        Ok(())
    }

    async fn complete(&mut self, _session: &mut Session, _bus: &EventBus) -> GameResult<()> {
        self.running = false;
        Ok(())
    }

    async fn submit_answer(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
        question_id: &str,
        answer: &str,
        response_time_ms: u64,
    ) -> GameResult<AnswerOutcome> {
        self.ensure_running()?;
        let question = self.active_question()?;
        if question.id != question_id {
            return Err(GameError::UnknownQuestion {
                game_id: self.definition.id.clone(),
                question_id: question_id.to_string(),
            });
        }

        let correct = question.check_answer(answer);
        let scoring = self.definition.config.scoring;
        let points = question.points.unwrap_or(if correct {
            scoring.points_per_correct
        } else {
            scoring.points_per_incorrect
        });

        let mut result =
            QuestionResult::new(&question.id, answer, correct, response_time_ms).with_points(points);
        if let Some(skill) = &question.skill_area {
            result = result.with_skill_area(skill);
        }

        self.record_and_advance(session, bus, result).await
    }

    async fn skip_question(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
    ) -> GameResult<AnswerOutcome> {
        self.ensure_running()?;
        if !self.definition.config.allow_skip {
            return Err(GameError::SkipNotAllowed {
                game_id: self.definition.id.clone(),
            });
        }
        let question = self.active_question()?;

        let mut result = QuestionResult::new(&question.id, "", false, 0)
            .with_skipped(true)
            .with_points(0);
        if let Some(skill) = &question.skill_area {
            result = result.with_skill_area(skill);
        }

        self.record_and_advance(session, bus, result).await
    }

    async fn use_hint(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
    ) -> GameResult<Option<String>> {
        self.ensure_running()?;
        if !self.definition.config.show_hints {
            return Err(GameError::HintsDisabled {
                game_id: self.definition.id.clone(),
            });
        }
        let question = self.active_question()?;
        session.record_hint()?;

        bus.publish(
            names::HINT_USED,
            json!({
                "game_id": self.definition.id,
                "session_id": session.id,
                "question_id": question.id,
            }),
        )
        .await;

        Ok(question.hint)
    }

    async fn update_progress(
        &mut self,
        session: &mut Session,
        patch: SessionProgressPatch,
    ) -> GameResult<()> {
        session.apply_progress(patch)?;
        Ok(())
    }

    async fn adapt_difficulty(
        &mut self,
        session: &mut Session,
        bus: &EventBus,
        recommendation: &Recommendation,
    ) -> GameResult<AdaptOutcome> {
        if !self.initialized {
            return Err(GameError::NotInitialized {
                game_id: self.definition.id.clone(),
            });
        }

        let new_difficulty = recommendation
            .new_difficulty
            .clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        let from = self.difficulty;

        // Safety rail: never push a struggling learner upward.
        if new_difficulty > from && session.performance.accuracy < ADAPT_UP_ACCURACY_FLOOR {
            warn!(
                target: "runtime::game",
                game = self.definition.id,
                session = session.id,
                accuracy = session.performance.accuracy,
                proposed = new_difficulty,
                "refusing upward difficulty adjustment"
            );
            session.record_adaptation(
                "difficulty_change_refused",
                json!({
                    "proposed": new_difficulty,
                    "accuracy": session.performance.accuracy,
                    "reason": recommendation.reason,
                }),
            )?;
            return Ok(AdaptOutcome {
                applied: false,
                difficulty: from,
                questions_replaced: 0,
            });
        }

        session.record_adaptation("difficulty_change", serde_json::to_value(recommendation)?)?;

        if new_difficulty == from {
            return Ok(AdaptOutcome {
                applied: true,
                difficulty: from,
                questions_replaced: 0,
            });
        }

        let replaced = self.substitute_remaining(new_difficulty);
        if replaced > 0 {
            session.apply_progress(SessionProgressPatch {
                total_questions: Some(self.queue.len()),
                ..SessionProgressPatch::default()
            })?;
        }
        self.difficulty = new_difficulty;
        session.record_difficulty_change(from, new_difficulty, &recommendation.reason)?;

        bus.publish(
            names::DIFFICULTY_CHANGED,
            json!({
                "game_id": self.definition.id,
                "session_id": session.id,
                "from": from,
                "to": new_difficulty,
                "reason": recommendation.reason,
                "confidence": recommendation.confidence,
                "questions_replaced": replaced,
            }),
        )
        .await;

        Ok(AdaptOutcome {
            applied: true,
            difficulty: new_difficulty,
            questions_replaced: replaced,
        })
    }

    fn checkpoint_data(&self) -> Value {
        serde_json::to_value(QuizCheckpoint {
            index: self.index,
            difficulty: self.difficulty,
            queue: self.queue.clone(),
        })
        .unwrap_or(Value::Null)
    }

    fn restore_from_checkpoint(
        &mut self,
        session: &mut Session,
        checkpoint: &Checkpoint,
    ) -> GameResult<()> {
        let state: QuizCheckpoint = serde_json::from_value(checkpoint.data.clone())?;
        self.queue = state.queue;
        self.index = state.index;
        self.difficulty = state.difficulty;
        self.initialized = true;
        session.apply_progress(SessionProgressPatch {
            current_question: Some(self.index),
            total_questions: Some(self.queue.len()),
            ..SessionProgressPatch::default()
        })?;
        Ok(())
    }

    async fn cleanup(&mut self) -> GameResult<()> {
        self.queue.clear();
        self.index = 0;
        self.initialized = false;
        self.running = false;
        Ok(())
    }
}
