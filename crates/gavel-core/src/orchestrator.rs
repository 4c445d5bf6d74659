use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use gavel_criteria::{CriteriaConfig, CriteriaRegistry};
use gavel_judge::{
    CriterionCallback, CriterionResult, Evaluation, EvaluationError, JudgeEngine,
};
use gavel_logging::{LogEvent, Logger};
use gavel_provider::{
    ChunkCallback, GenerateRequest, Generator, HistoryEntry, Refinement, Scorer,
};

use crate::cancel::CancelHandle;
use crate::error::PipelineError;
use crate::events::{EventSender, PipelineEvent, TurnEmitter};
use crate::state::{new_conversation_id, ConversationMode, ConversationState, Message};

/// A user turn entering the pipeline.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub mode: ConversationMode,
    pub message_id: Option<String>,
    pub skip_input_critique: bool,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            mode: ConversationMode::default(),
            message_id: None,
            skip_input_critique: false,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn skip_input_critique(mut self) -> Self {
        self.skip_input_critique = true;
        self
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub response: String,
    pub evaluation: Evaluation,
    pub iteration: u32,
}

struct Conversation {
    state: tokio::sync::Mutex<ConversationState>,
    cancel: Mutex<Option<Arc<CancelHandle>>>,
}

impl Conversation {
    fn new(conversation_id: String) -> Self {
        Self {
            state: tokio::sync::Mutex::new(ConversationState::new(conversation_id)),
            cancel: Mutex::new(None),
        }
    }
}

/// Sequences input critique, generation, evaluation, and bounded refinement
/// for every conversation.
///
/// One pipeline at a time per conversation id: the per-conversation async
/// mutex serializes turns, so iteration counters and history ordering cannot
/// race. Distinct conversations run fully in parallel; the only shared state
/// is the criteria registry, read through per-pipeline snapshots.
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    engine: JudgeEngine,
    registry: Arc<CriteriaRegistry>,
    logger: Arc<Logger>,
    conversations: Mutex<HashMap<String, Arc<Conversation>>>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn Scorer>,
        registry: Arc<CriteriaRegistry>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            generator,
            engine: JudgeEngine::new(scorer),
            registry,
            logger,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Run a user message through the full pipeline.
    ///
    /// With an event sender, every intermediate result is streamed in causal
    /// order; with `None` this is the synchronous request/response surface
    /// and only the final outcome is returned.
    pub async fn process_message(
        &self,
        request: TurnRequest,
        events: Option<EventSender>,
    ) -> Result<TurnOutcome, PipelineError> {
        let (conversation_id, conversation) =
            self.get_or_create(request.conversation_id.as_deref());
        let mut state = conversation.state.lock().await;

        let cancel = CancelHandle::new();
        *conversation.cancel.lock().expect("cancel slot poisoned") = Some(cancel.clone());
        let emitter = TurnEmitter::new(conversation_id, events, cancel.clone());

        state.cancelled = false;
        state.mode = request.mode;

        let user_message = Message::user(request.message);
        let message_id = request
            .message_id
            .unwrap_or_else(|| user_message.id.clone());
        state.push(user_message);

        self.drive(
            &mut state,
            &message_id,
            request.skip_input_critique,
            emitter,
            cancel,
        )
        .await
    }

    /// Re-run the last turn: the previous assistant message is removed from
    /// history and the pipeline restarts on the same user content.
    pub async fn retry_last_turn(
        &self,
        conversation_id: &str,
        skip_input_critique: bool,
        events: Option<EventSender>,
    ) -> Result<TurnOutcome, PipelineError> {
        let conversation = self.get(conversation_id)?;
        let mut state = conversation.state.lock().await;

        state.pop_last_assistant();
        let message_id = state
            .last_user_message()
            .map(|m| m.id.clone())
            .ok_or(PipelineError::NothingToRetry)?;

        let cancel = CancelHandle::new();
        *conversation.cancel.lock().expect("cancel slot poisoned") = Some(cancel.clone());
        let emitter = TurnEmitter::new(conversation_id.to_string(), events, cancel.clone());
        state.cancelled = false;

        self.drive(&mut state, &message_id, skip_input_critique, emitter, cancel)
            .await
    }

    /// Cancel the conversation's in-flight pipeline, if any. Takes effect at
    /// the next stage boundary; an outstanding capability call is abandoned
    /// and its late result discarded.
    pub fn cancel(&self, conversation_id: &str) -> Result<(), PipelineError> {
        let conversation = self.get(conversation_id)?;
        if let Some(handle) = conversation
            .cancel
            .lock()
            .expect("cancel slot poisoned")
            .as_ref()
        {
            debug!(conversation_id, "Cancelling pipeline");
            handle.cancel();
        }
        Ok(())
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>, PipelineError> {
        let conversation = self.get(conversation_id)?;
        let state = conversation.state.lock().await;
        Ok(state.messages.clone())
    }

    fn get(&self, conversation_id: &str) -> Result<Arc<Conversation>, PipelineError> {
        self.conversations
            .lock()
            .expect("conversations lock poisoned")
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownConversation(conversation_id.to_string()))
    }

    fn get_or_create(&self, conversation_id: Option<&str>) -> (String, Arc<Conversation>) {
        let mut conversations = self
            .conversations
            .lock()
            .expect("conversations lock poisoned");
        let id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(new_conversation_id);
        let conversation = conversations
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Conversation::new(id.clone())))
            .clone();
        (id, conversation)
    }

    /// Run the pipeline and translate its outcome into terminal events.
    async fn drive(
        &self,
        state: &mut ConversationState,
        message_id: &str,
        skip_critique: bool,
        emitter: TurnEmitter,
        cancel: Arc<CancelHandle>,
    ) -> Result<TurnOutcome, PipelineError> {
        let result = self
            .run_pipeline(state, message_id, skip_critique, &emitter, &cancel)
            .await;

        match &result {
            Ok(_) => {}
            Err(PipelineError::Cancelled) => {
                state.cancelled = true;
                emitter.emit_cancelled();
                self.logger.log(&LogEvent::PipelineCancelled {
                    conversation_id: state.conversation_id.clone(),
                });
            }
            Err(err) => {
                // History still ends at the user message: no partial
                // assistant output was appended, so the next turn starts
                // from a consistent state.
                emitter.emit(PipelineEvent::Error {
                    conversation_id: state.conversation_id.clone(),
                    error: err.to_string(),
                });
                self.logger.log(&LogEvent::ErrorEncountered {
                    conversation_id: state.conversation_id.clone(),
                    error: err.to_string(),
                });
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        state: &mut ConversationState,
        message_id: &str,
        skip_critique: bool,
        emitter: &TurnEmitter,
        cancel: &Arc<CancelHandle>,
    ) -> Result<TurnOutcome, PipelineError> {
        let started = Instant::now();
        // One snapshot per pipeline: every evaluation this turn sees the
        // same criteria set, whatever updates land meanwhile.
        let config = self.registry.snapshot();
        let conversation_id = state.conversation_id.clone();

        self.logger.log(&LogEvent::PipelineStarted {
            conversation_id: conversation_id.clone(),
            mode: state.mode.as_str().to_string(),
            message_preview: state
                .last_user_message()
                .map(|m| m.content.chars().take(100).collect())
                .unwrap_or_default(),
        });

        // A degenerate criteria set aborts before any capability call.
        if config.enabled_weight() <= 0.0 {
            return Err(PipelineError::Evaluation(
                EvaluationError::DegenerateCriteria,
            ));
        }

        if emitter.has_sink()
            && state.mode == ConversationMode::InputCritique
            && config.input_critique_enabled
            && !skip_critique
        {
            let text = state
                .last_user_message()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.spawn_input_critique(
                text,
                message_id.to_string(),
                config.clone(),
                emitter.clone(),
                cancel.clone(),
            );
        }

        let loop_enabled = config.feedback_loop_enabled && state.mode != ConversationMode::Simple;
        let max_iterations = config.max_refinement_iterations;
        let history = state.history();
        let mut iteration: u32 = 1;
        let mut previous: Option<(String, String)> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            emitter.emit(PipelineEvent::ChatbotGenerating {
                conversation_id: conversation_id.clone(),
                iteration,
            });
            self.logger.log(&LogEvent::GenerationStarted { iteration });
            let generation_started = Instant::now();

            let refinement = previous.as_ref().map(|(response, feedback)| Refinement {
                previous_response: response,
                feedback,
            });
            let response = self
                .generate_with_retry(&history, refinement, emitter, cancel)
                .await?;

            self.logger.log(&LogEvent::GenerationCompleted {
                iteration,
                chars: response.chars().count(),
                duration_secs: generation_started.elapsed().as_secs_f64(),
            });
            emitter.emit(PipelineEvent::ChatbotResponse {
                conversation_id: conversation_id.clone(),
                response: response.clone(),
                iteration,
            });

            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            emitter.emit(PipelineEvent::JudgeEvaluating {
                conversation_id: conversation_id.clone(),
                iteration,
            });
            self.logger.log(&LogEvent::EvaluationStarted { iteration });

            let evaluation = self
                .evaluate_with_retry(&response, &config, iteration, emitter, cancel)
                .await?;

            emitter.emit(PipelineEvent::JudgeResult {
                conversation_id: conversation_id.clone(),
                evaluation: evaluation.clone(),
            });
            self.logger.log(&LogEvent::EvaluationCompleted {
                iteration,
                overall_score: evaluation.overall_score,
                should_regenerate: evaluation.should_regenerate,
            });

            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            // The loop guarantees termination, not quality: the last
            // response is surfaced even when it never passed.
            if !evaluation.should_regenerate || !loop_enabled || iteration >= max_iterations {
                state.iteration = iteration;
                state.push(Message::assistant(
                    response.clone(),
                    iteration,
                    evaluation.clone(),
                ));

                emitter.emit(PipelineEvent::FinalResponse {
                    conversation_id: conversation_id.clone(),
                    response: response.clone(),
                    evaluation: evaluation.clone(),
                    iteration,
                });
                self.logger.log(&LogEvent::PipelineCompleted {
                    conversation_id: conversation_id.clone(),
                    iterations: iteration,
                    overall_score: evaluation.overall_score,
                    duration_secs: started.elapsed().as_secs_f64(),
                });

                return Ok(TurnOutcome {
                    conversation_id,
                    response,
                    evaluation,
                    iteration,
                });
            }

            let feedback = evaluation.refinement_context();
            previous = Some((response, feedback));
            iteration += 1;
            self.logger.log(&LogEvent::RefinementScheduled {
                next_iteration: iteration,
            });
        }
    }

    async fn generate_once(
        &self,
        history: &[HistoryEntry],
        refinement: Option<Refinement<'_>>,
        emitter: &TurnEmitter,
        cancel: &Arc<CancelHandle>,
    ) -> Result<String, PipelineError> {
        let request = GenerateRequest {
            history,
            refinement,
        };

        // Chunked streaming is only requested when someone is listening.
        let on_chunk: Option<ChunkCallback> = if emitter.has_sink() {
            let chunk_emitter = emitter.clone();
            Some(Arc::new(move |chunk: &str| {
                chunk_emitter.emit(PipelineEvent::ChatbotChunk {
                    conversation_id: chunk_emitter.conversation_id().to_string(),
                    chunk: chunk.to_string(),
                });
            }))
        } else {
            None
        };

        tokio::select! {
            result = self.generator.generate_with_callback(request, on_chunk) => {
                result.map_err(PipelineError::from)
            }
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    async fn generate_with_retry(
        &self,
        history: &[HistoryEntry],
        refinement: Option<Refinement<'_>>,
        emitter: &TurnEmitter,
        cancel: &Arc<CancelHandle>,
    ) -> Result<String, PipelineError> {
        match self.generate_once(history, refinement, emitter, cancel).await {
            Err(PipelineError::Capability(err)) => {
                warn!(error = %err, "Generation failed, retrying once");
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                self.generate_once(history, refinement, emitter, cancel).await
            }
            other => other,
        }
    }

    async fn evaluate_once(
        &self,
        content: &str,
        config: &CriteriaConfig,
        iteration: u32,
        emitter: &TurnEmitter,
        cancel: &Arc<CancelHandle>,
    ) -> Result<Evaluation, PipelineError> {
        let logger = self.logger.clone();
        let result_emitter = emitter.clone();
        let callback: CriterionCallback = Arc::new(move |result: &CriterionResult| {
            logger.log(&LogEvent::CriterionScored {
                iteration,
                name: result.name.clone(),
                score: result.score,
                passed: result.passed,
            });
            result_emitter.emit(PipelineEvent::JudgeCriterionResult {
                conversation_id: result_emitter.conversation_id().to_string(),
                criterion: result.clone(),
            });
        });

        tokio::select! {
            result = self.engine.evaluate(content, config, Some(callback)) => {
                result.map_err(PipelineError::from)
            }
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    async fn evaluate_with_retry(
        &self,
        content: &str,
        config: &CriteriaConfig,
        iteration: u32,
        emitter: &TurnEmitter,
        cancel: &Arc<CancelHandle>,
    ) -> Result<Evaluation, PipelineError> {
        match self
            .evaluate_once(content, config, iteration, emitter, cancel)
            .await
        {
            Err(PipelineError::Evaluation(err)) if err.is_capability() => {
                warn!(error = %err, "Evaluation failed, retrying once");
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                self.evaluate_once(content, config, iteration, emitter, cancel)
                    .await
            }
            other => other,
        }
    }

    /// The input critique runs concurrently with generation: it never delays
    /// the response, its events interleave with generation events, and its
    /// aggregate result is discarded (the stream is advisory display).
    fn spawn_input_critique(
        &self,
        text: String,
        message_id: String,
        config: Arc<CriteriaConfig>,
        emitter: TurnEmitter,
        cancel: Arc<CancelHandle>,
    ) {
        let engine = self.engine.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            logger.log(&LogEvent::CritiqueStarted {
                message_id: message_id.clone(),
            });

            let critique_emitter = emitter.clone();
            let tagged_id = message_id.clone();
            let callback: CriterionCallback = Arc::new(move |result: &CriterionResult| {
                critique_emitter.emit(PipelineEvent::UserInputEvaluation {
                    conversation_id: critique_emitter.conversation_id().to_string(),
                    criterion: result.clone(),
                    message_id: tagged_id.clone(),
                });
            });

            let result = tokio::select! {
                result = engine.evaluate(&text, &config, Some(callback)) => result,
                _ = cancel.cancelled() => return,
            };

            if let Err(err) = result {
                warn!(error = %err, "Input critique failed");
                emitter.emit(PipelineEvent::Error {
                    conversation_id: emitter.conversation_id().to_string(),
                    error: format!("input critique failed: {err}"),
                });
            }
        });
    }
}
