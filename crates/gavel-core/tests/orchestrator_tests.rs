use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use gavel_core::{ConversationMode, Orchestrator, PipelineError, PipelineEvent, TurnRequest};
use gavel_criteria::{CriteriaConfig, CriteriaPatch, CriteriaRegistry};
use gavel_logging::{LogFormat, Logger};
use gavel_provider::{
    CapabilityError, ChunkCallback, GenerateRequest, Generator, ScoreOutcome, ScoreRequest, Scorer,
};

// ============================================================
// Fakes
// ============================================================

/// Generator producing "response <n>"; optionally failing the first N calls,
/// optionally blocking forever on a chosen call (signalling the test first).
struct ScriptedGenerator {
    calls: AtomicUsize,
    fail_first: usize,
    block_on_call: Option<usize>,
    blocked: Arc<Notify>,
}

impl ScriptedGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            block_on_call: None,
            blocked: Arc::new(Notify::new()),
        })
    }

    fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: n,
            block_on_call: None,
            blocked: Arc::new(Notify::new()),
        })
    }

    fn blocking_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            block_on_call: Some(call),
            blocked: Arc::new(Notify::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_with_callback(
        &self,
        _request: GenerateRequest<'_>,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if call <= self.fail_first {
            return Err(CapabilityError::Http("transient failure".to_string()));
        }
        if self.block_on_call == Some(call) {
            self.blocked.notify_one();
            std::future::pending::<()>().await;
        }

        let text = format!("response {call}");
        if let Some(callback) = on_chunk {
            callback("response ");
            callback(&call.to_string());
        }
        Ok(text)
    }
}

/// Scorer consuming a queue of scores, one per call; the last score repeats
/// once the queue is drained. Optionally blocks forever on a chosen call.
struct QueueScorer {
    scores: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    calls: AtomicUsize,
    block_on_call: Option<usize>,
    blocked: Arc<Notify>,
}

impl QueueScorer {
    fn new(scores: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            last: Mutex::new(0.0),
            calls: AtomicUsize::new(0),
            block_on_call: None,
            blocked: Arc::new(Notify::new()),
        })
    }

    fn blocking_on(call: usize, scores: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            last: Mutex::new(0.0),
            calls: AtomicUsize::new(0),
            block_on_call: Some(call),
            blocked: Arc::new(Notify::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for QueueScorer {
    fn name(&self) -> &str {
        "queue"
    }

    async fn score(&self, _request: ScoreRequest<'_>) -> Result<ScoreOutcome, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.block_on_call == Some(call) {
            self.blocked.notify_one();
            std::future::pending::<()>().await;
        }

        let score = {
            let mut queue = self.scores.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            let score = queue.pop_front().unwrap_or(*last);
            *last = score;
            score
        };
        Ok(ScoreOutcome {
            score,
            feedback: "scripted feedback".to_string(),
        })
    }
}

// ============================================================
// Helpers
// ============================================================

fn single_criterion_config(max_iterations: u32) -> CriteriaConfig {
    let mut config = CriteriaConfig::default();
    config.criteria.truncate(1);
    config.criteria[0].weight = 1.0;
    config.criteria[0].threshold = 70.0;
    config.max_refinement_iterations = max_iterations;
    config
}

fn build(
    generator: Arc<ScriptedGenerator>,
    scorer: Arc<QueueScorer>,
    config: CriteriaConfig,
) -> Arc<Orchestrator> {
    let registry = Arc::new(CriteriaRegistry::new(config).unwrap());
    let logger = Arc::new(Logger::new(LogFormat::Compact));
    Arc::new(Orchestrator::new(generator, scorer, registry, logger))
}

fn tag(event: &PipelineEvent) -> String {
    serde_json::to_value(event).unwrap()["event"]
        .as_str()
        .unwrap()
        .to_string()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================
// Refinement loop
// ============================================================

#[tokio::test]
async fn test_passing_turn_finishes_in_one_cycle() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), Some(tx))
        .await
        .unwrap();

    assert_eq!(outcome.iteration, 1);
    assert_eq!(outcome.response, "response 1");
    assert!(!outcome.evaluation.should_regenerate);
    assert_eq!(generator.call_count(), 1);
    assert_eq!(scorer.call_count(), 1);

    let tags: Vec<String> = drain(&mut rx).iter().map(tag).collect();
    assert_eq!(
        tags,
        [
            "chatbot_generating",
            "chatbot_chunk",
            "chatbot_chunk",
            "chatbot_response",
            "judge_evaluating",
            "judge_criterion_result",
            "judge_result",
            "final_response",
        ]
    );
}

#[tokio::test]
async fn test_budget_exhaustion_runs_exactly_max_cycles() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[50.0]); // every evaluation fails
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), Some(tx))
        .await
        .unwrap();

    // exactly two generate+evaluate cycles, final response surfaced anyway
    assert_eq!(generator.call_count(), 2);
    assert_eq!(scorer.call_count(), 2);
    assert_eq!(outcome.iteration, 2);
    assert!(outcome.evaluation.should_regenerate);

    let events = drain(&mut rx);
    let finals: Vec<&PipelineEvent> = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::FinalResponse { .. }))
        .collect();
    assert_eq!(finals.len(), 1);
    if let PipelineEvent::FinalResponse { iteration, .. } = finals[0] {
        assert_eq!(*iteration, 2);
    }
}

#[tokio::test]
async fn test_refinement_stops_once_judge_passes() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[50.0, 90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(5));

    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), None)
        .await
        .unwrap();

    assert_eq!(generator.call_count(), 2);
    assert_eq!(outcome.iteration, 2);
    assert!(!outcome.evaluation.should_regenerate);
    assert_eq!(outcome.response, "response 2");
}

#[tokio::test]
async fn test_simple_mode_never_refines() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[50.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(3));

    let outcome = orchestrator
        .process_message(
            TurnRequest::new("hello").with_mode(ConversationMode::Simple),
            None,
        )
        .await
        .unwrap();

    assert_eq!(generator.call_count(), 1);
    assert_eq!(outcome.iteration, 1);
    assert!(outcome.evaluation.should_regenerate);
}

#[tokio::test]
async fn test_disabled_feedback_loop_never_refines() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[50.0]);
    let mut config = single_criterion_config(3);
    config.feedback_loop_enabled = false;
    let orchestrator = build(generator.clone(), scorer.clone(), config);

    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), None)
        .await
        .unwrap();

    assert_eq!(generator.call_count(), 1);
    assert_eq!(outcome.iteration, 1);
}

// ============================================================
// Capability failures
// ============================================================

#[tokio::test]
async fn test_generation_retries_once_and_recovers() {
    let generator = ScriptedGenerator::failing_first(1);
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), Some(tx))
        .await
        .unwrap();

    assert_eq!(generator.call_count(), 2);
    assert_eq!(outcome.iteration, 1);

    let tags: Vec<String> = drain(&mut rx).iter().map(tag).collect();
    assert!(!tags.contains(&"error".to_string()));
}

#[tokio::test]
async fn test_generation_failure_after_retry_surfaces_error() {
    let generator = ScriptedGenerator::failing_first(2);
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = orchestrator
        .process_message(
            TurnRequest::new("hello").with_conversation("conv_err"),
            Some(tx),
        )
        .await;

    assert!(matches!(result, Err(PipelineError::Capability(_))));
    assert_eq!(generator.call_count(), 2);

    let events = drain(&mut rx);
    assert_eq!(tag(events.last().unwrap()), "error");

    // the user's message is never silently dropped, and no partial
    // assistant output was recorded
    let history = orchestrator.history("conv_err").await.unwrap();
    assert_eq!(history.len(), 1);
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test]
async fn test_cancel_during_evaluation_suppresses_all_later_events() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::blocking_on(1, &[]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(3));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .process_message(
                    TurnRequest::new("hello").with_conversation("conv_cancel"),
                    Some(tx),
                )
                .await
        })
    };

    // wait until the scoring call is outstanding, then cancel
    scorer.blocked.notified().await;
    orchestrator.cancel("conv_cancel").unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    let tags: Vec<String> = drain(&mut rx).iter().map(tag).collect();
    assert_eq!(tags.last().unwrap(), "cancelled");
    assert!(!tags.contains(&"judge_result".to_string()));
    assert!(!tags.contains(&"final_response".to_string()));

    // no assistant message was committed
    let history = orchestrator.history("conv_cancel").await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_cancel_during_refined_generation_emits_nothing_for_next_iteration() {
    let generator = ScriptedGenerator::blocking_on(2);
    let scorer = QueueScorer::new(&[50.0]); // iteration 1 fails, loop refines
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(3));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .process_message(
                    TurnRequest::new("hello").with_conversation("conv_late"),
                    Some(tx),
                )
                .await
        })
    };

    generator.blocked.notified().await;
    orchestrator.cancel("conv_late").unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    let events = drain(&mut rx);
    let responses: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ChatbotResponse { iteration, .. } => Some(*iteration),
            _ => None,
        })
        .collect();
    // only iteration 1 produced a response; iteration 2's result was discarded
    assert_eq!(responses, [1]);

    let tags: Vec<String> = events.iter().map(tag).collect();
    assert_eq!(tags.iter().filter(|t| *t == "judge_result").count(), 1);
    assert!(!tags.contains(&"final_response".to_string()));
    assert_eq!(tags.last().unwrap(), "cancelled");
}

#[tokio::test]
async fn test_cancel_unknown_conversation_errors() {
    let orchestrator = build(
        ScriptedGenerator::new(),
        QueueScorer::new(&[90.0]),
        single_criterion_config(2),
    );
    assert!(matches!(
        orchestrator.cancel("conv_missing"),
        Err(PipelineError::UnknownConversation(_))
    ));
}

#[tokio::test]
async fn test_new_message_after_cancel_starts_fresh_pipeline() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::blocking_on(1, &[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, _rx) = mpsc::unbounded_channel();
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .process_message(
                    TurnRequest::new("first").with_conversation("conv_fresh"),
                    Some(tx),
                )
                .await
        })
    };
    scorer.blocked.notified().await;
    orchestrator.cancel("conv_fresh").unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap();

    // the next turn runs normally on a fresh pipeline
    let fresh_scorer_call = scorer.call_count();
    let outcome = orchestrator
        .process_message(
            TurnRequest::new("second").with_conversation("conv_fresh"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.iteration, 1);
    assert!(scorer.call_count() > fresh_scorer_call);
}

// ============================================================
// Input critique
// ============================================================

#[tokio::test]
async fn test_input_critique_streams_results_tagged_to_message() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = orchestrator
        .process_message(
            TurnRequest::new("is this a good question?")
                .with_mode(ConversationMode::InputCritique)
                .with_message_id("m1"),
            Some(tx),
        )
        .await
        .unwrap();
    assert_eq!(outcome.iteration, 1);

    // the critique task may still be streaming after the turn completes
    let critique = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(PipelineEvent::UserInputEvaluation { message_id, .. }) => {
                    return Some(message_id)
                }
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(critique.as_deref(), Some("m1"));
    // critique + response evaluation each scored the single criterion
    assert_eq!(scorer.call_count(), 2);
}

#[tokio::test]
async fn test_skip_flag_suppresses_input_critique() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let (tx, mut rx) = mpsc::unbounded_channel();
    orchestrator
        .process_message(
            TurnRequest::new("hello")
                .with_mode(ConversationMode::InputCritique)
                .skip_input_critique(),
            Some(tx),
        )
        .await
        .unwrap();

    let tags: Vec<String> = drain(&mut rx).iter().map(tag).collect();
    assert!(!tags.contains(&"user_input_evaluation".to_string()));
    assert_eq!(scorer.call_count(), 1);
}

// ============================================================
// Retry
// ============================================================

#[tokio::test]
async fn test_retry_replaces_last_assistant_turn() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0, 90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let outcome = orchestrator
        .process_message(
            TurnRequest::new("hello").with_conversation("conv_retry"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.response, "response 1");

    let retried = orchestrator
        .retry_last_turn("conv_retry", true, None)
        .await
        .unwrap();
    assert_eq!(retried.response, "response 2");
    assert_eq!(generator.call_count(), 2);

    // one user message, one assistant message: the first answer is gone
    let history = orchestrator.history("conv_retry").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "response 2");
}

#[tokio::test]
async fn test_retry_without_history_errors() {
    let orchestrator = build(
        ScriptedGenerator::new(),
        QueueScorer::new(&[90.0]),
        single_criterion_config(2),
    );
    let result = orchestrator.retry_last_turn("conv_nothing", true, None).await;
    assert!(matches!(
        result,
        Err(PipelineError::UnknownConversation(_))
    ));
}

// ============================================================
// Configuration
// ============================================================

#[tokio::test]
async fn test_rejected_config_update_leaves_pipeline_on_prior_weights() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0]);
    let registry = Arc::new(CriteriaRegistry::new(single_criterion_config(2)).unwrap());
    let logger = Arc::new(Logger::new(LogFormat::Compact));
    let orchestrator = Arc::new(Orchestrator::new(
        generator.clone(),
        scorer.clone(),
        registry.clone(),
        logger,
    ));

    let mut disabled = single_criterion_config(2).criteria;
    disabled[0].enabled = false;
    assert!(registry
        .update(CriteriaPatch {
            criteria: Some(disabled),
            ..Default::default()
        })
        .is_err());

    // the next turn still evaluates against the prior valid criteria
    let outcome = orchestrator
        .process_message(TurnRequest::new("hello"), None)
        .await
        .unwrap();
    assert_eq!(outcome.evaluation.criteria.len(), 1);
    assert!(!outcome.evaluation.should_regenerate);
}

// ============================================================
// Conversation continuity
// ============================================================

#[tokio::test]
async fn test_history_accumulates_across_turns() {
    let generator = ScriptedGenerator::new();
    let scorer = QueueScorer::new(&[90.0]);
    let orchestrator = build(generator.clone(), scorer.clone(), single_criterion_config(2));

    let first = orchestrator
        .process_message(TurnRequest::new("one"), None)
        .await
        .unwrap();
    orchestrator
        .process_message(
            TurnRequest::new("two").with_conversation(&first.conversation_id),
            None,
        )
        .await
        .unwrap();

    let history = orchestrator.history(&first.conversation_id).await.unwrap();
    assert_eq!(history.len(), 4);
    let evaluated = history[3].meta.evaluation.as_ref().unwrap();
    assert!(!evaluated.should_regenerate);
}
