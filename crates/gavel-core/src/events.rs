use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use gavel_judge::{CriterionResult, Evaluation};

use crate::cancel::CancelHandle;

/// Outbound event vocabulary for one conversation's pipeline, emitted in
/// strict causal order. Every variant carries its conversation id so a
/// multiplexed channel can demux without reordering.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ChatbotGenerating {
        conversation_id: String,
        iteration: u32,
    },
    ChatbotChunk {
        conversation_id: String,
        chunk: String,
    },
    ChatbotResponse {
        conversation_id: String,
        response: String,
        iteration: u32,
    },
    JudgeEvaluating {
        conversation_id: String,
        iteration: u32,
    },
    JudgeCriterionResult {
        conversation_id: String,
        criterion: CriterionResult,
    },
    JudgeResult {
        conversation_id: String,
        evaluation: Evaluation,
    },
    UserInputEvaluation {
        conversation_id: String,
        criterion: CriterionResult,
        message_id: String,
    },
    FinalResponse {
        conversation_id: String,
        response: String,
        evaluation: Evaluation,
        iteration: u32,
    },
    Cancelled {
        conversation_id: String,
    },
    Error {
        conversation_id: String,
        error: String,
    },
}

impl PipelineEvent {
    /// Terminal events end a pipeline's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalResponse { .. } | Self::Cancelled { .. } | Self::Error { .. }
        )
    }

    /// Streaming partials, superseded by the complete result that follows
    /// them. These are the only events a congested channel may drop.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::ChatbotChunk { .. }
                | Self::JudgeCriterionResult { .. }
                | Self::UserInputEvaluation { .. }
        )
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::ChatbotGenerating {
                conversation_id, ..
            }
            | Self::ChatbotChunk {
                conversation_id, ..
            }
            | Self::ChatbotResponse {
                conversation_id, ..
            }
            | Self::JudgeEvaluating {
                conversation_id, ..
            }
            | Self::JudgeCriterionResult {
                conversation_id, ..
            }
            | Self::JudgeResult {
                conversation_id, ..
            }
            | Self::UserInputEvaluation {
                conversation_id, ..
            }
            | Self::FinalResponse {
                conversation_id, ..
            }
            | Self::Cancelled {
                conversation_id, ..
            }
            | Self::Error {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Channel end the orchestrator pushes pipeline events into.
pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;

/// Per-run event emitter. Appends to the observer channel only; once the
/// run's cancel flag is set, everything except the terminal `cancelled`
/// event is suppressed.
#[derive(Clone)]
pub(crate) struct TurnEmitter {
    conversation_id: String,
    tx: Option<EventSender>,
    cancel: Arc<CancelHandle>,
}

impl TurnEmitter {
    pub fn new(conversation_id: String, tx: Option<EventSender>, cancel: Arc<CancelHandle>) -> Self {
        Self {
            conversation_id,
            tx,
            cancel,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Whether anyone is listening. Streaming work (chunk callbacks, input
    /// critique) is skipped when there is no sink.
    pub fn has_sink(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn emit_cancelled(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(PipelineEvent::Cancelled {
                conversation_id: self.conversation_id.clone(),
            });
        }
    }
}
