use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use gavel_criteria::Criterion;

use crate::CapabilityError;

/// Callback invoked with each streamed text chunk.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One prior turn of conversation context.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Context for regenerating a response the judge rejected.
#[derive(Debug, Clone, Copy)]
pub struct Refinement<'a> {
    pub previous_response: &'a str,
    pub feedback: &'a str,
}

/// Request for the generation capability.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub history: &'a [HistoryEntry],
    pub refinement: Option<Refinement<'a>>,
}

/// Request for the scoring capability.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub content: &'a str,
    pub criterion: &'a Criterion,
}

/// Outcome of scoring one criterion.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreOutcome {
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
}

/// The text-generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable provider name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, CapabilityError> {
        self.generate_with_callback(request, None).await
    }

    /// Generate a response, optionally streaming chunks as they arrive.
    /// The returned string is always the complete response.
    async fn generate_with_callback(
        &self,
        request: GenerateRequest<'_>,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, CapabilityError>;
}

/// The content-scoring capability.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutcome, CapabilityError>;
}
