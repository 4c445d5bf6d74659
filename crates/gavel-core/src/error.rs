use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("generation capability error: {0}")]
    Capability(#[from] gavel_provider::CapabilityError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] gavel_judge::EvaluationError),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("conversation has no completed turn to retry")]
    NothingToRetry,
}
