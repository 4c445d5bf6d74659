//! # gavel-provider
//!
//! The capability boundary: the two opaque remote operations gavel depends
//! on but does not implement.
//!
//! - [`Generator`] - produce (or refine) a response from conversation history
//! - [`Scorer`] - score a piece of content against one criterion
//!
//! [`HttpProvider`] implements both against an OpenAI-compatible chat
//! endpoint. Everything upstream talks to the traits only, so the provider
//! stays swappable.

mod error;
mod http;
mod reply;
mod traits;

pub use error::CapabilityError;
pub use http::{HttpProvider, ProviderConfig};
pub use traits::{
    ChunkCallback, GenerateRequest, Generator, HistoryEntry, Refinement, ScoreOutcome,
    ScoreRequest, Scorer,
};
