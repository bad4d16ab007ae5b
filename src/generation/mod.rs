//! Content generation client abstraction
//!
//! The workflow engine talks to a `GenerationClient` trait object; the
//! concrete `GeminiClient` lives in [`gemini`]. Tests inject scripted
//! implementations.

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;

use crate::error::ApiError;

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Attach the provider's web-search tool. Only the research stage
    /// enables this.
    pub use_search: bool,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, use_search: bool, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            use_search,
            temperature,
        }
    }
}

/// Synchronous-per-call LLM text generation.
///
/// Implementations perform exactly one upstream call per invocation; the
/// engine owns retrying and rate limiting.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ApiError>;
}
