//! Language-model capability
//!
//! Stages only see [`LanguageModel`]; the production adapter is
//! [`client::ChatCompletionsClient`], the deterministic double lives in
//! [`crate::testing`].

pub mod client;
pub mod prompts;

use crate::error::CollaboratorError;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use client::ChatCompletionsClient;

/// Finite, non-restartable sequence of generated text chunks.
pub type TextStream = BoxStream<'static, Result<String, CollaboratorError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a complete response.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, CollaboratorError>;

    /// Generate a response as it is produced.
    async fn generate_stream(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<TextStream, CollaboratorError>;
}
