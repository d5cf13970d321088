//! Inference backends: the local Ollama client and the simulated cloud reply.
//!
//! The dispatcher talks to the local server through [`LocalBackend`] so tests can swap in a fake.

mod cloud;
mod ollama;

use async_trait::async_trait;

pub use cloud::simulated_reply;
pub use ollama::{ChatMessage, GenerateFragment, NdjsonLines, OllamaClient, OllamaError, OllamaModel};

/// Local model server operations used to fill an assistant message.
#[async_trait]
pub trait LocalBackend: Send + Sync {
    /// Stream a chat completion, calling `on_chunk` per fragment; returns the full text.
    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, OllamaError>;

    /// Single request/response generation; returns the fragments in arrival order.
    async fn generate(&self, model: &str, prompt: &str)
        -> Result<Vec<GenerateFragment>, OllamaError>;

    /// Make sure `model` is installed, pulling it if needed.
    async fn ensure_model(&self, model: &str) -> Result<(), OllamaError>;
}
