//! Chat, message and provider types.
//!
//! Chats live in memory only; the example list below is what the app starts with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat identifier (opaque string).
pub type ChatId = String;

/// Models offered for the local Ollama provider.
pub const OLLAMA_MODELS: &[&str] = &["llama3", "codellama", "mistral"];

/// Models offered for the cloud OpenAI provider.
pub const OPENAI_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4o"];

/// Inference backend a chat talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    /// Lowercase id as used in config and placeholder text.
    pub fn id(self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        }
    }

    /// Human-readable label for the chat list.
    pub fn label(self) -> &'static str {
        match self {
            Provider::Ollama => "Ollama",
            Provider::OpenAi => "OpenAI",
        }
    }

    /// Static model catalogue for this provider.
    pub fn models(self) -> &'static [&'static str] {
        match self {
            Provider::Ollama => OLLAMA_MODELS,
            Provider::OpenAi => OPENAI_MODELS,
        }
    }

    /// True when sending requires an API key.
    pub fn needs_api_key(self) -> bool {
        match self {
            Provider::Ollama => false,
            Provider::OpenAi => true,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One transcript entry. The role is fixed at construction; only content changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// A named conversation with its own history, provider and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub messages: Vec<Message>,
    pub provider: Provider,
    pub model: String,
}

impl Chat {
    pub fn new(
        id: impl Into<ChatId>,
        name: impl Into<String>,
        provider: Provider,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            messages: Vec::new(),
            provider,
            model: model.into(),
        }
    }

    /// Empty chat with a generated id and the provider's first model.
    pub fn generated(provider: Provider) -> Self {
        let id = format!("chat-{}", uuid::Uuid::new_v4());
        let model = provider.models().first().copied().unwrap_or_default();
        Self::new(id, format!("New chat ({})", provider.label()), provider, model)
    }
}

/// Chats the app starts with: one per provider.
pub fn example_chats() -> Vec<Chat> {
    vec![
        Chat::new("1", "Example (Ollama)", Provider::Ollama, "llama3"),
        Chat::new("2", "Example (OpenAI)", Provider::OpenAi, "gpt-4o"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_chats_start_empty() {
        let chats = example_chats();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].provider, Provider::Ollama);
        assert_eq!(chats[1].provider, Provider::OpenAi);
        assert!(chats.iter().all(|c| c.messages.is_empty()));
    }

    #[test]
    fn provider_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&Provider::Ollama).unwrap(), "\"ollama\"");
        assert_eq!(Provider::OpenAi.to_string(), "openai");
    }

    #[test]
    fn generated_chat_uses_first_catalogue_model() {
        let chat = Chat::generated(Provider::OpenAi);
        assert!(chat.id.starts_with("chat-"));
        assert_eq!(chat.model, "gpt-3.5-turbo");
        assert_eq!(chat.name, "New chat (OpenAI)");
    }
}
