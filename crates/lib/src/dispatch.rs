//! Outbound request dispatcher.
//!
//! Turns a [`SendRequest`] into [`StreamEvent`]s on a channel: fragments from the local
//! Ollama server, or a simulated cloud reply revealed one character per tick. Each
//! dispatch runs as one tokio task wrapped in a [`TaskGuard`] owned by the caller.

use crate::chat::Provider;
use crate::config::{Config, OllamaEndpoint};
use crate::llm::{simulated_reply, ChatMessage, LocalBackend};
use crate::state::{SendRequest, StreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Owns a background task and aborts it when dropped.
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Dispatch settings taken from config.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub endpoint: OllamaEndpoint,
    pub pull_missing_models: bool,
    pub reveal_interval: Duration,
    pub preamble: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.ollama.endpoint,
            pull_missing_models: config.ollama.pull_missing_models,
            reveal_interval: Duration::from_millis(config.reveal_interval_ms.max(1)),
            preamble: config
                .preamble
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        }
    }
}

pub struct Dispatcher<B: LocalBackend + 'static> {
    backend: Arc<B>,
    settings: DispatchSettings,
    events: UnboundedSender<StreamEvent>,
}

impl<B: LocalBackend + 'static> Dispatcher<B> {
    pub fn new(
        backend: B,
        settings: DispatchSettings,
        events: UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            backend: Arc::new(backend),
            settings,
            events,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start producing the reply for `request` on the given runtime.
    pub fn dispatch(&self, runtime: &Handle, request: SendRequest) -> TaskGuard {
        let events = self.events.clone();
        let handle = match request.provider {
            Provider::Ollama => {
                let backend = Arc::clone(&self.backend);
                let settings = self.settings.clone();
                runtime.spawn(async move {
                    run_local(backend.as_ref(), &settings, request, events).await;
                })
            }
            Provider::OpenAi => {
                let text = simulated_reply(request.provider, &request.model);
                let interval = self.settings.reveal_interval;
                runtime.spawn(reveal(request.chat_id, text, interval, events))
            }
        };
        TaskGuard::new(handle)
    }
}

/// Wire messages for a chat request: optional system preamble, then the history.
pub fn chat_messages(request: &SendRequest, preamble: Option<&str>) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(request.history.len() + 1);
    if let Some(p) = preamble {
        messages.push(ChatMessage::system(p));
    }
    messages.extend(request.history.iter().map(ChatMessage::from));
    messages
}

/// Prompt for a generate request: preamble (if any) followed by the latest user text.
pub fn generate_prompt(request: &SendRequest, preamble: Option<&str>) -> String {
    match preamble {
        Some(p) => format!("{}\n\n{}", p, request.prompt()),
        None => request.prompt().to_string(),
    }
}

/// Fill the reply from the local server, sending each fragment as it becomes available.
pub async fn run_local<B: LocalBackend + ?Sized>(
    backend: &B,
    settings: &DispatchSettings,
    request: SendRequest,
    events: UnboundedSender<StreamEvent>,
) {
    let chat_id = request.chat_id.clone();
    let result = async {
        if settings.pull_missing_models {
            backend.ensure_model(&request.model).await?;
        }
        match settings.endpoint {
            OllamaEndpoint::Chat => {
                let messages = chat_messages(&request, settings.preamble.as_deref());
                let mut on_chunk = |s: &str| {
                    let _ = events.send(StreamEvent::Fragment {
                        chat_id: chat_id.clone(),
                        text: s.to_string(),
                    });
                };
                backend
                    .chat_stream(&request.model, messages, &mut on_chunk)
                    .await?;
            }
            OllamaEndpoint::Generate => {
                let prompt = generate_prompt(&request, settings.preamble.as_deref());
                let fragments = backend.generate(&request.model, &prompt).await?;
                for f in fragments {
                    if f.response.is_empty() {
                        continue;
                    }
                    let _ = events.send(StreamEvent::Fragment {
                        chat_id: chat_id.clone(),
                        text: f.response,
                    });
                }
            }
        }
        Ok::<(), crate::llm::OllamaError>(())
    }
    .await;

    let event = match result {
        Ok(()) => StreamEvent::Finished { chat_id },
        Err(e) => {
            log::warn!("local reply for chat {} failed: {}", chat_id, e);
            StreamEvent::Failed {
                chat_id,
                error: e.to_string(),
            }
        }
    };
    let _ = events.send(event);
}

/// Reveal `text` one character per tick as growing prefixes, then report completion.
/// Stops early if the receiver is gone.
pub async fn reveal(
    chat_id: String,
    text: String,
    interval: Duration,
    events: UnboundedSender<StreamEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    for (i, c) in text.char_indices() {
        ticker.tick().await;
        let end = i + c.len_utf8();
        let sent = events.send(StreamEvent::Reveal {
            chat_id: chat_id.clone(),
            text: text[..end].to_string(),
        });
        if sent.is_err() {
            return;
        }
    }
    let _ = events.send(StreamEvent::Finished { chat_id });
}
