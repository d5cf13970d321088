//! Ollama API client (http://127.0.0.1:11434 by default).
//! Streams chat (NDJSON) and generate responses, lists installed models and pulls missing ones.

use super::LocalBackend;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
}

/// Splits a byte stream into newline-terminated lines, keeping a partial trailing line
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct NdjsonLines {
    buffer: Vec<u8>,
}

impl NdjsonLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns the complete, non-blank lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..i).collect();
            self.buffer.drain(..1);
            let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream ends (a last line without a trailing newline).
    pub fn finish(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/tags — list installed models.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: TagsResponse = res.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// Pull `model` via POST /api/pull unless /api/tags already lists it.
    pub async fn ensure_model(&self, model: &str) -> Result<(), OllamaError> {
        let installed = self.list_models().await?;
        if installed.iter().any(|m| m.name == model) {
            return Ok(());
        }
        log::info!("ollama: pulling missing model {}", model);
        let url = format!("{}/api/pull", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&PullRequest {
                name: model.to_string(),
                stream: false,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: PullResponse = res.json().await?;
        if data.status.as_deref() != Some("success") {
            return Err(OllamaError::Api(format!("failed to pull model: {}", model)));
        }
        Ok(())
    }

    /// POST /api/chat with stream: true. Parses NDJSON and calls on_chunk for each content delta;
    /// returns the accumulated content once `done` arrives or the stream ends.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            stream: true,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let mut stream = res.bytes_stream();
        let mut lines = NdjsonLines::new();
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(OllamaError::Request)?;
            for line in lines.push(&chunk) {
                if apply_chat_line(&line, &mut content, on_chunk) {
                    return Ok(content);
                }
            }
        }
        if let Some(line) = lines.finish() {
            apply_chat_line(&line, &mut content, on_chunk);
        }
        Ok(content)
    }

    /// POST /api/generate. Collects every `response` fragment of the NDJSON stream, in order.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Vec<GenerateFragment>, OllamaError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let mut stream = res.bytes_stream();
        let mut lines = NdjsonLines::new();
        let mut fragments = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(OllamaError::Request)?;
            for line in lines.push(&chunk) {
                push_generate_line(&line, &mut fragments);
            }
        }
        if let Some(line) = lines.finish() {
            push_generate_line(&line, &mut fragments);
        }
        Ok(fragments)
    }
}

/// Apply one chat NDJSON line; returns true when it carried `done: true`.
fn apply_chat_line(
    line: &str,
    content: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> bool {
    let event: ChatStreamEvent = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("ollama: skipping malformed chat line: {}", e);
            return false;
        }
    };
    if let Some(ref msg) = event.message {
        if !msg.content.is_empty() {
            on_chunk(&msg.content);
            content.push_str(&msg.content);
        }
    }
    event.done
}

fn push_generate_line(line: &str, fragments: &mut Vec<GenerateFragment>) {
    match serde_json::from_str::<GenerateFragment>(line) {
        Ok(f) => fragments.push(f),
        Err(e) => log::warn!("ollama: skipping malformed generate line: {}", e),
    }
}

#[async_trait]
impl LocalBackend for OllamaClient {
    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, OllamaError> {
        OllamaClient::chat_stream(self, model, messages, on_chunk).await
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Vec<GenerateFragment>, OllamaError> {
        OllamaClient::generate(self, model, prompt).await
    }

    async fn ensure_model(&self, model: &str) -> Result<(), OllamaError> {
        OllamaClient::ensure_model(self, model).await
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamEvent {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Serialize)]
struct PullRequest {
    name: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: Option<String>,
}

/// One message on the Ollama chat wire (role + content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

impl From<&crate::chat::Message> for ChatMessage {
    fn from(m: &crate::chat::Message) -> Self {
        Self {
            role: m.role().as_str().to_string(),
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

/// One piece of a /api/generate response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateFragment {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, Once};

    /// Records every log line so tests can check what reaches a `warn` filter.
    struct Capture;

    static CAPTURED: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Ok(mut lines) = CAPTURED.lock() {
                lines.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    fn capture_logs() {
        INSTALL.call_once(|| {
            let _ = log::set_logger(&Capture);
            log::set_max_level(log::LevelFilter::Warn);
        });
    }

    fn warned(needle: &str) -> bool {
        CAPTURED
            .lock()
            .unwrap()
            .iter()
            .any(|(level, msg)| *level == log::Level::Warn && msg.contains(needle))
    }

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let mut lines = NdjsonLines::new();
        assert!(lines.push(b"{\"a\":").is_empty());
        assert_eq!(lines.push(b"1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(lines.push(b":2}\n\n"), vec!["{\"b\":2}".to_string()]);
        assert!(lines.finish().is_none());
    }

    #[test]
    fn trailing_line_without_newline_is_kept() {
        let mut lines = NdjsonLines::new();
        assert!(lines.push(b"{\"done\":true}").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let text = "{\"message\":{\"content\":\"é\"}}\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut lines = NdjsonLines::new();
        assert!(lines.push(&text[..split]).is_empty());
        let out = lines.push(&text[split..]);
        assert_eq!(out, vec!["{\"message\":{\"content\":\"é\"}}".to_string()]);
    }

    #[test]
    fn chat_line_appends_and_reports_done() {
        let mut content = String::new();
        let mut seen = Vec::new();
        let mut cb = |s: &str| seen.push(s.to_string());
        assert!(!apply_chat_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#, &mut content, &mut cb));
        assert!(!apply_chat_line("garbage", &mut content, &mut cb));
        assert!(apply_chat_line(r#"{"message":{"role":"assistant","content":"!"},"done":true}"#, &mut content, &mut cb));
        assert_eq!(content, "Hi!");
        assert_eq!(seen, vec!["Hi".to_string(), "!".to_string()]);
    }

    #[test]
    fn malformed_lines_are_logged_at_warn() {
        capture_logs();
        let mut content = String::new();
        let mut cb = |_: &str| {};
        assert!(!apply_chat_line("{not json", &mut content, &mut cb));
        let mut fragments = Vec::new();
        push_generate_line("[1,2", &mut fragments);
        assert!(fragments.is_empty());
        assert!(content.is_empty());
        assert!(warned("skipping malformed chat line"));
        assert!(warned("skipping malformed generate line"));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = OllamaClient::new(Some("http://localhost:11434/".to_string()));
        assert_eq!(c.base_url(), "http://localhost:11434");
        assert_eq!(OllamaClient::new(None).base_url(), DEFAULT_BASE_URL);
    }
}
