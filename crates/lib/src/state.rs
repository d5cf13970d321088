//! Owned UI state: the chat list, which chat is selected, the input box, the API key,
//! and which chat (if any) is waiting on a reply.
//!
//! The desktop app holds one [`ChatState`] and passes it by reference; background tasks
//! never touch it directly but send [`StreamEvent`]s that the UI thread applies.

use crate::bridge::ConfigBridge;
use crate::chat::{example_chats, Chat, ChatId, Message, Provider};

/// Progress of an assistant reply, addressed to the chat that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Append a fragment to the chat's last (assistant) message.
    Fragment { chat_id: ChatId, text: String },
    /// Replace the last message's content with a longer prefix of a simulated reply.
    Reveal { chat_id: ChatId, text: String },
    /// The reply is complete.
    Finished { chat_id: ChatId },
    /// The reply failed; whatever arrived so far stays.
    Failed { chat_id: ChatId, error: String },
}

/// Everything the dispatcher needs to produce a reply for one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub chat_id: ChatId,
    pub provider: Provider,
    pub model: String,
    /// History up to and including the new user message (the empty assistant entry is not included).
    pub history: Vec<Message>,
}

impl SendRequest {
    /// Text of the user message that triggered this request.
    pub fn prompt(&self) -> &str {
        self.history
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

pub struct ChatState {
    chats: Vec<Chat>,
    selected: usize,
    input: String,
    api_key: Option<String>,
    in_flight: Option<ChatId>,
    /// Installed Ollama models found at startup, offered after the static catalogue.
    local_models: Vec<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(example_chats())
    }
}

impl ChatState {
    /// State over the given chats with the first one selected.
    pub fn new(chats: Vec<Chat>) -> Self {
        Self {
            chats,
            selected: 0,
            input: String::new(),
            api_key: None,
            in_flight: None,
            local_models: Vec::new(),
        }
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn selected(&self) -> Option<&Chat> {
        self.chats.get(self.selected)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected().map(|c| c.id.as_str())
    }

    /// Select a chat by id. Returns false (and changes nothing) for an unknown id.
    pub fn select(&mut self, id: &str) -> bool {
        match self.chats.iter().position(|c| c.id == id) {
            Some(i) => {
                self.selected = i;
                true
            }
            None => false,
        }
    }

    /// Append an empty chat for `provider`, select it, and return its id.
    pub fn new_chat(&mut self, provider: Provider) -> ChatId {
        let chat = Chat::generated(provider);
        let id = chat.id.clone();
        self.chats.push(chat);
        self.selected = self.chats.len() - 1;
        id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Change the selected chat's model. History is left alone.
    pub fn set_model(&mut self, model: impl Into<String>) {
        if let Some(chat) = self.chats.get_mut(self.selected) {
            chat.model = model.into();
        }
    }

    /// Record Ollama models reported by the local server.
    pub fn set_local_models(&mut self, models: Vec<String>) {
        self.local_models = models;
    }

    /// Model choices for a provider: the static catalogue, then any extra installed models.
    pub fn model_options(&self, provider: Provider) -> Vec<String> {
        let mut options: Vec<String> = provider.models().iter().map(|m| m.to_string()).collect();
        if provider == Provider::Ollama {
            for m in &self.local_models {
                if !options.contains(m) {
                    options.push(m.clone());
                }
            }
        }
        options
    }

    /// Read the stored key through the bridge. Any failure leaves no key.
    pub fn load_api_key(&mut self, bridge: &dyn ConfigBridge) {
        self.api_key = match bridge.get_api_key() {
            Ok(key) => key,
            Err(e) => {
                log::error!("failed to load config: {:#}", e);
                None
            }
        };
    }

    /// Forward a new key to the bridge; adopt it only when the bridge succeeds.
    /// Empty input is ignored. Returns true when the key was adopted.
    pub fn submit_api_key(&mut self, bridge: &dyn ConfigBridge, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        match bridge.set_api_key(key) {
            Ok(()) => {
                self.api_key = Some(key.to_string());
                log::info!("openai api key set");
                true
            }
            Err(e) => {
                log::error!("failed to set openai api key: {:#}", e);
                false
            }
        }
    }

    /// True when the selected chat needs an API key that is not set.
    pub fn show_api_key_warning(&self) -> bool {
        self.selected()
            .map(|c| c.provider.needs_api_key() && self.api_key.is_none())
            .unwrap_or(false)
    }

    /// Whether the input box and send control are enabled.
    pub fn can_send(&self) -> bool {
        self.selected().is_some() && self.in_flight.is_none() && !self.show_api_key_warning()
    }

    /// True while a reply is being filled in.
    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Chat currently receiving a reply.
    pub fn streaming_chat(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Take the input as a user message for the selected chat, add an empty assistant
    /// message for the reply, and return the request to dispatch. None when sending is
    /// disabled or the input is blank; nothing changes in that case.
    pub fn begin_send(&mut self) -> Option<SendRequest> {
        if !self.can_send() || self.input.trim().is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        let chat = self.chats.get_mut(self.selected)?;
        chat.messages.push(Message::user(text));
        let history = chat.messages.clone();
        chat.messages.push(Message::assistant(String::new()));
        self.in_flight = Some(chat.id.clone());
        log::debug!("send: chat {} via {} ({})", chat.id, chat.provider, chat.model);
        Some(SendRequest {
            chat_id: chat.id.clone(),
            provider: chat.provider,
            model: chat.model.clone(),
            history,
        })
    }

    /// Apply one event from a background reply task.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Fragment { chat_id, text } => {
                if let Some(msg) = self.reply_slot(&chat_id) {
                    msg.content.push_str(&text);
                }
            }
            StreamEvent::Reveal { chat_id, text } => {
                if let Some(msg) = self.reply_slot(&chat_id) {
                    msg.content = text;
                }
            }
            StreamEvent::Finished { chat_id } => {
                self.clear_in_flight(&chat_id);
            }
            StreamEvent::Failed { chat_id, error } => {
                log::error!("failed to get response for chat {}: {}", chat_id, error);
                self.clear_in_flight(&chat_id);
            }
        }
    }

    fn clear_in_flight(&mut self, chat_id: &str) {
        if self.in_flight.as_deref() == Some(chat_id) {
            self.in_flight = None;
        }
    }

    /// Last message of the chat, if it is an assistant message.
    fn reply_slot(&mut self, chat_id: &str) -> Option<&mut Message> {
        let chat = self.chats.iter_mut().find(|c| c.id == chat_id)?;
        chat.messages.last_mut().filter(|m| !m.is_user())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Bridge whose writes succeed or fail on demand, counting calls.
    struct FakeBridge {
        stored: Mutex<Option<String>>,
        fail: bool,
        calls: Mutex<usize>,
    }

    impl FakeBridge {
        fn new(stored: Option<&str>, fail: bool) -> Self {
            Self {
                stored: Mutex::new(stored.map(String::from)),
                fail,
                calls: Mutex::new(0),
            }
        }
    }

    impl ConfigBridge for FakeBridge {
        fn get_api_key(&self) -> anyhow::Result<Option<String>> {
            if self.fail {
                return Err(anyhow!("host unavailable"));
            }
            Ok(self.stored.lock().unwrap().clone())
        }

        fn set_api_key(&self, api_key: &str) -> anyhow::Result<()> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(anyhow!("host unavailable"));
            }
            *self.stored.lock().unwrap() = Some(api_key.to_string());
            Ok(())
        }

        fn load_config(&self) -> anyhow::Result<crate::config::Config> {
            Ok(crate::config::Config::default())
        }
    }

    fn with_key() -> ChatState {
        let mut s = ChatState::default();
        s.load_api_key(&FakeBridge::new(Some("sk-1"), false));
        s
    }

    #[test]
    fn starts_on_first_example_chat() {
        let s = ChatState::default();
        assert_eq!(s.selected_id(), Some("1"));
        assert!(s.can_send());
        assert!(!s.show_api_key_warning());
    }

    #[test]
    fn cloud_chat_without_key_blocks_send() {
        let mut s = ChatState::default();
        assert!(s.select("2"));
        s.set_input("hello");
        assert!(s.show_api_key_warning());
        assert!(!s.can_send());
        assert!(s.begin_send().is_none());
        assert!(s.chat("2").unwrap().messages.is_empty());
        assert_eq!(s.input(), "hello");
        assert!(s.show_api_key_warning());
    }

    #[test]
    fn cloud_chat_with_key_sends() {
        let mut s = with_key();
        s.select("2");
        s.set_input("hello");
        let req = s.begin_send().unwrap();
        assert_eq!(req.provider, Provider::OpenAi);
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.prompt(), "hello");
    }

    #[test]
    fn blank_input_is_not_sent() {
        let mut s = ChatState::default();
        s.set_input("   \n");
        assert!(s.begin_send().is_none());
        assert!(s.chat("1").unwrap().messages.is_empty());
    }

    #[test]
    fn begin_send_appends_user_and_empty_assistant() {
        let mut s = ChatState::default();
        s.set_input("hi there");
        let req = s.begin_send().unwrap();
        assert_eq!(req.chat_id, "1");
        assert_eq!(req.history, vec![Message::user("hi there")]);
        let msgs = &s.chat("1").unwrap().messages;
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_user());
        assert_eq!(msgs[1], Message::assistant(""));
        assert_eq!(s.input(), "");
        assert!(s.is_streaming());
        assert!(!s.can_send());
    }

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut s = ChatState::default();
        let fragments = ["The", " answer", " is", " 42", "."];
        for round in 0..2 {
            s.set_input(format!("question {}", round));
            let req = s.begin_send().unwrap();
            for f in fragments {
                s.apply(StreamEvent::Fragment {
                    chat_id: req.chat_id.clone(),
                    text: f.to_string(),
                });
            }
            s.apply(StreamEvent::Finished { chat_id: req.chat_id });
            let last = s.chat("1").unwrap().messages.last().unwrap();
            assert_eq!(last.content, fragments.concat());
        }
        assert_eq!(s.chat("1").unwrap().messages.len(), 4);
        assert!(!s.is_streaming());
    }

    #[test]
    fn switching_chats_leaves_other_chats_untouched() {
        let mut s = with_key();
        s.set_input("first");
        let req = s.begin_send().unwrap();
        let other_before = s.chat("2").unwrap().clone();
        s.select("2");
        s.apply(StreamEvent::Fragment {
            chat_id: req.chat_id.clone(),
            text: "late".to_string(),
        });
        s.select("1");
        s.select("2");
        assert_eq!(s.chat("2").unwrap(), &other_before);
        assert_eq!(s.chat("1").unwrap().messages[1].content, "late");
    }

    #[test]
    fn select_unknown_chat_keeps_selection() {
        let mut s = ChatState::default();
        assert!(!s.select("nope"));
        assert_eq!(s.selected_id(), Some("1"));
    }

    #[test]
    fn set_model_only_touches_selected_chat() {
        let mut s = ChatState::default();
        s.set_input("keep me");
        let req = s.begin_send().unwrap();
        s.apply(StreamEvent::Finished { chat_id: req.chat_id });
        let history = s.chat("1").unwrap().messages.clone();
        s.set_model("mistral");
        assert_eq!(s.chat("1").unwrap().model, "mistral");
        assert_eq!(s.chat("1").unwrap().messages, history);
        assert_eq!(s.chat("2").unwrap().model, "gpt-4o");
    }

    #[test]
    fn api_key_adopted_only_on_bridge_success() {
        let mut s = ChatState::default();
        let failing = FakeBridge::new(None, true);
        assert!(!s.submit_api_key(&failing, "sk-new"));
        assert_eq!(*failing.calls.lock().unwrap(), 1);
        assert_eq!(s.api_key.as_deref(), None);

        let ok = FakeBridge::new(None, false);
        assert!(s.submit_api_key(&ok, "sk-new"));
        assert_eq!(s.api_key.as_deref(), Some("sk-new"));

        assert!(!s.submit_api_key(&failing, "sk-other"));
        assert_eq!(s.api_key.as_deref(), Some("sk-new"));
    }

    #[test]
    fn empty_api_key_skips_bridge() {
        let mut s = ChatState::default();
        let bridge = FakeBridge::new(None, false);
        assert!(!s.submit_api_key(&bridge, "  "));
        assert_eq!(*bridge.calls.lock().unwrap(), 0);
    }

    #[test]
    fn load_failure_leaves_no_key() {
        let mut s = with_key();
        s.load_api_key(&FakeBridge::new(Some("sk-1"), true));
        assert_eq!(s.api_key.as_deref(), None);
    }

    #[test]
    fn failure_keeps_partial_reply_and_unblocks() {
        let mut s = ChatState::default();
        s.set_input("q");
        let req = s.begin_send().unwrap();
        s.apply(StreamEvent::Fragment {
            chat_id: req.chat_id.clone(),
            text: "part".to_string(),
        });
        s.apply(StreamEvent::Failed {
            chat_id: req.chat_id,
            error: "connection reset".to_string(),
        });
        assert_eq!(s.chat("1").unwrap().messages[1].content, "part");
        assert!(s.can_send());
    }

    #[test]
    fn reveal_replaces_last_message() {
        let mut s = with_key();
        s.select("2");
        s.set_input("q");
        let req = s.begin_send().unwrap();
        for text in ["T", "Th", "Thi"] {
            s.apply(StreamEvent::Reveal {
                chat_id: req.chat_id.clone(),
                text: text.to_string(),
            });
        }
        assert_eq!(s.chat("2").unwrap().messages[1].content, "Thi");
    }

    #[test]
    fn new_chat_is_selected_and_empty() {
        let mut s = ChatState::default();
        let id = s.new_chat(Provider::Ollama);
        assert_eq!(s.selected_id(), Some(id.as_str()));
        assert_eq!(s.chats().len(), 3);
        assert_eq!(s.selected().unwrap().model, "llama3");
    }

    #[test]
    fn model_options_merge_installed_models() {
        let mut s = ChatState::default();
        s.set_local_models(vec!["mistral".to_string(), "qwen3:8b".to_string()]);
        assert_eq!(
            s.model_options(Provider::Ollama),
            vec!["llama3", "codellama", "mistral", "qwen3:8b"]
        );
        assert_eq!(s.model_options(Provider::OpenAi), vec!["gpt-3.5-turbo", "gpt-4o"]);
    }
}
