//! Tandem Desktop — egui app state and UI.

use eframe::egui;
use std::sync::mpsc;
use std::time::Duration;
use tandem::bridge::{ConfigBridge, FileConfigBridge};
use tandem::chat::{Chat, Message, Provider};
use tandem::config::Config;
use tandem::dispatch::{DispatchSettings, Dispatcher, TaskGuard};
use tandem::llm::OllamaClient;
use tandem::state::{ChatState, StreamEvent};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

const CHAT_LIST_WIDTH: f32 = 220.0;
const STREAM_CURSOR: &str = "▊";
/// Repaint cadence while a reply is arriving.
const STREAM_REPAINT: Duration = Duration::from_millis(16);

/// Sidebar label for a chat: provider tag and name.
fn chat_label(chat: &Chat) -> String {
    format!("[{}] {}", chat.provider.label(), chat.name)
}

pub struct TandemApp {
    /// Chat list, selection, input and API key.
    state: ChatState,
    /// Task filling the current reply. Dropping it stops the task.
    in_flight: Option<TaskGuard>,
    dispatcher: Dispatcher<OllamaClient>,
    /// Reply progress from the in-flight task, drained every frame.
    events: UnboundedReceiver<StreamEvent>,
    /// Installed Ollama models, delivered once by a startup task.
    models_receiver: Option<mpsc::Receiver<Vec<String>>>,
    bridge: FileConfigBridge,
    /// Draft text while the API key dialog is open.
    key_prompt: Option<String>,
    /// Whether the input box had focus last frame (Enter sends only then).
    input_had_focus: bool,
    runtime: Runtime,
}

impl TandemApp {
    const PANEL_MARGIN: f32 = 16.0;

    pub fn new(_cc: &eframe::CreationContext<'_>, runtime: Runtime) -> Self {
        let bridge = FileConfigBridge::from_default_path();
        let config = bridge.load_config().unwrap_or_else(|e| {
            log::error!("failed to load config from {}: {:#}", bridge.path().display(), e);
            Config::default()
        });
        let mut state = ChatState::default();
        state.load_api_key(&bridge);

        let (tx, events) = tokio::sync::mpsc::unbounded_channel();
        let client = OllamaClient::new(config.ollama.base_url.clone());
        let dispatcher = Dispatcher::new(client, DispatchSettings::from_config(&config), tx);

        let (models_tx, models_rx) = mpsc::channel();
        let client = dispatcher.backend().clone();
        runtime.spawn(async move {
            match client.list_models().await {
                Ok(models) => {
                    let _ = models_tx.send(models.into_iter().map(|m| m.name).collect());
                }
                Err(e) => log::warn!("could not list ollama models: {}", e),
            }
        });

        log::info!("desktop started (config {})", bridge.path().display());
        Self {
            state,
            in_flight: None,
            dispatcher,
            events,
            models_receiver: Some(models_rx),
            bridge,
            key_prompt: None,
            input_had_focus: false,
            runtime,
        }
    }

    /// Apply reply events and release the task once the reply is complete. Call each frame.
    fn poll_stream_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.state.apply(event);
        }
        if !self.state.is_streaming() {
            self.in_flight = None;
        }
    }

    fn poll_local_models(&mut self) {
        if let Some(rx) = &self.models_receiver {
            match rx.try_recv() {
                Ok(models) => {
                    self.state.set_local_models(models);
                    self.models_receiver = None;
                }
                Err(mpsc::TryRecvError::Disconnected) => self.models_receiver = None,
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
    }

    /// Send the input for the selected chat, if sending is allowed.
    fn send(&mut self) {
        if let Some(request) = self.state.begin_send() {
            let guard = self.dispatcher.dispatch(self.runtime.handle(), request);
            self.in_flight = Some(guard);
        }
    }

    fn ui_chat_list(&mut self, ui: &mut egui::Ui) {
        ui.add_space(Self::PANEL_MARGIN);
        ui.heading("Chats");
        ui.add_space(12.0);
        let selected = self.state.selected_id().map(str::to_string);
        let mut clicked = None;
        for chat in self.state.chats() {
            let is_selected = selected.as_deref() == Some(chat.id.as_str());
            if ui.selectable_label(is_selected, chat_label(chat)).clicked() {
                clicked = Some(chat.id.clone());
            }
            ui.add_space(4.0);
        }
        if let Some(id) = clicked {
            self.state.select(&id);
        }
        ui.add_space(12.0);
        ui.horizontal(|ui| {
            if ui.button("+ Ollama").clicked() {
                self.state.new_chat(Provider::Ollama);
            }
            if ui.button("+ OpenAI").clicked() {
                self.state.new_chat(Provider::OpenAi);
            }
        });
    }

    fn ui_header(&mut self, ui: &mut egui::Ui) {
        let Some(chat) = self.state.selected() else { return };
        let (name, provider, model) = (chat.name.clone(), chat.provider, chat.model.clone());
        ui.add_space(Self::PANEL_MARGIN);
        ui.heading(name);
        ui.add_space(8.0);
        let options = self.state.model_options(provider);
        let mut chosen = None;
        egui::ComboBox::from_id_source("model_select")
            .selected_text(model.as_str())
            .show_ui(ui, |ui| {
                for m in &options {
                    if ui.selectable_label(*m == model, m.as_str()).clicked() {
                        chosen = Some(m.clone());
                    }
                }
            });
        if let Some(m) = chosen {
            self.state.set_model(m);
        }
        ui.add_space(8.0);
        ui.separator();
    }

    /// Renders one transcript entry: user messages bold on the darker fill, replies plain.
    fn render_message(ui: &mut egui::Ui, m: &Message, cursor: bool) {
        let is_user = m.is_user();
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        let layout = if is_user {
            egui::Layout::top_down(egui::Align::Max)
        } else {
            egui::Layout::top_down(egui::Align::Min)
        };
        ui.with_layout(layout, |ui| {
            frame.show(ui, |ui| {
                let text = if cursor {
                    format!("{}{}", m.content, STREAM_CURSOR)
                } else {
                    m.content.clone()
                };
                if is_user {
                    ui.label(egui::RichText::new(text).strong());
                } else {
                    ui.label(text);
                }
            });
        });
    }

    fn ui_transcript(&self, ui: &mut egui::Ui) {
        let Some(chat) = self.state.selected() else {
            ui.label("Select a chat to start messaging");
            return;
        };
        let streaming_here = self.state.streaming_chat() == Some(chat.id.as_str());
        let last = chat.messages.len().saturating_sub(1);
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                ui.add_space(8.0);
                for (i, m) in chat.messages.iter().enumerate() {
                    Self::render_message(ui, m, streaming_here && i == last);
                    ui.add_space(8.0);
                }
            });
    }

    fn ui_composer(&mut self, ui: &mut egui::Ui) {
        ui.add_space(8.0);
        if self.state.show_api_key_warning() {
            egui::Frame::none()
                .stroke(egui::Stroke::new(1.0, egui::Color32::RED))
                .rounding(egui::Rounding::same(6.0))
                .inner_margin(egui::Margin::same(8.0))
                .show(ui, |ui| {
                    ui.colored_label(egui::Color32::RED, egui::RichText::new("⚠ API key not set").strong());
                    ui.horizontal(|ui| {
                        ui.label("Please set your OpenAI API key to use this chat.");
                        if ui.button("Set API Key").clicked() {
                            self.key_prompt = Some(String::new());
                        }
                    });
                });
            ui.add_space(8.0);
        }

        let enabled = self.state.can_send();
        // Enter sends, Shift+Enter falls through to the text box as a newline.
        let mut submit = enabled
            && self.input_had_focus
            && ui.input_mut(|i| i.consume_key(egui::Modifiers::NONE, egui::Key::Enter));
        let has_text = !self.state.input().trim().is_empty();
        ui.horizontal(|ui| {
            let send_width = if has_text { 64.0 } else { 0.0 };
            let response = ui.add_enabled(
                enabled,
                egui::TextEdit::multiline(self.state.input_mut())
                    .hint_text("Type your message...")
                    .desired_rows(2)
                    .desired_width(ui.available_width() - send_width),
            );
            self.input_had_focus = response.has_focus();
            if has_text && ui.add_enabled(enabled, egui::Button::new("Send")).clicked() {
                submit = true;
            }
        });
        if submit {
            self.send();
        }
        ui.add_space(Self::PANEL_MARGIN);
    }

    /// Modal prompt for the API key; the key is adopted only if the bridge stores it.
    fn ui_key_prompt(&mut self, ctx: &egui::Context) {
        let Some(mut draft) = self.key_prompt.take() else { return };
        let mut save = false;
        let mut cancel = false;
        egui::Window::new("OpenAI API key")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Enter your OpenAI API key:");
                let r = ui.add(egui::TextEdit::singleline(&mut draft).password(true));
                if r.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    save = true;
                }
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() {
                        save = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                });
            });
        if save {
            self.state.submit_api_key(&self.bridge, &draft);
        } else if !cancel {
            self.key_prompt = Some(draft);
        }
    }
}

impl eframe::App for TandemApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_stream_events();
        self.poll_local_models();
        if self.state.is_streaming() {
            ctx.request_repaint_after(STREAM_REPAINT);
        } else if self.models_receiver.is_some() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        egui::SidePanel::left("chat_list")
            .resizable(false)
            .exact_width(CHAT_LIST_WIDTH)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(Self::PANEL_MARGIN, 0.0))
                    .show(ui, |ui| self.ui_chat_list(ui));
            });

        egui::TopBottomPanel::top("chat_header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(Self::PANEL_MARGIN, 0.0))
                .show(ui, |ui| self.ui_header(ui));
        });

        egui::TopBottomPanel::bottom("composer").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(Self::PANEL_MARGIN, 0.0))
                .show(ui, |ui| self.ui_composer(ui));
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(Self::PANEL_MARGIN, 0.0))
                .show(ui, |ui| self.ui_transcript(ui));
        });

        self.ui_key_prompt(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_label_tags_provider() {
        let chats = tandem::chat::example_chats();
        assert_eq!(chat_label(&chats[0]), "[Ollama] Example (Ollama)");
        assert_eq!(chat_label(&chats[1]), "[OpenAI] Example (OpenAI)");
    }
}
