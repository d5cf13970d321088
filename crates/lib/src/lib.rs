//! Tandem core library — chat state, the Ollama client, the request dispatcher and
//! configuration, used by the desktop app.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod state;
