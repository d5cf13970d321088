//! Cloud provider reply. No request leaves the machine; the reply is a fixed sentence
//! that the dispatcher reveals one character at a time.

use crate::chat::Provider;

/// Placeholder reply for a cloud chat.
pub fn simulated_reply(provider: Provider, model: &str) -> String {
    format!(
        "This is a simulated response from {} using {} model.",
        provider, model
    )
}
