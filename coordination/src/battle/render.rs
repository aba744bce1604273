//! Context renderer: formats the message log as an email thread.
//!
//! Pure: the same log and viewer always produce the same text. Every message
//! is included; context-length limits belong to the backend.

use serde::{Deserialize, Serialize};

use super::message::{Message, Role};

/// Order in which messages appear in the rendered thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOrder {
    #[default]
    OldestFirst,
    /// Mail-client style, latest message on top.
    NewestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextRenderer {
    pub order: RenderOrder,
}

impl ContextRenderer {
    pub fn new(order: RenderOrder) -> Self {
        Self { order }
    }

    /// Render `messages` for `viewer`. Messages the viewer sent are marked.
    pub fn render(&self, messages: &[Message], viewer: Role) -> String {
        let total = messages.len();
        let blocks: Vec<String> = match self.order {
            RenderOrder::OldestFirst => messages
                .iter()
                .map(|m| render_message(m, total, viewer))
                .collect(),
            RenderOrder::NewestFirst => messages
                .iter()
                .rev()
                .map(|m| render_message(m, total, viewer))
                .collect(),
        };
        blocks.join("\n\n")
    }
}

fn render_message(msg: &Message, total: usize, viewer: Role) -> String {
    let marker = if msg.sender == viewer { " (sent by you)" } else { "" };
    format!(
        "--- Message {} of {}{} ---\nFrom: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}",
        msg.id,
        total,
        marker,
        msg.from,
        msg.to,
        msg.subject,
        msg.timestamp.format("%a, %d %b %Y %H:%M:%S UTC"),
        msg.body.trim_end()
    )
}
