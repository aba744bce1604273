//! Addressing and subject lines for battle messages.

use serde::{Deserialize, Serialize};

use super::message::{MessageDraft, Participant, Role};

/// Who is writing to whom, and under which subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub evaluator: Participant,
    pub respondent: Participant,
    /// Recipient label of the opening broadcast.
    pub broadcast_label: String,
    pub base_subject: String,
    pub termination_subject: String,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            evaluator: Participant::new(
                "Dana Reyes",
                "dana.reyes@efficiency-office.gov",
            ),
            respondent: Participant::new("Sam Porter", "sam.porter@records-agency.gov"),
            broadcast_label: "All Staff".to_string(),
            base_subject: "Efficiency Review - Weekly Accomplishments Required".to_string(),
            termination_subject: "Notice of Termination - Efficiency Review".to_string(),
        }
    }
}

impl Envelope {
    pub fn participant(&self, role: Role) -> &Participant {
        match role {
            Role::Evaluator => &self.evaluator,
            Role::Respondent => &self.respondent,
        }
    }

    /// Subject for a message appended after `thread_len` existing messages.
    ///
    /// One `RE: ` per message already in the thread.
    pub fn reply_subject(&self, thread_len: usize) -> String {
        format!("{}{}", "RE: ".repeat(thread_len), self.base_subject)
    }

    /// The opening broadcast from the evaluator.
    pub fn opening(&self, body: String) -> MessageDraft {
        MessageDraft {
            sender: Role::Evaluator,
            recipient: Role::Respondent,
            from: self.evaluator.mailbox(),
            to: self.broadcast_label.clone(),
            subject: self.base_subject.clone(),
            body,
        }
    }

    /// A direct reply from `sender` to the other side.
    pub fn reply(&self, sender: Role, thread_len: usize, body: String) -> MessageDraft {
        MessageDraft {
            sender,
            recipient: sender.counterpart(),
            from: self.participant(sender).mailbox(),
            to: self.participant(sender.counterpart()).mailbox(),
            subject: self.reply_subject(thread_len),
            body,
        }
    }

    /// The evaluator's termination notice.
    pub fn termination(&self, body: String) -> MessageDraft {
        MessageDraft {
            subject: self.termination_subject.clone(),
            ..self.reply(Role::Evaluator, 0, body)
        }
    }
}
