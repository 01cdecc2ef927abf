use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::models::{Conversation, Guest, Hotel, MessageDirection};
use crate::deepseek::{ChatMessage, LanguageModel};
use crate::resilience::Guarded;
use crate::resilience::degradation::fallback_reply;
use crate::web::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Canned text was used instead of a generated answer.
    pub fallback: bool,
}

pub struct ReplyGenerator {
    model: Option<Arc<dyn LanguageModel>>,
    guarded: Guarded,
    default_reply: String,
}

impl ReplyGenerator {
    pub fn new(
        model: Option<Arc<dyn LanguageModel>>,
        guarded: Guarded,
        default_reply: impl Into<String>,
    ) -> Self {
        Self {
            model,
            guarded,
            default_reply: default_reply.into(),
        }
    }

    /// `history` is newest first, as returned by the conversation store, and
    /// should end (in time) with the message being answered.
    pub async fn generate(&self, hotel: &Hotel, guest: &Guest, history: &[Conversation]) -> Reply {
        let Some(model) = &self.model else {
            return self.fallback(hotel);
        };

        let messages = build_prompt(hotel, guest, history);
        match self.guarded.call(|| model.chat(&messages)).await {
            Ok(text) => {
                debug!(hotel_id = hotel.id, guest_id = guest.id, "Reply generated");
                Reply {
                    text,
                    fallback: false,
                }
            }
            Err(err) => {
                warn!(hotel_id = hotel.id, error = %err, "Reply generation failed, sending canned reply");
                self.fallback(hotel)
            }
        }
    }

    fn fallback(&self, hotel: &Hotel) -> Reply {
        Metrics::reply_fallback();
        Reply {
            text: fallback_reply(hotel, &self.default_reply).to_string(),
            fallback: true,
        }
    }
}

fn build_prompt(hotel: &Hotel, guest: &Guest, history: &[Conversation]) -> Vec<ChatMessage> {
    let mut system = format!(
        "You are the front desk assistant of {}. Answer the guest's WhatsApp message briefly \
         and politely, in the language the guest writes in. Do not invent prices or policies.",
        hotel.name
    );
    if let Some(name) = &guest.name {
        system.push_str(&format!(" The guest's name is {name}."));
    }
    if let Some(room) = &guest.room_number {
        system.push_str(&format!(" They stay in room {room}."));
    }
    if let Some(instructions) = hotel.setting_str("assistant_instructions") {
        system.push(' ');
        system.push_str(instructions);
    }

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().rev().map(|entry| match entry.direction {
        MessageDirection::Inbound => ChatMessage::user(entry.content.clone()),
        MessageDirection::Outbound => ChatMessage::assistant(entry.content.clone()),
    }));
    messages
}
