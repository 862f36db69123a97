use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::common::models::{Message, MessageStatus, UserProfile};
use crate::common::protocol::ChatFrame;

/// Minimum gap between two outbound typing frames.
pub const TYPING_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("Message too long ({len} characters, max {max})")]
    TooLong { len: usize, max: usize },
}

/// A message ready to go out, plus its optimistic local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub frame: ChatFrame,
    pub local: Message,
}

#[derive(Debug, Clone)]
pub struct Composer {
    max_message_length: usize,
}

impl Composer {
    pub fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }

    /// Turns raw input into an outbound frame. Blank input yields `Ok(None)`.
    pub fn compose(
        &self,
        author: &UserProfile,
        group_id: &str,
        input: &str,
    ) -> Result<Option<Outgoing>, ComposeError> {
        let content = input.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let len = content.chars().count();
        if len > self.max_message_length {
            return Err(ComposeError::TooLong {
                len,
                max: self.max_message_length,
            });
        }

        let client_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let frame = ChatFrame {
            group_id: group_id.to_string(),
            user_id: author.id.clone(),
            content: content.to_string(),
            timestamp,
            id: None,
            sender_name: Some(author.name.clone()),
            client_id: Some(client_id.clone()),
        };
        Ok(Some(Outgoing {
            local: pending_copy(&frame, client_id),
            frame,
        }))
    }
}

/// Rebuilds the outbound frame for a message that failed to send.
pub fn resend_frame(message: &Message) -> ChatFrame {
    ChatFrame {
        group_id: message.group_id.clone(),
        user_id: message.user_id.clone(),
        content: message.content.clone(),
        timestamp: message.timestamp,
        id: None,
        sender_name: Some(message.sender_name.clone()),
        client_id: message.client_id.clone(),
    }
}

fn pending_copy(frame: &ChatFrame, client_id: String) -> Message {
    Message {
        id: client_id.clone(),
        client_id: Some(client_id),
        group_id: frame.group_id.clone(),
        user_id: frame.user_id.clone(),
        sender_name: frame
            .sender_name
            .clone()
            .unwrap_or_else(|| frame.user_id.clone()),
        content: frame.content.clone(),
        timestamp: frame.timestamp,
        status: MessageStatus::Pending,
    }
}

/// Rate limits outbound typing frames.
#[derive(Debug, Clone, Default)]
pub struct TypingThrottle {
    last_sent: Option<Instant>,
}

impl TypingThrottle {
    pub fn should_send(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < TYPING_INTERVAL => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
