use log::debug;
use tokio::sync::broadcast;

use crate::client::models::session::SwitchState;
use crate::client::services::transport::ConnectionState;
use crate::common::models::{
    FileMeta, GroupInfo, Message, MessageStatus, Notification, UserId,
};

/// Changes to the chat view, published in the order they are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connection(ConnectionState),
    Switch(SwitchState),
    GroupLoaded {
        group: GroupInfo,
        history: usize,
    },
    MessageAdded(Message),
    MessageStatusChanged {
        client_id: String,
        status: MessageStatus,
    },
    MemberPresence {
        user_id: UserId,
        online: bool,
    },
    Typing {
        user_id: UserId,
        name: String,
    },
    FileAdded(FileMeta),
    Notification(Notification),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ChatEvent) {
        if self.sender.send(event).is_err() {
            debug!("[CHAT] No subscribers for event");
        }
    }
}
