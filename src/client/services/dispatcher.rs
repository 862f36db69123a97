//! Routes inbound frames to the handler for their type.
//!
//! Each handler only touches its own slice of the view. Frames for a group
//! other than the joined one, and frames of unknown type, change nothing.

use log::{debug, info};
use uuid::Uuid;

use crate::client::models::chat_view::ChatView;
use crate::client::services::event_bus::ChatEvent;
use crate::common::models::{Message, MessageStatus, Notification};
use crate::common::protocol::{ChatFrame, FileFrame, Frame, Inbound, Presence};

/// Applies one inbound frame to `view` and returns the resulting events.
pub fn dispatch(view: &mut ChatView, inbound: Inbound) -> Vec<ChatEvent> {
    let frame = match inbound {
        Inbound::Frame(frame) => frame,
        Inbound::Unrecognized { kind } => {
            info!("[CHAT] Ignoring frame of unknown type '{}'", kind);
            return Vec::new();
        }
    };

    if !view.is_joined(frame.group_id()) {
        debug!(
            "[CHAT] Ignoring {} frame for group {} (not joined)",
            frame.kind(),
            frame.group_id()
        );
        return Vec::new();
    }

    match frame {
        Frame::Message(chat) => on_message(view, chat),
        Frame::MemberJoined(p) => on_presence(view, p, true),
        Frame::MemberLeft(p) => on_presence(view, p, false),
        Frame::Typing(p) => on_typing(view, p),
        Frame::FileUploaded(f) => on_file_uploaded(view, f),
        Frame::Join(p) | Frame::Leave(p) => {
            debug!(
                "[CHAT] Server echoed membership frame for {} in {}",
                p.user_id, p.group_id
            );
            Vec::new()
        }
    }
}

fn on_message(view: &mut ChatView, chat: ChatFrame) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    if view.typing.remove(&chat.user_id).is_some() {
        debug!("[CHAT] {} stopped typing", chat.user_id);
    }

    // echo of our own pending message
    if let Some(client_id) = chat.client_id.as_deref() {
        let ours = view
            .message_by_client_id(client_id)
            .is_some_and(|m| m.user_id == chat.user_id);
        if ours {
            if view.confirm(client_id, chat.id.clone(), Some(chat.timestamp)) {
                events.push(ChatEvent::MessageStatusChanged {
                    client_id: client_id.to_string(),
                    status: MessageStatus::Confirmed,
                });
            }
            return events;
        }
    }

    let sender_name = chat
        .sender_name
        .clone()
        .or_else(|| view.member_name(&chat.user_id).map(str::to_string))
        .unwrap_or_else(|| chat.user_id.clone());
    let message = Message {
        id: chat.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        client_id: chat.client_id,
        group_id: chat.group_id,
        user_id: chat.user_id,
        sender_name,
        content: chat.content,
        timestamp: chat.timestamp,
        status: MessageStatus::Confirmed,
    };
    view.push_message(message.clone());
    events.push(ChatEvent::MessageAdded(message));
    events
}

fn on_presence(view: &mut ChatView, presence: Presence, online: bool) -> Vec<ChatEvent> {
    if !online {
        view.typing.remove(&presence.user_id);
    }
    if view.set_member_online(&presence.user_id, presence.user_name.as_deref(), online) {
        vec![ChatEvent::MemberPresence {
            user_id: presence.user_id,
            online,
        }]
    } else {
        Vec::new()
    }
}

fn on_typing(view: &mut ChatView, presence: Presence) -> Vec<ChatEvent> {
    if presence.user_id == view.user.id {
        return Vec::new();
    }
    let name = presence
        .user_name
        .clone()
        .or_else(|| view.member_name(&presence.user_id).map(str::to_string))
        .unwrap_or_else(|| presence.user_id.clone());
    view.typing.insert(presence.user_id.clone(), name.clone());
    vec![ChatEvent::Typing {
        user_id: presence.user_id,
        name,
    }]
}

fn on_file_uploaded(view: &mut ChatView, upload: FileFrame) -> Vec<ChatEvent> {
    let file = upload.file;
    // our own upload was already shown when it finished
    if upload.user_id == view.user.id && view.take_own_upload(&file.url) {
        debug!("[CHAT] Broadcast of own upload {} already shown", file.url);
        return Vec::new();
    }
    let who = view
        .member_name(&upload.user_id)
        .map(str::to_string)
        .unwrap_or(upload.user_id);
    let notification = Notification::info(format!("{} shared {}", who, file.name));
    view.add_file(file.clone());
    view.notify(notification.clone());
    vec![
        ChatEvent::FileAdded(file),
        ChatEvent::Notification(notification),
    ]
}
