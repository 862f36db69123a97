//! The group-chat controller.
//!
//! One task owns the session and the view. It reacts to commands from the UI
//! (via [`ChatHandle`]), to inbound frames from the transport and to the
//! completion of background requests. All view changes are published on the
//! [`EventBus`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::client::config::ClientConfig;
use crate::client::models::chat_view::ChatView;
use crate::client::models::session::{Session, SwitchState, SwitchTicket};
use crate::client::services::composer::{resend_frame, Composer, TypingThrottle};
use crate::client::services::dispatcher::dispatch;
use crate::client::services::event_bus::{ChatEvent, EventBus};
use crate::client::services::portal_api::{ApiError, FileUpload, PortalApi};
use crate::client::services::transport::{
    ConnectionState, Connector, Transport, TransportError, TransportHandle,
};
use crate::common::models::{
    FileMeta, GroupId, GroupInfo, Member, Message, MessageStatus, Notification,
};
use crate::common::protocol::{ChatFrame, FileFrame, Frame, Inbound, Presence};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("could not load user {user_id}: {source}")]
    Identity {
        user_id: String,
        #[source]
        source: ApiError,
    },
    #[error("invalid chat endpoint: {0}")]
    Endpoint(String),
    #[error("could not read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("chat controller has stopped")]
    Stopped,
}

/// Point-in-time copy of the controller state.
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub view: ChatView,
    pub switch: SwitchState,
    pub connection: ConnectionState,
}

enum Command {
    Send(String),
    Retry(String),
    Typing,
    SwitchGroup(GroupId),
    Upload(FileUpload),
    Snapshot(oneshot::Sender<ChatSnapshot>),
    Shutdown,
}

struct LoadedGroup {
    group: GroupInfo,
    members: Vec<Member>,
    history: Vec<Message>,
}

enum Completion {
    GroupLoaded {
        ticket: SwitchTicket,
        result: Result<LoadedGroup, ApiError>,
    },
    FallbackSent {
        client_id: String,
        result: Result<Message, ApiError>,
    },
    AckTimeout {
        client_id: String,
    },
    Uploaded {
        group_id: GroupId,
        result: Result<FileMeta, ApiError>,
    },
}

/// Cloneable front end of a running controller.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
    transport: TransportHandle,
}

impl ChatHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn send_message(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.command(Command::Send(text.into()))
    }

    /// Re-sends a message whose delivery failed.
    pub fn retry(&self, client_id: impl Into<String>) -> Result<(), ChatError> {
        self.command(Command::Retry(client_id.into()))
    }

    pub fn typing(&self) -> Result<(), ChatError> {
        self.command(Command::Typing)
    }

    pub fn switch_group(&self, group_id: impl Into<GroupId>) -> Result<(), ChatError> {
        self.command(Command::SwitchGroup(group_id.into()))
    }

    pub fn upload(&self, upload: FileUpload) -> Result<(), ChatError> {
        self.command(Command::Upload(upload))
    }

    pub async fn upload_path(&self, path: &Path) -> Result<(), ChatError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ChatError::ReadFile {
                path: path.display().to_string(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.upload(FileUpload::new(name, bytes))
    }

    pub async fn snapshot(&self) -> Result<ChatSnapshot, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ChatError::Stopped)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).map_err(|_| ChatError::Stopped)
    }
}

pub struct ChatController<A> {
    api: Arc<A>,
    transport: TransportHandle,
    session: Session,
    view: ChatView,
    composer: Composer,
    typing: TypingThrottle,
    events: EventBus,
    completions: mpsc::UnboundedSender<Completion>,
    max_upload_bytes: u64,
    request_timeout: Duration,
}

impl<A: PortalApi> ChatController<A> {
    /// Loads the user, starts the transport and the controller task, and
    /// switches to the configured group if there is one.
    pub async fn start<C: Connector>(
        config: &ClientConfig,
        api: A,
        connector: C,
    ) -> Result<ChatHandle, ChatError> {
        let url = config
            .websocket_url()
            .map_err(|e| ChatError::Endpoint(e.to_string()))?;
        let user = api
            .fetch_user(&config.user_id)
            .await
            .map_err(|source| ChatError::Identity {
                user_id: config.user_id.clone(),
                source,
            })?;
        info!("[CHAT] Signed in as {} ({})", user.name, user.id);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let transport = Transport::spawn(
            connector,
            url.to_string(),
            config.retry.clone(),
            frames_tx,
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let events = EventBus::default();

        let controller = ChatController {
            api: Arc::new(api),
            transport: transport.clone(),
            session: Session::new(user.clone()),
            view: ChatView::new(user),
            composer: Composer::new(config.max_message_length),
            typing: TypingThrottle::default(),
            events: events.clone(),
            completions: completions_tx,
            max_upload_bytes: config.max_upload_bytes,
            request_timeout: config.request_timeout,
        };
        let state = transport.subscribe_state();
        tokio::spawn(controller.run(commands_rx, frames_rx, completions_rx, state));

        let handle = ChatHandle {
            commands: commands_tx,
            events,
            transport,
        };
        if let Some(group_id) = &config.group_id {
            handle.switch_group(group_id.clone())?;
        }
        Ok(handle)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut frames: mpsc::UnboundedReceiver<Inbound>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut state: watch::Receiver<ConnectionState>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(inbound) = frames.recv() => {
                    for event in dispatch(&mut self.view, inbound) {
                        self.events.publish(event);
                    }
                }
                Some(done) = completions.recv() => self.handle_completion(done),
                Ok(()) = state.changed() => {
                    let current = *state.borrow_and_update();
                    self.on_connection_state(current);
                }
            }
        }
        self.transport.close();
        info!("[CHAT] Controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(text) => self.send_message(&text),
            Command::Retry(client_id) => self.retry(&client_id),
            Command::Typing => self.send_typing(),
            Command::SwitchGroup(group_id) => self.switch_group(group_id),
            Command::Upload(upload) => self.upload(upload),
            Command::Snapshot(reply) => {
                let _ = reply.send(ChatSnapshot {
                    view: self.view.clone(),
                    switch: self.session.switch.state().clone(),
                    connection: self.transport.state(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::GroupLoaded { ticket, result } => self.on_group_loaded(ticket, result),
            Completion::FallbackSent { client_id, result } => match result {
                Ok(stored) => {
                    if self
                        .view
                        .confirm(&client_id, Some(stored.id), Some(stored.timestamp))
                    {
                        self.publish_status(&client_id, MessageStatus::Confirmed);
                    }
                }
                Err(e) => self.fail_message(&client_id, &e.to_string()),
            },
            Completion::AckTimeout { client_id } => {
                let pending = self
                    .view
                    .message_by_client_id(&client_id)
                    .is_some_and(Message::is_pending);
                if pending {
                    self.fail_message(&client_id, "no confirmation from server");
                }
            }
            Completion::Uploaded { group_id, result } => self.on_uploaded(group_id, result),
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        info!("[CHAT] Connection state: {:?}", state);
        self.events.publish(ChatEvent::Connection(state));
        if state == ConnectionState::Failed {
            self.notify(Notification::error("Lost connection to the chat server"));
        }
    }

    fn send_message(&mut self, text: &str) {
        let Some(group_id) = self.session.active_group().map(str::to_string) else {
            if !text.trim().is_empty() {
                self.notify(Notification::warning("Join a group before sending messages"));
            }
            return;
        };
        match self.composer.compose(&self.session.user, &group_id, text) {
            Ok(None) => debug!("[CHAT] Ignoring empty message"),
            Err(e) => self.notify(Notification::warning(e.to_string())),
            Ok(Some(outgoing)) => {
                self.view.push_message(outgoing.local.clone());
                self.events.publish(ChatEvent::MessageAdded(outgoing.local));
                self.deliver(outgoing.frame);
            }
        }
    }

    fn retry(&mut self, client_id: &str) {
        let failed = self
            .view
            .message_by_client_id(client_id)
            .filter(|m| m.status == MessageStatus::Failed)
            .cloned();
        let Some(message) = failed else {
            self.notify(Notification::warning("Nothing to retry"));
            return;
        };
        self.view.set_status(client_id, MessageStatus::Pending);
        self.publish_status(client_id, MessageStatus::Pending);
        self.deliver(resend_frame(&message));
    }

    /// Sends over the socket when open, otherwise through the request API.
    fn deliver(&mut self, frame: ChatFrame) {
        let Some(client_id) = frame.client_id.clone() else {
            warn!("[CHAT] Refusing to send message without correlation id");
            return;
        };
        match self.transport.send(&Frame::Message(frame.clone())) {
            Ok(()) => {
                debug!("[CHAT] Message {} sent over socket", client_id);
                let done = self.completions.clone();
                let wait = self.request_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    let _ = done.send(Completion::AckTimeout { client_id });
                });
            }
            Err(TransportError::NotOpen) => {
                info!(
                    "[CHAT] Socket not open, sending {} via request fallback",
                    client_id
                );
                let api = self.api.clone();
                let done = self.completions.clone();
                let wait = self.request_timeout;
                tokio::spawn(async move {
                    let result = tokio::time::timeout(wait, api.send_message(frame))
                        .await
                        .unwrap_or(Err(ApiError::Timeout));
                    let _ = done.send(Completion::FallbackSent { client_id, result });
                });
            }
            Err(e) => self.fail_message(&client_id, &e.to_string()),
        }
    }

    fn fail_message(&mut self, client_id: &str, reason: &str) {
        warn!("[CHAT] Message {} failed: {}", client_id, reason);
        if self.view.set_status(client_id, MessageStatus::Failed) {
            self.publish_status(client_id, MessageStatus::Failed);
            self.notify(Notification::error(format!("Message not sent: {}", reason)));
        }
    }

    fn send_typing(&mut self) {
        let Some(group_id) = self.session.active_group().map(str::to_string) else {
            return;
        };
        if !self.typing.should_send(Instant::now()) {
            return;
        }
        let frame = Frame::Typing(Presence {
            group_id,
            user_id: self.session.user.id.clone(),
            user_name: Some(self.session.user.name.clone()),
        });
        if let Err(e) = self.transport.send(&frame) {
            debug!("[CHAT] Dropping typing frame: {}", e);
        }
    }

    fn switch_group(&mut self, to: GroupId) {
        let Some(plan) = self.session.switch.begin(to) else {
            debug!("[CHAT] Already in requested group");
            return;
        };
        self.publish_switch();
        if let Some(old) = &plan.leave {
            info!("[CHAT] Leaving group {}", old);
            self.transport.leave();
            self.session.switch.left();
            self.publish_switch();
        }
        self.view.leave_group();
        self.typing.reset();
        self.load_group(plan.ticket);
    }

    fn load_group(&self, ticket: SwitchTicket) {
        info!("[CHAT] Loading group {}", ticket.group_id);
        let api = self.api.clone();
        let done = self.completions.clone();
        let wait = self.request_timeout;
        tokio::spawn(async move {
            let group_id = ticket.group_id.clone();
            let fetch = async {
                let (group, members, history) = tokio::try_join!(
                    api.fetch_group(&group_id),
                    api.fetch_group_members(&group_id),
                    api.fetch_group_messages(&group_id),
                )?;
                Ok::<_, ApiError>(LoadedGroup {
                    group,
                    members,
                    history,
                })
            };
            let result = tokio::time::timeout(wait, fetch)
                .await
                .unwrap_or(Err(ApiError::Timeout));
            let _ = done.send(Completion::GroupLoaded { ticket, result });
        });
    }

    fn on_group_loaded(&mut self, ticket: SwitchTicket, result: Result<LoadedGroup, ApiError>) {
        if !self.session.switch.is_current(&ticket) {
            info!("[CHAT] Discarding stale data for group {}", ticket.group_id);
            return;
        }
        match result {
            Ok(mut loaded) => {
                self.session.switch.complete(&ticket);
                loaded.group.id = ticket.group_id.clone();
                let group = loaded.group.clone();
                let history = loaded.history.len();
                self.view
                    .load_group(loaded.group, loaded.members, loaded.history);
                self.transport.join(Presence {
                    group_id: ticket.group_id.clone(),
                    user_id: self.session.user.id.clone(),
                    user_name: Some(self.session.user.name.clone()),
                });
                info!("[CHAT] Joined group {} ({} messages)", ticket.group_id, history);
                self.events.publish(ChatEvent::GroupLoaded { group, history });
                self.publish_switch();
            }
            Err(e) => {
                warn!("[CHAT] Loading group {} failed: {}", ticket.group_id, e);
                self.session.switch.fail(&ticket);
                self.publish_switch();
                self.notify(Notification::error(format!(
                    "Could not open group {}: {}",
                    ticket.group_id, e
                )));
            }
        }
    }

    fn upload(&mut self, upload: FileUpload) {
        let Some(group_id) = self.session.active_group().map(str::to_string) else {
            self.notify(Notification::warning("Join a group before uploading files"));
            return;
        };
        if upload.bytes.is_empty() {
            self.notify(Notification::warning(format!("{} is empty", upload.name)));
            return;
        }
        if upload.bytes.len() as u64 > self.max_upload_bytes {
            self.notify(Notification::warning(format!(
                "{} is too large (max {} bytes)",
                upload.name, self.max_upload_bytes
            )));
            return;
        }

        info!("[CHAT] Uploading {} to {}", upload.name, group_id);
        let api = self.api.clone();
        let done = self.completions.clone();
        let user_id = self.session.user.id.clone();
        let wait = self.request_timeout;
        tokio::spawn(async move {
            let result = tokio::time::timeout(wait, api.upload_file(&group_id, &user_id, upload))
                .await
                .unwrap_or(Err(ApiError::Timeout));
            let _ = done.send(Completion::Uploaded { group_id, result });
        });
    }

    fn on_uploaded(&mut self, group_id: GroupId, result: Result<FileMeta, ApiError>) {
        let file = match result {
            Ok(file) => file,
            Err(e) => {
                warn!("[CHAT] Upload to {} failed: {}", group_id, e);
                self.notify(Notification::error(format!("Upload failed: {}", e)));
                return;
            }
        };
        if self.view.is_joined(&group_id) {
            self.view.add_own_upload(file.clone());
            self.events.publish(ChatEvent::FileAdded(file.clone()));
        } else {
            info!(
                "[CHAT] Upload of {} finished after leaving {}, announcing anyway",
                file.name, group_id
            );
        }
        self.notify(Notification::success(format!("Uploaded {}", file.name)));

        // announced to the group it was uploaded to, even after a switch
        let frame = Frame::FileUploaded(FileFrame {
            group_id,
            user_id: self.session.user.id.clone(),
            file,
        });
        if let Err(e) = self.transport.send(&frame) {
            debug!("[CHAT] Could not announce upload: {}", e);
        }
    }

    fn notify(&mut self, notification: Notification) {
        self.view.notify(notification.clone());
        self.events.publish(ChatEvent::Notification(notification));
    }

    fn publish_status(&self, client_id: &str, status: MessageStatus) {
        self.events.publish(ChatEvent::MessageStatusChanged {
            client_id: client_id.to_string(),
            status,
        });
    }

    fn publish_switch(&self) {
        self.events
            .publish(ChatEvent::Switch(self.session.switch.state().clone()));
    }
}
