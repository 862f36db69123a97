#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hauhub_chat::client::config::ClientConfig;
use hauhub_chat::client::services::chat_controller::{ChatController, ChatHandle};
use hauhub_chat::client::services::event_bus::ChatEvent;
use hauhub_chat::client::services::portal_api::{ApiError, FileUpload, PortalApi};
use hauhub_chat::client::services::transport::{MemoryConnector, MemoryPeer};
use hauhub_chat::common::models::{
    FileMeta, GroupInfo, Member, Message, MessageStatus, UserProfile,
};
use hauhub_chat::common::protocol::{ChatFrame, Frame, Presence};
use tokio::sync::broadcast;

#[derive(Default)]
pub struct FakeState {
    pub users: HashMap<String, UserProfile>,
    pub groups: HashMap<String, (GroupInfo, Vec<Member>, Vec<Message>)>,
    pub delays: HashMap<String, Duration>,
    pub upload_delay: Option<Duration>,
    pub fail_send: bool,
    pub sent: Vec<ChatFrame>,
    pub uploads: Vec<(String, FileUpload)>,
}

/// In-memory portal with per-group response delays and a shared upload delay.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn with_campus() -> Self {
        let api = FakeApi::default();
        {
            let mut s = api.lock();
            for (id, name) in [("u1", "Ana"), ("u2", "Bea"), ("u9", "Ivo")] {
                s.users.insert(
                    id.to_string(),
                    UserProfile {
                        id: id.to_string(),
                        username: name.to_lowercase(),
                        name: name.to_string(),
                        avatar: None,
                        role: "student".to_string(),
                    },
                );
            }
        }
        for group in ["g1", "g2", "slow", "fast"] {
            api.add_group(group);
        }
        api
    }

    pub fn add_group(&self, id: &str) {
        let members = vec![
            member("u1", "Ana"),
            member("u2", "Bea"),
            member("u9", "Ivo"),
        ];
        let history = vec![Message {
            id: format!("{}-welcome", id),
            client_id: None,
            group_id: id.to_string(),
            user_id: "u2".to_string(),
            sender_name: "Bea".to_string(),
            content: format!("welcome to {}", id),
            timestamp: 1_700_000_000_000,
            status: MessageStatus::Confirmed,
        }];
        let group = GroupInfo {
            id: id.to_string(),
            name: format!("Studio {}", id),
            project_name: "Pavilion".to_string(),
            course_code: "ARC301".to_string(),
            instructor: "Prof. Reyes".to_string(),
            members: Vec::new(),
        };
        self.lock()
            .groups
            .insert(id.to_string(), (group, members, history));
    }

    pub fn delay_group(&self, id: &str, delay: Duration) {
        self.lock().delays.insert(id.to_string(), delay);
    }

    pub fn delay_uploads(&self, delay: Duration) {
        self.lock().upload_delay = Some(delay);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.lock().fail_send = fail;
    }

    pub fn sent(&self) -> Vec<ChatFrame> {
        self.lock().sent.clone()
    }

    pub fn uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn group_part<T, F>(&self, group_id: &str, pick: F) -> Result<T, ApiError>
    where
        F: FnOnce(&(GroupInfo, Vec<Member>, Vec<Message>)) -> T,
    {
        let (found, delay) = {
            let s = self.lock();
            (
                s.groups.get(group_id).map(pick),
                s.delays.get(group_id).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        found.ok_or_else(|| ApiError::Rejected(format!("no group {}", group_id)))
    }
}

fn member(id: &str, name: &str) -> Member {
    Member {
        id: id.to_string(),
        name: name.to_string(),
        role: "student".to_string(),
        is_online: true,
    }
}

impl PortalApi for FakeApi {
    async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.lock()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("no user {}", user_id)))
    }

    async fn fetch_group(&self, group_id: &str) -> Result<GroupInfo, ApiError> {
        self.group_part(group_id, |g| g.0.clone()).await
    }

    async fn fetch_group_messages(&self, group_id: &str) -> Result<Vec<Message>, ApiError> {
        self.group_part(group_id, |g| g.2.clone()).await
    }

    async fn fetch_group_members(&self, group_id: &str) -> Result<Vec<Member>, ApiError> {
        self.group_part(group_id, |g| g.1.clone()).await
    }

    async fn upload_file(
        &self,
        group_id: &str,
        user_id: &str,
        upload: FileUpload,
    ) -> Result<FileMeta, ApiError> {
        let delay = self.lock().upload_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let file = FileMeta {
            name: upload.name.clone(),
            mime_type: upload.mime_type.clone(),
            url: format!("/files/{}/{}", group_id, upload.name),
            size: Some(upload.bytes.len() as u64),
            uploaded_by: Some(user_id.to_string()),
        };
        self.lock().uploads.push((group_id.to_string(), upload));
        Ok(file)
    }

    async fn send_message(&self, frame: ChatFrame) -> Result<Message, ApiError> {
        let mut s = self.lock();
        if s.fail_send {
            return Err(ApiError::Io("server unreachable".to_string()));
        }
        s.sent.push(frame.clone());
        Ok(Message {
            id: format!("srv-{}", s.sent.len()),
            client_id: frame.client_id,
            group_id: frame.group_id,
            user_id: frame.user_id,
            sender_name: frame.sender_name.unwrap_or_default(),
            content: frame.content,
            timestamp: frame.timestamp + 1,
            status: MessageStatus::Confirmed,
        })
    }
}

pub fn config(group: Option<&str>, extra: &[(&str, &str)]) -> ClientConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("HAUHUB_ORIGIN".into(), "https://hub.hau.test".into());
    vars.insert("HAUHUB_USER_ID".into(), "u1".into());
    vars.insert("RECONNECT_POLICY".into(), "fixed".into());
    if let Some(group) = group {
        vars.insert("HAUHUB_GROUP_ID".into(), group.into());
    }
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    ClientConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub struct Harness {
    pub handle: ChatHandle,
    pub events: broadcast::Receiver<ChatEvent>,
    pub connector: MemoryConnector,
    pub api: FakeApi,
}

pub async fn start(api: FakeApi, config: ClientConfig) -> Harness {
    let connector = MemoryConnector::new();
    start_with(api, config, connector).await
}

pub async fn start_with(
    api: FakeApi,
    config: ClientConfig,
    connector: MemoryConnector,
) -> Harness {
    let handle = ChatController::start(&config, api.clone(), connector.clone())
        .await
        .unwrap();
    let events = handle.subscribe();
    Harness {
        handle,
        events,
        connector,
        api,
    }
}

/// Waits for the first event matching `pred`, skipping others.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    let deadline = Duration::from_secs(60);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_loaded(events: &mut broadcast::Receiver<ChatEvent>, group: &str) {
    wait_for(events, |e| {
        matches!(e, ChatEvent::GroupLoaded { group: g, .. } if g.id == group)
    })
    .await;
}

/// Accepts the next link and consumes its initial join.
pub async fn accept_joined(connector: &MemoryConnector, group: &str) -> MemoryPeer {
    let mut peer = connector.accept().await.expect("connector dropped");
    assert_eq!(peer.next_frame().await, Some(join(group)));
    peer
}

fn ana_in(group: &str) -> Presence {
    Presence {
        group_id: group.to_string(),
        user_id: "u1".to_string(),
        user_name: Some("Ana".to_string()),
    }
}

pub fn join(group: &str) -> Frame {
    Frame::Join(ana_in(group))
}

pub fn leave(group: &str) -> Frame {
    Frame::Leave(ana_in(group))
}

pub fn chat(group: &str, user: &str, content: &str) -> Frame {
    Frame::Message(ChatFrame {
        group_id: group.to_string(),
        user_id: user.to_string(),
        content: content.to_string(),
        timestamp: 1_700_000_100_000,
        id: None,
        sender_name: None,
        client_id: None,
    })
}
