use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::common::models::{
    FileMeta, GroupId, GroupInfo, Member, Message, MessageStatus, Notification, UserId,
    UserProfile,
};

/// Most recent notifications kept for display; older ones are dropped.
pub const NOTIFICATION_LIMIT: usize = 20;

/// Everything the chat screen shows for the current user and group.
///
/// Owned by the controller task; subscribers see it through events and
/// snapshots only.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatView {
    pub user: UserProfile,
    pub group: Option<GroupInfo>,
    /// Group whose frames are accepted. `None` while no join has completed.
    joined: Option<GroupId>,
    pub messages: Vec<Message>,
    pub members: Vec<Member>,
    pub files: Vec<FileMeta>,
    /// user id -> display name of members currently typing.
    pub typing: BTreeMap<UserId, String>,
    pub notifications: VecDeque<Notification>,
    /// Urls of our own uploads whose server broadcast has not come back yet.
    announced: HashSet<String>,
}

impl ChatView {
    pub fn new(user: UserProfile) -> Self {
        Self {
            user,
            group: None,
            joined: None,
            messages: Vec::new(),
            members: Vec::new(),
            files: Vec::new(),
            typing: BTreeMap::new(),
            notifications: VecDeque::new(),
            announced: HashSet::new(),
        }
    }

    pub fn joined_group(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    pub fn is_joined(&self, group_id: &str) -> bool {
        self.joined.as_deref() == Some(group_id)
    }

    /// Replaces the group-scoped state with freshly loaded data and starts
    /// accepting frames for that group.
    pub fn load_group(
        &mut self,
        group: GroupInfo,
        members: Vec<Member>,
        mut history: Vec<Message>,
    ) {
        history.sort_by_key(|m| m.timestamp);
        self.joined = Some(group.id.clone());
        self.members = if members.is_empty() {
            group.members.clone()
        } else {
            members
        };
        self.group = Some(group);
        self.messages = history;
        self.files.clear();
        self.typing.clear();
        self.announced.clear();
    }

    /// Drops group-scoped state; frames are ignored until the next load.
    pub fn leave_group(&mut self) {
        self.joined = None;
        self.group = None;
        self.messages.clear();
        self.members.clear();
        self.files.clear();
        self.typing.clear();
        self.announced.clear();
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn message_by_client_id(&self, client_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }

    /// Updates the status of a locally composed message. Returns false when
    /// no message carries `client_id` or the status was already `status`.
    pub fn set_status(&mut self, client_id: &str, status: MessageStatus) -> bool {
        let found = self
            .messages
            .iter_mut()
            .find(|m| m.client_id.as_deref() == Some(client_id));
        match found {
            Some(message) if message.status != status => {
                message.status = status;
                true
            }
            _ => false,
        }
    }

    /// Marks a pending or failed message confirmed, adopting the server's id
    /// and time.
    pub fn confirm(
        &mut self,
        client_id: &str,
        server_id: Option<String>,
        timestamp: Option<i64>,
    ) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| {
            m.client_id.as_deref() == Some(client_id) && m.status != MessageStatus::Confirmed
        }) else {
            return false;
        };
        message.status = MessageStatus::Confirmed;
        if let Some(id) = server_id {
            message.id = id;
        }
        if let Some(ts) = timestamp {
            message.timestamp = ts;
        }
        true
    }

    pub fn member_name(&self, user_id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.id == user_id)
            .map(|m| m.name.as_str())
    }

    /// Sets one member's online flag, adding the member if unknown and coming
    /// online. Returns whether anything changed.
    pub fn set_member_online(&mut self, user_id: &str, name: Option<&str>, online: bool) -> bool {
        if let Some(member) = self.members.iter_mut().find(|m| m.id == user_id) {
            if member.is_online == online {
                return false;
            }
            member.is_online = online;
            return true;
        }
        if !online {
            return false;
        }
        self.members.push(Member {
            id: user_id.to_string(),
            name: name.unwrap_or(user_id).to_string(),
            role: String::new(),
            is_online: true,
        });
        true
    }

    /// Adds one entry to the file grid. Every shared file gets its own entry,
    /// including a new upload to an existing url.
    pub fn add_file(&mut self, file: FileMeta) {
        self.files.push(file);
    }

    /// Adds a file this client uploaded and remembers its url so the server's
    /// broadcast of the same upload is not shown twice.
    pub fn add_own_upload(&mut self, file: FileMeta) {
        if !file.url.is_empty() {
            self.announced.insert(file.url.clone());
        }
        self.files.push(file);
    }

    /// Consumes the record of an own upload at `url`. True exactly once per
    /// [`ChatView::add_own_upload`].
    pub fn take_own_upload(&mut self, url: &str) -> bool {
        self.announced.remove(url)
    }

    pub fn notify(&mut self, notification: Notification) {
        if self.notifications.len() == NOTIFICATION_LIMIT {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }
}
