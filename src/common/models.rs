// Shared data types for the group chat: identities, groups, members, files and
// the local view of a chat message.
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type GroupId = String;

/// Identity of a portal user, as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_online: bool,
}

/// A project group (studio) and its roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// Metadata of a file shared in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
}

/// Delivery status of a chat message in the local view.
///
/// Messages received from the server are always `Confirmed`. Locally composed
/// messages start as `Pending` and move to `Confirmed` once the server echoes
/// them back (or the fallback request succeeds), or to `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Correlation id assigned by the sending client, if any.
    #[serde(default)]
    pub client_id: Option<String>,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub sender_name: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient user-facing notice (upload finished, send failed, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
}

impl Notification {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_info_accepts_minimal_payload() {
        let group: GroupInfo =
            serde_json::from_str(r#"{"id":"g1","name":"Studio A"}"#).unwrap();
        assert_eq!(group.id, "g1");
        assert!(group.members.is_empty());
        assert!(group.course_code.is_empty());
    }

    #[test]
    fn file_meta_uses_type_field_on_the_wire() {
        let file = FileMeta {
            name: "brief.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            url: "/files/brief.pdf".to_string(),
            size: None,
            uploaded_by: None,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["type"], "application/pdf");
        assert!(json.get("size").is_none());
    }

    #[test]
    fn history_records_default_to_confirmed() {
        let text = r#"{"id":"m1","groupId":"g1","userId":"u2","senderName":"Bea","content":"hi","timestamp":5}"#;
        let message: Message = serde_json::from_str(text).unwrap();
        assert_eq!(message.status, MessageStatus::Confirmed);
        assert!(message.client_id.is_none());
        assert!(!message.is_pending());
    }

    #[test]
    fn member_reads_camel_case_online_flag() {
        let text = r#"{"id":"u9","name":"Ana","role":"student","isOnline":true}"#;
        let member: Member = serde_json::from_str(text).unwrap();
        assert!(member.is_online);
    }
}
