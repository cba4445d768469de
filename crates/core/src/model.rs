use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type PostId = i64;
pub type QuoteId = i64;
pub type FileId = i64;
pub type UserId = i64;

/// What a history entry does to the local post map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    #[default]
    Create,
    Update,
    Delete,
}

impl PostAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl std::fmt::Display for PostAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File reference the server resolved from an `@attach#<id>` marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub file_id: FileId,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,
}

/// A single message in a chat's history.
///
/// The same shape doubles as a diff entry: `action` says whether the entry
/// creates, replaces or removes the post with this `id`. Delete entries may
/// omit everything except `id` and `action`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: PostId,
    #[serde(default)]
    pub chat_id: ChatId,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub message: String,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub action: PostAction,
    #[serde(default, rename = "file_names", skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Post {
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub id: QuoteId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// Flat chat entry as listed by the server, before tree assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    #[serde(default)]
    pub description: String,
    /// Anchor post in the parent chat this chat branches from
    #[serde(default)]
    pub parent_msg_id: Option<PostId>,
    #[serde(default)]
    pub active: bool,
}

/// A node of the chat forest.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub description: String,
    pub parent_post_id: Option<PostId>,
    pub active: bool,
    pub children: Vec<Chat>,
}

impl Chat {
    pub fn is_root(&self) -> bool {
        self.parent_post_id.is_none()
    }

    /// Depth-first lookup in this subtree.
    pub fn find(&self, id: ChatId) -> Option<&Chat> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Number of chats in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Chat::subtree_len).sum::<usize>()
    }
}

pub fn find_chat(forest: &[Chat], id: ChatId) -> Option<&Chat> {
    forest.iter().find_map(|root| root.find(id))
}

/// Uploaded file waiting to be referenced by the next sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_id: FileId,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    #[default]
    Developer,
}

/// Identity of the signed-in user, provided by the authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Option<UserId>,
    pub role: UserRole,
}

impl Viewer {
    /// Admins may delete any post; everyone else only their own.
    pub fn can_delete(&self, post: &Post) -> bool {
        self.role == UserRole::Admin || self.user_id == Some(post.user_id)
    }
}
