//! Request/response types for the chat service.
//!
//! This crate is the boundary where loosely-typed payloads become tagged
//! Rust types: the `posts` field of a history response is either a marker
//! string or a list of entries, and the `status` object may be missing or
//! malformed. Both are decoded here so nothing downstream inspects JSON
//! shapes.

use serde::{Deserialize, Deserializer, Serialize};

// Re-export core domain types for convenience
pub use chatsync_core::model::{
    Attachment, ChatId, ChatRecord, FileId, Post, PostAction, PostId, Quote, QuoteId,
};
pub use chatsync_core::status::StatusIndicator;

/// Endpoint paths, relative to the configured API base URL.
pub mod endpoints {
    pub const LIST_CHATS: &str = "/chat/list";
    pub const GET_HISTORY: &str = "/chat/get";
    pub const GET_PARENT_MSG: &str = "/chat/get_parent_msg";
    pub const POST: &str = "/chat/post";
    pub const EDIT_POST: &str = "/chat/edit_post";
    pub const DELETE_POST: &str = "/chat/delete_post";
    pub const CREATE_CHAT: &str = "/chat/create";
    pub const DELETE_CHAT: &str = "/chat/delete";
    pub const NOTIFY_SWITCH: &str = "/chat/notify_switch";
    pub const GET_STATS: &str = "/chat/get_stats";
    pub const LIST_FILES: &str = "/chat/list_files";
    pub const UPLOAD_FILE: &str = "/chat/upload_file";
    pub const UPDATE_FILE: &str = "/chat/update_file";
    pub const DELETE_FILE: &str = "/chat/delete_file";
}

// ─── History ─────────────────────────────────────────────────────────────────

pub const CHAT_SWITCH_MARKER: &str = "chat switch";
pub const NO_CHANGES_MARKER: &str = "no changes";

/// The `posts` field of a history response.
#[derive(Debug, Clone, PartialEq)]
pub enum PostsPayload {
    /// Server switched the session to another chat; local state must be
    /// rebuilt from a full fetch.
    FullReset,
    NoChange,
    Diff(Vec<Post>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("unknown posts marker: {0:?}")]
    UnknownMarker(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPosts {
    Marker(String),
    Entries(Vec<Post>),
}

impl TryFrom<RawPosts> for PostsPayload {
    type Error = PayloadError;

    fn try_from(raw: RawPosts) -> Result<Self, Self::Error> {
        match raw {
            RawPosts::Entries(entries) => Ok(Self::Diff(entries)),
            RawPosts::Marker(marker) => match marker.as_str() {
                CHAT_SWITCH_MARKER => Ok(Self::FullReset),
                NO_CHANGES_MARKER => Ok(Self::NoChange),
                _ => Err(PayloadError::UnknownMarker(marker)),
            },
        }
    }
}

impl<'de> Deserialize<'de> for PostsPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPosts::deserialize(deserializer)?;
        PostsPayload::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Response of `GET chat/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    pub chat_id: ChatId,
    pub posts: PostsPayload,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default, deserialize_with = "status_indicator")]
    pub status: StatusIndicator,
}

fn status_indicator<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusIndicator, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(StatusIndicator::from_value(value.as_ref()))
}

/// Response of `GET chat/get_parent_msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentChatResponse {
    pub chat_id: ChatId,
}

// ─── Mutations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub chat_id: ChatId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditPostRequest {
    pub post_id: PostId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePostRequest {
    pub post_id: PostId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub description: String,
    pub parent_msg_id: Option<PostId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_id: ChatId,
}

/// Generic acknowledgement. Servers answer `{}` or `{"status": "ok"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OkResponse {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStats {
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub num_sources_used: u64,
}

// ─── Files ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub file_name: String,
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub file_id: FileId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileRequest {
    pub file_id: FileId,
}

/// Optional `error` field carried by application-level failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ErrorBody {
    /// The error message, if the body carries a non-null, non-false `error`.
    pub fn message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null | serde_json::Value::Bool(false) => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
