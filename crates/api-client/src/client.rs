use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use chatsync_api::*;
use chatsync_core::{FetchMode, ParentResolver};
use chatsync_runtime_config::SessionConfig;

use crate::error::{GatewayError, Result};
use crate::gateway::RequestGateway;
use crate::transport::{ApiRequest, FilePart, HttpTransport, MultipartForm, Transport};

/// Per-operation throttle windows.
#[derive(Debug, Clone, Default)]
pub struct Throttle {
    pub history: Duration,
    pub list_chats: Duration,
    pub parent_lookup: Duration,
    pub mutation: Duration,
    pub stats: Duration,
    pub list_files: Duration,
    pub file_mutation: Duration,
}

impl Throttle {
    pub fn from_config(config: &SessionConfig) -> Self {
        let t = &config.throttle;
        Self {
            history: Duration::from_millis(t.history_ms),
            list_chats: Duration::from_millis(t.list_chats_ms),
            parent_lookup: Duration::from_millis(t.parent_lookup_ms),
            mutation: Duration::from_millis(t.mutation_ms),
            stats: Duration::from_millis(t.stats_ms),
            list_files: Duration::from_millis(t.list_files_ms),
            file_mutation: Duration::from_millis(t.file_mutation_ms),
        }
    }
}

/// Typed client for the chat service. Every method goes through the
/// [`RequestGateway`] under a key naming the logical operation.
pub struct ApiClient<T = HttpTransport> {
    gateway: RequestGateway<T>,
    throttle: Throttle,
}

impl ApiClient<HttpTransport> {
    /// Build an HTTP client from config.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.server.url)?;
        Ok(Self::new(
            transport,
            config.sync.request_timeout(),
            Throttle::from_config(config),
        ))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, timeout: Duration, throttle: Throttle) -> Self {
        Self {
            gateway: RequestGateway::new(transport, timeout),
            throttle,
        }
    }

    pub fn gateway(&self) -> &RequestGateway<T> {
        &self.gateway
    }

    pub fn transport(&self) -> &T {
        self.gateway.transport()
    }

    pub fn backend_down(&self) -> bool {
        self.gateway.backend_down()
    }

    async fn call<R: DeserializeOwned>(
        &self,
        key: &str,
        request: ApiRequest,
        min_interval: Duration,
    ) -> Result<R> {
        let value = self.gateway.call(key, request, min_interval).await?;
        decode(value)
    }

    // ── Chats ─────────────────────────────────────────────────────────────

    pub async fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        self.call(
            "list_chats",
            ApiRequest::get(endpoints::LIST_CHATS),
            self.throttle.list_chats,
        )
        .await
    }

    pub async fn create_chat(
        &self,
        description: &str,
        parent_msg_id: Option<PostId>,
    ) -> Result<ChatId> {
        let req = CreateChatRequest {
            description: description.to_string(),
            parent_msg_id,
        };
        let resp: CreateChatResponse = self
            .call(
                "create_chat",
                ApiRequest::post_json(endpoints::CREATE_CHAT, to_json(&req)?),
                self.throttle.mutation,
            )
            .await?;
        Ok(resp.chat_id)
    }

    pub async fn delete_chat(&self, chat_id: ChatId) -> Result<OkResponse> {
        self.call(
            &format!("delete_chat_{chat_id}"),
            ApiRequest::post_json(endpoints::DELETE_CHAT, to_json(&ChatRef { chat_id })?),
            self.throttle.mutation,
        )
        .await
    }

    pub async fn notify_switch(&self, chat_id: ChatId) -> Result<OkResponse> {
        self.call(
            "notify_switch",
            ApiRequest::post_json(endpoints::NOTIFY_SWITCH, to_json(&ChatRef { chat_id })?),
            Duration::ZERO,
        )
        .await
    }

    pub async fn get_stats(&self, chat_id: ChatId) -> Result<ChatStats> {
        self.call(
            &format!("get_stats_{chat_id}"),
            ApiRequest::get(endpoints::GET_STATS).query("chat_id", chat_id),
            self.throttle.stats,
        )
        .await
    }

    // ── History ───────────────────────────────────────────────────────────

    /// Full and incremental fetches of one chat are separate keys, so a
    /// full fetch never joins a long poll left over from an earlier round.
    pub async fn get_history(&self, chat_id: ChatId, mode: FetchMode) -> Result<HistoryResponse> {
        let flag = mode.wait_changes_flag();
        self.call(
            &format!("get_history_{chat_id}_{flag}"),
            ApiRequest::get(endpoints::GET_HISTORY)
                .query("chat_id", chat_id)
                .query("wait_changes", flag),
            self.throttle.history,
        )
        .await
    }

    /// Owning chat of `post_id`. A 404 means the post is unknown.
    pub async fn get_parent_chat(&self, post_id: PostId) -> Result<Option<ChatId>> {
        let result: Result<ParentChatResponse> = self
            .call(
                &format!("get_parent_msg_{post_id}"),
                ApiRequest::get(endpoints::GET_PARENT_MSG).query("post_id", post_id),
                self.throttle.parent_lookup,
            )
            .await;
        match result {
            Ok(resp) => Ok(Some(resp.chat_id)),
            Err(GatewayError::Application { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Posts ─────────────────────────────────────────────────────────────

    pub async fn post_message(&self, chat_id: ChatId, message: &str) -> Result<OkResponse> {
        let req = PostMessageRequest {
            chat_id,
            message: message.to_string(),
        };
        self.call(
            &format!("post_message_{chat_id}"),
            ApiRequest::post_json(endpoints::POST, to_json(&req)?),
            self.throttle.mutation,
        )
        .await
    }

    pub async fn edit_post(&self, post_id: PostId, message: &str) -> Result<OkResponse> {
        let req = EditPostRequest {
            post_id,
            message: message.to_string(),
        };
        self.call(
            &format!("edit_post_{post_id}"),
            ApiRequest::post_json(endpoints::EDIT_POST, to_json(&req)?),
            self.throttle.mutation,
        )
        .await
    }

    pub async fn delete_post(&self, post_id: PostId) -> Result<OkResponse> {
        self.call(
            &format!("delete_post_{post_id}"),
            ApiRequest::post_json(endpoints::DELETE_POST, to_json(&DeletePostRequest { post_id })?),
            self.throttle.mutation,
        )
        .await
    }

    // ── Files ─────────────────────────────────────────────────────────────

    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.call(
            "list_files",
            ApiRequest::get(endpoints::LIST_FILES),
            self.throttle.list_files,
        )
        .await
    }

    pub async fn upload_file(&self, chat_id: ChatId, file: FilePart) -> Result<FileId> {
        let form = MultipartForm::new()
            .text("chat_id", chat_id)
            .text("file_name", &file.file_name)
            .file(file);
        let resp: UploadFileResponse = self
            .call(
                "upload_file",
                ApiRequest::post_multipart(endpoints::UPLOAD_FILE, form),
                self.throttle.file_mutation,
            )
            .await?;
        Ok(resp.file_id)
    }

    pub async fn update_file(&self, file_id: FileId, file: FilePart) -> Result<OkResponse> {
        let form = MultipartForm::new()
            .text("file_id", file_id)
            .text("file_name", &file.file_name)
            .file(file);
        self.call(
            &format!("update_file_{file_id}"),
            ApiRequest::post_multipart(endpoints::UPDATE_FILE, form),
            self.throttle.file_mutation,
        )
        .await
    }

    pub async fn delete_file(&self, file_id: FileId) -> Result<OkResponse> {
        self.call(
            &format!("delete_file_{file_id}"),
            ApiRequest::post_json(endpoints::DELETE_FILE, to_json(&DeleteFileRequest { file_id })?),
            self.throttle.file_mutation,
        )
        .await
    }
}

impl<T: Transport> ParentResolver for ApiClient<T> {
    async fn resolve_parent_chat(&self, post_id: PostId) -> Option<ChatId> {
        match self.get_parent_chat(post_id).await {
            Ok(chat_id) => chat_id,
            Err(e) => {
                warn!("Parent lookup for post {post_id} failed: {e}");
                None
            }
        }
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}
