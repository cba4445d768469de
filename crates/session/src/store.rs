//! User-facing entry points.
//!
//! Each operation composes the gateway-backed API client, the status gate,
//! and the sync engine. Failures are written to the session's error fields
//! and notice log and also returned to the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use chatsync_api::{ChatStats, FileRecord};
use chatsync_api_client::{ApiClient, FilePart, GatewayError, HttpTransport, Transport};
use chatsync_core::message::{compose_outgoing, rewrite_attachment_refs};
use chatsync_core::{
    BusyNotice, Chat, ChatId, DivergenceReason, FileId, MutationKind, PendingAttachment, Post,
    PostId, TreeBuilder, Viewer,
};
use chatsync_runtime_config::SyncSettings;

use crate::context::SessionContext;
use crate::poller::{PollerHandle, spawn_poller};
use crate::state::{ErrorScope, ErrorState, Notice, NoticeLevel, SessionState};
use crate::sync::{HistorySyncEngine, SyncOutcome};
use crate::ui::UiPort;

pub const DEFAULT_CHAT_DESCRIPTION: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Busy(#[from] BusyNotice),
    #[error("no chat selected")]
    NoChatSelected,
    #[error("post {0} is not in the current history")]
    UnknownPost(PostId),
    #[error("you may only delete your own posts")]
    PermissionDenied { post_id: PostId },
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct SessionStore<T = HttpTransport> {
    ctx: Arc<SessionContext<T>>,
    engine: Arc<HistorySyncEngine>,
    poller: Mutex<Option<PollerHandle>>,
    poll_interval: Duration,
}

impl<T: Transport> SessionStore<T> {
    pub fn new(api: ApiClient<T>, settings: &SyncSettings, viewer: Viewer, ui: Arc<dyn UiPort>) -> Self {
        Self {
            ctx: Arc::new(SessionContext::new(api, viewer, ui, settings.notice_capacity)),
            engine: Arc::new(HistorySyncEngine::new(settings.max_chat_switch_hops)),
            poller: Mutex::new(None),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn context(&self) -> &SessionContext<T> {
        &self.ctx
    }

    // ── Read access ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionState {
        self.ctx.snapshot()
    }

    pub fn selected_chat(&self) -> Option<ChatId> {
        self.ctx.with_state(|s| s.selected_chat)
    }

    pub fn posts(&self) -> Vec<Post> {
        self.ctx.posts()
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.ctx.with_state(|s| s.chats.clone())
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.ctx.with_state(|s| s.files.clone())
    }

    pub fn errors(&self) -> ErrorState {
        self.ctx.with_state(|s| s.errors.clone())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.ctx.with_state(|s| s.notices.iter().cloned().collect())
    }

    pub fn pending_attachment(&self) -> Option<PendingAttachment> {
        self.ctx.with_state(|s| s.pending_attachment.clone())
    }

    // ── Sync ──────────────────────────────────────────────────────────────

    pub async fn sync(&self) -> SyncOutcome {
        self.engine.sync(&self.ctx).await
    }

    /// Mark the replica stale (e.g. after the app returns from background)
    /// so the next round fetches full history.
    pub fn resume(&self) {
        self.ctx
            .with_state(|s| s.cursor.diverge(DivergenceReason::Resumed));
    }

    pub fn start_polling(&self) {
        let mut poller = lock(&self.poller);
        if poller.as_ref().is_some_and(|p| !p.is_finished()) {
            debug!("Polling already running");
            return;
        }
        *poller = Some(spawn_poller(
            Arc::clone(&self.ctx),
            Arc::clone(&self.engine),
            self.poll_interval,
        ));
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    /// Stop polling and drop all chat-scoped state (logout).
    pub fn teardown(&self) {
        self.stop_polling();
        self.ctx.with_state(|s| {
            s.reset_selection(None);
            s.pending_attachment = None;
        });
        self.ctx.ui().history_changed(&[]);
        info!("Session torn down");
    }

    // ── Chats ─────────────────────────────────────────────────────────────

    /// Fetch the chat list and rebuild the forest.
    pub async fn refresh_chats(&self) -> Result<Vec<Chat>> {
        let records = self
            .ctx
            .api()
            .list_chats()
            .await
            .map_err(|e| self.fail(ErrorScope::Chat, e))?;
        let forest = TreeBuilder::new(self.ctx.api()).build(&records).await;
        self.ctx.record_success(ErrorScope::Chat);
        self.ctx.with_state(|s| s.chats = forest.clone());
        self.ctx.ui().chats_changed(&forest);
        Ok(forest)
    }

    /// Switch to `chat_id` and fetch its full history.
    pub async fn select_chat(&self, chat_id: ChatId) -> SyncOutcome {
        self.ctx.with_state(|s| s.reset_selection(Some(chat_id)));
        self.ctx.ui().history_changed(&[]);
        info!("Selected chat {chat_id}");

        if let Err(e) = self.ctx.api().notify_switch(chat_id).await {
            warn!("notify_switch for chat {chat_id} failed: {e}");
        }
        self.sync().await
    }

    /// Create a chat, optionally branching from `parent_post`, and select it.
    pub async fn create_chat(
        &self,
        description: Option<&str>,
        parent_post: Option<PostId>,
    ) -> Result<ChatId> {
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_CHAT_DESCRIPTION);
        let chat_id = self
            .ctx
            .api()
            .create_chat(description, parent_post)
            .await
            .map_err(|e| self.fail(ErrorScope::Chat, e))?;
        info!("Created chat {chat_id}");

        self.refresh_chats().await?;
        self.select_chat(chat_id).await;
        self.ctx.ui().close_create_dialog();
        Ok(chat_id)
    }

    /// Delete the selected chat and clear the selection.
    pub async fn delete_chat(&self) -> Result<()> {
        let chat_id = self.require_selection()?;
        self.ctx
            .api()
            .delete_chat(chat_id)
            .await
            .map_err(|e| self.fail(ErrorScope::Chat, e))?;
        info!("Deleted chat {chat_id}");

        self.ctx.with_state(|s| s.reset_selection(None));
        self.ctx.ui().history_changed(&[]);
        self.refresh_chats().await?;
        Ok(())
    }

    pub async fn fetch_stats(&self) -> Result<ChatStats> {
        let chat_id = self.require_selection()?;
        let stats = self
            .ctx
            .api()
            .get_stats(chat_id)
            .await
            .map_err(|e| self.fail(ErrorScope::Chat, e))?;
        self.ctx.with_state(|s| {
            if s.selected_chat == Some(chat_id) {
                s.stats = Some(stats.clone());
            }
        });
        Ok(stats)
    }

    // ── Posts ─────────────────────────────────────────────────────────────

    /// Send `text` (plus any pending attachment) to the selected chat.
    /// Returns `false` when there was nothing to send.
    pub async fn send_message(&self, text: &str) -> Result<bool> {
        let chat_id = self.require_selection()?;
        let pending = self.pending_attachment();
        let Some(message) = compose_outgoing(text, pending.as_ref()) else {
            return Ok(false);
        };
        self.acquire(MutationKind::SendMessage)?;

        let result = self.ctx.api().post_message(chat_id, &message).await;
        self.ctx.with_state(|s| {
            if result.is_ok() {
                s.pending_attachment = None;
            }
            s.gate.release();
        });
        result.map_err(|e| self.fail(ErrorScope::Chat, e))?;
        self.ctx.record_success(ErrorScope::Chat);

        self.sync().await;
        Ok(true)
    }

    /// Replace the text of `post_id`. Returns `false` when `text` is blank.
    pub async fn edit_post(&self, post_id: PostId, text: &str) -> Result<bool> {
        let message = rewrite_attachment_refs(text.trim());
        if message.is_empty() {
            return Ok(false);
        }
        self.acquire(MutationKind::EditPost)?;

        let result = self.ctx.api().edit_post(post_id, &message).await;
        self.ctx.with_state(|s| s.gate.release());
        result.map_err(|e| self.fail(ErrorScope::Chat, e))?;
        self.ctx.record_success(ErrorScope::Chat);
        self.ctx.ui().close_edit_dialog();

        self.sync().await;
        Ok(true)
    }

    /// Request deletion of `post_id`. The post stays visible until a later
    /// sync confirms it is gone.
    ///
    /// Only an application-level refusal drops the pending mark. After a
    /// timeout or an infrastructure failure the server may still have
    /// deleted the post, so the mark stays until a full fetch settles it.
    pub async fn delete_post(&self, post_id: PostId) -> Result<()> {
        let post = self
            .ctx
            .with_state(|s| s.history.post(post_id).cloned())
            .ok_or(SessionError::UnknownPost(post_id))?;
        if !self.ctx.viewer().can_delete(&post) {
            let err = SessionError::PermissionDenied { post_id };
            self.ctx.notify(NoticeLevel::Warning, err.to_string());
            return Err(err);
        }

        self.ctx.with_state(|s| {
            s.history.mark_pending_deletion(post_id);
            s.cursor.diverge(DivergenceReason::DeletionRequested);
        });
        if let Err(e) = self.ctx.api().delete_post(post_id).await {
            if matches!(e, GatewayError::Application { .. }) {
                self.ctx
                    .with_state(|s| s.history.cancel_pending_deletion(post_id));
            }
            return Err(self.fail(ErrorScope::Chat, e));
        }
        self.ctx.record_success(ErrorScope::Chat);
        debug!("Deletion of post {post_id} requested");

        self.sync().await;
        Ok(())
    }

    // ── Files ─────────────────────────────────────────────────────────────

    pub async fn refresh_files(&self) -> Result<Vec<FileRecord>> {
        let files = self
            .ctx
            .api()
            .list_files()
            .await
            .map_err(|e| self.fail(ErrorScope::File, e))?;
        self.ctx.record_success(ErrorScope::File);
        self.ctx.with_state(|s| s.files = files.clone());
        self.ctx.ui().files_changed(&files);
        Ok(files)
    }

    /// Upload a file into the selected chat. The file becomes the pending
    /// attachment for the next message.
    pub async fn upload_file(&self, file: FilePart) -> Result<FileId> {
        let chat_id = self.require_selection()?;
        let file_name = file.file_name.clone();
        let file_id = self
            .ctx
            .api()
            .upload_file(chat_id, file)
            .await
            .map_err(|e| self.fail(ErrorScope::File, e))?;
        info!("Uploaded {file_name} as file {file_id}");

        self.ctx.with_state(|s| {
            s.pending_attachment = Some(PendingAttachment { file_id, file_name });
        });
        self.refresh_files().await?;
        Ok(file_id)
    }

    pub async fn update_file(&self, file_id: FileId, file: FilePart) -> Result<()> {
        self.ctx
            .api()
            .update_file(file_id, file)
            .await
            .map_err(|e| self.fail(ErrorScope::File, e))?;
        self.refresh_files().await?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: FileId) -> Result<()> {
        self.ctx
            .api()
            .delete_file(file_id)
            .await
            .map_err(|e| self.fail(ErrorScope::File, e))?;
        self.ctx.with_state(|s| {
            if s.pending_attachment.as_ref().is_some_and(|p| p.file_id == file_id) {
                s.pending_attachment = None;
            }
        });
        self.refresh_files().await?;
        Ok(())
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn require_selection(&self) -> Result<ChatId> {
        self.selected_chat().ok_or(SessionError::NoChatSelected)
    }

    fn acquire(&self, action: MutationKind) -> Result<()> {
        let refused = self.ctx.with_state(|s| s.gate.try_acquire(action).err());
        match refused {
            Some(notice) => {
                warn!("{notice}");
                self.ctx.notify(NoticeLevel::Warning, notice.to_string());
                Err(notice.into())
            }
            None => Ok(()),
        }
    }

    fn fail(&self, scope: ErrorScope, err: GatewayError) -> SessionError {
        self.ctx.record_failure(scope, &err);
        err.into()
    }
}

impl<T> Drop for SessionStore<T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.stop();
        }
    }
}

fn lock(poller: &Mutex<Option<PollerHandle>>) -> std::sync::MutexGuard<'_, Option<PollerHandle>> {
    poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chatsync_api::endpoints;
    use chatsync_api_client::Throttle;
    use chatsync_api_client::testing::{MockReply, MockTransport};
    use chatsync_api_client::transport::RequestBody;
    use chatsync_core::testing::{busy, post, post_by};
    use chatsync_core::UserRole;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct RecordingUi {
        history_events: AtomicUsize,
        chat_events: AtomicUsize,
        notices: AtomicUsize,
        edit_closed: AtomicUsize,
        create_closed: AtomicUsize,
    }

    impl UiPort for RecordingUi {
        fn history_changed(&self, _posts: &[Post]) {
            self.history_events.fetch_add(1, Ordering::SeqCst);
        }
        fn chats_changed(&self, _forest: &[Chat]) {
            self.chat_events.fetch_add(1, Ordering::SeqCst);
        }
        fn notice(&self, _notice: &Notice) {
            self.notices.fetch_add(1, Ordering::SeqCst);
        }
        fn close_edit_dialog(&self) {
            self.edit_closed.fetch_add(1, Ordering::SeqCst);
        }
        fn close_create_dialog(&self) {
            self.create_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store_with(
        transport: MockTransport,
        viewer: Viewer,
        ui: Arc<RecordingUi>,
    ) -> SessionStore<MockTransport> {
        let api = ApiClient::new(transport, Duration::from_secs(25), Throttle::default());
        SessionStore::new(api, &SyncSettings::default(), viewer, ui)
    }

    fn store(transport: MockTransport) -> SessionStore<MockTransport> {
        let viewer = Viewer {
            user_id: Some(1),
            role: UserRole::Developer,
        };
        store_with(transport, viewer, Arc::new(RecordingUi::default()))
    }

    fn history(chat_id: ChatId, posts: &[Post]) -> Value {
        json!({"chat_id": chat_id, "posts": serde_json::to_value(posts).expect("posts")})
    }

    fn body_message(store: &SessionStore<MockTransport>, path: &str) -> String {
        let sent = store.context().api().transport().requests_to(path);
        let RequestBody::Json(body) = &sent.last().expect("request sent").body else {
            panic!("expected json body");
        };
        body["message"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn select_chat_notifies_and_fetches_full_history() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_HISTORY, history(3, &[post(1, 3, "hello")]));
        let store = store(transport);

        let outcome = store.select_chat(3).await;

        assert!(matches!(outcome, SyncOutcome::Applied(_)));
        assert_eq!(store.selected_chat(), Some(3));
        assert_eq!(store.posts().len(), 1);
        let api = store.context().api();
        assert_eq!(api.transport().calls(endpoints::NOTIFY_SWITCH), 1);
        let fetch = &api.transport().requests_to(endpoints::GET_HISTORY)[0];
        assert_eq!(fetch.query_value("wait_changes"), Some("0"));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_gate_blocks_send_and_edit_without_network() {
        let ui = Arc::new(RecordingUi::default());
        let store = store_with(MockTransport::new(), Viewer::default(), Arc::clone(&ui));
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.gate.adopt(busy("agent", 12.0));
        });

        let err = store.send_message("hi").await.expect_err("busy");
        assert!(matches!(err, SessionError::Busy(_)));
        let err = store.edit_post(4, "edited").await.expect_err("busy");
        assert!(matches!(err, SessionError::Busy(_)));

        assert_eq!(store.context().api().transport().total_calls(), 0);
        let notices = store.notices();
        assert!(notices[0].message.contains("send message blocked"));
        assert!(notices[0].message.contains("agent"));
        assert!(notices[1].message.contains("edit post blocked"));
        assert_eq!(ui.notices.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_notice_names_unknown_actor() {
        let store = store(MockTransport::new());
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.gate.adopt(chatsync_core::StatusIndicator::busy(None, 1.0));
        });

        store.send_message("hi").await.expect_err("busy");
        assert!(store.notices()[0].message.contains("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_rewrites_attachments_and_clears_pending() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::POST, json!({}));
        transport.push_json(endpoints::GET_HISTORY, history(1, &[post(1, 1, "x")]));
        let store = store(transport);
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.pending_attachment = Some(PendingAttachment {
                file_id: 9,
                file_name: "notes.pdf".into(),
            });
        });

        assert!(store.send_message("see @attach#3").await.expect("send"));

        assert_eq!(
            body_message(&store, endpoints::POST),
            "see @attached_file#3 @attached_file#9"
        );
        assert_eq!(store.pending_attachment(), None);
        assert!(!store.snapshot().gate.indicator().is_busy());
        assert_eq!(
            store.context().api().transport().calls(endpoints::GET_HISTORY),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blank_send_is_a_noop() {
        let store = store(MockTransport::new());
        store.context().with_state(|s| s.selected_chat = Some(1));

        assert!(!store.send_message("   ").await.expect("noop"));
        assert_eq!(store.context().api().transport().total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_keeps_attachment_and_records_error() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::POST, json!({"error": "Chat is locked"}));
        let store = store(transport);
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.pending_attachment = Some(PendingAttachment {
                file_id: 9,
                file_name: "notes.pdf".into(),
            });
        });

        let err = store.send_message("hi").await.expect_err("app error");
        assert_eq!(err.to_string(), "Chat is locked");
        assert!(store.pending_attachment().is_some());
        assert_eq!(store.errors().chat_error.as_deref(), Some("Chat is locked"));
        assert!(!store.errors().backend_down);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_with_different_text_each_reach_the_server() {
        let transport = MockTransport::new();
        transport.push(
            endpoints::POST,
            MockReply::ok(json!({})).delayed(Duration::from_millis(50)),
        );
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        let store = store(transport);
        store.context().with_state(|s| s.selected_chat = Some(1));

        let (a, b) = tokio::join!(store.send_message("first"), store.send_message("second"));
        assert!(a.expect("first send"));
        assert!(b.expect("second send"));

        let messages: Vec<String> = store
            .context()
            .api()
            .transport()
            .requests_to(endpoints::POST)
            .iter()
            .map(|req| match &req.body {
                RequestBody::Json(body) => body["message"].as_str().unwrap_or_default().to_string(),
                other => panic!("expected json body, got {other:?}"),
            })
            .collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_closes_dialog_and_syncs() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::EDIT_POST, json!({}));
        transport.push_json(endpoints::GET_HISTORY, history(1, &[post(4, 1, "edited")]));
        let ui = Arc::new(RecordingUi::default());
        let store = store_with(transport, Viewer::default(), Arc::clone(&ui));
        store.context().with_state(|s| s.selected_chat = Some(1));

        assert!(store.edit_post(4, " use @attach#2 ").await.expect("edit"));

        assert_eq!(body_message(&store, endpoints::EDIT_POST), "use @attached_file#2");
        assert_eq!(ui.edit_closed.load(Ordering::SeqCst), 1);
        assert_eq!(store.posts()[0].message, "edited");
    }

    #[tokio::test(start_paused = true)]
    async fn delete_is_pending_until_server_confirms() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_HISTORY, history(1, &[post(5, 1, "doomed")]));
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        transport.push_json(endpoints::DELETE_POST, json!({}));
        let store = store(transport);
        store.select_chat(1).await;

        store.delete_post(5).await.expect("delete");

        let state = store.snapshot();
        assert!(state.history.pending_deletions().contains(&5));
        assert!(state.history.post(5).is_some());
        assert!(state.cursor.need_full_history());

        let api = store.context().api();
        api.transport().set(
            endpoints::GET_HISTORY,
            MockReply::ok(json!({"chat_id": 1, "posts": [{"id": 5, "action": "delete"}]})),
        );
        assert!(matches!(store.sync().await, SyncOutcome::Applied(_)));

        let state = store.snapshot();
        assert!(state.history.post(5).is_none());
        assert!(!state.history.has_pending_deletions());
        assert!(!state.cursor.need_full_history());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_delete_cancels_pending_mark() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::DELETE_POST, json!({"error": "Post is locked"}));
        let store = store(transport);
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.history.upsert(post(5, 1, "kept"));
        });

        let err = store.delete_post(5).await.expect_err("refused");
        assert_eq!(err.to_string(), "Post is locked");
        assert!(!store.snapshot().history.has_pending_deletions());
        assert_eq!(store.errors().chat_error.as_deref(), Some("Post is locked"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_keeps_pending_mark_after_server_or_timeout_failure() {
        let transport = MockTransport::new();
        transport.push(endpoints::DELETE_POST, MockReply::Text(502, String::new()));
        transport.push(endpoints::DELETE_POST, MockReply::Hang);
        let store = store(transport);
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.history.upsert(post(5, 1, "maybe gone"));
            s.history.upsert(post(6, 1, "maybe gone too"));
        });

        let err = store.delete_post(5).await.expect_err("502");
        assert!(matches!(err, SessionError::Gateway(GatewayError::Infrastructure { status: 502 })));
        assert!(store.errors().backend_down);

        let err = store.delete_post(6).await.expect_err("timeout");
        assert!(matches!(err, SessionError::Gateway(GatewayError::Timeout { .. })));

        let state = store.snapshot();
        assert!(state.history.pending_deletions().contains(&5));
        assert!(state.history.pending_deletions().contains(&6));
        assert!(state.cursor.need_full_history());
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_someone_elses_post_requires_admin() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::DELETE_POST, json!({}));
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        let store = store(transport);
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.history.upsert(post_by(7, 1, 2, "theirs"));
        });

        let err = store.delete_post(7).await.expect_err("not allowed");
        assert_eq!(err, SessionError::PermissionDenied { post_id: 7 });
        assert_eq!(store.context().api().transport().calls(endpoints::DELETE_POST), 0);

        let admin = Viewer {
            user_id: Some(1),
            role: UserRole::Admin,
        };
        let transport = MockTransport::new();
        transport.push_json(endpoints::DELETE_POST, json!({}));
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        let store = store_with(transport, admin, Arc::new(RecordingUi::default()));
        store.context().with_state(|s| {
            s.selected_chat = Some(1);
            s.history.upsert(post_by(7, 1, 2, "theirs"));
        });
        store.delete_post(7).await.expect("admin delete");
        assert_eq!(store.context().api().transport().calls(endpoints::DELETE_POST), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_chats_builds_forest() {
        let transport = MockTransport::new();
        transport.push_json(
            endpoints::LIST_CHATS,
            json!([
                {"chat_id": 1, "description": "root", "parent_msg_id": null, "active": true},
                {"chat_id": 2, "description": "branch", "parent_msg_id": 100, "active": true},
                {"chat_id": 3, "description": "orphan", "parent_msg_id": 200, "active": false}
            ]),
        );
        transport.push_for_query(
            endpoints::GET_PARENT_MSG,
            "post_id",
            100,
            MockReply::ok(json!({"chat_id": 1})),
        );
        let ui = Arc::new(RecordingUi::default());
        let store = store_with(transport, Viewer::default(), Arc::clone(&ui));

        let forest = store.refresh_chats().await.expect("chats");

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].children[0].id, 2);
        assert_eq!(forest[1].id, 3);
        assert_eq!(store.chats(), forest);
        assert_eq!(ui.chat_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_chat_defaults_description_and_selects_it() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::CREATE_CHAT, json!({"chat_id": 8}));
        transport.push_json(
            endpoints::LIST_CHATS,
            json!([{"chat_id": 8, "description": "New Chat", "active": true}]),
        );
        transport.push_json(endpoints::GET_HISTORY, history(8, &[]));
        let ui = Arc::new(RecordingUi::default());
        let store = store_with(transport, Viewer::default(), Arc::clone(&ui));

        let chat_id = store.create_chat(Some("  "), None).await.expect("create");

        assert_eq!(chat_id, 8);
        assert_eq!(store.selected_chat(), Some(8));
        assert_eq!(ui.create_closed.load(Ordering::SeqCst), 1);
        let sent = store.context().api().transport().requests_to(endpoints::CREATE_CHAT);
        let RequestBody::Json(body) = &sent[0].body else {
            panic!("expected json body");
        };
        assert_eq!(body["description"], "New Chat");
        assert_eq!(body["parent_msg_id"], Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_chat_clears_selection() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::DELETE_CHAT, json!({"status": "ok"}));
        transport.push_json(endpoints::LIST_CHATS, json!([]));
        let store = store(transport);
        store.context().with_state(|s| {
            s.reset_selection(Some(4));
            s.history.upsert(post(1, 4, "gone"));
        });

        store.delete_chat().await.expect("delete chat");

        assert_eq!(store.selected_chat(), None);
        assert!(store.posts().is_empty());
        assert!(store.chats().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn actions_without_selection_are_refused() {
        let store = store(MockTransport::new());
        assert_eq!(store.fetch_stats().await, Err(SessionError::NoChatSelected));
        assert_eq!(store.delete_chat().await, Err(SessionError::NoChatSelected));
        assert_eq!(store.context().api().transport().total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_stats_stores_result() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_STATS, json!({"tokens": 1200, "num_sources_used": 3}));
        let store = store(transport);
        store.context().with_state(|s| s.selected_chat = Some(2));

        let stats = store.fetch_stats().await.expect("stats");
        assert_eq!(stats.tokens, 1200);
        assert_eq!(store.snapshot().stats, Some(stats));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_sets_pending_attachment_and_refreshes_files() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::UPLOAD_FILE, json!({"status": "ok", "file_id": 21}));
        transport.push_json(
            endpoints::LIST_FILES,
            json!([{"id": 21, "file_name": "notes.txt", "ts": 10.0, "project_id": 1}]),
        );
        transport.push_json(endpoints::DELETE_FILE, json!({}));
        let store = store(transport);
        store.context().with_state(|s| s.selected_chat = Some(1));

        let file_id = store
            .upload_file(FilePart {
                file_name: "notes.txt".into(),
                bytes: b"hello".to_vec(),
            })
            .await
            .expect("upload");

        assert_eq!(file_id, 21);
        assert_eq!(
            store.pending_attachment(),
            Some(PendingAttachment {
                file_id: 21,
                file_name: "notes.txt".into()
            })
        );
        assert_eq!(store.files().len(), 1);

        store.delete_file(21).await.expect("delete file");
        assert_eq!(store.pending_attachment(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn file_errors_are_scoped_separately() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::LIST_FILES, json!({"error": "No project"}));
        let store = store(transport);

        store.refresh_files().await.expect_err("file error");
        let errors = store.errors();
        assert_eq!(errors.file_error.as_deref(), Some("No project"));
        assert_eq!(errors.chat_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_runs_until_stopped() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        let store = store(transport);
        store.context().with_state(|s| s.selected_chat = Some(1));

        store.start_polling();
        store.start_polling();
        assert!(store.is_polling());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let calls = store.context().api().transport().calls(endpoints::GET_HISTORY);
        assert!(calls >= 3, "expected at least 3 polls, got {calls}");

        store.stop_polling();
        assert!(!store.is_polling());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            store.context().api().transport().calls(endpoints::GET_HISTORY),
            calls
        );
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_polling_and_clears_state() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_HISTORY, history(1, &[post(1, 1, "a")]));
        let store = store(transport);
        store.select_chat(1).await;
        store.context().with_state(|s| {
            s.history.mark_pending_deletion(1);
            s.pending_attachment = Some(PendingAttachment {
                file_id: 1,
                file_name: "a".into(),
            });
        });
        store.start_polling();

        store.teardown();

        assert!(!store.is_polling());
        let state = store.snapshot();
        assert_eq!(state.selected_chat, None);
        assert!(state.history.is_empty());
        assert!(!state.history.has_pending_deletions());
        assert_eq!(state.pending_attachment, None);
        assert_eq!(store.sync().await, SyncOutcome::NoSelection);
    }

    #[tokio::test(start_paused = true)]
    async fn reselect_after_teardown_refetches_full_history() {
        let transport = MockTransport::new();
        let full = history(1, &[post(1, 1, "a"), post(2, 1, "b"), post(3, 1, "c")]);
        transport.push_for_query(endpoints::GET_HISTORY, "wait_changes", 0, MockReply::ok(full));
        transport.push_for_query(
            endpoints::GET_HISTORY,
            "wait_changes",
            1,
            MockReply::ok(history(1, &[post(3, 1, "c2")])).delayed(Duration::from_secs(5)),
        );
        let store = store(transport);
        store.select_chat(1).await;
        assert_eq!(store.posts().len(), 3);

        store.start_polling();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.context().api().gateway().in_flight("get_history_1_1"));
        store.teardown();
        tokio::task::yield_now().await;

        let outcome = store.select_chat(1).await;

        assert!(matches!(outcome, SyncOutcome::Applied(_)), "{outcome:?}");
        let ids: Vec<PostId> = store.posts().iter().map(|p| p.id).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert!(!store.snapshot().cursor.need_full_history());
        let modes: Vec<Option<String>> = store
            .context()
            .api()
            .transport()
            .requests_to(endpoints::GET_HISTORY)
            .iter()
            .map(|req| req.query_value("wait_changes").map(str::to_string))
            .collect();
        assert_eq!(
            modes,
            [Some("0".to_string()), Some("1".to_string()), Some("0".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resume_forces_full_fetch() {
        let transport = MockTransport::new();
        transport.push_json(endpoints::GET_HISTORY, json!({"chat_id": 1, "posts": "no changes"}));
        let store = store(transport);
        store.select_chat(1).await;
        assert!(!store.snapshot().cursor.need_full_history());

        store.resume();
        store.sync().await;

        let sent = store.context().api().transport().requests_to(endpoints::GET_HISTORY);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].query_value("wait_changes"), Some("0"));
    }
}
