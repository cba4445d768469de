use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use chatsync_api::{ChatStats, FileRecord};
use chatsync_core::{
    Chat, ChatId, DivergenceReason, HistoryState, PendingAttachment, StatusGate, SyncCursor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible message produced by the session layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded, oldest-first notice history. A notice identical to the newest
/// entry is coalesced.
#[derive(Debug, Clone)]
pub struct NoticeLog {
    entries: VecDeque<Notice>,
    capacity: usize,
}

impl NoticeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the stored notice, or `None` when it was coalesced.
    pub fn push(&mut self, level: NoticeLevel, message: impl Into<String>) -> Option<Notice> {
        let message = message.into();
        if self
            .entries
            .back()
            .is_some_and(|last| last.level == level && last.message == message)
        {
            return None;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let notice = Notice {
            level,
            message,
            at: Utc::now(),
        };
        self.entries.push_back(notice.clone());
        Some(notice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|n| n.message.contains(needle))
    }
}

/// Which error field a failure is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Chat,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    pub chat_error: Option<String>,
    pub file_error: Option<String>,
    /// Mirrors the gateway: set by HTTP 500/502, cleared by any success.
    pub backend_down: bool,
}

impl ErrorState {
    pub fn set(&mut self, scope: ErrorScope, message: String) {
        match scope {
            ErrorScope::Chat => self.chat_error = Some(message),
            ErrorScope::File => self.file_error = Some(message),
        }
    }

    pub fn clear(&mut self, scope: ErrorScope) {
        match scope {
            ErrorScope::Chat => self.chat_error = None,
            ErrorScope::File => self.file_error = None,
        }
    }
}

/// Everything the session layer mutates. Lives behind one mutex in
/// [`SessionContext`](crate::SessionContext).
#[derive(Debug, Clone)]
pub struct SessionState {
    pub selected_chat: Option<ChatId>,
    /// Bumped by every selection change and teardown; a response fetched
    /// under an older epoch is discarded.
    pub epoch: u64,
    pub cursor: SyncCursor,
    pub history: HistoryState,
    pub gate: StatusGate,
    pub chats: Vec<Chat>,
    pub files: Vec<FileRecord>,
    pub stats: Option<ChatStats>,
    pub pending_attachment: Option<PendingAttachment>,
    pub errors: ErrorState,
    pub notices: NoticeLog,
}

impl SessionState {
    pub fn new(notice_capacity: usize) -> Self {
        Self {
            selected_chat: None,
            epoch: 0,
            cursor: SyncCursor::default(),
            history: HistoryState::new(),
            gate: StatusGate::new(),
            chats: Vec::new(),
            files: Vec::new(),
            stats: None,
            pending_attachment: None,
            errors: ErrorState::default(),
            notices: NoticeLog::new(notice_capacity),
        }
    }

    /// Point the session at `chat` (or nothing) and drop everything that
    /// belonged to the previous selection.
    pub fn reset_selection(&mut self, chat: Option<ChatId>) {
        self.epoch += 1;
        self.selected_chat = chat;
        self.history.clear();
        self.cursor.diverge(DivergenceReason::SelectionChanged);
        self.gate.reset();
        self.stats = None;
        self.errors.chat_error = None;
    }
}
