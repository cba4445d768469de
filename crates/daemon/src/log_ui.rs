use tracing::{error, info, warn};

use chatsync_api::FileRecord;
use chatsync_core::{Chat, Post};
use chatsync_session::{Notice, NoticeLevel, UiPort};

/// Headless UI: every session event becomes a log line.
pub struct LogUi;

impl UiPort for LogUi {
    fn history_changed(&self, posts: &[Post]) {
        match posts.last() {
            Some(last) => info!(
                "History: {} posts, latest #{} by {}: {}",
                posts.len(),
                last.id,
                last.user_name,
                preview(&last.message)
            ),
            None => info!("History cleared"),
        }
    }

    fn chats_changed(&self, forest: &[Chat]) {
        let total: usize = forest.iter().map(Chat::subtree_len).sum();
        info!("Chats: {} roots, {} total", forest.len(), total);
        for root in forest {
            log_chat(root, 0);
        }
    }

    fn files_changed(&self, files: &[FileRecord]) {
        info!("Files: {}", files.len());
    }

    fn notice(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => info!("{}", notice.message),
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
    }
}

fn log_chat(chat: &Chat, depth: usize) {
    info!("{}#{} {}", "  ".repeat(depth + 1), chat.id, chat.description);
    for child in &chat.children {
        log_chat(child, depth + 1);
    }
}

fn preview(message: &str) -> String {
    const MAX_CHARS: usize = 80;
    let line = message.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_CHARS {
        let cut: String = line.chars().take(MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
