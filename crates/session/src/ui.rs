//! Outbound UI side effects.
//!
//! The session layer never renders anything; it reports changes through
//! [`UiPort`]. Callbacks run after the session lock is released, so an
//! implementation may call back into the store.

use chatsync_api::FileRecord;
use chatsync_core::{Chat, Post};

use crate::state::Notice;

pub trait UiPort: Send + Sync {
    /// Posts of the selected chat in id order.
    fn history_changed(&self, _posts: &[Post]) {}

    fn chats_changed(&self, _forest: &[Chat]) {}

    fn files_changed(&self, _files: &[FileRecord]) {}

    fn notice(&self, _notice: &Notice) {}

    fn close_edit_dialog(&self) {}

    fn close_create_dialog(&self) {}
}

/// Discards every event.
pub struct NullUi;

impl UiPort for NullUi {}
