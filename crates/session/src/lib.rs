//! Client-side chat session synchronization.
//!
//! [`SessionStore`] is the entry point: it keeps a local replica of the
//! selected chat's history converged with the server through polling, and
//! exposes the user actions (send, edit, delete, chat and file management)
//! that mutate it.

pub mod context;
pub mod poller;
pub mod state;
pub mod store;
pub mod sync;
pub mod ui;

pub use context::SessionContext;
pub use poller::PollerHandle;
pub use state::{ErrorScope, ErrorState, Notice, NoticeLevel, NoticeLog, SessionState};
pub use store::{DEFAULT_CHAT_DESCRIPTION, SessionError, SessionStore};
pub use sync::{HistorySyncEngine, SyncOutcome};
pub use ui::{NullUi, UiPort};
