use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use chatsync_api_client::{ApiClient, GatewayError, Transport};
use chatsync_core::{Post, Viewer};

use crate::state::{ErrorScope, NoticeLevel, SessionState};
use crate::ui::UiPort;

/// Shared handle to everything a sync round or user action needs: the API
/// client, session state, the signed-in viewer, and the UI port.
pub struct SessionContext<T> {
    api: ApiClient<T>,
    state: Mutex<SessionState>,
    viewer: Viewer,
    ui: Arc<dyn UiPort>,
}

impl<T: Transport> SessionContext<T> {
    pub fn new(api: ApiClient<T>, viewer: Viewer, ui: Arc<dyn UiPort>, notice_capacity: usize) -> Self {
        Self {
            api,
            state: Mutex::new(SessionState::new(notice_capacity)),
            viewer,
            ui,
        }
    }

    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn ui(&self) -> &dyn UiPort {
        self.ui.as_ref()
    }

    /// Run `f` with the state locked. Never call this across an `.await`.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.lock().history.posts().cloned().collect()
    }

    /// Store a failed call in the scoped error field and the notice log.
    pub fn record_failure(&self, scope: ErrorScope, err: &GatewayError) {
        warn!("{scope:?} request failed: {err}");
        let backend_down = self.api.backend_down();
        let notice = self.with_state(|s| {
            s.errors.set(scope, err.to_string());
            s.errors.backend_down = backend_down;
            s.notices.push(NoticeLevel::Error, err.to_string())
        });
        if let Some(notice) = notice {
            self.ui.notice(&notice);
        }
    }

    pub fn record_success(&self, scope: ErrorScope) {
        let backend_down = self.api.backend_down();
        self.with_state(|s| {
            s.errors.clear(scope);
            s.errors.backend_down = backend_down;
        });
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notice = self.with_state(|s| s.notices.push(level, message));
        if let Some(notice) = notice {
            self.ui.notice(&notice);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
