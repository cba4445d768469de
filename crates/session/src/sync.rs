//! History reconciliation.
//!
//! One `sync` round fetches the selected chat's history (full or
//! incremental, as the cursor says), drops the answer if the selection moved
//! while it was in flight, and folds it into the local replica. Rounds never
//! overlap: a call made while another round runs returns immediately.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use chatsync_api::{HistoryResponse, PostsPayload};
use chatsync_api_client::{GatewayError, Transport};
use chatsync_core::{DiffReport, DivergenceReason, FetchMode, Post};

use crate::context::SessionContext;
use crate::state::{ErrorScope, NoticeLevel};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another round was already running.
    Skipped,
    NoSelection,
    /// Response belonged to a previous selection and was discarded.
    Stale,
    Applied(DiffReport),
    /// Server reported no changes; `pending` deletions are still unconfirmed.
    NoChange { pending: usize },
    /// Server kept answering "chat switch".
    TooManyChatSwitches,
    Failed(GatewayError),
}

enum Step {
    Done(SyncOutcome),
    Refetch,
}

pub struct HistorySyncEngine {
    running: AtomicBool,
    max_chat_switch_hops: u32,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HistorySyncEngine {
    pub fn new(max_chat_switch_hops: u32) -> Self {
        Self {
            running: AtomicBool::new(false),
            max_chat_switch_hops,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn sync<T: Transport>(&self, ctx: &SessionContext<T>) -> SyncOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("History sync already running, skipping");
            return SyncOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let mut hops = 0u32;
        loop {
            let (selected, epoch, mode) =
                ctx.with_state(|s| (s.selected_chat, s.epoch, s.cursor.fetch_mode()));
            let Some(chat_id) = selected else {
                return SyncOutcome::NoSelection;
            };

            let response = match ctx.api().get_history(chat_id, mode).await {
                Ok(response) => response,
                Err(e) => {
                    if ctx.with_state(|s| s.epoch != epoch) {
                        debug!("History fetch for chat {chat_id} failed after selection moved");
                        return SyncOutcome::Stale;
                    }
                    ctx.record_failure(ErrorScope::Chat, &e);
                    return SyncOutcome::Failed(e);
                }
            };

            let (step, changed) = self.fold(ctx, epoch, mode, response, &mut hops);
            match step {
                Step::Refetch => continue,
                Step::Done(outcome) => {
                    if let Some(posts) = changed {
                        ctx.ui().history_changed(&posts);
                    }
                    return outcome;
                }
            }
        }
    }

    /// Apply one response under the state lock. Returns the post list when
    /// the UI needs redrawing.
    fn fold<T: Transport>(
        &self,
        ctx: &SessionContext<T>,
        epoch: u64,
        mode: FetchMode,
        response: HistoryResponse,
        hops: &mut u32,
    ) -> (Step, Option<Vec<Post>>) {
        let backend_down = ctx.api().backend_down();
        let max_hops = self.max_chat_switch_hops;
        let mut notices = Vec::new();

        let result = ctx.with_state(|s| {
            if s.epoch != epoch || s.selected_chat != Some(response.chat_id) {
                debug!(
                    "Discarding history for chat {} (selected {:?})",
                    response.chat_id, s.selected_chat
                );
                return (Step::Done(SyncOutcome::Stale), None);
            }
            s.errors.chat_error = None;
            s.errors.backend_down = backend_down;

            match response.posts {
                PostsPayload::FullReset => {
                    s.gate.adopt(response.status);
                    s.cursor.diverge(DivergenceReason::ChatSwitch);
                    *hops += 1;
                    if *hops > max_hops {
                        let message = format!(
                            "Chat {} kept switching; giving up after {max_hops} refetches",
                            response.chat_id
                        );
                        warn!("{message}");
                        s.errors.chat_error = Some(message.clone());
                        notices.push((NoticeLevel::Error, message));
                        return (Step::Done(SyncOutcome::TooManyChatSwitches), None);
                    }
                    debug!("Chat switch reported for chat {}, refetching", response.chat_id);
                    (Step::Refetch, None)
                }
                PostsPayload::NoChange => {
                    s.gate.adopt(response.status);
                    let pending = s.history.pending_deletions().len();
                    if pending > 0 {
                        notices.push((
                            NoticeLevel::Info,
                            format!("{pending} deletion(s) awaiting server confirmation"),
                        ));
                    } else {
                        s.cursor.settle();
                    }
                    (Step::Done(SyncOutcome::NoChange { pending }), None)
                }
                PostsPayload::Diff(entries) => {
                    let report = match mode {
                        FetchMode::Full => s.history.apply_snapshot(entries),
                        FetchMode::WaitForChanges => s.history.apply_diff(entries),
                    };
                    s.history.replace_quotes(response.quotes);
                    s.cursor.settle();
                    s.gate.release();
                    if !report.still_pending.is_empty() {
                        notices.push((
                            NoticeLevel::Warning,
                            format!(
                                "{} deletion(s) not yet confirmed by the server",
                                report.still_pending.len()
                            ),
                        ));
                    }
                    debug!(
                        "Chat {}: +{} ~{} -{} posts",
                        response.chat_id,
                        report.inserted.len(),
                        report.updated.len(),
                        report.deleted.len()
                    );
                    let posts = s.history.posts().cloned().collect();
                    (Step::Done(SyncOutcome::Applied(report)), Some(posts))
                }
            }
        });

        for (level, message) in notices {
            ctx.notify(level, message);
        }
        result
    }
}
