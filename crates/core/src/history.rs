//! Local replica of one chat's history.
//!
//! Posts and quotes are kept in id-ordered maps. Deletions requested locally
//! sit in a pending set until the server confirms them through a delete
//! entry (or, for full fetches, by omitting the post from the snapshot).

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Post, PostId, Quote, QuoteId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryState {
    posts: BTreeMap<PostId, Post>,
    quotes: BTreeMap<QuoteId, Quote>,
    pending_deletions: BTreeSet<PostId>,
}

/// What a reconciliation round changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub inserted: Vec<PostId>,
    pub updated: Vec<PostId>,
    pub deleted: Vec<PostId>,
    /// Pending deletions confirmed by this round
    pub confirmed: Vec<PostId>,
    /// Pending deletions still awaiting confirmation
    pub still_pending: Vec<PostId>,
}

impl DiffReport {
    pub fn changed_posts(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }
}

impl HistoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts in ascending id order.
    pub fn posts(&self) -> impl Iterator<Item = &Post> {
        self.posts.values()
    }

    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.posts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn quotes(&self) -> &BTreeMap<QuoteId, Quote> {
        &self.quotes
    }

    pub fn quote(&self, id: QuoteId) -> Option<&Quote> {
        self.quotes.get(&id)
    }

    pub fn pending_deletions(&self) -> &BTreeSet<PostId> {
        &self.pending_deletions
    }

    pub fn has_pending_deletions(&self) -> bool {
        !self.pending_deletions.is_empty()
    }

    /// Insert or replace by id. Returns `true` when the post was new.
    pub fn upsert(&mut self, post: Post) -> bool {
        self.posts.insert(post.id, post).is_none()
    }

    /// Drop a post together with any pending deletion for it.
    pub fn remove(&mut self, id: PostId) -> Option<Post> {
        self.pending_deletions.remove(&id);
        self.posts.remove(&id)
    }

    pub fn mark_pending_deletion(&mut self, id: PostId) -> bool {
        self.pending_deletions.insert(id)
    }

    pub fn cancel_pending_deletion(&mut self, id: PostId) -> bool {
        self.pending_deletions.remove(&id)
    }

    /// Quotes are never diffed; every payload carries the full set.
    pub fn replace_quotes(&mut self, quotes: impl IntoIterator<Item = Quote>) {
        self.quotes = quotes.into_iter().map(|q| (q.id, q)).collect();
    }

    /// Apply an incremental diff. Applying the same entries twice leaves the
    /// state as applying them once.
    pub fn apply_diff(&mut self, entries: Vec<Post>) -> DiffReport {
        let mut report = DiffReport::default();
        let mut deleted_ids = BTreeSet::new();

        for entry in entries {
            if entry.action.is_delete() {
                if self.posts.remove(&entry.id).is_some() {
                    report.deleted.push(entry.id);
                }
                deleted_ids.insert(entry.id);
            } else {
                let id = entry.id;
                if self.upsert(entry) {
                    report.inserted.push(id);
                } else {
                    report.updated.push(id);
                }
            }
        }

        self.settle_pending(&deleted_ids, &mut report);
        report
    }

    /// Replace the post map with a full snapshot. Posts missing from the
    /// snapshot are gone server-side and count as confirmed deletions.
    pub fn apply_snapshot(&mut self, entries: Vec<Post>) -> DiffReport {
        let mut report = DiffReport::default();
        let mut deleted_ids = BTreeSet::new();
        let mut fresh = BTreeMap::new();

        for entry in entries {
            if entry.action.is_delete() {
                deleted_ids.insert(entry.id);
            } else {
                fresh.insert(entry.id, entry);
            }
        }

        for (id, old) in &self.posts {
            match fresh.get(id) {
                Some(new) if new != old => report.updated.push(*id),
                Some(_) => {}
                None => {
                    report.deleted.push(*id);
                    deleted_ids.insert(*id);
                }
            }
        }
        report.inserted = fresh
            .keys()
            .filter(|id| !self.posts.contains_key(id))
            .copied()
            .collect();
        for id in &self.pending_deletions {
            if !fresh.contains_key(id) {
                deleted_ids.insert(*id);
            }
        }

        self.posts = fresh;
        self.settle_pending(&deleted_ids, &mut report);
        report
    }

    pub fn clear(&mut self) {
        self.posts.clear();
        self.quotes.clear();
        self.pending_deletions.clear();
    }

    fn settle_pending(&mut self, deleted_ids: &BTreeSet<PostId>, report: &mut DiffReport) {
        report.confirmed = self
            .pending_deletions
            .intersection(deleted_ids)
            .copied()
            .collect();
        for id in &report.confirmed {
            self.pending_deletions.remove(id);
        }
        report.still_pending = self.pending_deletions.iter().copied().collect();
    }
}
