//! Chat forest assembly.
//!
//! The chat list only says which post a chat branches from, not which chat
//! owns that post. Each anchor post is resolved to its owning chat through a
//! [`ParentResolver`]; chats whose anchor cannot be resolved become roots.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::model::{Chat, ChatId, ChatRecord, PostId};

/// Looks up the chat that owns a post.
pub trait ParentResolver {
    /// `None` means unresolved: unknown post, lookup failure, or timeout.
    fn resolve_parent_chat(&self, post_id: PostId) -> impl Future<Output = Option<ChatId>> + Send;
}

pub struct TreeBuilder<'a, R> {
    resolver: &'a R,
}

impl<'a, R: ParentResolver + Sync> TreeBuilder<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    /// Build the forest. Roots and children keep input order. Anchor
    /// lookups run concurrently; the result does not depend on the order
    /// they complete in.
    pub async fn build(&self, records: &[ChatRecord]) -> Vec<Chat> {
        let mut seen = HashSet::new();
        let records: Vec<&ChatRecord> = records
            .iter()
            .filter(|r| {
                let fresh = seen.insert(r.chat_id);
                if !fresh {
                    warn!("Duplicate chat_id {} in chat list, keeping first", r.chat_id);
                }
                fresh
            })
            .collect();

        let resolutions = join_all(records.iter().map(|record| async move {
            match record.parent_msg_id {
                Some(post_id) => Some(self.resolver.resolve_parent_chat(post_id).await),
                None => None,
            }
        }))
        .await;

        let mut parent_of: HashMap<ChatId, ChatId> = HashMap::new();
        for (record, resolution) in records.iter().zip(resolutions) {
            let Some(resolved) = resolution else {
                continue;
            };
            match resolved {
                Some(parent) if parent != record.chat_id && seen.contains(&parent) => {
                    parent_of.insert(record.chat_id, parent);
                }
                Some(parent) if parent == record.chat_id => {
                    warn!(
                        "Chat {} anchors to one of its own posts; promoting to root",
                        record.chat_id
                    );
                }
                Some(parent) => {
                    warn!(
                        "Chat {} anchors to chat {} which is not listed; promoting to root",
                        record.chat_id, parent
                    );
                }
                None => {
                    warn!(
                        "No parent chat found for chat {} (anchor post {:?}); promoting to root",
                        record.chat_id, record.parent_msg_id
                    );
                }
            }
        }

        break_cycles(&records, &mut parent_of);

        let mut children: HashMap<ChatId, Vec<&ChatRecord>> = HashMap::new();
        for record in &records {
            if let Some(parent) = parent_of.get(&record.chat_id) {
                children.entry(*parent).or_default().push(*record);
            }
        }

        let forest: Vec<Chat> = records
            .iter()
            .filter(|r| !parent_of.contains_key(&r.chat_id))
            .map(|r| assemble(r, None, &children))
            .collect();
        debug!(
            "Chat tree built: {} roots, {} chats",
            forest.len(),
            forest.iter().map(Chat::subtree_len).sum::<usize>()
        );
        forest
    }
}

/// Promote one member of every parent cycle to root so the graph stays a
/// forest.
fn break_cycles(records: &[&ChatRecord], parent_of: &mut HashMap<ChatId, ChatId>) {
    for record in records {
        let start = record.chat_id;
        let mut visited = HashSet::new();
        let mut current = start;
        while let Some(&parent) = parent_of.get(&current) {
            if parent == start {
                warn!("Chat {start} is part of a parent cycle; promoting to root");
                parent_of.remove(&start);
                break;
            }
            if !visited.insert(parent) {
                break;
            }
            current = parent;
        }
    }
}

fn assemble(
    record: &ChatRecord,
    anchor: Option<PostId>,
    children: &HashMap<ChatId, Vec<&ChatRecord>>,
) -> Chat {
    Chat {
        id: record.chat_id,
        description: record.description.clone(),
        parent_post_id: anchor,
        active: record.active,
        children: children
            .get(&record.chat_id)
            .map(|kids| {
                kids.iter()
                    .map(|kid| assemble(kid, kid.parent_msg_id, children))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::chat_record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapResolver {
        owners: HashMap<PostId, ChatId>,
        calls: AtomicUsize,
    }

    impl MapResolver {
        fn new(owners: &[(PostId, ChatId)]) -> Self {
            Self {
                owners: owners.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ParentResolver for MapResolver {
        async fn resolve_parent_chat(&self, post_id: PostId) -> Option<ChatId> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.owners.get(&post_id).copied()
        }
    }

    fn shape(forest: &[Chat]) -> Vec<(ChatId, Vec<ChatId>)> {
        forest
            .iter()
            .map(|c| (c.id, c.children.iter().map(|k| k.id).collect()))
            .collect()
    }

    #[tokio::test]
    async fn unresolved_anchor_is_promoted_to_root() {
        let resolver = MapResolver::new(&[(100, 1)]);
        let records = vec![
            chat_record(1, None),
            chat_record(2, Some(100)),
            chat_record(3, Some(200)),
        ];
        let forest = TreeBuilder::new(&resolver).build(&records).await;

        assert_eq!(shape(&forest), vec![(1, vec![2]), (3, vec![])]);
        assert_eq!(forest[0].children[0].parent_post_id, Some(100));
        assert_eq!(forest[1].parent_post_id, None);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn children_keep_input_order_and_nest() {
        let resolver = MapResolver::new(&[(10, 1), (11, 1), (20, 2)]);
        let records = vec![
            chat_record(4, Some(20)),
            chat_record(3, Some(11)),
            chat_record(1, None),
            chat_record(2, Some(10)),
        ];
        let forest = TreeBuilder::new(&resolver).build(&records).await;

        assert_eq!(shape(&forest), vec![(1, vec![3, 2])]);
        assert_eq!(shape(&forest[0].children[1].children), vec![(4, vec![])]);
    }

    #[tokio::test]
    async fn anchor_into_unknown_chat_becomes_root() {
        let resolver = MapResolver::new(&[(10, 99)]);
        let forest = TreeBuilder::new(&resolver)
            .build(&[chat_record(1, None), chat_record(2, Some(10))])
            .await;
        assert_eq!(shape(&forest), vec![(1, vec![]), (2, vec![])]);
    }

    #[tokio::test]
    async fn parent_cycle_is_broken() {
        let resolver = MapResolver::new(&[(10, 2), (20, 1), (30, 3)]);
        let forest = TreeBuilder::new(&resolver)
            .build(&[
                chat_record(1, Some(10)),
                chat_record(2, Some(20)),
                chat_record(3, Some(30)),
            ])
            .await;
        assert_eq!(shape(&forest), vec![(1, vec![2]), (3, vec![])]);
        assert_eq!(forest.iter().map(Chat::subtree_len).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn duplicate_chat_ids_keep_first_record() {
        let resolver = MapResolver::new(&[]);
        let mut second = chat_record(1, None);
        second.description = "dupe".to_string();
        let forest = TreeBuilder::new(&resolver)
            .build(&[chat_record(1, None), second])
            .await;
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].description, "chat 1");
    }
}
