use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::comments::CommentStore;
use crate::deletion::DeletionKey;
use crate::models::{Id, LikeState};
use crate::storage::{keys, Namespace, PersistenceGateway};

/// Cached engagement numbers for one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub likes: u64,
    pub comments: u64,
    pub views: u64,
}

// View counters are stored string-encoded; older records may hold a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCount {
    Number(u64),
    Text(String),
}

impl StoredCount {
    fn value(&self) -> Option<u64> {
        match self {
            StoredCount::Number(n) => Some(*n),
            StoredCount::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Maintains the like/view/comment counters and their backing keys.
/// Storage problems never surface; the last value seen in memory wins instead.
pub struct EngagementTracker {
    gateway: PersistenceGateway,
    counters: HashMap<Id, Counters>,
    voters: HashMap<Id, Vec<Id>>,
}

impl EngagementTracker {
    pub fn new(gateway: PersistenceGateway) -> Self {
        Self { gateway, counters: HashMap::new(), voters: HashMap::new() }
    }

    fn durable(&self) -> &Namespace {
        self.gateway.durable()
    }

    pub fn counters(&self, thread_id: &str) -> Counters {
        self.counters.get(thread_id).copied().unwrap_or_default()
    }

    fn entry(&mut self, thread_id: &str) -> &mut Counters {
        self.counters.entry(thread_id.to_string()).or_default()
    }

    fn load_voters(&mut self, thread_id: &str) -> Vec<Id> {
        match self.durable().try_get::<Vec<Id>>(&keys::likes(thread_id)) {
            Ok(v) => {
                let v = v.unwrap_or_default();
                self.voters.insert(thread_id.to_string(), v.clone());
                v
            }
            Err(e) => {
                warn!(thread_id, "like list unreadable, using cached copy: {e}");
                self.voters.get(thread_id).cloned().unwrap_or_default()
            }
        }
    }

    /// Like count reconciled with the voter list. `cached` may include likes
    /// from before the list existed (seeded threads), so the list is only a floor.
    pub fn recompute_likes(&mut self, thread_id: &str, cached: u64) -> u64 {
        let n = (self.load_voters(thread_id).len() as u64).max(cached);
        self.entry(thread_id).likes = n;
        n
    }

    /// Flips `user_id`'s like on the thread and keeps the per-user index in step.
    /// The count moves by one from `cached`, floored at zero.
    pub fn toggle_thread_like(&mut self, thread_id: &str, user_id: &str, cached: u64) -> LikeState {
        let mut voters = self.load_voters(thread_id);
        let liked = match voters.iter().position(|v| v == user_id) {
            Some(pos) => {
                voters.remove(pos);
                false
            }
            None => {
                voters.push(user_id.to_string());
                true
            }
        };
        self.durable().set(&keys::likes(thread_id), &voters);
        let count = if liked { cached + 1 } else { cached.saturating_sub(1) };
        self.voters.insert(thread_id.to_string(), voters);
        self.entry(thread_id).likes = count;
        self.set_index(user_id, thread_id, liked);
        debug!(thread_id, user_id, liked, count, "thread like toggled");
        LikeState { liked, count }
    }

    fn set_index(&self, user_id: &str, thread_id: &str, liked: bool) {
        let key = keys::liked_threads(user_id);
        let mut ids: Vec<Id> = self.durable().get(&key).unwrap_or_default();
        let present = ids.iter().any(|t| t == thread_id);
        match (liked, present) {
            (true, false) => ids.push(thread_id.to_string()),
            (false, true) => ids.retain(|t| t != thread_id),
            _ => return,
        }
        if ids.is_empty() {
            self.durable().remove(&key);
        } else {
            self.durable().set(&key, &ids);
        }
    }

    /// Reads the per-user index, which is what UIs use to paint the like button.
    pub fn has_liked(&self, user_id: &str, thread_id: &str) -> bool {
        self.durable()
            .get::<Vec<Id>>(&keys::liked_threads(user_id))
            .map_or(false, |ids| ids.iter().any(|t| t == thread_id))
    }

    pub fn liked_threads(&self, user_id: &str) -> Vec<Id> {
        self.durable().get(&keys::liked_threads(user_id)).unwrap_or_default()
    }

    /// Counts a view once per session and returns the thread's view count.
    /// A thread with no stored counter yet starts from `cached`.
    pub fn recompute_views(&mut self, thread_id: &str, session_id: &str, cached: u64) -> u64 {
        let session = self.gateway.session(session_id);
        let marker = keys::viewed(thread_id);
        let key = keys::views(thread_id);

        let current = match self.durable().try_get::<StoredCount>(&key) {
            Ok(v) => v.and_then(|c| c.value()).unwrap_or(cached),
            Err(e) => {
                warn!(thread_id, "view counter unreadable, using cached value: {e}");
                self.counters(thread_id).views.max(cached)
            }
        };
        if session.get::<bool>(&marker).unwrap_or(false) {
            self.entry(thread_id).views = current;
            return current;
        }
        let next = current + 1;
        self.durable().set(&key, &next.to_string());
        session.set(&marker, &true);
        self.entry(thread_id).views = next;
        debug!(thread_id, session_id, views = next, "view counted");
        next
    }

    /// Top-level comments only, skipping any `hidden` reports as pending deletion.
    /// Replies are left out of this metric.
    pub fn recompute_comments(
        &mut self,
        thread_id: &str,
        comments: &mut CommentStore,
        hidden: impl Fn(&DeletionKey) -> bool,
    ) -> u64 {
        let n = comments.top_level_count(thread_id, hidden);
        self.entry(thread_id).comments = n;
        n
    }

    /// Removes every engagement key of the thread, including its entry in each voter's index.
    pub fn purge_thread(&mut self, thread_id: &str) {
        for voter in self.load_voters(thread_id) {
            self.set_index(&voter, thread_id, false);
        }
        self.durable().remove(&keys::likes(thread_id));
        self.durable().remove(&keys::views(thread_id));
        self.gateway.remove_from_sessions(&keys::viewed(thread_id));
        self.counters.remove(thread_id);
        self.voters.remove(thread_id);
        debug!(thread_id, "engagement keys purged");
    }
}
