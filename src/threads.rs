use std::collections::HashSet;

use tracing::{debug, info};

use crate::models::{Id, SortKey, Thread, ThreadQuery};
use crate::storage::{keys, Namespace};

/// Owns the thread list and writes it through to the durable namespace.
pub struct ThreadStore {
    ns: Namespace,
    threads: Vec<Thread>, // insertion order, newest created first
    seed_ids: HashSet<Id>,
    purged: Vec<Id>,
}

impl ThreadStore {
    pub fn new(ns: Namespace) -> Self {
        Self { ns, threads: Vec::new(), seed_ids: HashSet::new(), purged: Vec::new() }
    }

    /// Reads the persisted list and appends any seed thread not already present.
    /// A corrupt or unreadable list leaves only the seed set.
    pub fn load(&mut self, seed: &[Thread]) {
        let stored: Vec<Thread> = self.ns.get(keys::THREADS).unwrap_or_default();
        self.purged = self.ns.get(keys::PURGED_THREADS).unwrap_or_default();
        self.seed_ids = seed.iter().map(|t| t.id.clone()).collect();

        let known: HashSet<&str> = stored.iter().map(|t| t.id.as_str()).collect();
        let extra: Vec<Thread> = seed
            .iter()
            .filter(|t| !known.contains(t.id.as_str()) && !self.purged.contains(&t.id))
            .cloned()
            .collect();
        info!(stored = stored.len(), seeded = extra.len(), "thread list loaded");
        self.threads = stored;
        self.threads.extend(extra);
    }

    pub fn create(&mut self, thread: Thread) {
        debug!(thread_id = %thread.id, "thread created");
        self.threads.insert(0, thread);
        self.persist();
    }

    /// Physical removal. Only the deletion coordinator's finalize step calls this.
    pub fn remove(&mut self, id: &str) -> Option<Thread> {
        let pos = self.threads.iter().position(|t| t.id == id)?;
        let removed = self.threads.remove(pos);
        if self.seed_ids.contains(id) && !self.purged.iter().any(|p| p == id) {
            self.purged.push(id.to_string());
            self.ns.set(keys::PURGED_THREADS, &self.purged);
        }
        self.persist();
        Some(removed)
    }

    /// Puts a thread back at the front if it is missing. Returns false when it was already there.
    pub fn reinsert(&mut self, thread: Thread) -> bool {
        if self.contains(&thread.id) {
            return false;
        }
        self.purged.retain(|p| p != &thread.id);
        self.threads.insert(0, thread);
        self.persist();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.threads.iter().any(|t| t.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }

    /// Applies `f` to the thread and persists. Returns false if the thread is unknown.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut Thread)) -> bool {
        match self.threads.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                f(t);
                self.persist();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn all(&self) -> &[Thread] {
        &self.threads
    }

    /// Filtered, sorted copy of the list, skipping anything in `hidden`.
    pub fn query(&self, q: &ThreadQuery, hidden: &HashSet<Id>) -> Vec<Thread> {
        let needle = q.text.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_lowercase);
        let mut out: Vec<Thread> = self
            .threads
            .iter()
            .filter(|t| !hidden.contains(&t.id))
            .filter(|t| q.forum_id.as_ref().map_or(true, |f| &t.forum_id == f))
            .filter(|t| q.tag.as_ref().map_or(true, |tag| t.tags.iter().any(|x| x.eq_ignore_ascii_case(tag))))
            .filter(|t| !q.questions_only || t.is_question)
            .filter(|t| needle.as_deref().map_or(true, |n| matches_text(t, n)))
            .cloned()
            .collect();
        sort_threads(&mut out, q.sort, q.pinned_first);
        out
    }

    fn persist(&self) {
        self.ns.set(keys::THREADS, &self.threads);
    }
}

fn matches_text(t: &Thread, needle: &str) -> bool {
    t.title.to_lowercase().contains(needle)
        || t.content.to_lowercase().contains(needle)
        || t.display_author().to_lowercase().contains(needle)
        || t.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
}

/// Stable sort; ties keep list order.
pub fn sort_threads(threads: &mut [Thread], key: SortKey, pinned_first: bool) {
    threads.sort_by(|a, b| {
        let pin = if pinned_first { b.is_pinned.cmp(&a.is_pinned) } else { std::cmp::Ordering::Equal };
        pin.then_with(|| match key {
            SortKey::Recent => b.created_at.cmp(&a.created_at),
            SortKey::MostViewed => b.view_count.cmp(&a.view_count),
            SortKey::Trending => b.trending_score().cmp(&a.trending_score()),
            SortKey::MostCommented => b.comment_count.cmp(&a.comment_count),
            SortKey::MostLiked => b.likes.cmp(&a.likes),
        })
    });
}
