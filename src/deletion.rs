//! Soft delete with a grace period.
//!
//! `Active -> PendingDeletion -> { Restored (Active again) | Finalized }`
//!
//! While a record exists the entity stays in storage but every projection
//! hides it. Each record owns exactly one scheduled finalize task; the task
//! carries the record's generation so a callback that lost the race against
//! `undo` can never finalize a later record for the same entity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{Comment, Id, Reply, Thread};
use crate::scheduler::{Scheduler, TaskHandle};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeletionKey {
    Thread { thread_id: Id },
    Comment { thread_id: Id, comment_id: Id },
    Reply { thread_id: Id, comment_id: Id, reply_id: Id },
}

impl DeletionKey {
    pub fn thread(thread_id: &str) -> Self {
        DeletionKey::Thread { thread_id: thread_id.into() }
    }
    pub fn comment(thread_id: &str, comment_id: &str) -> Self {
        DeletionKey::Comment { thread_id: thread_id.into(), comment_id: comment_id.into() }
    }
    pub fn reply(thread_id: &str, comment_id: &str, reply_id: &str) -> Self {
        DeletionKey::Reply { thread_id: thread_id.into(), comment_id: comment_id.into(), reply_id: reply_id.into() }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            DeletionKey::Thread { thread_id }
            | DeletionKey::Comment { thread_id, .. }
            | DeletionKey::Reply { thread_id, .. } => thread_id.as_str(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeletionKey::Thread { .. } => "thread",
            DeletionKey::Comment { .. } => "comment",
            DeletionKey::Reply { .. } => "reply",
        }
    }

    /// Keys whose pending deletion also hides this one, nearest first.
    fn ancestors(&self) -> Vec<DeletionKey> {
        match self {
            DeletionKey::Thread { .. } => vec![],
            DeletionKey::Comment { thread_id, .. } => vec![DeletionKey::thread(thread_id)],
            DeletionKey::Reply { thread_id, comment_id, .. } => {
                vec![DeletionKey::comment(thread_id, comment_id), DeletionKey::thread(thread_id)]
            }
        }
    }
}

/// Full copy of the entity taken at delete time.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletedEntity {
    Thread(Thread),
    Comment(Comment),
    Reply(Reply),
}

#[derive(Debug)]
pub struct DeletionRecord {
    pub key: DeletionKey,
    pub snapshot: DeletedEntity,
    pub deleted_at: DateTime<Utc>,
    generation: u64,
    handle: TaskHandle,
}

/// Read-only summary for UIs that show an undo bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingDeletion {
    pub key: DeletionKey,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    Restored,
    /// Nothing pending under that key: never deleted, already undone, or already finalized.
    NotPending,
}

pub struct DeletionCoordinator {
    scheduler: Arc<dyn Scheduler>,
    grace: Duration,
    records: HashMap<DeletionKey, DeletionRecord>,
    next_generation: u64,
}

impl DeletionCoordinator {
    pub fn new(scheduler: Arc<dyn Scheduler>, grace: Duration) -> Self {
        Self { scheduler, grace, records: HashMap::new(), next_generation: 1 }
    }

    pub fn grace_period(&self) -> Duration { self.grace }

    /// Active -> PendingDeletion. Schedules `on_expire(key, generation)` after the grace
    /// period. Returns false, without touching anything, if `key` is already pending.
    pub fn delete<F>(&mut self, key: DeletionKey, snapshot: DeletedEntity, on_expire: F) -> bool
    where
        F: FnOnce(DeletionKey, u64) + Send + 'static,
    {
        if self.records.contains_key(&key) {
            debug!(kind = key.kind(), thread_id = key.thread_id(), "already pending deletion");
            return false;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let task_key = key.clone();
        let handle = self.scheduler.schedule(self.grace, Box::new(move || on_expire(task_key, generation)));
        info!(kind = key.kind(), thread_id = key.thread_id(), task = handle.id(), "pending deletion");
        self.records.insert(
            key.clone(),
            DeletionRecord { key, snapshot, deleted_at: Utc::now(), generation, handle },
        );
        true
    }

    /// PendingDeletion -> Active. Cancels the finalize task and hands back the record.
    pub fn undo(&mut self, key: &DeletionKey) -> Option<DeletionRecord> {
        let record = self.records.remove(key)?;
        record.handle.cancel();
        info!(kind = key.kind(), thread_id = key.thread_id(), "deletion undone");
        Some(record)
    }

    /// Called from the finalize task. Yields the record only if it is still the one
    /// the task was scheduled for.
    pub fn take_expired(&mut self, key: &DeletionKey, generation: u64) -> Option<DeletionRecord> {
        match self.records.get(key) {
            Some(r) if r.generation == generation => self.records.remove(key),
            _ => {
                debug!(kind = key.kind(), generation, "stale finalize ignored");
                None
            }
        }
    }

    /// Drops pending records nested under a finalized thread or comment; their
    /// entities are already gone with the parent.
    pub fn drop_descendants(&mut self, parent: &DeletionKey) {
        let doomed: Vec<DeletionKey> = self
            .records
            .keys()
            .filter(|k| k.ancestors().contains(parent))
            .cloned()
            .collect();
        for k in doomed {
            if let Some(r) = self.records.remove(&k) {
                r.handle.cancel();
            }
        }
    }

    pub fn is_pending(&self, key: &DeletionKey) -> bool {
        self.records.contains_key(key)
    }

    /// True if the key itself or any ancestor is pending deletion.
    pub fn is_hidden(&self, key: &DeletionKey) -> bool {
        self.is_pending(key) || key.ancestors().iter().any(|a| self.records.contains_key(a))
    }

    pub fn pending_thread_ids(&self) -> HashSet<Id> {
        self.records
            .keys()
            .filter_map(|k| match k {
                DeletionKey::Thread { thread_id } => Some(thread_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pending(&self) -> Vec<PendingDeletion> {
        let mut v: Vec<PendingDeletion> = self
            .records
            .values()
            .map(|r| PendingDeletion { key: r.key.clone(), deleted_at: r.deleted_at })
            .collect();
        v.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at));
        v
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.records.len() }

    /// Cancels every outstanding task. Records are discarded, entities stay as they are.
    pub fn cancel_all(&mut self) {
        for (_, r) in self.records.drain() {
            r.handle.cancel();
        }
    }
}

impl Drop for DeletionCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;
    use crate::scheduler::ManualScheduler;
    use std::sync::Mutex;

    fn snapshot() -> DeletedEntity {
        DeletedEntity::Reply(Reply {
            id: "r".into(),
            parent_comment_id: "c".into(),
            content: "x".into(),
            author: Author { id: "a".into(), name: "A".into(), points: 0 },
            upvotes: 0,
            voters: vec![],
            created_at: Utc::now(),
        })
    }

    fn coordinator() -> (DeletionCoordinator, ManualScheduler, Arc<Mutex<Vec<(DeletionKey, u64)>>>) {
        let clock = ManualScheduler::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        (DeletionCoordinator::new(Arc::new(clock.clone()), DEFAULT_GRACE_PERIOD), clock, fired)
    }

    fn recorder(fired: &Arc<Mutex<Vec<(DeletionKey, u64)>>>) -> impl FnOnce(DeletionKey, u64) + Send + 'static {
        let fired = fired.clone();
        move |k, g| fired.lock().unwrap().push((k, g))
    }

    #[test]
    fn second_delete_is_noop() {
        let (mut d, clock, fired) = coordinator();
        let key = DeletionKey::reply("t", "c", "r");
        assert!(d.delete(key.clone(), snapshot(), recorder(&fired)));
        assert!(!d.delete(key.clone(), snapshot(), recorder(&fired)));
        assert_eq!(d.len(), 1);
        assert_eq!(clock.pending(), 1);
        clock.advance(DEFAULT_GRACE_PERIOD);
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[test]
    fn undo_cancels_task() {
        let (mut d, clock, fired) = coordinator();
        let key = DeletionKey::thread("t");
        let snap = snapshot();
        d.delete(key.clone(), snap.clone(), recorder(&fired));
        let rec = d.undo(&key).unwrap();
        assert_eq!(rec.snapshot, snap);
        assert!(d.undo(&key).is_none());
        clock.advance(Duration::from_secs(10));
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (mut d, _clock, fired) = coordinator();
        let key = DeletionKey::comment("t", "c");
        d.delete(key.clone(), snapshot(), recorder(&fired));
        d.undo(&key);
        d.delete(key.clone(), snapshot(), recorder(&fired));
        assert!(d.take_expired(&key, 1).is_none());
        assert!(d.take_expired(&key, 2).is_some());
    }

    #[test]
    fn thread_pending_hides_descendants() {
        let (mut d, _clock, fired) = coordinator();
        d.delete(DeletionKey::thread("t"), snapshot(), recorder(&fired));
        assert!(d.is_hidden(&DeletionKey::reply("t", "c", "r")));
        assert!(!d.is_hidden(&DeletionKey::reply("other", "c", "r")));
        assert_eq!(d.pending_thread_ids().into_iter().collect::<Vec<_>>(), vec!["t".to_string()]);
    }

    #[test]
    fn drop_descendants_cancels_nested_records() {
        let (mut d, clock, fired) = coordinator();
        d.delete(DeletionKey::reply("t", "c", "r"), snapshot(), recorder(&fired));
        d.delete(DeletionKey::comment("t", "c2"), snapshot(), recorder(&fired));
        d.delete(DeletionKey::comment("u", "c"), snapshot(), recorder(&fired));
        d.drop_descendants(&DeletionKey::thread("t"));
        assert_eq!(d.len(), 1);
        assert_eq!(clock.pending(), 1);
    }
}
