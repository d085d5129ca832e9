//! The engine facade: one `Forum` per open forum view, shared by clone.
//!
//! All state sits behind a single mutex so every mutation is serialized, the
//! same as the single-threaded event loop it models. Collaborators (notifier,
//! change signal) are always called after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::comments::CommentStore;
use crate::config::ForumConfig;
use crate::deletion::{DeletedEntity, DeletionCoordinator, DeletionKey, PendingDeletion, UndoOutcome, DEFAULT_GRACE_PERIOD};
use crate::engagement::{Counters, EngagementTracker};
use crate::error::{ForumError, ForumResult};
use crate::identity::IdentityProvider;
use crate::models::{new_id, Actor, Author, Comment, CommentView, Id, LikeState, NewThread, Reply, Thread, ThreadQuery};
use crate::notify::{LogNotifier, NoticeLevel, Notifier};
use crate::scheduler::Scheduler;
use crate::seed::demo_threads;
use crate::signal::{ChangeSignal, ForumEvent};
use crate::storage::PersistenceGateway;
use crate::threads::ThreadStore;

const NOTICE_SHORT: Duration = Duration::from_millis(3000);

struct ForumState {
    threads: ThreadStore,
    comments: CommentStore,
    engagement: EngagementTracker,
    deletions: DeletionCoordinator,
}

struct Inner {
    state: Mutex<ForumState>,
    gateway: PersistenceGateway,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    signal: ChangeSignal,
    seed: Vec<Thread>,
}

#[derive(Clone)]
pub struct Forum {
    inner: Arc<Inner>,
}

pub struct ForumBuilder {
    gateway: PersistenceGateway,
    scheduler: Arc<dyn Scheduler>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    signal: ChangeSignal,
    grace: Duration,
    seed: Vec<Thread>,
}

impl ForumBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn signal(mut self, signal: ChangeSignal) -> Self {
        self.signal = signal;
        self
    }
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
    pub fn seed(mut self, seed: Vec<Thread>) -> Self {
        self.seed = seed;
        self
    }

    /// Applies grace period, signal capacity and demo seeding from `cfg`.
    pub fn config(self, cfg: &ForumConfig) -> Self {
        let seed = if cfg.seed_demo { demo_threads().to_vec() } else { Vec::new() };
        self.grace_period(cfg.grace_period)
            .signal(ChangeSignal::new(cfg.signal_capacity))
            .seed(seed)
    }

    /// Builds the engine and loads the thread list.
    pub fn build(self) -> Forum {
        let durable = self.gateway.durable().clone();
        let state = ForumState {
            threads: ThreadStore::new(durable.clone()),
            comments: CommentStore::new(durable),
            engagement: EngagementTracker::new(self.gateway.clone()),
            deletions: DeletionCoordinator::new(self.scheduler, self.grace),
        };
        let forum = Forum {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                gateway: self.gateway,
                identity: self.identity,
                notifier: self.notifier,
                signal: self.signal,
                seed: self.seed,
            }),
        };
        forum.load();
        forum
    }
}

impl Forum {
    pub fn builder(
        gateway: PersistenceGateway,
        scheduler: Arc<dyn Scheduler>,
        identity: Arc<dyn IdentityProvider>,
    ) -> ForumBuilder {
        ForumBuilder {
            gateway,
            scheduler,
            identity,
            notifier: Arc::new(LogNotifier),
            signal: ChangeSignal::default(),
            grace: DEFAULT_GRACE_PERIOD,
            seed: Vec::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ForumState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn actor(&self) -> ForumResult<Actor> {
        self.inner.identity.current_actor().ok_or(ForumError::AuthRequired)
    }

    fn notify(&self, message: &str, level: NoticeLevel, duration: Duration) {
        self.inner.notifier.notify(message, level, duration);
    }

    /// Surfaces validation failures to the user before handing them back.
    fn report<T>(&self, r: ForumResult<T>) -> ForumResult<T> {
        if let Err(ForumError::Validation(msg)) = &r {
            self.notify(msg, NoticeLevel::Warning, NOTICE_SHORT);
        }
        r
    }

    /// (Re)reads the durable thread list merged with the seed set.
    pub fn load(&self) {
        self.state().threads.load(&self.inner.seed);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ForumEvent> {
        self.inner.signal.subscribe()
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.inner.gateway
    }

    // ---------------- threads ----------------

    pub fn create_thread(&self, new: NewThread) -> ForumResult<Thread> {
        let actor = self.actor()?;
        let title = new.title.trim();
        let content = new.content.trim();
        if title.is_empty() || content.is_empty() {
            return self.report(Err(ForumError::Validation("title and content are required".into())));
        }
        let thread = Thread {
            id: new_id(),
            title: title.to_string(),
            content: content.to_string(),
            forum_id: new.forum_id,
            author: Author::from(&actor),
            is_question: new.is_question,
            is_anonymous: new.is_anonymous,
            is_pinned: false,
            tags: new.tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
            media: new.media,
            created_at: chrono::Utc::now(),
            likes: 0,
            comment_count: 0,
            view_count: 0,
        };
        self.state().threads.create(thread.clone());
        info!(thread_id = %thread.id, forum_id = %thread.forum_id, "thread posted");
        self.inner.signal.emit(ForumEvent::ThreadCreated { thread: thread.clone() });
        self.notify("Thread posted", NoticeLevel::Success, NOTICE_SHORT);
        Ok(thread)
    }

    /// Filtered, sorted listing without anything pending deletion.
    pub fn threads(&self, q: &ThreadQuery) -> Vec<Thread> {
        let s = self.state();
        s.threads.query(q, &s.deletions.pending_thread_ids())
    }

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        let s = self.state();
        if s.deletions.is_hidden(&DeletionKey::thread(thread_id)) {
            return None;
        }
        s.threads.get(thread_id).cloned()
    }

    fn visible_thread(s: &ForumState, thread_id: &str) -> ForumResult<()> {
        if s.deletions.is_hidden(&DeletionKey::thread(thread_id)) || !s.threads.contains(thread_id) {
            return Err(ForumError::thread(thread_id));
        }
        Ok(())
    }

    /// Counts a view for `session_id` (once per session) and returns the refreshed thread.
    pub fn view_thread(&self, thread_id: &str, session_id: &str) -> ForumResult<Thread> {
        let mut s = self.state();
        Self::visible_thread(&s, thread_id)?;
        let cached = s.threads.get(thread_id).map_or(0, |t| t.view_count);
        let views = s.engagement.recompute_views(thread_id, session_id, cached);
        s.threads.update(thread_id, |t| t.view_count = views);
        s.threads.get(thread_id).cloned().ok_or_else(|| ForumError::thread(thread_id))
    }

    pub fn toggle_thread_like(&self, thread_id: &str) -> ForumResult<LikeState> {
        let actor = self.actor()?;
        let mut s = self.state();
        Self::visible_thread(&s, thread_id)?;
        let cached = s.threads.get(thread_id).map_or(0, |t| t.likes);
        let state = s.engagement.toggle_thread_like(thread_id, &actor.id, cached);
        s.threads.update(thread_id, |t| t.likes = state.count);
        Ok(state)
    }

    /// Whether the current actor likes the thread; false when signed out.
    pub fn has_liked(&self, thread_id: &str) -> bool {
        match self.inner.identity.current_actor() {
            Some(a) => self.state().engagement.has_liked(&a.id, thread_id),
            None => false,
        }
    }

    /// Ids of the threads the current actor has liked, oldest like first.
    pub fn liked_threads(&self) -> Vec<Id> {
        match self.inner.identity.current_actor() {
            Some(a) => self.state().engagement.liked_threads(&a.id),
            None => Vec::new(),
        }
    }

    /// Re-derives the cached counters of a thread from its raw engagement data.
    pub fn refresh_counters(&self, thread_id: &str) -> ForumResult<Counters> {
        let mut s = self.state();
        Self::visible_thread(&s, thread_id)?;
        let ForumState { comments, engagement, threads, deletions } = &mut *s;
        let cached_likes = threads.get(thread_id).map_or(0, |t| t.likes);
        let likes = engagement.recompute_likes(thread_id, cached_likes);
        let count = engagement.recompute_comments(thread_id, comments, |k| deletions.is_hidden(k));
        threads.update(thread_id, |t| {
            t.likes = likes;
            t.comment_count = count;
        });
        let mut c = engagement.counters(thread_id);
        c.views = threads.get(thread_id).map_or(c.views, |t| t.view_count.max(c.views));
        Ok(c)
    }

    pub fn end_session(&self, session_id: &str) {
        self.inner.gateway.end_session(session_id);
    }

    // ---------------- comments ----------------

    /// Comment tree as the current actor sees it.
    pub fn comments(&self, thread_id: &str) -> ForumResult<Vec<CommentView>> {
        let viewer = self.inner.identity.current_actor().map(|a| a.id);
        let mut s = self.state();
        Self::visible_thread(&s, thread_id)?;
        let ForumState { comments, deletions, .. } = &mut *s;
        Ok(comments.project(thread_id, viewer.as_deref(), |k| deletions.is_hidden(k)))
    }

    /// Recounts visible top-level comments; pending ones do not count.
    fn sync_comment_count(s: &mut ForumState, thread_id: &str) {
        let ForumState { comments, engagement, threads, deletions } = s;
        let n = engagement.recompute_comments(thread_id, comments, |k| deletions.is_hidden(k));
        threads.update(thread_id, |t| t.comment_count = n);
    }

    pub fn add_comment(&self, thread_id: &str, text: &str) -> ForumResult<Comment> {
        let actor = self.inner.identity.current_actor();
        let r = {
            let mut s = self.state();
            Self::visible_thread(&s, thread_id).and_then(|_| {
                let c = s.comments.add_comment(thread_id, actor.as_ref(), text)?;
                Self::sync_comment_count(&mut s, thread_id);
                Ok(c)
            })
        };
        self.report(r)
    }

    fn visible_comment(s: &mut ForumState, thread_id: &str, comment_id: &str) -> ForumResult<()> {
        Self::visible_thread(s, thread_id)?;
        if s.deletions.is_hidden(&DeletionKey::comment(thread_id, comment_id)) {
            return Err(ForumError::comment(comment_id));
        }
        Ok(())
    }

    pub fn toggle_comment_like(&self, thread_id: &str, comment_id: &str) -> ForumResult<LikeState> {
        let actor = self.actor()?;
        let mut s = self.state();
        Self::visible_comment(&mut s, thread_id, comment_id)?;
        s.comments.toggle_comment_like(thread_id, comment_id, &actor.id)
    }

    pub fn add_reply(&self, thread_id: &str, comment_id: &str, text: &str) -> ForumResult<Reply> {
        let actor = self.inner.identity.current_actor();
        let r = {
            let mut s = self.state();
            Self::visible_comment(&mut s, thread_id, comment_id)
                .and_then(|_| s.comments.add_reply(thread_id, comment_id, actor.as_ref(), text))
        };
        self.report(r)
    }

    pub fn toggle_reply_like(&self, thread_id: &str, comment_id: &str, reply_id: &str) -> ForumResult<LikeState> {
        let actor = self.actor()?;
        let mut s = self.state();
        Self::visible_comment(&mut s, thread_id, comment_id)?;
        if s.deletions.is_pending(&DeletionKey::reply(thread_id, comment_id, reply_id)) {
            return Err(ForumError::reply(reply_id));
        }
        s.comments.toggle_reply_like(thread_id, comment_id, reply_id, &actor.id)
    }

    pub fn edit_comment(&self, thread_id: &str, comment_id: &str, text: &str) -> ForumResult<Comment> {
        let actor = self.inner.identity.current_actor();
        let r = {
            let mut s = self.state();
            Self::visible_comment(&mut s, thread_id, comment_id)
                .and_then(|_| s.comments.edit_comment(thread_id, comment_id, actor.as_ref(), text))
        };
        self.report(r)
    }

    // ---------------- soft delete ----------------

    pub fn delete_thread(&self, thread_id: &str) -> ForumResult<bool> {
        self.delete(DeletionKey::thread(thread_id))
    }

    pub fn delete_comment(&self, thread_id: &str, comment_id: &str) -> ForumResult<bool> {
        self.delete(DeletionKey::comment(thread_id, comment_id))
    }

    pub fn delete_reply(&self, thread_id: &str, comment_id: &str, reply_id: &str) -> ForumResult<bool> {
        self.delete(DeletionKey::reply(thread_id, comment_id, reply_id))
    }

    /// Active -> PendingDeletion. `Ok(false)` when the entity was already pending.
    pub fn delete(&self, key: DeletionKey) -> ForumResult<bool> {
        let actor = self.actor()?;
        let grace = {
            let mut s = self.state();
            if s.deletions.is_pending(&key) {
                return Ok(false);
            }
            match &key {
                DeletionKey::Thread { .. } => {}
                DeletionKey::Comment { thread_id, .. } => Self::visible_thread(&s, thread_id)?,
                DeletionKey::Reply { thread_id, comment_id, .. } => Self::visible_comment(&mut s, thread_id, comment_id)?,
            }
            let snapshot = Self::snapshot(&mut s, &key)?;
            let author = match &snapshot {
                DeletedEntity::Thread(t) => &t.author.id,
                DeletedEntity::Comment(c) => &c.author.id,
                DeletedEntity::Reply(r) => &r.author.id,
            };
            if *author != actor.id {
                return Err(ForumError::Forbidden);
            }
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            s.deletions.delete(key.clone(), snapshot, move |k, generation| {
                if let Some(inner) = weak.upgrade() {
                    Forum { inner }.finalize(&k, generation);
                }
            });
            if let DeletionKey::Comment { thread_id, .. } = &key {
                Self::sync_comment_count(&mut s, thread_id);
            }
            s.deletions.grace_period()
        };
        self.notify(&format!("{} deleted. Undo?", capitalized(key.kind())), NoticeLevel::Info, grace);
        Ok(true)
    }

    fn snapshot(s: &mut ForumState, key: &DeletionKey) -> ForumResult<DeletedEntity> {
        match key {
            DeletionKey::Thread { thread_id } => s
                .threads
                .get(thread_id)
                .cloned()
                .map(DeletedEntity::Thread)
                .ok_or_else(|| ForumError::thread(thread_id)),
            DeletionKey::Comment { thread_id, comment_id } => s
                .comments
                .comment(thread_id, comment_id)
                .map(DeletedEntity::Comment)
                .ok_or_else(|| ForumError::comment(comment_id)),
            DeletionKey::Reply { thread_id, comment_id, reply_id } => s
                .comments
                .reply(thread_id, comment_id, reply_id)
                .map(DeletedEntity::Reply)
                .ok_or_else(|| ForumError::reply(reply_id)),
        }
    }

    /// PendingDeletion -> Active. After finalize has run this is a quiet no-op.
    pub fn undo(&self, key: &DeletionKey) -> ForumResult<UndoOutcome> {
        self.actor()?;
        let record = {
            let mut s = self.state();
            let Some(record) = s.deletions.undo(key) else {
                debug!(kind = key.kind(), thread_id = key.thread_id(), "undo after finalize or without delete");
                return Ok(UndoOutcome::NotPending);
            };
            // normally still in storage; put the snapshot back if something removed it meanwhile
            let reinserted = match record.snapshot.clone() {
                DeletedEntity::Thread(t) => s.threads.reinsert(t),
                DeletedEntity::Comment(c) => s.comments.reinsert_comment(c),
                DeletedEntity::Reply(r) => s.comments.reinsert_reply(key.thread_id(), r),
            };
            if reinserted {
                warn!(kind = key.kind(), thread_id = key.thread_id(), "entity restored from snapshot");
            }
            if !matches!(key, DeletionKey::Thread { .. }) {
                Self::sync_comment_count(&mut s, key.thread_id());
            }
            record
        };
        if let DeletionKey::Thread { thread_id } = &record.key {
            self.inner.signal.emit(ForumEvent::ThreadRestored { thread_id: thread_id.clone() });
        }
        self.notify(&format!("{} restored", capitalized(key.kind())), NoticeLevel::Success, NOTICE_SHORT);
        Ok(UndoOutcome::Restored)
    }

    pub fn pending_deletions(&self) -> Vec<PendingDeletion> {
        self.state().deletions.pending()
    }

    /// PendingDeletion -> Finalized. Runs from the scheduled task; does nothing if the
    /// record was undone or replaced since the task was scheduled.
    fn finalize(&self, key: &DeletionKey, generation: u64) {
        let removed_thread = {
            let mut s = self.state();
            let Some(record) = s.deletions.take_expired(key, generation) else { return };
            match &record.key {
                DeletionKey::Thread { thread_id } => {
                    s.threads.remove(thread_id);
                    s.comments.purge_thread(thread_id);
                    s.engagement.purge_thread(thread_id);
                    s.deletions.drop_descendants(&record.key);
                    Some(thread_id.clone())
                }
                DeletionKey::Comment { thread_id, comment_id } => {
                    s.comments.remove_comment(thread_id, comment_id);
                    s.deletions.drop_descendants(&record.key);
                    Self::sync_comment_count(&mut s, thread_id);
                    None
                }
                DeletionKey::Reply { thread_id, comment_id, reply_id } => {
                    s.comments.remove_reply(thread_id, comment_id, reply_id);
                    None
                }
            }
        };
        info!(kind = key.kind(), thread_id = key.thread_id(), "deletion finalized");
        if let Some(thread_id) = removed_thread {
            self.inner.signal.emit(ForumEvent::ThreadRemoved { thread_id });
        }
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
