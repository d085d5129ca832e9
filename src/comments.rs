use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::deletion::DeletionKey;
use crate::error::{ForumError, ForumResult};
use crate::models::{new_id, toggle_vote, Actor, Author, Comment, CommentView, Id, LikeState, Reply, ReplyView};
use crate::storage::{keys, Namespace};

/// Per-thread comment trees, loaded on first touch and written back whole after every change.
pub struct CommentStore {
    ns: Namespace,
    trees: HashMap<Id, Vec<Comment>>, // comments newest first
}

fn require_actor(actor: Option<&Actor>) -> ForumResult<&Actor> {
    actor.ok_or(ForumError::AuthRequired)
}

fn require_text(text: &str, what: &str) -> ForumResult<String> {
    let t = text.trim();
    if t.is_empty() {
        return Err(ForumError::Validation(format!("{what} cannot be empty")));
    }
    Ok(t.to_string())
}

impl CommentStore {
    pub fn new(ns: Namespace) -> Self {
        Self { ns, trees: HashMap::new() }
    }

    /// Loads the thread's tree if it is not cached yet; empty when nothing is stored.
    pub fn load_for_thread(&mut self, thread_id: &str) -> &[Comment] {
        self.tree(thread_id)
    }

    fn tree(&mut self, thread_id: &str) -> &mut Vec<Comment> {
        let ns = &self.ns;
        self.trees.entry(thread_id.to_string()).or_insert_with(|| {
            let list: Vec<Comment> = ns.get(&keys::comments(thread_id)).unwrap_or_default();
            debug!(thread_id, comments = list.len(), "comment tree loaded");
            list
        })
    }

    fn persist(&self, thread_id: &str) {
        if let Some(list) = self.trees.get(thread_id) {
            self.ns.set(&keys::comments(thread_id), list);
        }
    }

    fn comment_mut(&mut self, thread_id: &str, comment_id: &str) -> ForumResult<&mut Comment> {
        self.tree(thread_id)
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| ForumError::comment(comment_id))
    }

    fn reply_mut(&mut self, thread_id: &str, comment_id: &str, reply_id: &str) -> ForumResult<&mut Reply> {
        self.comment_mut(thread_id, comment_id)?
            .replies
            .iter_mut()
            .find(|r| r.id == reply_id)
            .ok_or_else(|| ForumError::reply(reply_id))
    }

    pub fn add_comment(&mut self, thread_id: &str, actor: Option<&Actor>, text: &str) -> ForumResult<Comment> {
        let actor = require_actor(actor)?;
        let content = require_text(text, "comment")?;
        let comment = Comment {
            id: new_id(),
            thread_id: thread_id.to_string(),
            content,
            author: Author::from(actor),
            upvotes: 0,
            voters: Vec::new(),
            replies: Vec::new(),
            created_at: Utc::now(),
            edited: false,
            edited_at: None,
        };
        self.tree(thread_id).insert(0, comment.clone());
        self.persist(thread_id);
        Ok(comment)
    }

    pub fn toggle_comment_like(&mut self, thread_id: &str, comment_id: &str, voter_id: &str) -> ForumResult<LikeState> {
        let state = {
            let c = self.comment_mut(thread_id, comment_id)?;
            toggle_vote(&mut c.voters, &mut c.upvotes, voter_id)
        };
        self.persist(thread_id);
        Ok(state)
    }

    pub fn add_reply(&mut self, thread_id: &str, comment_id: &str, actor: Option<&Actor>, text: &str) -> ForumResult<Reply> {
        let actor = require_actor(actor)?;
        let content = require_text(text, "reply")?;
        let reply = Reply {
            id: new_id(),
            parent_comment_id: comment_id.to_string(),
            content,
            author: Author::from(actor),
            upvotes: 0,
            voters: Vec::new(),
            created_at: Utc::now(),
        };
        self.comment_mut(thread_id, comment_id)?.replies.push(reply.clone());
        self.persist(thread_id);
        Ok(reply)
    }

    pub fn toggle_reply_like(&mut self, thread_id: &str, comment_id: &str, reply_id: &str, voter_id: &str) -> ForumResult<LikeState> {
        let state = {
            let r = self.reply_mut(thread_id, comment_id, reply_id)?;
            toggle_vote(&mut r.voters, &mut r.upvotes, voter_id)
        };
        self.persist(thread_id);
        Ok(state)
    }

    /// Author-only content edit; marks the comment as edited.
    pub fn edit_comment(&mut self, thread_id: &str, comment_id: &str, actor: Option<&Actor>, text: &str) -> ForumResult<Comment> {
        let actor = require_actor(actor)?;
        let content = require_text(text, "comment")?;
        let updated = {
            let c = self.comment_mut(thread_id, comment_id)?;
            if c.author.id != actor.id {
                return Err(ForumError::Forbidden);
            }
            c.content = content;
            c.edited = true;
            c.edited_at = Some(Utc::now());
            c.clone()
        };
        self.persist(thread_id);
        Ok(updated)
    }

    pub fn comment(&mut self, thread_id: &str, comment_id: &str) -> Option<Comment> {
        self.tree(thread_id).iter().find(|c| c.id == comment_id).cloned()
    }

    pub fn reply(&mut self, thread_id: &str, comment_id: &str, reply_id: &str) -> Option<Reply> {
        self.tree(thread_id)
            .iter()
            .find(|c| c.id == comment_id)?
            .replies
            .iter()
            .find(|r| r.id == reply_id)
            .cloned()
    }

    /// Top-level comments not reported `hidden`; replies are not counted.
    pub fn top_level_count(&mut self, thread_id: &str, hidden: impl Fn(&DeletionKey) -> bool) -> u64 {
        self.tree(thread_id)
            .iter()
            .filter(|c| !hidden(&DeletionKey::comment(thread_id, &c.id)))
            .count() as u64
    }

    /// Viewer-relative projection of the tree, skipping anything `hidden` reports as pending deletion.
    pub fn project(&mut self, thread_id: &str, viewer: Option<&str>, hidden: impl Fn(&DeletionKey) -> bool) -> Vec<CommentView> {
        self.tree(thread_id)
            .iter()
            .filter(|c| !hidden(&DeletionKey::comment(thread_id, &c.id)))
            .map(|c| {
                let replies = c
                    .replies
                    .iter()
                    .filter(|r| !hidden(&DeletionKey::reply(thread_id, &c.id, &r.id)))
                    .map(|r| ReplyView::project(r, viewer))
                    .collect();
                CommentView::project(c, viewer, replies)
            })
            .collect()
    }

    // ---- physical removal, driven by the deletion coordinator ----

    pub fn remove_comment(&mut self, thread_id: &str, comment_id: &str) -> Option<Comment> {
        let removed = {
            let tree = self.tree(thread_id);
            let pos = tree.iter().position(|c| c.id == comment_id)?;
            tree.remove(pos)
        };
        self.persist(thread_id);
        Some(removed)
    }

    pub fn remove_reply(&mut self, thread_id: &str, comment_id: &str, reply_id: &str) -> Option<Reply> {
        let removed = {
            let c = self.comment_mut(thread_id, comment_id).ok()?;
            let pos = c.replies.iter().position(|r| r.id == reply_id)?;
            c.replies.remove(pos)
        };
        self.persist(thread_id);
        Some(removed)
    }

    /// Drops the whole tree of a thread from memory and storage.
    pub fn purge_thread(&mut self, thread_id: &str) {
        self.trees.remove(thread_id);
        self.ns.remove(&keys::comments(thread_id));
    }

    /// Restores a snapshot if the comment is missing, keeping newest-first order.
    pub fn reinsert_comment(&mut self, comment: Comment) -> bool {
        let thread_id = comment.thread_id.clone();
        {
            let tree = self.tree(&thread_id);
            if tree.iter().any(|c| c.id == comment.id) {
                return false;
            }
            let pos = tree.iter().position(|c| c.created_at < comment.created_at).unwrap_or(tree.len());
            tree.insert(pos, comment);
        }
        self.persist(&thread_id);
        true
    }

    /// Restores a reply snapshot if missing, keeping oldest-first order.
    pub fn reinsert_reply(&mut self, thread_id: &str, reply: Reply) -> bool {
        {
            let Ok(c) = self.comment_mut(thread_id, &reply.parent_comment_id) else { return false };
            if c.replies.iter().any(|r| r.id == reply.id) {
                return false;
            }
            let pos = c.replies.iter().position(|r| r.created_at > reply.created_at).unwrap_or(c.replies.len());
            c.replies.insert(pos, reply);
        }
        self.persist(thread_id);
        true
    }
}
