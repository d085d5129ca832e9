use std::sync::Arc;
use std::time::Duration;

use agora::identity::SessionIdentity;
use agora::models::{Actor, Author, Id, NewThread, Thread, ThreadQuery};
use agora::scheduler::{ManualScheduler, TokioScheduler};
use agora::storage::{keys, KeyValueStore, MemoryStore};
use agora::{DeletionKey, Forum, ForumError, ForumEvent, PersistenceGateway, UndoOutcome};

const GRACE: Duration = Duration::from_secs(5);

fn actor(id: &str) -> Actor {
    Actor { id: id.into(), name: id.into(), points: 0, avatar_url: None }
}

struct Fixture {
    forum: Forum,
    clock: ManualScheduler,
    who: Arc<SessionIdentity>,
    backend: Arc<MemoryStore>,
    gateway: PersistenceGateway,
}

fn fixture_with_seed(seed: Vec<Thread>) -> Fixture {
    let backend = Arc::new(MemoryStore::new());
    let gateway = PersistenceGateway::new(backend.clone());
    let clock = ManualScheduler::new();
    let who = Arc::new(SessionIdentity::signed_in(actor("ann")));
    let forum = Forum::builder(gateway.clone(), Arc::new(clock.clone()), who.clone())
        .grace_period(GRACE)
        .seed(seed)
        .build();
    Fixture { forum, clock, who, backend, gateway }
}

fn fixture() -> Fixture {
    fixture_with_seed(Vec::new())
}

fn post(forum: &Forum) -> Thread {
    forum
        .create_thread(NewThread { title: "T1".into(), content: "body".into(), forum_id: "general".into(), ..Default::default() })
        .unwrap()
}

fn listed(forum: &Forum) -> Vec<Id> {
    forum.threads(&ThreadQuery::default()).into_iter().map(|t| t.id).collect()
}

fn stored_thread_ids(gw: &PersistenceGateway) -> Vec<Id> {
    gw.durable().get::<Vec<Thread>>(keys::THREADS).unwrap_or_default().into_iter().map(|t| t.id).collect()
}

#[test]
fn undo_within_grace_restores_thread_unchanged() {
    let f = fixture();
    let t1 = post(&f.forum);
    f.forum.add_comment(&t1.id, "keep me").unwrap();
    let before = f.forum.thread(&t1.id).unwrap();
    let mut rx = f.forum.subscribe();

    assert!(f.forum.delete_thread(&t1.id).unwrap());
    assert!(listed(&f.forum).is_empty());
    assert!(f.forum.thread(&t1.id).is_none());
    assert!(matches!(f.forum.comments(&t1.id), Err(ForumError::NotFound { .. })));

    f.clock.advance(Duration::from_secs(3));
    assert_eq!(f.forum.undo(&DeletionKey::thread(&t1.id)).unwrap(), UndoOutcome::Restored);

    let after = f.forum.thread(&t1.id).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.comment_count, 1);
    assert_eq!(listed(&f.forum), vec![t1.id.clone()]);
    assert_eq!(rx.try_recv().unwrap(), ForumEvent::ThreadRestored { thread_id: t1.id.clone() });

    // the cancelled finalize never fires
    f.clock.advance(Duration::from_secs(10));
    assert_eq!(stored_thread_ids(&f.gateway), vec![t1.id.clone()]);
}

#[test]
fn grace_expiry_finalizes_thread_and_everything_under_it() {
    let f = fixture();
    let t1 = post(&f.forum);
    let c = f.forum.add_comment(&t1.id, "bye").unwrap();
    f.forum.add_reply(&t1.id, &c.id, "bye too").unwrap();
    f.forum.toggle_thread_like(&t1.id).unwrap();
    f.forum.view_thread(&t1.id, "tab").unwrap();
    let mut rx = f.forum.subscribe();

    f.forum.delete_thread(&t1.id).unwrap();
    f.clock.advance(GRACE);

    assert!(listed(&f.forum).is_empty());
    assert!(stored_thread_ids(&f.gateway).is_empty());
    assert!(!f.backend.contains(&keys::comments(&t1.id)));
    assert!(!f.backend.contains(&keys::likes(&t1.id)));
    assert!(!f.backend.contains(&keys::views(&t1.id)));
    assert!(!f.backend.contains(&keys::liked_threads("ann")));
    assert_eq!(f.gateway.session("tab").get::<bool>(&keys::viewed(&t1.id)), None);
    assert_eq!(rx.try_recv().unwrap(), ForumEvent::ThreadRemoved { thread_id: t1.id.clone() });

    assert_eq!(f.forum.undo(&DeletionKey::thread(&t1.id)).unwrap(), UndoOutcome::NotPending);
    assert!(f.forum.pending_deletions().is_empty());
}

#[test]
fn finalizing_a_comment_leaves_siblings_and_thread_alone() {
    let f = fixture();
    let t = post(&f.forum);
    let doomed = f.forum.add_comment(&t.id, "doomed").unwrap();
    f.forum.add_reply(&t.id, &doomed.id, "goes with it").unwrap();
    let sibling = f.forum.add_comment(&t.id, "sibling").unwrap();

    f.forum.delete_comment(&t.id, &doomed.id).unwrap();
    let visible = f.forum.comments(&t.id).unwrap();
    assert_eq!(visible.iter().map(|c| c.id.clone()).collect::<Vec<_>>(), vec![sibling.id.clone()]);

    f.clock.advance(GRACE);
    let raw: Vec<agora::models::Comment> = f.gateway.durable().get(&keys::comments(&t.id)).unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].id, sibling.id);
    assert_eq!(f.forum.thread(&t.id).unwrap().comment_count, 1);
}

#[test]
fn finalizing_a_reply_only_removes_the_reply() {
    let f = fixture();
    let t = post(&f.forum);
    let c = f.forum.add_comment(&t.id, "parent").unwrap();
    let keep = f.forum.add_reply(&t.id, &c.id, "keep").unwrap();
    let gone = f.forum.add_reply(&t.id, &c.id, "gone").unwrap();

    f.forum.delete_reply(&t.id, &c.id, &gone.id).unwrap();
    assert_eq!(f.forum.comments(&t.id).unwrap()[0].replies.len(), 1);
    f.clock.advance(GRACE);

    let view = f.forum.comments(&t.id).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].replies.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec![keep.id]);
    assert_eq!(f.forum.thread(&t.id).unwrap().comment_count, 1);
}

#[test]
fn undo_restores_a_comment_with_its_replies() {
    let f = fixture();
    let t = post(&f.forum);
    let c = f.forum.add_comment(&t.id, "oops").unwrap();
    f.forum.add_reply(&t.id, &c.id, "reply").unwrap();
    let before = f.forum.comments(&t.id).unwrap();

    f.forum.delete_comment(&t.id, &c.id).unwrap();
    assert!(f.forum.comments(&t.id).unwrap().is_empty());
    f.forum.undo(&DeletionKey::comment(&t.id, &c.id)).unwrap();
    f.clock.advance(GRACE * 2);

    assert_eq!(f.forum.comments(&t.id).unwrap(), before);
}

#[test]
fn second_delete_while_pending_is_a_noop() {
    let f = fixture();
    let t = post(&f.forum);
    assert!(f.forum.delete_thread(&t.id).unwrap());
    assert!(!f.forum.delete_thread(&t.id).unwrap());
    assert_eq!(f.forum.pending_deletions().len(), 1);
    assert_eq!(f.clock.pending(), 1);
}

#[test]
fn delete_requires_author_and_existing_entity() {
    let f = fixture();
    let t = post(&f.forum);
    assert!(matches!(f.forum.delete_comment(&t.id, "ghost"), Err(ForumError::NotFound { .. })));

    f.who.sign_in(actor("mallory"));
    assert_eq!(f.forum.delete_thread(&t.id).unwrap_err(), ForumError::Forbidden);
    f.who.sign_out();
    assert_eq!(f.forum.delete_thread(&t.id).unwrap_err(), ForumError::AuthRequired);
    assert!(f.forum.pending_deletions().is_empty());
}

#[test]
fn redelete_after_undo_gets_a_fresh_grace_period() {
    let f = fixture();
    let t = post(&f.forum);
    let key = DeletionKey::thread(&t.id);

    f.forum.delete(key.clone()).unwrap();
    f.clock.advance(Duration::from_secs(3));
    f.forum.undo(&key).unwrap();
    f.forum.delete(key.clone()).unwrap();

    // the first timer would have expired here
    f.clock.advance(Duration::from_secs(3));
    assert_eq!(stored_thread_ids(&f.gateway), vec![t.id.clone()]);
    assert!(listed(&f.forum).is_empty());

    f.clock.advance(Duration::from_secs(2));
    assert!(stored_thread_ids(&f.gateway).is_empty());
}

#[test]
fn finalized_seed_thread_does_not_come_back() {
    let seed = Thread {
        id: "seed-1".into(),
        title: "Seeded".into(),
        content: "from the seed set".into(),
        forum_id: "general".into(),
        author: Author { id: "ann".into(), name: "ann".into(), points: 0 },
        is_question: false,
        is_anonymous: false,
        is_pinned: false,
        tags: vec![],
        media: vec![],
        created_at: chrono::Utc::now(),
        likes: 0,
        comment_count: 0,
        view_count: 0,
    };
    let f = fixture_with_seed(vec![seed.clone()]);
    assert_eq!(listed(&f.forum), vec!["seed-1".to_string()]);

    f.forum.delete_thread("seed-1").unwrap();
    f.clock.advance(GRACE);
    f.forum.load();
    assert!(listed(&f.forum).is_empty());

    let again = Forum::builder(f.gateway.clone(), Arc::new(ManualScheduler::new()), f.who.clone())
        .seed(vec![seed])
        .build();
    assert!(listed(&again).is_empty());
    assert!(f.backend.get(keys::PURGED_THREADS).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn tokio_scheduler_finalizes_after_grace() {
    let gateway = PersistenceGateway::in_memory();
    let who = Arc::new(SessionIdentity::signed_in(actor("ann")));
    let forum = Forum::builder(gateway.clone(), Arc::new(TokioScheduler::try_current().unwrap()), who)
        .grace_period(GRACE)
        .build();
    let t = post(&forum);
    forum.delete_thread(&t.id).unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(stored_thread_ids(&gateway), vec![t.id.clone()]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert!(stored_thread_ids(&gateway).is_empty());
}

#[tokio::test(start_paused = true)]
async fn tokio_scheduler_undo_cancels_finalize() {
    let gateway = PersistenceGateway::in_memory();
    let who = Arc::new(SessionIdentity::signed_in(actor("ann")));
    let forum = Forum::builder(gateway.clone(), Arc::new(TokioScheduler::try_current().unwrap()), who)
        .grace_period(GRACE)
        .build();
    let t = post(&forum);
    forum.delete_thread(&t.id).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(forum.undo(&DeletionKey::thread(&t.id)).unwrap(), UndoOutcome::Restored);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(stored_thread_ids(&gateway), vec![t.id.clone()]);
    assert!(forum.thread(&t.id).is_some());
}

#[test]
fn pending_comment_drops_out_of_the_comment_count() {
    let f = fixture();
    let t = post(&f.forum);
    let c = f.forum.add_comment(&t.id, "soon gone").unwrap();
    assert_eq!(f.forum.thread(&t.id).unwrap().comment_count, 1);

    f.forum.delete_comment(&t.id, &c.id).unwrap();
    assert!(f.forum.comments(&t.id).unwrap().is_empty());
    assert_eq!(f.forum.thread(&t.id).unwrap().comment_count, 0);
    assert_eq!(f.forum.threads(&ThreadQuery::default())[0].comment_count, 0);
    assert_eq!(f.forum.refresh_counters(&t.id).unwrap().comments, 0);

    f.forum.undo(&DeletionKey::comment(&t.id, &c.id)).unwrap();
    assert_eq!(f.forum.thread(&t.id).unwrap().comment_count, 1);
}

#[test]
fn reply_under_pending_comment_cannot_be_deleted() {
    let f = fixture();
    let t = post(&f.forum);
    let c = f.forum.add_comment(&t.id, "parent").unwrap();
    let r = f.forum.add_reply(&t.id, &c.id, "child").unwrap();

    f.forum.delete_comment(&t.id, &c.id).unwrap();
    assert!(matches!(
        f.forum.delete_reply(&t.id, &c.id, &r.id),
        Err(ForumError::NotFound { entity: "comment", .. })
    ));
    assert_eq!(f.forum.pending_deletions().len(), 1);
    assert_eq!(f.clock.pending(), 1);
}
