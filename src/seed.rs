//! Demo threads shown on a fresh install.

use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;

use crate::models::{Author, MediaItem, MediaKind, Thread};

static DEMO: Lazy<Vec<Thread>> = Lazy::new(|| {
    let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).single().unwrap_or_default();
    let author = |id: &str, name: &str, points: i64| Author { id: id.into(), name: name.into(), points };
    vec![
        Thread {
            id: "demo-welcome".into(),
            title: "Welcome to the community forum".into(),
            content: "Introduce yourself and tell us what you are working on.".into(),
            forum_id: "general".into(),
            author: author("staff", "Forum Staff", 1200),
            is_question: false,
            is_anonymous: false,
            is_pinned: true,
            tags: vec!["announcement".into()],
            media: vec![],
            created_at: at(1, 9),
            likes: 24,
            comment_count: 0,
            view_count: 310,
        },
        Thread {
            id: "demo-interview".into(),
            title: "How do you prepare for system design interviews?".into(),
            content: "Looking for resources and practice routines that worked for you.".into(),
            forum_id: "careers".into(),
            author: author("demo-priya", "Priya", 340),
            is_question: true,
            is_anonymous: false,
            is_pinned: false,
            tags: vec!["interviews".into(), "career".into()],
            media: vec![],
            created_at: at(4, 14),
            likes: 12,
            comment_count: 0,
            view_count: 152,
        },
        Thread {
            id: "demo-showcase".into(),
            title: "Show your weekend project".into(),
            content: "Post a screenshot or a link, feedback welcome.".into(),
            forum_id: "projects".into(),
            author: author("demo-lee", "Lee", 95),
            is_question: false,
            is_anonymous: false,
            is_pinned: false,
            tags: vec!["showcase".into()],
            media: vec![MediaItem {
                kind: MediaKind::Image,
                url: "/media/demo/showcase.png".into(),
                caption: Some("Terminal dashboard".into()),
            }],
            created_at: at(6, 18),
            likes: 7,
            comment_count: 0,
            view_count: 88,
        },
        Thread {
            id: "demo-salary".into(),
            title: "Is it normal to negotiate a first offer?".into(),
            content: "Asking anonymously, first job out of school.".into(),
            forum_id: "careers".into(),
            author: author("demo-anon", "Sam", 5),
            is_question: true,
            is_anonymous: true,
            is_pinned: false,
            tags: vec!["career".into(), "salary".into()],
            media: vec![],
            created_at: at(8, 11),
            likes: 19,
            comment_count: 0,
            view_count: 240,
        },
    ]
});

pub fn demo_threads() -> &'static [Thread] {
    &DEMO
}
