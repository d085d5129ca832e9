use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Ids are uuid v4 strings for anything created locally; seed threads use short slugs.
pub type Id = String;

pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Identity of whoever is acting, as handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Id,
    pub name: String,
    pub points: i64,
    pub avatar_url: Option<String>,
}

/// Author attribution stored on threads, comments and replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub points: i64,
}

impl From<&Actor> for Author {
    fn from(a: &Actor) -> Self {
        Self { id: a.id.clone(), name: a.name.clone(), points: a.points }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub forum_id: Id,
    pub author: Author,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    pub created_at: DateTime<Utc>,
    // denormalized counters, recomputed by the engagement tracker
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub view_count: u64,
}

impl Thread {
    /// Name shown to readers; anonymous threads never expose the author.
    pub fn display_author(&self) -> &str {
        if self.is_anonymous { "Anonymous" } else { self.author.name.as_str() }
    }

    pub fn trending_score(&self) -> u64 {
        self.likes + self.comment_count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewThread {
    pub title: String,
    pub content: String,
    pub forum_id: Id,
    pub is_question: bool,
    pub is_anonymous: bool,
    pub tags: Vec<String>,
    pub media: Vec<MediaItem>,
}

/// Two-state vote; "no vote" is `None` at the use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Id,
    pub parent_comment_id: Id,
    pub content: String,
    pub author: Author,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub voters: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub thread_id: Id,
    pub content: String,
    pub author: Author,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub voters: Vec<Id>,
    #[serde(default)]
    pub replies: Vec<Reply>, // oldest first
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

/// Reply as seen by one particular viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyView {
    pub id: Id,
    pub parent_comment_id: Id,
    pub content: String,
    pub author: Author,
    pub upvotes: u64,
    pub user_vote: Option<Vote>,
    pub created_at: DateTime<Utc>,
}

/// Comment as seen by one particular viewer, with hidden replies filtered out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Id,
    pub thread_id: Id,
    pub content: String,
    pub author: Author,
    pub upvotes: u64,
    pub user_vote: Option<Vote>,
    pub replies: Vec<ReplyView>,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

fn vote_of(voters: &[Id], viewer: Option<&str>) -> Option<Vote> {
    match viewer {
        Some(v) if voters.iter().any(|x| x == v) => Some(Vote::Up),
        _ => None,
    }
}

impl ReplyView {
    pub fn project(r: &Reply, viewer: Option<&str>) -> Self {
        Self {
            id: r.id.clone(),
            parent_comment_id: r.parent_comment_id.clone(),
            content: r.content.clone(),
            author: r.author.clone(),
            upvotes: r.upvotes,
            user_vote: vote_of(&r.voters, viewer),
            created_at: r.created_at,
        }
    }
}

impl CommentView {
    pub fn project(c: &Comment, viewer: Option<&str>, replies: Vec<ReplyView>) -> Self {
        Self {
            id: c.id.clone(),
            thread_id: c.thread_id.clone(),
            content: c.content.clone(),
            author: c.author.clone(),
            upvotes: c.upvotes,
            user_vote: vote_of(&c.voters, viewer),
            replies,
            created_at: c.created_at,
            edited: c.edited,
        }
    }
}

/// Result of flipping a vote: whether the voter now likes it and the new count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub count: u64,
}

/// Flips membership of `voter` in `voters` and adjusts `count`, flooring at zero.
pub(crate) fn toggle_vote(voters: &mut Vec<Id>, count: &mut u64, voter: &str) -> LikeState {
    if let Some(pos) = voters.iter().position(|v| v == voter) {
        voters.remove(pos);
        *count = count.saturating_sub(1);
        LikeState { liked: false, count: *count }
    } else {
        voters.push(voter.to_string());
        *count += 1;
        LikeState { liked: true, count: *count }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Recent,
    MostViewed,
    Trending,
    MostCommented,
    MostLiked,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recent" | "newest" => Ok(SortKey::Recent),
            "views" | "most_viewed" => Ok(SortKey::MostViewed),
            "trending" => Ok(SortKey::Trending),
            "comments" | "most_commented" => Ok(SortKey::MostCommented),
            "likes" | "most_liked" => Ok(SortKey::MostLiked),
            other => Err(format!("unknown sort key '{other}'")),
        }
    }
}

/// Filter and ordering for thread listings. All filters are optional.
#[derive(Debug, Clone, Default)]
pub struct ThreadQuery {
    pub text: Option<String>,
    pub forum_id: Option<Id>,
    pub tag: Option<String>,
    pub questions_only: bool,
    pub pinned_first: bool,
    pub sort: SortKey,
}

impl ThreadQuery {
    pub fn sorted(sort: SortKey) -> Self {
        Self { sort, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_vote_round_trip_and_floor() {
        let mut voters = Vec::new();
        let mut count = 0;
        assert_eq!(toggle_vote(&mut voters, &mut count, "u1"), LikeState { liked: true, count: 1 });
        assert_eq!(toggle_vote(&mut voters, &mut count, "u1"), LikeState { liked: false, count: 0 });
        assert!(voters.is_empty());

        // a stale voter list with a zero counter must not underflow
        let mut voters = vec!["u2".to_string()];
        let mut count = 0;
        assert_eq!(toggle_vote(&mut voters, &mut count, "u2").count, 0);
    }

    #[test]
    fn thread_deserializes_without_counters() {
        let raw = r#"{"id":"t1","title":"T","content":"C","forumId":"f","author":{"id":"a","name":"Ann"},"createdAt":"2024-01-01T00:00:00Z"}"#;
        let t: Thread = serde_json::from_str(raw).unwrap();
        assert_eq!(t.likes, 0);
        assert!(t.tags.is_empty());
        assert_eq!(t.display_author(), "Ann");
    }

    #[test]
    fn sort_key_parses_aliases() {
        assert_eq!("likes".parse::<SortKey>().unwrap(), SortKey::MostLiked);
        assert_eq!("Trending".parse::<SortKey>().unwrap(), SortKey::Trending);
        assert!("bogus".parse::<SortKey>().is_err());
    }
}
