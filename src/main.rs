use std::sync::Arc;

use agora::identity::SessionIdentity;
use agora::models::ThreadQuery;
use agora::scheduler::TokioScheduler;
use agora::storage::FileStore;
use agora::{Forum, ForumConfig, PersistenceGateway};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; release setups pass real env vars.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = ForumConfig::from_env();
    info!(data_dir = %cfg.data_dir.display(), grace_ms = cfg.grace_period.as_millis() as u64, "bootstrapping forum");

    let store = FileStore::open(&cfg.data_dir);
    let gateway = PersistenceGateway::new(Arc::new(store));
    let forum = Forum::builder(gateway, Arc::new(TokioScheduler::try_current()?), Arc::new(SessionIdentity::new()))
        .config(&cfg)
        .build();

    // every run is a fresh browsing session
    let session = agora::models::new_id();
    let listing = forum.threads(&ThreadQuery { pinned_first: true, ..ThreadQuery::sorted(cfg.default_sort) });
    info!(threads = listing.len(), sort = ?cfg.default_sort, "listing threads");

    for t in &listing {
        let viewed = forum.view_thread(&t.id, &session)?;
        let flags = match (viewed.is_pinned, viewed.is_question) {
            (true, _) => "[pinned] ",
            (false, true) => "[question] ",
            _ => "",
        };
        println!(
            "{flags}{}  by {}  ({} likes, {} comments, {} views)",
            viewed.title,
            viewed.display_author(),
            viewed.likes,
            viewed.comment_count,
            viewed.view_count
        );
    }
    forum.end_session(&session);
    Ok(())
}
