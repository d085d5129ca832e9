use std::path::PathBuf;
use std::time::Duration;

use crate::deletion::DEFAULT_GRACE_PERIOD;
use crate::models::SortKey;

/// Engine settings, read from the environment with sensible defaults.
#[derive(Clone, Debug)]
pub struct ForumConfig {
    pub data_dir: PathBuf,
    pub grace_period: Duration,
    pub seed_demo: bool,
    pub signal_capacity: usize,
    pub default_sort: SortKey,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            grace_period: DEFAULT_GRACE_PERIOD,
            seed_demo: true,
            signal_capacity: 64,
            default_sort: SortKey::Recent,
        }
    }
}

impl ForumConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn bool_env(name: &str, default: bool) -> bool {
            std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            data_dir: std::env::var("FORUM_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            grace_period: std::env::var("FORUM_GRACE_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(d.grace_period),
            seed_demo: bool_env("FORUM_SEED_DEMO", d.seed_demo),
            signal_capacity: usize_env("FORUM_SIGNAL_CAPACITY", d.signal_capacity),
            default_sort: std::env::var("FORUM_SORT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.default_sort),
        }
    }
}
