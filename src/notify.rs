use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Sink for short-lived user feedback (toasts, snackbars). Owned by the UI layer.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, level: NoticeLevel, duration: Duration);
}

/// Default sink when no UI is attached: writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, level: NoticeLevel, duration: Duration) {
        let ms = duration.as_millis() as u64;
        match level {
            NoticeLevel::Info | NoticeLevel::Success => info!(?level, duration_ms = ms, "{message}"),
            NoticeLevel::Warning | NoticeLevel::Error => warn!(?level, duration_ms = ms, "{message}"),
        }
    }
}
