pub mod comments;
pub mod config;
pub mod deletion;
pub mod engagement;
pub mod error;
pub mod forum;
pub mod identity;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod seed;
pub mod signal;
pub mod storage; // durable + session key-value namespaces
pub mod threads;

// Re-export commonly used items for tests / embedders
pub use config::ForumConfig;
pub use deletion::{DeletionKey, UndoOutcome};
pub use error::{ForumError, ForumResult};
pub use forum::{Forum, ForumBuilder};
pub use signal::{ChangeSignal, ForumEvent};
pub use storage::PersistenceGateway;
