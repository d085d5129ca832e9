#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ForumError {
    /// No identity available; the caller should route to sign-in.
    #[error("sign in required")] AuthRequired,
    #[error("validation failed: {0}")] Validation(String),
    #[error("{entity} {id} not found")] NotFound { entity: &'static str, id: String },
    #[error("only the author may do that")] Forbidden,
}

impl ForumError {
    pub(crate) fn thread(id: &str) -> Self { ForumError::NotFound { entity: "thread", id: id.to_string() } }
    pub(crate) fn comment(id: &str) -> Self { ForumError::NotFound { entity: "comment", id: id.to_string() } }
    pub(crate) fn reply(id: &str) -> Self { ForumError::NotFound { entity: "reply", id: id.to_string() } }
}

pub type ForumResult<T> = Result<T, ForumError>;

/// Failures inside a key-value backend. These never leave the persistence gateway.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("corrupt record '{key}': {source}")]
    Corrupt { key: String, #[source] source: serde_json::Error },
    #[error("serialize '{key}': {source}")]
    Serialize { key: String, #[source] source: serde_json::Error },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
