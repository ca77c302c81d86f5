/// Shared error type used across every crate of the engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("rpc request timed out after {0:?}")]
    RpcTimeout(std::time::Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("spawn failed for engine {engine}: {message}")]
    Spawn { engine: String, message: String },

    #[error("lock acquire timed out for issue {0}")]
    LockAcquireTimeout(uuid::Uuid),

    #[error("lock queue full for issue {0}")]
    LockQueueFull(uuid::Uuid),

    #[error("lock execution timed out for issue {0}")]
    LockExecutionTimeout(uuid::Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
