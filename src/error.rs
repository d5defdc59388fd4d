use thiserror::Error;

/// Error taxonomy for feed lifecycle, persistence, and reader operations.
#[derive(Error, Debug)]
pub enum Error {
    /// `open_feed` called with an empty path.
    #[error("path must not be empty")]
    MissingPath,

    /// A supplied key was malformed for the active key-pair factory.
    #[error("bad key: {0}")]
    BadKey(String),

    /// A supplied secret key was malformed or present without a public key.
    #[error("bad secret key: {0}")]
    BadSecretKey(String),

    /// A codec name has no registered encoder/decoder.
    #[error("unknown value encoding: {0}")]
    BadEncoding(String),

    /// `open_feed(path, {key})` where `key` disagrees with the descriptor already
    /// registered under `path`.
    #[error("path {path:?} is already bound to a different key")]
    KeyMismatch { path: String },

    /// `open_feed(path, {key})` where `key` is already bound to a different path.
    #[error("key is already bound to path {existing_path:?}")]
    DuplicateKey { existing_path: String },

    /// Operation referenced a path or discovery key with no descriptor.
    #[error("no descriptor for {0:?}")]
    NotFound(String),

    /// Operation attempted on a store or descriptor that is not serviceable.
    #[error("store or descriptor is closed")]
    Closed,

    /// Descriptor open/close did not complete within the configured duration.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A fault surfaced by the log engine, storage backend, or trie.
    #[error("engine error: {0}")]
    EngineError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A reader destroyed itself due to a predicate failure or attach failure.
    #[error("reader failed: {0}")]
    ReaderFailed(String),

    /// Wrapped I/O fault.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped trie (sled) fault.
    #[error("trie error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapped codec (serde_json) fault.
    #[error("codec error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Error::EngineError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
