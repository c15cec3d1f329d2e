use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backup recovery failed for {path}: {message}")]
    BackupRecoveryFailed { path: String, message: String },

    #[error("no storage strategy registered for '{0}'")]
    UnsupportedStorage(String),

    #[error("transaction already open")]
    TransactionAlreadyOpen,

    #[error("no transaction open")]
    NoTransactionOpen,

    #[error("relational storage error: {0}")]
    Relational(#[from] sqlx::Error),

    #[error("cloud-kv transport error: {0}")]
    CloudKv(String),

    #[error("internal store error: {0}")]
    Internal(String),
}
