use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not open store at {path}: {message}")]
    StoreOpenFailed { path: PathBuf, message: String },

    #[error("store storage error: {0}")]
    StoreStorage(#[from] redb::StorageError),

    #[error("store transaction error: {0}")]
    StoreTransaction(#[from] redb::TransactionError),

    #[error("store table error: {0}")]
    StoreTable(#[from] redb::TableError),

    #[error("store commit error: {0}")]
    StoreCommit(#[from] redb::CommitError),

    #[error("indexing failed: {0}")]
    IndexFailed(String),

    #[error("indexing cancelled")]
    IndexCancelled,

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("parse failed: {0}")]
    ParseFailed(String),
}

impl Error {
    /// Stable string code for this error, suitable for message-passing
    /// boundaries where the enum itself cannot cross.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::StoreOpenFailed { .. } => "STORE_OPEN_FAILED",
            Error::StoreStorage(_)
            | Error::StoreTransaction(_)
            | Error::StoreTable(_)
            | Error::StoreCommit(_) => "STORE_ERROR",
            Error::IndexFailed(_) => "INDEX_FAILED",
            Error::IndexCancelled => "INDEX_CANCELLED",
            Error::SearchFailed(_) => "SEARCH_FAILED",
            Error::ParseFailed(_) => "PARSE_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::IndexCancelled.code(), "INDEX_CANCELLED");
        assert_eq!(Error::IndexFailed("x".into()).code(), "INDEX_FAILED");
        assert_eq!(Error::SearchFailed("x".into()).code(), "SEARCH_FAILED");
        assert_eq!(Error::ParseFailed("x".into()).code(), "PARSE_FAILED");
        assert_eq!(
            Error::StoreOpenFailed {
                path: PathBuf::from("/tmp/x"),
                message: "denied".into()
            }
            .code(),
            "STORE_OPEN_FAILED"
        );
    }
}
