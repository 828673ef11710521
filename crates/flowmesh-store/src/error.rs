//! Object store error types.

/// Errors produced by [`ObjectStore`](crate::ObjectStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure (`SQLite` or `PostgreSQL`).
    #[error("store backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("object store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Wrap any driver error as a backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("no such table: objects".into()),
        );
        let err = StoreError::backend(inner);
        let msg = err.to_string();
        assert!(msg.contains("store backend"), "got: {msg}");
        assert!(msg.contains("objects"), "got: {msg}");
    }

    #[test]
    fn lock_poisoned_displays() {
        assert_eq!(StoreError::LockPoisoned.to_string(), "object store lock poisoned");
    }
}
