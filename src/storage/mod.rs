//! Trait-based storage abstractions with in-memory and SQLite backends.

pub mod inmemory;
pub mod traits;

// Feature-gated storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export commonly used types and traits
pub use inmemory::MemoryOAuthStorage;
pub use traits::*;

use crate::errors::StorageError;
use std::sync::Arc;

/// Storage backend configuration and factory
#[derive(Clone, Debug)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "sqlite")]
    Sqlite(String), // Connection string/path
}

/// Create a storage backend based on configuration
pub async fn create_storage_backend(
    backend: StorageBackend,
) -> std::result::Result<Arc<dyn OAuthStorage>, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryOAuthStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite(database_url) => {
            let options = database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!("Invalid SQLite URL: {}", e))
                })?
                .create_if_missing(true);
            let pool = sqlx::SqlitePool::connect_with(options)
                .await
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!("SQLite connection failed: {}", e))
                })?;

            let storage = sqlite::SqliteOAuthStorage::new(pool);

            // Run migrations
            storage.migrate().await?;

            Ok(Arc::new(storage))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    database_url: Option<&str>,
) -> std::result::Result<StorageBackend, StorageError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let url = database_url.unwrap_or("sqlite:toolgate.db");
            Ok(StorageBackend::Sqlite(url.to_string()))
        }
        _ => {
            let _ = database_url;
            Err(StorageError::InvalidData(format!(
                "Unknown storage backend: {}",
                backend_name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_storage_backend() {
        assert!(matches!(
            parse_storage_backend("memory", None),
            Ok(StorageBackend::Memory)
        ));
        assert!(parse_storage_backend("redis", None).is_err());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_parse_sqlite_default_url() {
        match parse_storage_backend("sqlite", None) {
            Ok(StorageBackend::Sqlite(url)) => assert_eq!(url, "sqlite:toolgate.db"),
            other => panic!("unexpected backend: {:?}", other),
        }
    }
}
