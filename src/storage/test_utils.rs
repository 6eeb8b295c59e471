//! Test utilities for storage initialization

use crate::error::Result;
use crate::storage::sqlite::SqliteStore;
use std::sync::Arc;
use tempfile::TempDir;

/// Create a migrated store backed by a database file in a fresh temp dir
///
/// A file is used instead of `:memory:` because every pooled connection
/// would otherwise see its own empty database. The directory is removed
/// when the returned `TempDir` is dropped, so keep it alive with the store.
pub async fn create_test_store() -> Result<(Arc<SqliteStore>, TempDir)> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqliteStore::open(dir.path().join("retainless.db"))?);
    store.run_migrations().await?;
    Ok((store, dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PeriodStore;

    #[tokio::test]
    async fn test_database_removed_with_dir() {
        let (store, dir) = create_test_store().await.unwrap();
        let path = dir.path().join("retainless.db");
        assert!(path.exists());
        assert!(store.list_retained_periods("app").await.unwrap().is_empty());

        drop(store);
        drop(dir);
        assert!(!path.exists());
    }
}
