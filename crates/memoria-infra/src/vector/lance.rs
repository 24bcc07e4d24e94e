//! LanceDB connection management.
//!
//! `LanceConnection` wraps a `lancedb::Connection` rooted at a directory and
//! offers table lifecycle helpers. All users share one collection table;
//! isolation is enforced by the `user_scope` filter in [`super::memory`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_schema::Schema;

pub struct LanceConnection {
    db: lancedb::Connection,
    base_path: PathBuf,
}

impl LanceConnection {
    /// Open or create a LanceDB database at `base_path`, creating the
    /// directory if needed.
    pub async fn new(base_path: PathBuf) -> Result<Self, lancedb::Error> {
        std::fs::create_dir_all(&base_path).map_err(|e| lancedb::Error::CreateDir {
            path: base_path.display().to_string(),
            source: e,
        })?;

        let uri = base_path
            .to_str()
            .ok_or_else(|| lancedb::Error::InvalidInput {
                message: format!("Path contains invalid UTF-8: {}", base_path.display()),
            })?;

        let db = lancedb::connect(uri).execute().await?;

        Ok(Self { db, base_path })
    }

    /// Open the database named by a configured store URI.
    pub async fn open(uri: &str) -> Result<Self, lancedb::Error> {
        Self::new(resolve_store_path(uri)).await
    }

    /// Ensure a table exists, creating it empty with `schema` if not.
    pub async fn ensure_table(
        &self,
        table_name: &str,
        schema: Arc<Schema>,
    ) -> Result<lancedb::Table, lancedb::Error> {
        match self.db.open_table(table_name).execute().await {
            Ok(table) => Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => {
                self.db
                    .create_empty_table(table_name, schema)
                    .execute()
                    .await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn table_exists(&self, table_name: &str) -> bool {
        self.db.open_table(table_name).execute().await.is_ok()
    }

    /// Drop a table. Missing tables are not an error.
    pub async fn drop_table(&self, table_name: &str) -> Result<(), lancedb::Error> {
        match self.db.drop_table(table_name, &[]).await {
            Ok(()) => Ok(()),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn table_names(&self) -> Result<Vec<String>, lancedb::Error> {
        self.db.table_names().execute().await
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Default database directory: `~/.memoria/vector_store`.
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memoria")
        .join("vector_store")
}

/// Expand a leading `~/` against the home directory.
pub fn resolve_store_path(uri: &str) -> PathBuf {
    match uri.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None if uri.is_empty() => default_store_path(),
        None => PathBuf::from(uri),
    }
}
