// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Durable catalog of function metadata and code blobs.
//!
//! Two interchangeable backends implement [`FunctionStore`]:
//! - [`FileStore`]: in-memory index backed by one JSON document per function
//! - [`SqlStore`]: one row per function, duplicates rejected by a unique constraint

mod file;
mod sql;

pub use file::FileStore;
pub use sql::SqlStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageBackend;
use crate::error::StratoResult;
use crate::function::Function;

/// Contract shared by every catalog backend.
#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, function: &Function) -> StratoResult<()>;

    async fn get(&self, name: &str) -> StratoResult<Function>;

    async fn get_by_id(&self, id: &str) -> StratoResult<Function>;

    /// Replace an existing record, keyed by name.
    async fn update(&self, function: &Function) -> StratoResult<()>;

    /// Remove the record and its code blob.
    async fn delete(&self, name: &str) -> StratoResult<()>;

    async fn list(&self) -> StratoResult<Vec<Function>>;

    /// Persist the code blob and return an opaque pointer to it.
    async fn save_code(&self, name: &str, code: &[u8]) -> StratoResult<String>;

    /// Read back the persisted blob.
    async fn get_code(&self, name: &str) -> StratoResult<Vec<u8>>;
}

/// Open the backend selected by configuration.
pub async fn open(backend: &StorageBackend) -> StratoResult<Arc<dyn FunctionStore>> {
    match backend {
        StorageBackend::File { data_dir } => Ok(Arc::new(FileStore::open(data_dir).await?)),
        StorageBackend::Sql { database_url } => {
            Ok(Arc::new(SqlStore::connect(database_url).await?))
        }
    }
}
