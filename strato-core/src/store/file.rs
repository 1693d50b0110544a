// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! File-backed function store.
//!
//! The whole catalog lives in memory behind one read/write lock and every
//! mutation synchronously rewrites the affected files under:
//!
//! ```text
//! <root>/metadata/<name>.json
//! <root>/code/<name>/function.<ext>
//! ```
//!
//! Single-instance only: two processes sharing a directory will race.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FunctionStore;
use crate::error::{StratoError, StratoResult};
use crate::function::Function;

const METADATA_DIR: &str = "metadata";
const CODE_DIR: &str = "code";
const BLOB_STEM: &str = "function";

/// Catalog persisted as JSON documents and code files under a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    functions: RwLock<HashMap<String, Function>>,
}

impl FileStore {
    /// Open (or initialize) a store rooted at `root`, loading every
    /// metadata document into memory.
    pub async fn open(root: impl AsRef<Path>) -> StratoResult<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata_dir = root.join(METADATA_DIR);

        tokio::fs::create_dir_all(&metadata_dir)
            .await
            .map_err(|e| io_failure("creating", &metadata_dir, e))?;
        let code_dir = root.join(CODE_DIR);
        tokio::fs::create_dir_all(&code_dir)
            .await
            .map_err(|e| io_failure("creating", &code_dir, e))?;

        let mut functions = HashMap::new();
        let mut entries = tokio::fs::read_dir(&metadata_dir)
            .await
            .map_err(|e| io_failure("listing", &metadata_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("listing", &metadata_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match load_document(&path).await {
                Ok(function) => {
                    functions.insert(function.name.as_str().to_string(), function);
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "Skipping unreadable function document");
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            functions = functions.len(),
            "File store opened"
        );

        Ok(Self {
            root,
            functions: RwLock::new(functions),
        })
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{}.json", name))
    }

    fn code_dir(&self, name: &str) -> PathBuf {
        self.root.join(CODE_DIR).join(name)
    }

    fn blob_path(&self, function: &Function) -> PathBuf {
        self.code_dir(function.name.as_str()).join(format!(
            "{}.{}",
            BLOB_STEM,
            function.runtime.family().source_extension()
        ))
    }

    async fn write_document(&self, function: &Function) -> StratoResult<()> {
        let bytes = serde_json::to_vec_pretty(function)
            .map_err(|e| StratoError::storage(format!("encoding {}: {}", function.name, e)))?;
        write_atomic(&self.metadata_path(function.name.as_str()), &bytes).await
    }
}

#[async_trait]
impl FunctionStore for FileStore {
    async fn create(&self, function: &Function) -> StratoResult<()> {
        let mut functions = self.functions.write().await;
        let name = function.name.as_str();

        if functions.contains_key(name) {
            return Err(StratoError::AlreadyExists(name.to_string()));
        }

        self.write_document(function).await?;
        functions.insert(name.to_string(), function.clone());

        tracing::debug!(function = %name, "Function record written");
        Ok(())
    }

    async fn get(&self, name: &str) -> StratoResult<Function> {
        self.functions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StratoError::NotFound(name.to_string()))
    }

    async fn get_by_id(&self, id: &str) -> StratoResult<Function> {
        self.functions
            .read()
            .await
            .values()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| StratoError::NotFound(id.to_string()))
    }

    async fn update(&self, function: &Function) -> StratoResult<()> {
        let mut functions = self.functions.write().await;
        let name = function.name.as_str();

        if !functions.contains_key(name) {
            return Err(StratoError::NotFound(name.to_string()));
        }

        self.write_document(function).await?;
        functions.insert(name.to_string(), function.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> StratoResult<()> {
        let mut functions = self.functions.write().await;

        if !functions.contains_key(name) {
            return Err(StratoError::NotFound(name.to_string()));
        }

        let metadata = self.metadata_path(name);
        remove_if_present(tokio::fs::remove_file(&metadata).await)
            .map_err(|e| io_failure("removing", &metadata, e))?;
        functions.remove(name);

        // The record is gone; a leftover code directory is only litter.
        let code_dir = self.code_dir(name);
        if let Err(e) = remove_if_present(tokio::fs::remove_dir_all(&code_dir).await) {
            tracing::warn!(function = %name, error = %e, "Failed to remove code directory");
        }

        tracing::debug!(function = %name, "Function record removed");
        Ok(())
    }

    async fn list(&self) -> StratoResult<Vec<Function>> {
        let mut functions: Vec<Function> = self.functions.read().await.values().cloned().collect();
        functions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(functions)
    }

    async fn save_code(&self, name: &str, code: &[u8]) -> StratoResult<String> {
        // Held for writing so blob writes serialize with record mutations.
        let functions = self.functions.write().await;
        let function = functions
            .get(name)
            .ok_or_else(|| StratoError::NotFound(name.to_string()))?;

        let dir = self.code_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_failure("creating", &dir, e))?;

        let blob = self.blob_path(function);
        write_atomic(&blob, code).await?;
        remove_stale_blobs(&dir, &blob).await;

        Ok(blob.to_string_lossy().into_owned())
    }

    async fn get_code(&self, name: &str) -> StratoResult<Vec<u8>> {
        let functions = self.functions.read().await;
        let function = functions
            .get(name)
            .ok_or_else(|| StratoError::NotFound(name.to_string()))?;

        if function.code_path.is_empty() {
            return Err(StratoError::NotFound(format!("{} (code)", name)));
        }
        let path = PathBuf::from(&function.code_path);

        match tokio::fs::read(&path).await {
            Ok(code) => Ok(code),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StratoError::NotFound(format!("{} (code)", name)))
            }
            Err(e) => Err(io_failure("reading", &path, e)),
        }
    }
}

async fn load_document(path: &Path) -> Result<Function, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StratoResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_failure("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_failure("renaming", path, e))
}

/// Drop blobs left behind by a runtime change (different extension).
async fn remove_stale_blobs(dir: &Path, current: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_blob = path.file_stem().and_then(|s| s.to_str()) == Some(BLOB_STEM);
        if is_blob && path != current {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale code blob");
            }
        }
    }
}

fn remove_if_present(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn io_failure(action: &str, path: &Path, e: io::Error) -> StratoError {
    StratoError::storage(format!("{} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::CreateFunctionRequest;
    use chrono::Utc;

    fn sample(name: &str) -> Function {
        CreateFunctionRequest {
            name: name.to_string(),
            runtime: "nodejs20".to_string(),
            handler: "index.handler".to_string(),
            code: "exports.handler = async () => ({ ok: true });".to_string(),
            ..Default::default()
        }
        .into_function(Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(dir.path().join("metadata").is_dir());
        assert!(dir.path().join("code").is_dir());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let function = sample("hello");

        store.create(&function).await.unwrap();

        assert_eq!(store.get("hello").await.unwrap(), function);
        assert_eq!(store.get_by_id(&function.id).await.unwrap(), function);
        assert!(dir.path().join("metadata/hello.json").is_file());
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let original = sample("dup");
        store.create(&original).await.unwrap();

        let mut second = sample("dup");
        second.handler = "other.handler".to_string();
        let err = store.create(&second).await.unwrap_err();

        assert!(matches!(err, StratoError::AlreadyExists(_)));
        assert_eq!(store.get("dup").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert!(matches!(store.get("nope").await, Err(StratoError::NotFound(_))));
        assert!(matches!(
            store.update(&sample("nope")).await,
            Err(StratoError::NotFound(_))
        ));
        assert!(matches!(store.delete("nope").await, Err(StratoError::NotFound(_))));
        assert!(matches!(
            store.save_code("nope", b"x").await,
            Err(StratoError::NotFound(_))
        ));
        assert!(!dir.path().join("metadata/nope.json").exists());
    }

    #[tokio::test]
    async fn test_code_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let mut function = sample("blob");
        store.create(&function).await.unwrap();

        let code = b"module.exports.handler = () => 42;\n\x00\xff";
        let path = store.save_code("blob", code).await.unwrap();
        // Blob written but no pointer recorded yet.
        assert!(matches!(
            store.get_code("blob").await,
            Err(StratoError::NotFound(_))
        ));
        assert!(path.ends_with("code/blob/function.js"));

        function.code_path = path;
        store.update(&function).await.unwrap();
        assert_eq!(store.get_code("blob").await.unwrap(), code.to_vec());
    }

    #[tokio::test]
    async fn test_runtime_change_replaces_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let mut function = sample("poly");
        store.create(&function).await.unwrap();
        store.save_code("poly", b"js").await.unwrap();

        function.runtime = crate::types::Runtime::Python312;
        store.update(&function).await.unwrap();
        let path = store.save_code("poly", b"py").await.unwrap();

        assert!(path.ends_with("function.py"));
        assert!(!dir.path().join("code/poly/function.js").exists());
    }

    #[tokio::test]
    async fn test_reopen_restores_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let function = sample("persisted");
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.create(&function).await.unwrap();
        }
        std::fs::write(dir.path().join("metadata/broken.json"), b"{not json").unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], function);
    }

    #[tokio::test]
    async fn test_delete_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.create(&sample("gone")).await.unwrap();
        store.save_code("gone", b"code").await.unwrap();

        store.delete("gone").await.unwrap();

        assert!(!dir.path().join("metadata/gone.json").exists());
        assert!(!dir.path().join("code/gone").exists());
        assert!(matches!(
            store.get_code("gone").await,
            Err(StratoError::NotFound(_))
        ));
    }
}
