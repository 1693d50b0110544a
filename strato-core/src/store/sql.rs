// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Relational function store (sqlx, SQLite driver).
//!
//! One row per function. The `name` unique constraint is the only duplicate
//! check, so several server instances may share one database. The record's
//! `code` column mirrors the source as last written through `create`/`update`;
//! the blob written by `save_code` lives in `code_blob` and is what
//! `get_code` returns.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

use super::FunctionStore;
use crate::error::{InfraError, StratoError, StratoResult};
use crate::function::Function;
use crate::types::{FunctionName, MemoryLimit, Runtime, TimeoutSecs};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS functions (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    runtime     TEXT NOT NULL,
    handler     TEXT NOT NULL,
    code        TEXT NOT NULL,
    code_blob   BLOB,
    code_path   TEXT NOT NULL DEFAULT '',
    code_sha256 TEXT NOT NULL DEFAULT '',
    memory_mb   INTEGER NOT NULL,
    timeout_sec INTEGER NOT NULL,
    environment TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
)
"#;

const COLUMNS: &str = "id, name, description, runtime, handler, code, code_path, code_sha256, \
                       memory_mb, timeout_sec, environment, created_at, updated_at";

/// Catalog stored in a relational database.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: Pool<Sqlite>,
}

impl SqlStore {
    /// Connect to `url`, creating the database file and schema if needed.
    pub async fn connect(url: &str) -> StratoResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_failure)?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the life of the pool.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(db_failure)?;

        tracing::info!(url = %url, "SQL store connected");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: Pool<Sqlite>) -> StratoResult<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(db_failure)?;
        Ok(Self { pool })
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> StratoResult<Function> {
        let sql = format!("SELECT {} FROM functions WHERE {} = ?", COLUMNS, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_failure)?
            .ok_or_else(|| StratoError::NotFound(value.to_string()))?;
        row_to_function(&row)
    }
}

#[async_trait]
impl FunctionStore for SqlStore {
    async fn create(&self, function: &Function) -> StratoResult<()> {
        let environment = encode_environment(&function.environment)?;
        let sql = format!(
            "INSERT INTO functions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        );

        let result = sqlx::query(&sql)
            .bind(&function.id)
            .bind(function.name.as_str())
            .bind(function.description.as_deref())
            .bind(function.runtime.tag())
            .bind(&function.handler)
            .bind(&function.code)
            .bind(&function.code_path)
            .bind(&function.code_sha256)
            .bind(i64::from(function.memory_mb.megabytes()))
            .bind(i64::from(function.timeout_sec.seconds()))
            .bind(environment)
            .bind(function.created_at)
            .bind(function.updated_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StratoError::AlreadyExists(function.name.to_string()))
            }
            Err(e) => Err(db_failure(e)),
        }
    }

    async fn get(&self, name: &str) -> StratoResult<Function> {
        self.fetch_one_where("name", name).await
    }

    async fn get_by_id(&self, id: &str) -> StratoResult<Function> {
        self.fetch_one_where("id", id).await
    }

    async fn update(&self, function: &Function) -> StratoResult<()> {
        let environment = encode_environment(&function.environment)?;

        let result = sqlx::query(
            "UPDATE functions SET description = ?, runtime = ?, handler = ?, code = ?, \
             code_path = ?, code_sha256 = ?, memory_mb = ?, timeout_sec = ?, \
             environment = ?, updated_at = ? WHERE name = ?",
        )
        .bind(function.description.as_deref())
        .bind(function.runtime.tag())
        .bind(&function.handler)
        .bind(&function.code)
        .bind(&function.code_path)
        .bind(&function.code_sha256)
        .bind(i64::from(function.memory_mb.megabytes()))
        .bind(i64::from(function.timeout_sec.seconds()))
        .bind(environment)
        .bind(function.updated_at)
        .bind(function.name.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_failure)?;

        if result.rows_affected() == 0 {
            return Err(StratoError::NotFound(function.name.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> StratoResult<()> {
        let result = sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_failure)?;

        if result.rows_affected() == 0 {
            return Err(StratoError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> StratoResult<Vec<Function>> {
        let sql = format!(
            "SELECT {} FROM functions ORDER BY created_at DESC, rowid DESC",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_failure)?;

        rows.iter().map(row_to_function).collect()
    }

    async fn save_code(&self, name: &str, code: &[u8]) -> StratoResult<String> {
        let result = sqlx::query("UPDATE functions SET code_blob = ? WHERE name = ?")
            .bind(code)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_failure)?;

        if result.rows_affected() == 0 {
            return Err(StratoError::NotFound(name.to_string()));
        }
        Ok(format!("db://functions/{}/code", name))
    }

    async fn get_code(&self, name: &str) -> StratoResult<Vec<u8>> {
        let row = sqlx::query("SELECT code_blob FROM functions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_failure)?
            .ok_or_else(|| StratoError::NotFound(name.to_string()))?;

        let blob: Option<Vec<u8>> = row.try_get("code_blob").map_err(db_failure)?;
        blob.ok_or_else(|| StratoError::NotFound(format!("{} (code)", name)))
    }
}

fn row_to_function(row: &SqliteRow) -> StratoResult<Function> {
    let name: String = row.try_get("name").map_err(db_failure)?;
    let runtime: String = row.try_get("runtime").map_err(db_failure)?;
    let memory_mb: i64 = row.try_get("memory_mb").map_err(db_failure)?;
    let timeout_sec: i64 = row.try_get("timeout_sec").map_err(db_failure)?;
    let environment: String = row.try_get("environment").map_err(db_failure)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_failure)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(db_failure)?;

    let corrupt = |field: &str, detail: String| {
        StratoError::storage(format!("corrupt row for {}: {} {}", name, field, detail))
    };

    let memory_mb = u32::try_from(memory_mb)
        .ok()
        .and_then(|mb| MemoryLimit::from_mb(mb).ok())
        .ok_or_else(|| corrupt("memory_mb", memory_mb.to_string()))?;
    let timeout_sec = u32::try_from(timeout_sec)
        .ok()
        .and_then(|secs| TimeoutSecs::new(secs).ok())
        .ok_or_else(|| corrupt("timeout_sec", timeout_sec.to_string()))?;
    let runtime: Runtime = runtime
        .parse()
        .map_err(|e: crate::error::ValidationError| corrupt("runtime", e.to_string()))?;
    let environment: HashMap<String, String> = serde_json::from_str(&environment)
        .map_err(|e| corrupt("environment", e.to_string()))?;

    Ok(Function {
        id: row.try_get("id").map_err(db_failure)?,
        name: FunctionName::new(name.clone()).map_err(|e| corrupt("name", e.to_string()))?,
        description: row.try_get("description").map_err(db_failure)?,
        runtime,
        handler: row.try_get("handler").map_err(db_failure)?,
        code: row.try_get("code").map_err(db_failure)?,
        code_path: row.try_get("code_path").map_err(db_failure)?,
        code_sha256: row.try_get("code_sha256").map_err(db_failure)?,
        memory_mb,
        timeout_sec,
        environment,
        created_at,
        updated_at,
    })
}

fn encode_environment(environment: &HashMap<String, String>) -> StratoResult<String> {
    serde_json::to_string(environment).map_err(|e| InfraError::Serialization(e).into())
}

fn db_failure(e: sqlx::Error) -> StratoError {
    InfraError::Database(e).into()
}
