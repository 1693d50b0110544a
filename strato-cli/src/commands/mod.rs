// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod create;
pub mod delete;
pub mod get;
pub mod invoke;
pub mod list;
pub mod update;
pub mod validate;

use std::collections::HashMap;

use strato_core::{ConfigLoader, Function, FunctionManager};
use thiserror::Error;

/// Argument errors detected before reaching the core.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid --env '{0}': expected KEY=VALUE")]
    InvalidEnv(String),

    #[error("invalid --payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("cannot read code file {path}: {source}")]
    CodeFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Load configuration (defaults if the file is absent) and open the manager.
pub async fn open_manager(config_path: &str) -> Result<FunctionManager, Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(config_path)?;
    Ok(FunctionManager::from_config(&config).await?)
}

pub fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>, CliError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CliError::InvalidEnv(pair.clone())),
        })
        .collect()
}

pub fn read_code(path: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::CodeFile {
        path: path.to_string(),
        source,
    })
}

pub fn print_function(function: &Function) {
    println!("Name:        {}", function.name);
    println!("ID:          {}", function.id);
    if let Some(description) = &function.description {
        println!("Description: {}", description);
    }
    println!("Runtime:     {}", function.runtime);
    println!("Handler:     {}", function.handler);
    println!("Memory:      {}", function.memory_mb);
    println!("Timeout:     {}", function.timeout_sec);
    println!("Code:        {}", function.code_path);
    println!("SHA-256:     {}", function.code_sha256);
    if !function.environment.is_empty() {
        let mut keys: Vec<&String> = function.environment.keys().collect();
        keys.sort();
        println!("Environment:");
        for key in keys {
            println!("  {}={}", key, function.environment[key]);
        }
    }
    println!("Created:     {}", function.created_at.to_rfc3339());
    println!("Updated:     {}", function.updated_at.to_rfc3339());
}
