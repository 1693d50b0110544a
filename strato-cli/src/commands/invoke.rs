// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `strato invoke` command - Run a function once.
//!
//! Prints the InvocationResponse as JSON; exits non-zero when it failed.

use serde_json::Value;

use super::{open_manager, CliError};

pub async fn execute(
    config_path: &str,
    name: &str,
    payload: &str,
    local: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let event: Value = serde_json::from_str(payload).map_err(CliError::from)?;

    let manager = open_manager(config_path).await?;
    let result = if local {
        manager.invoke_local(name, &event).await
    } else {
        manager.invoke(name, &event).await
    };
    manager.shutdown().await;
    let response = result?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
