// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `strato update` command - Change fields of a function.
//!
//! Only flags that are given are sent; everything else keeps its value.

use strato_core::UpdateFunctionRequest;

use super::{open_manager, parse_env, print_function, read_code};

pub struct UpdateArgs {
    pub runtime: Option<String>,
    pub handler: Option<String>,
    pub code_file: Option<String>,
    pub description: Option<String>,
    pub memory_mb: Option<u32>,
    pub timeout_sec: Option<u32>,
    pub env: Vec<String>,
}

pub async fn execute(
    config_path: &str,
    name: &str,
    args: UpdateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let code = args.code_file.as_deref().map(read_code).transpose()?;
    let environment = if args.env.is_empty() {
        None
    } else {
        Some(parse_env(&args.env)?)
    };

    let request = UpdateFunctionRequest {
        description: args.description,
        runtime: args.runtime,
        handler: args.handler,
        code,
        memory_mb: args.memory_mb,
        timeout_sec: args.timeout_sec,
        environment,
    };

    let manager = open_manager(config_path).await?;
    let function = manager.update(name, request).await?;

    println!("✓ Function updated");
    println!();
    print_function(&function);
    Ok(())
}
