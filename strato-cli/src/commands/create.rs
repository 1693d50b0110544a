// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `strato create` command - Register a function.

use strato_core::CreateFunctionRequest;

use super::{open_manager, parse_env, print_function, read_code};

pub struct CreateArgs {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub code_file: String,
    pub description: Option<String>,
    pub memory_mb: Option<u32>,
    pub timeout_sec: Option<u32>,
    pub env: Vec<String>,
}

pub async fn execute(config_path: &str, args: CreateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let request = CreateFunctionRequest {
        name: args.name,
        description: args.description,
        runtime: args.runtime,
        handler: args.handler,
        code: read_code(&args.code_file)?,
        memory_mb: args.memory_mb,
        timeout_sec: args.timeout_sec,
        environment: parse_env(&args.env)?,
    };

    let manager = open_manager(config_path).await?;
    let function = manager.create(request).await?;

    println!("✓ Function created");
    println!();
    print_function(&function);
    Ok(())
}
