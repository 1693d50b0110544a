// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `strato list` command - List registered functions.

use super::open_manager;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manager = open_manager(config_path).await?;
    let functions = manager.list().await?;

    if functions.is_empty() {
        println!("No functions registered.");
        return Ok(());
    }

    println!("╔══════════════════════════╦════════════╦══════════╦═════════╦═══════════════════════════╗");
    println!("║ Name                     ║ Runtime    ║ Memory   ║ Timeout ║ Handler                   ║");
    println!("╠══════════════════════════╬════════════╬══════════╬═════════╬═══════════════════════════╣");

    for function in &functions {
        println!(
            "║ {:<24} ║ {:<10} ║ {:<8} ║ {:<7} ║ {:<25} ║",
            truncate(function.name.as_str(), 24),
            function.runtime.to_string(),
            function.memory_mb.to_string(),
            function.timeout_sec.to_string(),
            truncate(&function.handler, 25)
        );
    }

    println!("╚══════════════════════════╩════════════╩══════════╩═════════╩═══════════════════════════╝");
    println!();
    println!("Total: {} function(s)", functions.len());

    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}
