// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Strato CLI
//!
//! Command-line interface for the Strato function-execution core.

use clap::{Parser, Subcommand};

mod commands;

/// Strato - private serverless function runner
#[derive(Parser)]
#[command(name = "strato")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "strato.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new function
    Create {
        #[arg(long)]
        name: String,

        /// Runtime tag (nodejs20, nodejs18, python312, python311, dotnet8, dotnet7)
        #[arg(long)]
        runtime: String,

        /// Dotted entry point, e.g. `index.handler`
        #[arg(long)]
        handler: String,

        /// File holding the function source
        #[arg(long)]
        code_file: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        memory_mb: Option<u32>,

        #[arg(long)]
        timeout_sec: Option<u32>,

        /// Environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env")]
        env: Vec<String>,
    },

    /// Show one function
    Get { name: String },

    /// List registered functions
    List,

    /// Change fields of a function
    Update {
        name: String,

        #[arg(long)]
        runtime: Option<String>,

        #[arg(long)]
        handler: Option<String>,

        #[arg(long)]
        code_file: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        memory_mb: Option<u32>,

        #[arg(long)]
        timeout_sec: Option<u32>,

        /// Replace the environment with these KEY=VALUE pairs
        #[arg(long = "env")]
        env: Vec<String>,
    },

    /// Remove a function and its code
    Delete { name: String },

    /// Invoke a function
    Invoke {
        name: String,

        /// JSON event payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Use the local toolchain instead of a microVM
        #[arg(long)]
        local: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Create {
            name,
            runtime,
            handler,
            code_file,
            description,
            memory_mb,
            timeout_sec,
            env,
        } => {
            let args = commands::create::CreateArgs {
                name,
                runtime,
                handler,
                code_file,
                description,
                memory_mb,
                timeout_sec,
                env,
            };
            commands::create::execute(&cli.config, args).await
        }
        Commands::Get { name } => commands::get::execute(&cli.config, &name).await,
        Commands::List => commands::list::execute(&cli.config).await,
        Commands::Update {
            name,
            runtime,
            handler,
            code_file,
            description,
            memory_mb,
            timeout_sec,
            env,
        } => {
            let args = commands::update::UpdateArgs {
                runtime,
                handler,
                code_file,
                description,
                memory_mb,
                timeout_sec,
                env,
            };
            commands::update::execute(&cli.config, &name, args).await
        }
        Commands::Delete { name } => commands::delete::execute(&cli.config, &name).await,
        Commands::Invoke {
            name,
            payload,
            local,
        } => commands::invoke::execute(&cli.config, &name, &payload, local).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
    }
}
