// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `strato validate` command - Validate configuration file.

use strato_core::{ConfigLoader, StorageBackend};

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Storage:");
            match &config.storage.backend {
                StorageBackend::File { data_dir } => {
                    println!("  Backend:            file ({})", data_dir.display())
                }
                StorageBackend::Sql { database_url } => {
                    println!("  Backend:            sql ({})", database_url)
                }
            }
            println!();
            println!("Local Toolchains:");
            println!("  Node:               {}", config.local.node_bin);
            println!("  Python:             {}", config.local.python_bin);
            println!("  .NET:               {}", config.local.dotnet_bin);
            println!(
                "  Compile Grace:      {}s",
                config.local.compile_grace.as_secs()
            );
            println!();
            let microvm = &config.microvm;
            println!("MicroVM ({}):", if microvm.enabled { "enabled" } else { "disabled" });
            println!("  Hypervisor:         {}", microvm.firecracker_bin.display());
            println!("  Kernel:             {}", microvm.kernel_path.display());
            println!("  Root Filesystem:    {}", microvm.rootfs_path.display());
            println!("  vCPUs:              {}", microvm.vcpus);
            println!("  Subnet:             {}/16", microvm.subnet_base);
            println!(
                "  Boot Timeout:       {}ms",
                microvm.boot_timeout.as_millis()
            );
            println!(
                "  Warm Pool:          {} per runtime ({} MB, idle {}s, every {}s)",
                microvm.warm_pool.size,
                microvm.warm_pool.memory_mb,
                microvm.warm_pool.idle_timeout.as_secs(),
                microvm.warm_pool.maintenance_interval.as_secs()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
