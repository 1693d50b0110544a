//! `strato delete` command - Remove a function and its code.

use super::open_manager;

pub async fn execute(config_path: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manager = open_manager(config_path).await?;
    manager.delete(name).await?;
    println!("✓ Function '{}' deleted", name);
    Ok(())
}
