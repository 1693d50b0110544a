//! `strato get` command - Show one function.

use super::{open_manager, print_function};

pub async fn execute(config_path: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let manager = open_manager(config_path).await?;
    let function = manager.get(name).await?;
    print_function(&function);
    Ok(())
}
