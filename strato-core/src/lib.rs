//! Strato Core Library
//!
//! Function-execution core for the Strato serverless platform.
//! Provides the function catalog, lifecycle management, configuration
//! parsing, and the local and microVM isolation paths for invocations.

pub mod config;
pub mod error;
pub mod function;
pub mod local;
pub mod manager;
pub mod microvm;
pub mod saga;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, StorageBackend};
pub use error::{ErrorKind, InfraError, StratoError, StratoResult, ValidationError};
pub use function::{
    CreateFunctionRequest, Function, InvocationErrorKind, InvocationResponse,
    UpdateFunctionRequest,
};
pub use local::LocalExecutor;
pub use manager::FunctionManager;
pub use microvm::MicroVmOrchestrator;
pub use store::{FileStore, FunctionStore, SqlStore};
pub use types::{FunctionName, MemoryLimit, Runtime, RuntimeFamily, TimeoutSecs};
