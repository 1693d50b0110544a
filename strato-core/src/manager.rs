// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Function lifecycle and invocation routing.
//!
//! Create/Update/Delete/List talk only to the [`FunctionStore`]. Invoke and
//! InvokeLocal read the function and its code once, then hand off to the
//! microVM or local isolation path and always produce an
//! [`InvocationResponse`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::config::Config;
use crate::error::{InfraError, StratoError, StratoResult};
use crate::function::{
    code_digest, CreateFunctionRequest, ExecutionOutcome, Function, InvocationResponse,
    UpdateFunctionRequest,
};
use crate::local::LocalExecutor;
use crate::microvm::MicroVmOrchestrator;
use crate::saga::{Saga, SagaStep};
use crate::store::{self, FunctionStore};

/// Which isolation path served an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IsolationPath {
    MicroVm,
    Local,
}

impl IsolationPath {
    fn name(self) -> &'static str {
        match self {
            Self::MicroVm => "microvm",
            Self::Local => "local",
        }
    }
}

/// Owns the function lifecycle against a [`FunctionStore`].
pub struct FunctionManager {
    store: Arc<dyn FunctionStore>,
    local: LocalExecutor,
    microvm: Option<Arc<MicroVmOrchestrator>>,
}

impl FunctionManager {
    pub fn new(
        store: Arc<dyn FunctionStore>,
        local: LocalExecutor,
        microvm: Option<Arc<MicroVmOrchestrator>>,
    ) -> Self {
        Self {
            store,
            local,
            microvm,
        }
    }

    /// Open the configured store and build both isolation paths.
    pub async fn from_config(config: &Config) -> StratoResult<Self> {
        let store = store::open(&config.storage.backend).await?;
        let local = LocalExecutor::new(config.local.clone());
        let microvm = config.microvm.enabled.then(|| {
            let orchestrator = MicroVmOrchestrator::with_ip_taps(config.microvm.clone());
            orchestrator.start_maintenance(config.microvm.warm_pool.maintenance_interval);
            Arc::new(orchestrator)
        });
        Ok(Self::new(store, local, microvm))
    }

    pub fn store(&self) -> &Arc<dyn FunctionStore> {
        &self.store
    }

    pub fn local(&self) -> &LocalExecutor {
        &self.local
    }

    pub fn microvm(&self) -> Option<&Arc<MicroVmOrchestrator>> {
        self.microvm.as_ref()
    }

    /// Validate, persist metadata, persist code, then record the pointer.
    ///
    /// If any persistence step fails the metadata record is removed again.
    pub async fn create(&self, request: CreateFunctionRequest) -> StratoResult<Function> {
        let function = request.into_function(Utc::now())?;

        match self.store.get(function.name.as_str()).await {
            Ok(_) => return Err(StratoError::AlreadyExists(function.name.to_string())),
            Err(StratoError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let saga = Saga::new("create_function")
            .step(InsertRecord(self.store.clone()))
            .step(SaveCode(self.store.clone()))
            .step(RecordPointer(self.store.clone()));

        let mut ctx = FunctionContext {
            function,
            original: None,
            code_path: None,
        };
        saga.run(&mut ctx).await?;

        tracing::info!(
            function = %ctx.function.name,
            runtime = %ctx.function.runtime,
            code_path = %ctx.function.code_path,
            "Function created"
        );
        Ok(ctx.function)
    }

    pub async fn get(&self, name: &str) -> StratoResult<Function> {
        self.store.get(name).await
    }

    pub async fn get_by_id(&self, id: &str) -> StratoResult<Function> {
        self.store.get_by_id(id).await
    }

    pub async fn list(&self) -> StratoResult<Vec<Function>> {
        self.store.list().await
    }

    /// Merge the provided fields; new code is re-persisted.
    ///
    /// On failure the stored record and code are put back as they were.
    pub async fn update(&self, name: &str, request: UpdateFunctionRequest) -> StratoResult<Function> {
        let original = self.store.get(name).await?;
        let mut function = original.clone();
        let new_code = request.apply_to(&mut function, Utc::now())?;

        // Runtime changes must land before the blob so it gets the right extension.
        let mut saga = Saga::new("update_function").step(WriteRecord(self.store.clone()));
        if new_code.is_some() {
            saga = saga
                .step(SaveCode(self.store.clone()))
                .step(RecordPointer(self.store.clone()));
        }

        let mut ctx = FunctionContext {
            function,
            original: Some(original),
            code_path: None,
        };
        saga.run(&mut ctx).await?;

        tracing::info!(function = %ctx.function.name, "Function updated");
        Ok(ctx.function)
    }

    pub async fn delete(&self, name: &str) -> StratoResult<()> {
        self.store.delete(name).await?;
        tracing::info!(function = %name, "Function deleted");
        Ok(())
    }

    /// Run `name` inside a microVM.
    ///
    /// Only a missing function is returned as `Err`; every other failure
    /// becomes a response with the matching status.
    pub async fn invoke(&self, name: &str, event: &Value) -> StratoResult<InvocationResponse> {
        self.dispatch(name, event, IsolationPath::MicroVm).await
    }

    /// Run `name` with the host's local toolchain.
    pub async fn invoke_local(&self, name: &str, event: &Value) -> StratoResult<InvocationResponse> {
        self.dispatch(name, event, IsolationPath::Local).await
    }

    /// Tear down any microVM state.
    pub async fn shutdown(&self) {
        if let Some(microvm) = &self.microvm {
            microvm.shutdown().await;
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        event: &Value,
        path: IsolationPath,
    ) -> StratoResult<InvocationResponse> {
        let started = Instant::now();

        let function = match self.store.get(name).await {
            Ok(function) => function,
            Err(e @ StratoError::NotFound(_)) => return Err(e),
            Err(e) => return Ok(InvocationResponse::from_error(&e, None, started.elapsed())),
        };
        let code = match self.store.get_code(name).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(function = %name, error = %e, "Failed to load function code");
                return Ok(InvocationResponse::from_error(&e, None, started.elapsed()));
            }
        };

        let outcome = match path {
            IsolationPath::Local => self.local.execute(&function, &code, event).await,
            IsolationPath::MicroVm => match &self.microvm {
                Some(microvm) => microvm.execute(&function, &code, event).await,
                None => ExecutionOutcome::failed(
                    InfraError::Hypervisor {
                        stage: "dispatch",
                        reason: "microVM isolation is disabled".to_string(),
                    }
                    .into(),
                    None,
                ),
            },
        };

        let response = InvocationResponse::from_outcome(outcome, started.elapsed());
        if response.is_success() {
            tracing::info!(
                function = %name,
                path = path.name(),
                duration_ms = response.duration_ms,
                "Invocation succeeded"
            );
        } else {
            tracing::error!(
                function = %name,
                path = path.name(),
                status = response.status_code,
                duration_ms = response.duration_ms,
                error = response.error.as_deref().unwrap_or_default(),
                "Invocation failed"
            );
        }
        Ok(response)
    }
}

// ============================================================================
// Create and update sagas
// ============================================================================

struct FunctionContext {
    /// Record being written; its `code` is the blob to persist.
    function: Function,
    /// Stored record before an update; `None` on create.
    original: Option<Function>,
    code_path: Option<String>,
}

struct InsertRecord(Arc<dyn FunctionStore>);

#[async_trait]
impl SagaStep<FunctionContext> for InsertRecord {
    fn name(&self) -> &'static str {
        "insert_record"
    }

    async fn execute(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        self.0.create(&ctx.function).await
    }

    async fn compensate(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        self.0.delete(ctx.function.name.as_str()).await
    }
}

struct WriteRecord(Arc<dyn FunctionStore>);

#[async_trait]
impl SagaStep<FunctionContext> for WriteRecord {
    fn name(&self) -> &'static str {
        "write_record"
    }

    async fn execute(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        self.0.update(&ctx.function).await
    }

    async fn compensate(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        match &ctx.original {
            Some(original) => self.0.update(original).await,
            None => Ok(()),
        }
    }
}

struct SaveCode(Arc<dyn FunctionStore>);

#[async_trait]
impl SagaStep<FunctionContext> for SaveCode {
    fn name(&self) -> &'static str {
        "save_code"
    }

    async fn execute(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        let path = self
            .0
            .save_code(ctx.function.name.as_str(), ctx.function.code.as_bytes())
            .await?;
        ctx.code_path = Some(path);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        let Some(original) = &ctx.original else {
            return Ok(());
        };
        // The old record goes back first so the blob lands where its pointer says.
        self.0.update(original).await?;
        self.0
            .save_code(original.name.as_str(), original.code.as_bytes())
            .await
            .map(|_| ())
    }
}

struct RecordPointer(Arc<dyn FunctionStore>);

#[async_trait]
impl SagaStep<FunctionContext> for RecordPointer {
    fn name(&self) -> &'static str {
        "record_pointer"
    }

    async fn execute(&self, ctx: &mut FunctionContext) -> StratoResult<()> {
        let path = ctx
            .code_path
            .clone()
            .ok_or_else(|| StratoError::storage("code blob was not persisted"))?;

        let mut patched = ctx.function.clone();
        patched.code_path = path;
        patched.code_sha256 = code_digest(patched.code.as_bytes());
        self.0.update(&patched).await?;

        ctx.function = patched;
        Ok(())
    }
}
