// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Local runtime executor (development isolation path).
//!
//! Runs a function as a subprocess of the host's own toolchain:
//! - Fresh temporary working directory per invocation, removed on every exit path
//! - User code + static harness + `invocation.json` written into it
//! - Optional build step, then the run step, both bound to one deadline
//! - Combined output parsed into an [`ExecutionOutcome`]

mod dotnet;
mod node;
pub mod output;
pub mod process;
mod python;

use std::borrow::Cow;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use self::dotnet::DotNetStrategy;
use self::node::NodeStrategy;
use self::process::CommandLine;
use self::python::PythonStrategy;
use crate::config::LocalConfig;
use crate::error::{InfraError, StratoError, StratoResult};
use crate::function::{ExecutionOutcome, Function};
use crate::types::{Runtime, RuntimeFamily};

/// Name of the per-invocation data file read by every harness.
const INVOCATION_FILE: &str = "invocation.json";

/// A file written next to the user code.
#[derive(Debug, Clone)]
pub struct HarnessFile {
    pub name: &'static str,
    pub contents: Cow<'static, str>,
}

impl HarnessFile {
    pub fn new(name: &'static str, contents: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name,
            contents: contents.into(),
        }
    }
}

/// How one language family lays out and runs an invocation.
pub trait RuntimeStrategy: Send + Sync {
    fn family(&self) -> RuntimeFamily;

    /// File name the user code is written to.
    fn source_file(&self) -> &'static str;

    /// Static harness files for `runtime`.
    fn harness_files(&self, runtime: Runtime) -> Vec<HarnessFile>;

    /// Compile step, for build-based families.
    fn build_command(&self, _config: &LocalConfig) -> Option<CommandLine> {
        None
    }

    fn run_command(&self, config: &LocalConfig) -> CommandLine;
}

/// Executes functions with locally installed toolchains.
pub struct LocalExecutor {
    config: LocalConfig,
    node: NodeStrategy,
    python: PythonStrategy,
    dotnet: DotNetStrategy,
}

impl LocalExecutor {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            node: NodeStrategy,
            python: PythonStrategy,
            dotnet: DotNetStrategy,
        }
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// The strategy serving `family`.
    pub fn strategy_for(&self, family: RuntimeFamily) -> &dyn RuntimeStrategy {
        match family {
            RuntimeFamily::Node => &self.node,
            RuntimeFamily::Python => &self.python,
            RuntimeFamily::DotNet => &self.dotnet,
        }
    }

    /// Total time budget for one invocation of `function`.
    pub fn deadline_for(&self, function: &Function) -> Duration {
        let strategy = self.strategy_for(function.runtime.family());
        let base = function.timeout_sec.as_duration();
        if strategy.build_command(&self.config).is_some() {
            base + self.config.compile_grace
        } else {
            base
        }
    }

    /// Run `code` as `function` against `event`.
    ///
    /// Never fails outright: every failure is folded into the outcome.
    pub async fn execute(&self, function: &Function, code: &[u8], event: &Value) -> ExecutionOutcome {
        let strategy = self.strategy_for(function.runtime.family());
        let deadline = self.deadline_for(function);

        let workdir = match tempfile::Builder::new().prefix("strato-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionOutcome::failed(
                    StratoError::storage(format!("creating working directory: {}", e)),
                    None,
                )
            }
        };

        if let Err(err) = self.prepare(strategy, workdir.path(), function, code, event).await {
            return ExecutionOutcome::failed(err, None);
        }

        tracing::debug!(
            function = %function.name,
            runtime = %function.runtime,
            workdir = %workdir.path().display(),
            deadline_ms = deadline.as_millis() as u64,
            "Running function locally"
        );

        let outcome = self
            .run_steps(strategy, workdir.path(), function, deadline)
            .await
            .unwrap_or_else(|err| ExecutionOutcome::failed(err, None));

        // Dropping `workdir` removes it; report rather than ignore a failure.
        let path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove working directory");
        }

        outcome
    }

    async fn prepare(
        &self,
        strategy: &dyn RuntimeStrategy,
        dir: &Path,
        function: &Function,
        code: &[u8],
        event: &Value,
    ) -> StratoResult<()> {
        write_file(&dir.join(strategy.source_file()), code).await?;

        for file in strategy.harness_files(function.runtime) {
            write_file(&dir.join(file.name), file.contents.as_bytes()).await?;
        }

        let invocation = json!({
            "event": event,
            "handler": function.handler,
            "function_name": function.name.as_str(),
            "memory_mb": function.memory_mb.megabytes(),
            "timeout_ms": u64::from(function.timeout_sec.seconds()) * 1000,
        });
        let bytes = serde_json::to_vec(&invocation).map_err(InfraError::Serialization)?;
        write_file(&dir.join(INVOCATION_FILE), &bytes).await
    }

    async fn run_steps(
        &self,
        strategy: &dyn RuntimeStrategy,
        dir: &Path,
        function: &Function,
        deadline: Duration,
    ) -> StratoResult<ExecutionOutcome> {
        let started = Instant::now();
        let timeout = function.timeout_sec.as_duration();

        if let Some(build) = strategy.build_command(&self.config) {
            let built = process::run(&build, dir, &function.environment, deadline).await?;
            if built.timed_out {
                return Ok(ExecutionOutcome::failed(
                    StratoError::Timeout { after: deadline },
                    Some(built.output),
                ));
            }
            if !built.success() {
                return Ok(ExecutionOutcome::failed(
                    StratoError::Execution {
                        message: "build failed".to_string(),
                        stack: None,
                    },
                    Some(built.output),
                ));
            }
            tracing::debug!(
                function = %function.name,
                elapsed_ms = built.elapsed.as_millis() as u64,
                "Build step finished"
            );
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ok(ExecutionOutcome::failed(
                StratoError::Timeout { after: deadline },
                None,
            ));
        }

        let run = strategy.run_command(&self.config);
        let finished = process::run(&run, dir, &function.environment, remaining).await?;
        Ok(output::classify(finished, timeout))
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> StratoResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StratoError::storage(format!("writing {}: {}", path.display(), e)))
}
