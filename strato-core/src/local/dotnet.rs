// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! .NET runtime family.
//!
//! User code is compiled together with a reflection-based runner, so each
//! invocation pays for a `dotnet build` before it runs.

use super::process::CommandLine;
use super::{HarnessFile, RuntimeStrategy};
use crate::config::LocalConfig;
use crate::types::{Runtime, RuntimeFamily};

const RUNNER: &str = include_str!("harness/Runner.cs");
const PROJECT: &str = include_str!("harness/Function.csproj");
const FRAMEWORK_PLACEHOLDER: &str = "@TARGET_FRAMEWORK@";

#[derive(Debug, Default)]
pub struct DotNetStrategy;

impl RuntimeStrategy for DotNetStrategy {
    fn family(&self) -> RuntimeFamily {
        RuntimeFamily::DotNet
    }

    fn source_file(&self) -> &'static str {
        "Function.cs"
    }

    fn harness_files(&self, runtime: Runtime) -> Vec<HarnessFile> {
        let framework = runtime.target_framework().unwrap_or("net8.0");
        vec![
            HarnessFile::new("Runner.cs", RUNNER),
            HarnessFile::new(
                "Function.csproj",
                PROJECT.replace(FRAMEWORK_PLACEHOLDER, framework),
            ),
        ]
    }

    fn build_command(&self, config: &LocalConfig) -> Option<CommandLine> {
        Some(
            toolchain(&config.dotnet_bin)
                .arg("build")
                .arg("Function.csproj")
                .arg("-c")
                .arg("Release")
                .arg("-o")
                .arg("bin")
                .arg("--nologo"),
        )
    }

    fn run_command(&self, config: &LocalConfig) -> CommandLine {
        toolchain(&config.dotnet_bin).arg("bin/Function.dll")
    }
}

fn toolchain(program: &str) -> CommandLine {
    CommandLine::new(program)
        .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1")
        .env("DOTNET_NOLOGO", "1")
        .env("DOTNET_SKIP_FIRST_TIME_EXPERIENCE", "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_targets_runtime_framework() {
        let files = DotNetStrategy.harness_files(Runtime::DotNet7);
        let project = files
            .iter()
            .find(|f| f.name == "Function.csproj")
            .unwrap();
        assert!(project.contents.contains("<TargetFramework>net7.0</TargetFramework>"));
        assert!(!project.contents.contains(FRAMEWORK_PLACEHOLDER));
    }

    #[test]
    fn test_build_then_run() {
        let config = LocalConfig::default();
        let build = DotNetStrategy.build_command(&config).unwrap();
        assert_eq!(build.args[0], "build");
        assert!(build.args.contains(&"Release".to_string()));

        let run = DotNetStrategy.run_command(&config);
        assert_eq!(run.args, vec!["bin/Function.dll"]);
        assert!(run.env.iter().any(|(k, _)| k == "DOTNET_CLI_TELEMETRY_OPTOUT"));
    }
}
