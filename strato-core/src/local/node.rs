// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Node.js runtime family.

use super::process::CommandLine;
use super::{HarnessFile, RuntimeStrategy};
use crate::config::LocalConfig;
use crate::types::{Runtime, RuntimeFamily};

const HARNESS: &str = include_str!("harness/node.js");

/// Runs `function.js` through a generated `harness.js`.
#[derive(Debug, Default)]
pub struct NodeStrategy;

impl RuntimeStrategy for NodeStrategy {
    fn family(&self) -> RuntimeFamily {
        RuntimeFamily::Node
    }

    fn source_file(&self) -> &'static str {
        "function.js"
    }

    fn harness_files(&self, _runtime: Runtime) -> Vec<HarnessFile> {
        vec![HarnessFile::new("harness.js", HARNESS)]
    }

    fn run_command(&self, config: &LocalConfig) -> CommandLine {
        CommandLine::new(&config.node_bin).arg("harness.js")
    }
}
