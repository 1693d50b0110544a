//! Python runtime family.

use super::process::{self, CommandLine};
use super::{HarnessFile, RuntimeStrategy};
use crate::config::LocalConfig;
use crate::types::{Runtime, RuntimeFamily};

const HARNESS: &str = include_str!("harness/python.py");

/// Interpreter tried when the configured `python3` is not installed.
const FALLBACK_INTERPRETER: &str = "python";

/// Imports `function.py` from a generated `harness.py`.
#[derive(Debug, Default)]
pub struct PythonStrategy;

impl PythonStrategy {
    fn interpreter(configured: &str) -> &str {
        if configured == "python3"
            && !process::is_available(configured)
            && process::is_available(FALLBACK_INTERPRETER)
        {
            return FALLBACK_INTERPRETER;
        }
        configured
    }
}

impl RuntimeStrategy for PythonStrategy {
    fn family(&self) -> RuntimeFamily {
        RuntimeFamily::Python
    }

    fn source_file(&self) -> &'static str {
        "function.py"
    }

    fn harness_files(&self, _runtime: Runtime) -> Vec<HarnessFile> {
        vec![HarnessFile::new("harness.py", HARNESS)]
    }

    fn run_command(&self, config: &LocalConfig) -> CommandLine {
        CommandLine::new(Self::interpreter(&config.python_bin))
            .arg("-u")
            .arg("harness.py")
            .env("PYTHONDONTWRITEBYTECODE", "1")
    }
}
