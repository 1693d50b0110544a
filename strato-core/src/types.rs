// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a function name.
const MAX_NAME_LEN: usize = 64;
/// Maximum allowed memory: 10 GB
const MAX_MEMORY_MB: u32 = 10 * 1024;
/// Maximum allowed timeout: 15 minutes
const MAX_TIMEOUT_SEC: u32 = 900;

/// Memory applied when a creation request leaves it unset.
pub const DEFAULT_MEMORY_MB: u32 = 128;
/// Timeout applied when a creation request leaves it unset.
pub const DEFAULT_TIMEOUT_SEC: u32 = 30;

/// Validated function name.
/// Must start with an alphanumeric character, contain only alphanumerics,
/// hyphens and underscores, max 64 chars. Doubles as a safe file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionName(String);

impl FunctionName {
    /// Create a new FunctionName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }

        if name.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidField {
                field: "name",
                reason: format!("name too long: {} chars (max {})", name.len(), MAX_NAME_LEN),
                value: name,
            });
        }

        let mut chars = name.chars();
        let starts_alnum = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !starts_alnum || !rest_valid {
            return Err(ValidationError::InvalidField {
                field: "name",
                value: name,
                reason: "must start with a letter or digit and contain only letters, digits, hyphens and underscores".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FunctionName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FunctionName> for String {
    fn from(name: FunctionName) -> Self {
        name.0
    }
}

/// Supported runtimes. A closed set: adding one means adding a variant here
/// and, if it is a new language, a `RuntimeFamily` plus its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Runtime {
    NodeJs20,
    NodeJs18,
    Python312,
    Python311,
    DotNet8,
    DotNet7,
}

impl Runtime {
    pub const ALL: [Runtime; 6] = [
        Self::NodeJs20,
        Self::NodeJs18,
        Self::Python312,
        Self::Python311,
        Self::DotNet8,
        Self::DotNet7,
    ];

    /// Wire tag of the runtime.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::NodeJs20 => "nodejs20",
            Self::NodeJs18 => "nodejs18",
            Self::Python312 => "python312",
            Self::Python311 => "python311",
            Self::DotNet8 => "dotnet8",
            Self::DotNet7 => "dotnet7",
        }
    }

    /// Language family used to pick an execution strategy.
    pub const fn family(&self) -> RuntimeFamily {
        match self {
            Self::NodeJs20 | Self::NodeJs18 => RuntimeFamily::Node,
            Self::Python312 | Self::Python311 => RuntimeFamily::Python,
            Self::DotNet8 | Self::DotNet7 => RuntimeFamily::DotNet,
        }
    }

    /// Target framework moniker for build-based runtimes.
    pub const fn target_framework(&self) -> Option<&'static str> {
        match self {
            Self::DotNet8 => Some("net8.0"),
            Self::DotNet7 => Some("net7.0"),
            _ => None,
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Runtime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::MissingField { field: "runtime" });
        }
        Self::ALL
            .into_iter()
            .find(|r| r.tag() == s)
            .ok_or_else(|| ValidationError::InvalidField {
                field: "runtime",
                value: s.to_string(),
                reason: "unsupported runtime".to_string(),
            })
    }
}

impl TryFrom<String> for Runtime {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Runtime> for String {
    fn from(runtime: Runtime) -> Self {
        runtime.tag().to_string()
    }
}

/// Language family shared by several runtime versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFamily {
    Node,
    Python,
    DotNet,
}

impl RuntimeFamily {
    /// Extension used for persisted source blobs.
    pub const fn source_extension(&self) -> &'static str {
        match self {
            Self::Node => "js",
            Self::Python => "py",
            Self::DotNet => "cs",
        }
    }
}

/// Validated memory limit in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MemoryLimit(u32);

impl MemoryLimit {
    /// Create a new MemoryLimit with bounds validation.
    pub fn from_mb(mb: u32) -> Result<Self, ValidationError> {
        if !(1..=MAX_MEMORY_MB).contains(&mb) {
            return Err(ValidationError::InvalidField {
                field: "memory_mb",
                value: mb.to_string(),
                reason: format!("must be between 1 and {}", MAX_MEMORY_MB),
            });
        }
        Ok(Self(mb))
    }

    /// Resolve an optional request value, treating unset and zero as the default.
    pub fn or_default(mb: Option<u32>) -> Result<Self, ValidationError> {
        match mb {
            None | Some(0) => Ok(Self(DEFAULT_MEMORY_MB)),
            Some(mb) => Self::from_mb(mb),
        }
    }

    /// Get the memory limit in megabytes.
    pub fn megabytes(&self) -> u32 {
        self.0
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self(DEFAULT_MEMORY_MB)
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MB", self.0)
    }
}

impl TryFrom<u32> for MemoryLimit {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_mb(value)
    }
}

impl From<MemoryLimit> for u32 {
    fn from(limit: MemoryLimit) -> Self {
        limit.0
    }
}

/// Validated invocation timeout in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct TimeoutSecs(u32);

impl TimeoutSecs {
    pub fn new(secs: u32) -> Result<Self, ValidationError> {
        if !(1..=MAX_TIMEOUT_SEC).contains(&secs) {
            return Err(ValidationError::InvalidField {
                field: "timeout_sec",
                value: secs.to_string(),
                reason: format!("must be between 1 and {} seconds", MAX_TIMEOUT_SEC),
            });
        }
        Ok(Self(secs))
    }

    /// Resolve an optional request value, treating unset and zero as the default.
    pub fn or_default(secs: Option<u32>) -> Result<Self, ValidationError> {
        match secs {
            None | Some(0) => Ok(Self(DEFAULT_TIMEOUT_SEC)),
            Some(secs) => Self::new(secs),
        }
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0))
    }
}

impl Default for TimeoutSecs {
    fn default() -> Self {
        Self(DEFAULT_TIMEOUT_SEC)
    }
}

impl fmt::Display for TimeoutSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl TryFrom<u32> for TimeoutSecs {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TimeoutSecs> for u32 {
    fn from(timeout: TimeoutSecs) -> Self {
        timeout.0
    }
}
