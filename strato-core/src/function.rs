// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Function records, lifecycle requests and invocation responses.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{StratoError, StratoResult, ValidationError};
use crate::types::{FunctionName, MemoryLimit, Runtime, TimeoutSecs};

/// A registered function.
///
/// `code_path` points at the persisted blob and is authoritative for
/// execution; `code` mirrors the blob's contents as of the last write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub name: FunctionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub runtime: Runtime,
    pub handler: String,
    pub code: String,
    #[serde(default)]
    pub code_path: String,
    #[serde(default)]
    pub code_sha256: String,
    pub memory_mb: MemoryLimit,
    pub timeout_sec: TimeoutSecs,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hex SHA-256 of a code blob.
pub fn code_digest(code: &[u8]) -> String {
    hex::encode(Sha256::digest(code))
}

/// Request body for creating a function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub runtime: String,
    pub handler: String,
    pub code: String,
    #[serde(default)]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub timeout_sec: Option<u32>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl CreateFunctionRequest {
    /// Validate the request and build the initial record.
    ///
    /// Fields are checked in order (name, runtime, handler, code, limits,
    /// environment) and the first violation is returned.
    pub fn into_function(self, now: DateTime<Utc>) -> Result<Function, ValidationError> {
        let name = FunctionName::new(self.name)?;
        let runtime: Runtime = self.runtime.parse()?;
        validate_handler(&self.handler)?;
        validate_code(&self.code)?;
        let memory_mb = MemoryLimit::or_default(self.memory_mb)?;
        let timeout_sec = TimeoutSecs::or_default(self.timeout_sec)?;
        validate_environment(&self.environment)?;

        Ok(Function {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: self.description,
            runtime,
            handler: self.handler,
            code: self.code,
            code_path: String::new(),
            code_sha256: String::new(),
            memory_mb,
            timeout_sec,
            environment: self.environment,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Request body for a partial update. Only provided fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFunctionRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub timeout_sec: Option<u32>,
    #[serde(default)]
    pub environment: Option<HashMap<String, String>>,
}

impl UpdateFunctionRequest {
    /// Merge the provided fields into `function`.
    ///
    /// Everything is validated before anything is written, so a rejected
    /// request leaves `function` untouched. Returns the new code, if any,
    /// which the caller must re-persist.
    pub fn apply_to(
        self,
        function: &mut Function,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, ValidationError> {
        let runtime = self.runtime.as_deref().map(str::parse::<Runtime>).transpose()?;
        if let Some(handler) = &self.handler {
            validate_handler(handler)?;
        }
        if let Some(code) = &self.code {
            validate_code(code)?;
        }
        let memory_mb = self.memory_mb.map(MemoryLimit::from_mb).transpose()?;
        let timeout_sec = self.timeout_sec.map(TimeoutSecs::new).transpose()?;
        if let Some(environment) = &self.environment {
            validate_environment(environment)?;
        }

        if let Some(description) = self.description {
            function.description = Some(description);
        }
        if let Some(runtime) = runtime {
            function.runtime = runtime;
        }
        if let Some(handler) = self.handler {
            function.handler = handler;
        }
        if let Some(code) = &self.code {
            function.code = code.clone();
        }
        if let Some(memory_mb) = memory_mb {
            function.memory_mb = memory_mb;
        }
        if let Some(timeout_sec) = timeout_sec {
            function.timeout_sec = timeout_sec;
        }
        if let Some(environment) = self.environment {
            function.environment = environment;
        }
        function.updated_at = now;

        Ok(self.code)
    }
}

fn validate_handler(handler: &str) -> Result<(), ValidationError> {
    if handler.trim().is_empty() {
        return Err(ValidationError::MissingField { field: "handler" });
    }
    Ok(())
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() {
        return Err(ValidationError::MissingField { field: "code" });
    }
    Ok(())
}

fn validate_environment(environment: &HashMap<String, String>) -> Result<(), ValidationError> {
    for (key, value) in environment {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(ValidationError::InvalidField {
                field: "environment",
                value: key.clone(),
                reason: "variable names must be non-empty and contain no '=' or NUL".to_string(),
            });
        }
        if value.contains('\0') {
            return Err(ValidationError::InvalidField {
                field: "environment",
                value: key.clone(),
                reason: "values must not contain NUL".to_string(),
            });
        }
    }
    Ok(())
}

/// Which side of the invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    /// The deadline expired before the handler finished.
    Timeout,
    /// The handler ran and failed.
    Execution,
    /// The invocation could not be attempted.
    Infrastructure,
}

/// Normalized result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub status_code: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<InvocationErrorKind>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl InvocationResponse {
    pub fn success(body: Value, logs: Option<String>, elapsed: Duration) -> Self {
        Self {
            status_code: 200,
            body,
            error: None,
            error_kind: None,
            duration_ms: duration_ms(elapsed),
            logs,
        }
    }

    /// Fold an invocation-time failure into a response.
    pub fn from_error(err: &StratoError, logs: Option<String>, elapsed: Duration) -> Self {
        let (status_code, kind) = match err {
            StratoError::Timeout { .. } => (504, InvocationErrorKind::Timeout),
            StratoError::Execution { .. } => (500, InvocationErrorKind::Execution),
            _ => (503, InvocationErrorKind::Infrastructure),
        };
        let body = match err {
            StratoError::Execution {
                stack: Some(stack), ..
            } => serde_json::json!({ "stack": stack }),
            _ => Value::Null,
        };
        Self {
            status_code,
            body,
            error: Some(err.to_string()),
            error_kind: Some(kind),
            duration_ms: duration_ms(elapsed),
            logs,
        }
    }

    pub fn from_outcome(outcome: ExecutionOutcome, elapsed: Duration) -> Self {
        match outcome.result {
            Ok(body) => Self::success(body, outcome.logs, elapsed),
            Err(err) => Self::from_error(&err, outcome.logs, elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Whole milliseconds, rounded up so any measured work reports at least 1ms.
fn duration_ms(elapsed: Duration) -> u64 {
    elapsed.as_micros().div_ceil(1000) as u64
}

/// What an isolation backend produced for one invocation.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub result: StratoResult<Value>,
    /// Best-effort captured output.
    pub logs: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(body: Value, logs: Option<String>) -> Self {
        Self {
            result: Ok(body),
            logs,
        }
    }

    pub fn failed(err: StratoError, logs: Option<String>) -> Self {
        Self {
            result: Err(err),
            logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraError;

    fn valid_request() -> CreateFunctionRequest {
        CreateFunctionRequest {
            name: "hello".to_string(),
            runtime: "python312".to_string(),
            handler: "main.handler".to_string(),
            code: "def handler(event, context):\n    return {}\n".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_applies_defaults() {
        let function = valid_request().into_function(Utc::now()).unwrap();
        assert_eq!(function.memory_mb.megabytes(), 128);
        assert_eq!(function.timeout_sec.seconds(), 30);
        assert_eq!(function.created_at, function.updated_at);
        assert!(function.code_path.is_empty());
        assert!(!function.id.is_empty());
    }

    #[test]
    fn test_create_reports_first_invalid_field() {
        let mut req = valid_request();
        req.name = String::new();
        req.handler = String::new();
        let err = req.into_function(Utc::now()).unwrap_err();
        assert_eq!(err.field(), "name");

        let mut req = valid_request();
        req.runtime = "perl5".to_string();
        assert_eq!(req.into_function(Utc::now()).unwrap_err().field(), "runtime");

        let mut req = valid_request();
        req.handler = "  ".to_string();
        assert_eq!(req.into_function(Utc::now()).unwrap_err().field(), "handler");

        let mut req = valid_request();
        req.code = String::new();
        assert_eq!(req.into_function(Utc::now()).unwrap_err().field(), "code");

        let mut req = valid_request();
        req.environment.insert("A=B".to_string(), "x".to_string());
        assert_eq!(
            req.into_function(Utc::now()).unwrap_err().field(),
            "environment"
        );
    }

    #[test]
    fn test_update_merges_only_provided_fields() {
        let mut function = valid_request().into_function(Utc::now()).unwrap();
        let original = function.clone();

        let update = UpdateFunctionRequest {
            timeout_sec: Some(5),
            ..Default::default()
        };
        let new_code = update.apply_to(&mut function, Utc::now()).unwrap();

        assert!(new_code.is_none());
        assert_eq!(function.timeout_sec.seconds(), 5);
        assert_eq!(function.handler, original.handler);
        assert_eq!(function.memory_mb, original.memory_mb);
        assert_eq!(function.code, original.code);
    }

    #[test]
    fn test_rejected_update_leaves_record_untouched() {
        let mut function = valid_request().into_function(Utc::now()).unwrap();
        let original = function.clone();

        let update = UpdateFunctionRequest {
            handler: Some("other.handler".to_string()),
            memory_mb: Some(0),
            ..Default::default()
        };
        let err = update.apply_to(&mut function, Utc::now()).unwrap_err();

        assert_eq!(err.field(), "memory_mb");
        assert_eq!(function, original);
    }

    #[test]
    fn test_update_returns_new_code() {
        let mut function = valid_request().into_function(Utc::now()).unwrap();
        let update = UpdateFunctionRequest {
            code: Some("def handler(e, c):\n    return 1\n".to_string()),
            ..Default::default()
        };
        let new_code = update.apply_to(&mut function, Utc::now()).unwrap();
        assert_eq!(new_code.as_deref(), Some(function.code.as_str()));
    }

    #[test]
    fn test_response_status_ranges() {
        let elapsed = Duration::from_micros(1500);
        let timeout = InvocationResponse::from_error(
            &StratoError::Timeout {
                after: Duration::from_secs(1),
            },
            None,
            elapsed,
        );
        assert_eq!(timeout.status_code, 504);
        assert_eq!(timeout.error_kind, Some(InvocationErrorKind::Timeout));
        assert_eq!(timeout.duration_ms, 2);

        let failed = InvocationResponse::from_error(
            &StratoError::Execution {
                message: "boom".to_string(),
                stack: Some("trace".to_string()),
            },
            None,
            elapsed,
        );
        assert_eq!(failed.status_code, 500);
        assert_eq!(failed.body["stack"], "trace");

        let infra = InvocationResponse::from_error(
            &StratoError::Infrastructure(InfraError::Network {
                reason: "no tap".to_string(),
            }),
            None,
            elapsed,
        );
        assert_eq!(infra.status_code, 503);
        assert!(!infra.is_success());
    }

    #[test]
    fn test_code_digest() {
        assert_eq!(
            code_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
