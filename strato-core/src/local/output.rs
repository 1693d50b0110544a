//! Result extraction from harness output.
//!
//! Compatibility shim: harnesses share stdout with user code, so the result
//! is whatever JSON object appears on the last line that parses as one.
//! Every other line, before or after it, is treated as logs. This is not a protocol
//! and should not grow into one.

use std::time::Duration;

use serde_json::{Map, Value};

use super::process::ProcessOutput;
use crate::error::StratoError;
use crate::function::ExecutionOutcome;

/// The last line of `output` that parses as a JSON object, scanning
/// backward. Returns the line index and the object.
pub fn last_json_object(output: &str) -> Option<(usize, Map<String, Value>)> {
    output
        .lines()
        .enumerate()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|(index, line)| {
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(object)) => Some((index, object)),
                _ => None,
            }
        })
}

/// Turn a finished harness process into an outcome.
pub fn classify(process: ProcessOutput, timeout: Duration) -> ExecutionOutcome {
    if process.timed_out {
        return ExecutionOutcome::failed(
            StratoError::Timeout { after: timeout },
            non_empty(process.output),
        );
    }

    match last_json_object(&process.output) {
        Some((index, object)) => {
            let logs = process
                .output
                .lines()
                .enumerate()
                .filter(|(line, _)| *line != index)
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join("\n");
            let logs = non_empty(logs);
            from_result_object(object, logs)
        }
        None if process.success() => {
            let body = Value::String(process.output.trim().to_string());
            ExecutionOutcome::ok(body, None)
        }
        None => {
            let status = process
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            ExecutionOutcome::failed(
                StratoError::Execution {
                    message: format!("process exited with {} and produced no result", status),
                    stack: None,
                },
                non_empty(process.output),
            )
        }
    }
}

/// Interpret a `{statusCode, body}` / `{error, stack}` result object.
pub fn from_result_object(mut object: Map<String, Value>, logs: Option<String>) -> ExecutionOutcome {
    if let Some(error) = object.remove("error") {
        if !error.is_null() {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let stack = match object.remove("stack") {
                Some(Value::String(s)) if !s.is_empty() => Some(s),
                _ => None,
            };
            return ExecutionOutcome::failed(StratoError::Execution { message, stack }, logs);
        }
    }

    let body = match object.remove("body") {
        Some(body) => body,
        None => Value::Object(object),
    };
    ExecutionOutcome::ok(body, logs)
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn finished(code: i32, output: &str) -> ProcessOutput {
        ProcessOutput {
            // Raw wait status: exit code lives in the high byte.
            status: Some(ExitStatus::from_raw(code << 8)),
            output: output.to_string(),
            timed_out: false,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_last_json_object_skips_logs() {
        let output = "booting\n{\"partial\": true}\nnot json {\n{\"statusCode\":200,\"body\":1}\ntrailing noise\n";
        let (index, object) = last_json_object(output).unwrap();
        assert_eq!(index, 3);
        assert_eq!(object["body"], 1);
    }

    #[test]
    fn test_last_json_object_ignores_non_objects() {
        assert!(last_json_object("[1,2,3]\n42\n\"text\"\n").is_none());
        assert!(last_json_object("").is_none());
    }

    #[test]
    fn test_success_body() {
        let outcome = classify(
            finished(0, "hello from handler\n{\"statusCode\":200,\"body\":{\"message\":\"X\"}}\n"),
            Duration::from_secs(1),
        );
        assert_eq!(outcome.result.unwrap(), json!({"message": "X"}));
        assert_eq!(outcome.logs.as_deref(), Some("hello from handler"));
    }

    #[test]
    fn test_output_after_result_kept_in_logs() {
        let outcome = classify(
            finished(0, "before\n{\"statusCode\":200,\"body\":1}\nlate stderr\n"),
            Duration::from_secs(1),
        );
        assert_eq!(outcome.result.unwrap(), json!(1));
        assert_eq!(outcome.logs.as_deref(), Some("before\nlate stderr"));
    }

    #[test]
    fn test_error_key_is_execution_failure() {
        let outcome = classify(
            finished(1, "{\"statusCode\":500,\"error\":\"boom\",\"stack\":\"at main\"}\n"),
            Duration::from_secs(1),
        );
        match outcome.result.unwrap_err() {
            StratoError::Execution { message, stack } => {
                assert_eq!(message, "boom");
                assert_eq!(stack.as_deref(), Some("at main"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_raw_text_on_clean_exit() {
        let outcome = classify(finished(0, "plain text result\n"), Duration::from_secs(1));
        assert_eq!(outcome.result.unwrap(), json!("plain text result"));
    }

    #[test]
    fn test_no_result_on_failed_exit() {
        let outcome = classify(finished(2, "Traceback: ...\n"), Duration::from_secs(1));
        assert!(matches!(
            outcome.result,
            Err(StratoError::Execution { .. })
        ));
        assert!(outcome.logs.unwrap().contains("Traceback"));
    }

    #[test]
    fn test_timeout_wins() {
        let process = ProcessOutput {
            status: None,
            output: "{\"statusCode\":200,\"body\":1}\n".to_string(),
            timed_out: true,
            elapsed: Duration::from_secs(2),
        };
        let outcome = classify(process, Duration::from_secs(2));
        assert!(matches!(outcome.result, Err(StratoError::Timeout { .. })));
    }

    #[test]
    fn test_object_without_body_is_the_body() {
        let outcome = from_result_object(
            json!({"message": "direct"}).as_object().unwrap().clone(),
            None,
        );
        assert_eq!(outcome.result.unwrap(), json!({"message": "direct"}));
    }
}
