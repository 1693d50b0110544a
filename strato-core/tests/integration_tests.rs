// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for Strato.
//!
//! These drive the public FunctionManager API against a real file store and
//! the host's toolchains. Tests needing `python3` or `node` return early
//! when the toolchain is not installed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use strato_core::config::LocalConfig;
use strato_core::local::process::is_available;
use strato_core::{
    CreateFunctionRequest, FileStore, FunctionManager, FunctionStore, InvocationErrorKind,
    LocalExecutor, SqlStore, StratoError,
};
use tempfile::TempDir;

async fn file_manager() -> (TempDir, FunctionManager) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileStore::open(temp_dir.path())
        .await
        .expect("Failed to open file store");
    let manager = FunctionManager::new(
        Arc::new(store),
        LocalExecutor::new(LocalConfig::default()),
        None,
    );
    (temp_dir, manager)
}

fn python_function(name: &str, code: &str) -> CreateFunctionRequest {
    CreateFunctionRequest {
        name: name.to_string(),
        runtime: "python312".to_string(),
        handler: "main.handler".to_string(),
        code: code.to_string(),
        ..Default::default()
    }
}

/// Test a Python handler returning an object
#[tokio::test]
async fn test_python_handler_success() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    manager
        .create(python_function(
            "py-hello",
            "import sys\n\ndef handler(event, context):\n    print('log line', file=sys.stderr)\n    return {'message': 'X'}\n",
        ))
        .await
        .expect("Failed to create function");

    let response = manager
        .invoke_local("py-hello", &json!({}))
        .await
        .expect("Invocation should produce a response");

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, json!({"message": "X"}));
    assert!(response.error.is_none());
    assert!(response.logs.unwrap_or_default().contains("log line"));
}

/// Test a Node handler in both async and callback style
#[tokio::test]
async fn test_node_handler_success() {
    if !is_available("node") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    for (name, code) in [
        ("node-async", "exports.handler = async (event) => ({ message: 'X' });"),
        (
            "node-callback",
            "exports.handler = (event, context, callback) => { callback(null, { message: 'X' }); };",
        ),
    ] {
        manager
            .create(CreateFunctionRequest {
                name: name.to_string(),
                runtime: "nodejs20".to_string(),
                handler: "index.handler".to_string(),
                code: code.to_string(),
                ..Default::default()
            })
            .await
            .expect("Failed to create function");

        let response = manager.invoke_local(name, &json!({})).await.unwrap();
        assert_eq!(response.status_code, 200, "{:?}", response);
        assert_eq!(response.body, json!({"message": "X"}));
    }
}

/// Test that Node failures surface as execution errors
#[tokio::test]
async fn test_node_handler_failures() {
    if !is_available("node") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    for (name, code) in [
        (
            "node-throw",
            "exports.handler = async () => { throw new Error('boom'); };",
        ),
        (
            "node-callback-error",
            "exports.handler = (event, context, callback) => { callback(new Error('boom')); };",
        ),
    ] {
        manager
            .create(CreateFunctionRequest {
                name: name.to_string(),
                runtime: "nodejs20".to_string(),
                handler: "index.handler".to_string(),
                code: code.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let response = manager.invoke_local(name, &json!({})).await.unwrap();
        assert_eq!(response.status_code, 500, "{:?}", response);
        assert_eq!(response.error_kind, Some(InvocationErrorKind::Execution));
        assert!(response.error.as_deref().unwrap_or_default().contains("boom"));
    }
}

/// Test a Python coroutine handler
#[tokio::test]
async fn test_python_async_handler() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    manager
        .create(python_function(
            "py-async",
            "import asyncio\n\nasync def handler(event, context):\n    await asyncio.sleep(0.01)\n    return {'echo': event['value']}\n",
        ))
        .await
        .unwrap();

    let response = manager
        .invoke_local("py-async", &json!({"value": 7}))
        .await
        .unwrap();
    assert_eq!(response.status_code, 200, "{:?}", response);
    assert_eq!(response.body, json!({"echo": 7}));
}

/// Test that a handler leaving a background process behind still returns
#[tokio::test]
async fn test_background_process_does_not_delay_result() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    let mut request = python_function(
        "py-popen",
        "import subprocess\n\ndef handler(event, context):\n    subprocess.Popen(['sleep', '30'])\n    return {'message': 'X'}\n",
    );
    request.timeout_sec = Some(5);
    manager.create(request).await.unwrap();

    let started = Instant::now();
    let response = manager.invoke_local("py-popen", &json!({})).await.unwrap();

    assert_eq!(response.status_code, 200, "{:?}", response);
    assert_eq!(response.body, json!({"message": "X"}));
    assert!(started.elapsed() < Duration::from_secs(4));
}

/// Whether a .NET 8 SDK is installed.
fn has_dotnet8_sdk() -> bool {
    is_available("dotnet")
        && std::process::Command::new("dotnet")
            .arg("--list-sdks")
            .output()
            .map(|out| {
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .any(|line| line.starts_with("8."))
            })
            .unwrap_or(false)
}

/// Test a C# handler built and run through the runner
#[tokio::test]
async fn test_dotnet_handler() {
    if !has_dotnet8_sdk() {
        return;
    }
    let (_dir, manager) = file_manager().await;
    let code = r#"using System;
using System.Text.Json;

namespace Demo
{
    public static class Greeter
    {
        public static object Hello(JsonElement payload)
        {
            return new { message = "hello " + payload.GetProperty("name").GetString() };
        }

        public static object Fail(JsonElement payload)
        {
            throw new InvalidOperationException("boom");
        }
    }
}
"#;
    for (name, handler) in [("cs-hello", "Demo.Greeter.Hello"), ("cs-fail", "Demo.Greeter.Fail")] {
        manager
            .create(CreateFunctionRequest {
                name: name.to_string(),
                runtime: "dotnet8".to_string(),
                handler: handler.to_string(),
                code: code.to_string(),
                timeout_sec: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let response = manager
        .invoke_local("cs-hello", &json!({"name": "strato"}))
        .await
        .unwrap();
    assert_eq!(response.status_code, 200, "{:?}", response);
    assert_eq!(response.body, json!({"message": "hello strato"}));

    let response = manager
        .invoke_local("cs-fail", &json!({"name": "strato"}))
        .await
        .unwrap();
    assert_eq!(response.status_code, 500, "{:?}", response);
    assert!(response.error.as_deref().unwrap_or_default().contains("boom"));
}

/// Test that a raising handler yields an execution failure with timing
#[tokio::test]
async fn test_throwing_handler_is_execution_error() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    manager
        .create(python_function(
            "py-raise",
            "def handler(event, context):\n    raise ValueError('boom')\n",
        ))
        .await
        .unwrap();

    let response = manager.invoke_local("py-raise", &json!({})).await.unwrap();

    assert_eq!(response.status_code, 500);
    assert_eq!(response.error_kind, Some(InvocationErrorKind::Execution));
    assert!(response.error.as_deref().unwrap_or_default().contains("boom"));
    assert!(response.duration_ms > 0);
}

/// Test that a hanging handler is cut off near its deadline
#[tokio::test]
async fn test_hanging_handler_times_out() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    let mut request = python_function(
        "py-hang",
        "import time\n\ndef handler(event, context):\n    time.sleep(60)\n",
    );
    request.timeout_sec = Some(1);
    manager.create(request).await.unwrap();

    let started = Instant::now();
    let response = manager.invoke_local("py-hang", &json!({})).await.unwrap();

    assert_eq!(response.status_code, 504);
    assert_eq!(response.error_kind, Some(InvocationErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Test that environment variables stay inside their own invocation
#[tokio::test]
async fn test_environment_isolation_under_concurrency() {
    if !is_available("python3") {
        return;
    }
    let (_dir, manager) = file_manager().await;
    let code = "import os, time\n\ndef handler(event, context):\n    time.sleep(0.3)\n    return {'a': os.environ.get('ONLY_A'), 'b': os.environ.get('ONLY_B')}\n";

    let mut first = python_function("env-a", code);
    first.environment = HashMap::from([("ONLY_A".to_string(), "alpha".to_string())]);
    let mut second = python_function("env-b", code);
    second.environment = HashMap::from([("ONLY_B".to_string(), "beta".to_string())]);
    manager.create(first).await.unwrap();
    manager.create(second).await.unwrap();

    let event = json!({});
    let (a, b) = tokio::join!(
        manager.invoke_local("env-a", &event),
        manager.invoke_local("env-b", &event)
    );

    assert_eq!(a.unwrap().body, json!({"a": "alpha", "b": null}));
    assert_eq!(b.unwrap().body, json!({"a": null, "b": "beta"}));
    assert!(std::env::var_os("ONLY_A").is_none());
}

/// Test list count after creates and deletes
#[tokio::test]
async fn test_list_after_creates_and_deletes() {
    let (_dir, manager) = file_manager().await;
    for i in 0..5 {
        manager
            .create(python_function(&format!("fn-{}", i), "def handler(e, c):\n    return 1\n"))
            .await
            .unwrap();
    }
    manager.delete("fn-1").await.unwrap();
    manager.delete("fn-3").await.unwrap();

    let names: Vec<String> = manager
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name.to_string())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(!names.contains(&"fn-1".to_string()));
}

/// Test that a duplicate create fails and leaves the original intact
#[tokio::test]
async fn test_duplicate_name_rejected() {
    let (_dir, manager) = file_manager().await;
    let original = manager
        .create(python_function("twice", "def handler(e, c):\n    return 1\n"))
        .await
        .unwrap();

    let err = manager
        .create(python_function("twice", "def handler(e, c):\n    return 2\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, StratoError::AlreadyExists(_)));
    assert_eq!(manager.get("twice").await.unwrap(), original);
}

/// Test byte-identical code round trip on both backends
#[tokio::test]
async fn test_code_round_trip_on_both_backends() {
    let temp_dir = TempDir::new().unwrap();
    let file_store = FileStore::open(temp_dir.path()).await.unwrap();
    let sql_store = SqlStore::connect("sqlite::memory:").await.unwrap();
    let stores: [Arc<dyn FunctionStore>; 2] = [Arc::new(file_store), Arc::new(sql_store)];

    let code = "def handler(event, context):\n    return '\u{e9}\u{1F600}'\n";
    for store in stores {
        let manager = FunctionManager::new(
            store.clone(),
            LocalExecutor::new(LocalConfig::default()),
            None,
        );
        manager
            .create(python_function("round-trip", code))
            .await
            .unwrap();

        store.save_code("round-trip", code.as_bytes()).await.unwrap();
        assert_eq!(store.get_code("round-trip").await.unwrap(), code.as_bytes());
    }
}

/// Test that racing creates of one name produce exactly one record
#[tokio::test]
async fn test_concurrent_creates_single_winner() {
    let temp_dir = TempDir::new().unwrap();
    let file_store = FileStore::open(temp_dir.path().join("files")).await.unwrap();
    let database = format!("sqlite://{}", temp_dir.path().join("functions.db").display());
    let sql_store = SqlStore::connect(&database).await.unwrap();
    let stores: [Arc<dyn FunctionStore>; 2] = [Arc::new(file_store), Arc::new(sql_store)];

    for store in stores {
        let manager = Arc::new(FunctionManager::new(
            store.clone(),
            LocalExecutor::new(LocalConfig::default()),
            None,
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let manager = manager.clone();
            tasks.spawn(async move {
                manager
                    .create(python_function(
                        "contended",
                        &format!("def handler(e, c):\n    return {}\n", i),
                    ))
                    .await
            });
        }

        let (mut created, mut rejected) = (Vec::new(), 0);
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(function) => created.push(function),
                Err(StratoError::AlreadyExists(_)) => rejected += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(created.len(), 1);
        assert_eq!(rejected, 15);
        let winner = &created[0];
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(&manager.get("contended").await.unwrap(), winner);
        assert_eq!(
            store.get_code("contended").await.unwrap(),
            winner.code.as_bytes()
        );
    }
}

/// Test that the store survives a restart
#[tokio::test]
async fn test_file_store_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = FileStore::open(temp_dir.path()).await.unwrap();
        let manager =
            FunctionManager::new(Arc::new(store), LocalExecutor::new(LocalConfig::default()), None);
        manager
            .create(python_function("durable", "def handler(e, c):\n    return 1\n"))
            .await
            .unwrap();
    }

    let reopened = FileStore::open(temp_dir.path()).await.unwrap();
    let function = reopened.get("durable").await.unwrap();
    assert!(!function.code_path.is_empty());
    assert_eq!(
        reopened.get_code("durable").await.unwrap(),
        function.code.as_bytes()
    );
}
