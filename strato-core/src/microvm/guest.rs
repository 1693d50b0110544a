// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Client for the runtime listener inside a guest.
//!
//! Readiness is `GET /health`; execution is `POST /invoke`, answered with
//! `{statusCode, body}` on success or `{error, stack}` on failure.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::error::{InfraError, StratoError};
use crate::function::ExecutionOutcome;
use crate::local::output;

/// Poll interval while waiting for the guest to come up.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Message sent to the guest runtime.
#[derive(Debug, Serialize)]
pub struct GuestInvocation<'a> {
    pub handler: &'a str,
    pub code: &'a str,
    pub event: &'a Value,
    pub env: &'a HashMap<String, String>,
    pub function_name: &'a str,
    pub memory_mb: u32,
    pub timeout_sec: u32,
}

/// HTTP client bound to one guest address.
#[derive(Debug, Clone)]
pub struct GuestClient {
    http: reqwest::Client,
    base_url: String,
}

impl GuestClient {
    pub fn new(guest_ip: Ipv4Addr, port: u16) -> Result<Self, InfraError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| InfraError::Guest {
                reason: format!("building HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            base_url: format!("http://{}:{}", guest_ip, port),
        })
    }

    /// Poll `/health` until it answers 2xx or `timeout` passes.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), InfraError> {
        let url = format!("{}/health", self.base_url);
        let start = Instant::now();
        let mut last_error = String::from("no attempt made");

        while start.elapsed() < timeout {
            let attempt = self
                .http
                .get(&url)
                .timeout(HEALTH_POLL_INTERVAL * 10)
                .send()
                .await;
            match attempt {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(
                        url = %url,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Guest runtime ready"
                    );
                    return Ok(());
                }
                Ok(response) => last_error = format!("health check returned {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }

        Err(InfraError::Guest {
            reason: format!(
                "runtime not ready after {}ms: {}",
                timeout.as_millis(),
                last_error
            ),
        })
    }

    /// Run one invocation. Transport failures are infrastructure errors;
    /// anything the guest answered is folded into the outcome.
    pub async fn invoke(&self, invocation: &GuestInvocation<'_>) -> ExecutionOutcome {
        let url = format!("{}/invoke", self.base_url);
        let response = match self.http.post(&url).json(invocation).send().await {
            Ok(response) => response,
            Err(e) => {
                return ExecutionOutcome::failed(
                    InfraError::Guest {
                        reason: format!("invoke request failed: {}", e),
                    }
                    .into(),
                    None,
                )
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return ExecutionOutcome::failed(
                    InfraError::Guest {
                        reason: format!("reading invoke response: {}", e),
                    }
                    .into(),
                    None,
                )
            }
        };

        parse_reply(status.is_success(), status.as_u16(), &text)
    }
}

fn parse_reply(success: bool, status: u16, text: &str) -> ExecutionOutcome {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut object)) => {
            let logs = match object.remove("logs") {
                Some(Value::String(logs)) if !logs.is_empty() => Some(logs),
                _ => None,
            };
            output::from_result_object(object, logs)
        }
        _ if success => ExecutionOutcome::ok(Value::String(text.to_string()), None),
        _ => ExecutionOutcome::failed(
            StratoError::Infrastructure(InfraError::Guest {
                reason: format!("guest answered HTTP {}: {}", status, text.trim()),
            }),
            None,
        ),
    }
}
