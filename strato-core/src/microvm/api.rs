// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hypervisor control channel.
//!
//! Minimal HTTP/1.1 client over the hypervisor's Unix API socket. Only the
//! handful of `PUT` calls needed to configure and start a VM are supported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::{InfraError, StratoResult};

/// Upper bound on a response we are willing to buffer.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Client for one hypervisor's API socket.
#[derive(Debug, Clone)]
pub struct ApiClient {
    socket: PathBuf,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    pub async fn put_boot_source(&self, kernel: &Path, boot_args: &str) -> StratoResult<()> {
        self.put(
            "/boot-source",
            &json!({
                "kernel_image_path": kernel.to_string_lossy(),
                "boot_args": boot_args,
            }),
            "boot-source",
        )
        .await
    }

    pub async fn put_rootfs(&self, overlay: &Path) -> StratoResult<()> {
        self.put(
            "/drives/rootfs",
            &json!({
                "drive_id": "rootfs",
                "path_on_host": overlay.to_string_lossy(),
                "is_root_device": true,
                "is_read_only": false,
            }),
            "rootfs",
        )
        .await
    }

    pub async fn put_machine_config(&self, vcpus: u8, memory_mb: u32) -> StratoResult<()> {
        self.put(
            "/machine-config",
            &json!({
                "vcpu_count": vcpus,
                "mem_size_mib": memory_mb,
            }),
            "machine-config",
        )
        .await
    }

    pub async fn put_network_interface(&self, tap: &str, mac: &str) -> StratoResult<()> {
        self.put(
            "/network-interfaces/eth0",
            &json!({
                "iface_id": "eth0",
                "host_dev_name": tap,
                "guest_mac": mac,
            }),
            "network-interface",
        )
        .await
    }

    pub async fn start_instance(&self) -> StratoResult<()> {
        self.put("/actions", &json!({ "action_type": "InstanceStart" }), "start")
            .await
    }

    /// Send one `PUT` and require a 2xx answer.
    pub async fn put(&self, path: &str, body: &Value, stage: &'static str) -> StratoResult<()> {
        let failure = |reason: String| InfraError::Hypervisor { stage, reason };

        let payload = serde_json::to_string(body).map_err(InfraError::Serialization)?;
        let request = format!(
            "PUT {} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Accept: application/json\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            path,
            payload.len(),
            payload
        );

        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket).await?;
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;
            read_message(&mut stream).await
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| failure(format!("no response within {}ms", self.timeout.as_millis())))?
            .map_err(|e| failure(e.to_string()))?;

        let (status, body) = parse_response(&response)
            .ok_or_else(|| failure("malformed HTTP response".to_string()))?;

        tracing::debug!(socket = %self.socket.display(), path = path, status = status, "Hypervisor API call");

        if (200..300).contains(&status) {
            return Ok(());
        }

        let detail = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("fault_message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        Err(failure(format!("HTTP {}: {}", status, detail)).into())
    }
}

/// Read one HTTP message (head + `Content-Length` body) or until EOF.
pub(crate) async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        if split_message(&buf).is_some() {
            return Ok(buf);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "response too large",
            ));
        }
    }
}

/// Split a complete message into head and body; `None` until complete.
pub(crate) fn split_message(buf: &[u8]) -> Option<(&str, &[u8])> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?;
    let body = &buf[head_end + 4..];

    let length = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if body.len() < length {
        return None;
    }
    Some((head, &body[..length]))
}

fn parse_response(buf: &[u8]) -> Option<(u16, &[u8])> {
    let (head, body) = split_message(buf)?;
    let status = head.lines().next()?.split_whitespace().nth(1)?.parse().ok()?;
    Some((status, body))
}
