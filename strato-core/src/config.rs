// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates storage, local-runtime and microVM settings at boot-up time.
//! Any invalid field results in a ValidationError that prevents startup.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{StratoError, StratoResult, ValidationError};

/// Raw configuration as parsed from YAML (before validation).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    storage: RawStorageConfig,
    #[serde(default)]
    local: RawLocalConfig,
    #[serde(default)]
    microvm: RawMicroVmConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorageConfig {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default = "default_functions_dir")]
    data_dir: String,
    #[serde(default)]
    database_url: Option<String>,
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_functions_dir() -> String {
    "/var/lib/strato/functions".to_string()
}

impl Default for RawStorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_functions_dir(),
            database_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocalConfig {
    #[serde(default = "default_node_bin")]
    node_bin: String,
    #[serde(default = "default_python_bin")]
    python_bin: String,
    #[serde(default = "default_dotnet_bin")]
    dotnet_bin: String,
    #[serde(default = "default_compile_grace_secs")]
    compile_grace_secs: u64,
}

fn default_node_bin() -> String {
    "node".to_string()
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_dotnet_bin() -> String {
    "dotnet".to_string()
}

fn default_compile_grace_secs() -> u64 {
    30
}

impl Default for RawLocalConfig {
    fn default() -> Self {
        Self {
            node_bin: default_node_bin(),
            python_bin: default_python_bin(),
            dotnet_bin: default_dotnet_bin(),
            compile_grace_secs: default_compile_grace_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMicroVmConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_firecracker_bin")]
    firecracker_bin: String,
    #[serde(default)]
    kernel_path: Option<String>,
    #[serde(default)]
    rootfs_path: Option<String>,
    #[serde(default = "default_vm_data_dir")]
    data_dir: String,
    #[serde(default = "default_vcpus")]
    vcpus: u8,
    #[serde(default = "default_boot_args")]
    boot_args: String,
    #[serde(default = "default_guest_port")]
    guest_port: u16,
    #[serde(default = "default_api_socket_timeout_ms")]
    api_socket_timeout_ms: u64,
    #[serde(default = "default_boot_timeout_ms")]
    boot_timeout_ms: u64,
    #[serde(default = "default_subnet_base")]
    subnet_base: String,
    #[serde(default)]
    warm_pool: RawWarmPoolConfig,
}

fn default_true() -> bool {
    true
}

fn default_firecracker_bin() -> String {
    "/usr/local/bin/firecracker".to_string()
}

fn default_vm_data_dir() -> String {
    "/var/lib/strato".to_string()
}

fn default_vcpus() -> u8 {
    1
}

fn default_boot_args() -> String {
    "console=ttyS0 reboot=k panic=1 pci=off".to_string()
}

fn default_guest_port() -> u16 {
    8080
}

fn default_api_socket_timeout_ms() -> u64 {
    5000
}

fn default_boot_timeout_ms() -> u64 {
    10_000
}

fn default_subnet_base() -> String {
    "172.16.0.0".to_string()
}

impl Default for RawMicroVmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            firecracker_bin: default_firecracker_bin(),
            kernel_path: None,
            rootfs_path: None,
            data_dir: default_vm_data_dir(),
            vcpus: default_vcpus(),
            boot_args: default_boot_args(),
            guest_port: default_guest_port(),
            api_socket_timeout_ms: default_api_socket_timeout_ms(),
            boot_timeout_ms: default_boot_timeout_ms(),
            subnet_base: default_subnet_base(),
            warm_pool: RawWarmPoolConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWarmPoolConfig {
    #[serde(default)]
    size: usize,
    #[serde(default = "default_pool_memory_mb")]
    memory_mb: u32,
    #[serde(default = "default_idle_timeout_secs")]
    idle_timeout_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    maintenance_interval_secs: u64,
}

fn default_pool_memory_mb() -> u32 {
    128
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    10
}

impl Default for RawWarmPoolConfig {
    fn default() -> Self {
        Self {
            size: 0,
            memory_mb: default_pool_memory_mb(),
            idle_timeout_secs: default_idle_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

/// Which FunctionStore backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// JSON documents + code files under a directory.
    File { data_dir: PathBuf },
    /// Relational store reached through a connection URL.
    Sql { database_url: String },
}

/// Validated storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// Validated local toolchain configuration.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub node_bin: String,
    pub python_bin: String,
    pub dotnet_bin: String,
    /// Extra deadline granted to build-based runtimes.
    pub compile_grace: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let raw = RawLocalConfig::default();
        Self {
            node_bin: raw.node_bin,
            python_bin: raw.python_bin,
            dotnet_bin: raw.dotnet_bin,
            compile_grace: Duration::from_secs(raw.compile_grace_secs),
        }
    }
}

/// Validated warm pool configuration.
#[derive(Debug, Clone)]
pub struct WarmPoolConfig {
    /// Idle VMs kept per runtime; zero disables the pool.
    pub size: usize,
    pub memory_mb: u32,
    pub idle_timeout: Duration,
    /// How often idle VMs are evicted and the pool refilled.
    pub maintenance_interval: Duration,
}

/// Validated microVM configuration.
#[derive(Debug, Clone)]
pub struct MicroVmConfig {
    pub enabled: bool,
    pub firecracker_bin: PathBuf,
    pub kernel_path: PathBuf,
    pub rootfs_path: PathBuf,
    pub data_dir: PathBuf,
    pub vcpus: u8,
    pub boot_args: String,
    pub guest_port: u16,
    pub api_socket_timeout: Duration,
    pub boot_timeout: Duration,
    pub subnet_base: Ipv4Addr,
    pub warm_pool: WarmPoolConfig,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub local: LocalConfig,
    pub microvm: MicroVmConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> StratoResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(StratoError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| StratoError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Like [`ConfigLoader::load_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> StratoResult<Config> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Self::validate(RawConfig::default());
        }
        Self::load_file(path)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> StratoResult<Config> {
        // An empty document is a valid all-defaults configuration.
        let raw: Option<RawConfig> =
            serde_yaml::from_str(content).map_err(|e| StratoError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw.unwrap_or_default())
    }

    fn validate(raw: RawConfig) -> StratoResult<Config> {
        Ok(Config {
            storage: Self::validate_storage(raw.storage)?,
            local: Self::validate_local(raw.local)?,
            microvm: Self::validate_microvm(raw.microvm)?,
        })
    }

    fn validate_storage(raw: RawStorageConfig) -> StratoResult<StorageConfig> {
        let backend = match raw.backend.as_str() {
            "file" => {
                if raw.data_dir.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: "storage.data_dir",
                    }
                    .into());
                }
                StorageBackend::File {
                    data_dir: PathBuf::from(raw.data_dir),
                }
            }
            "sql" => match raw.database_url {
                Some(url) if !url.is_empty() => StorageBackend::Sql { database_url: url },
                _ => {
                    return Err(ValidationError::MissingField {
                        field: "storage.database_url",
                    }
                    .into())
                }
            },
            other => {
                return Err(ValidationError::InvalidField {
                    field: "storage.backend",
                    value: other.to_string(),
                    reason: "must be 'file' or 'sql'".to_string(),
                }
                .into())
            }
        };

        Ok(StorageConfig { backend })
    }

    fn validate_local(raw: RawLocalConfig) -> StratoResult<LocalConfig> {
        for (field, value) in [
            ("local.node_bin", &raw.node_bin),
            ("local.python_bin", &raw.python_bin),
            ("local.dotnet_bin", &raw.dotnet_bin),
        ] {
            if value.is_empty() {
                return Err(ValidationError::MissingField { field }.into());
            }
        }

        if raw.compile_grace_secs > 600 {
            return Err(ValidationError::InvalidField {
                field: "local.compile_grace_secs",
                value: raw.compile_grace_secs.to_string(),
                reason: "must not exceed 600 seconds".to_string(),
            }
            .into());
        }

        Ok(LocalConfig {
            node_bin: raw.node_bin,
            python_bin: raw.python_bin,
            dotnet_bin: raw.dotnet_bin,
            compile_grace: Duration::from_secs(raw.compile_grace_secs),
        })
    }

    fn validate_microvm(raw: RawMicroVmConfig) -> StratoResult<MicroVmConfig> {
        let data_dir = PathBuf::from(&raw.data_dir);

        if raw.vcpus == 0 || raw.vcpus > 32 {
            return Err(ValidationError::InvalidField {
                field: "microvm.vcpus",
                value: raw.vcpus.to_string(),
                reason: "must be between 1 and 32".to_string(),
            }
            .into());
        }

        if raw.guest_port == 0 {
            return Err(ValidationError::InvalidField {
                field: "microvm.guest_port",
                value: "0".to_string(),
                reason: "port 0 is reserved".to_string(),
            }
            .into());
        }

        if raw.boot_timeout_ms == 0 || raw.api_socket_timeout_ms == 0 {
            return Err(ValidationError::InvalidField {
                field: "microvm.boot_timeout_ms",
                value: format!("{}/{}", raw.boot_timeout_ms, raw.api_socket_timeout_ms),
                reason: "boot and API socket timeouts must be greater than 0".to_string(),
            }
            .into());
        }

        let subnet_base: Ipv4Addr =
            raw.subnet_base
                .parse()
                .map_err(|_| ValidationError::InvalidField {
                    field: "microvm.subnet_base",
                    value: raw.subnet_base.clone(),
                    reason: "not an IPv4 address".to_string(),
                })?;
        let octets = subnet_base.octets();
        if octets[2] != 0 || octets[3] != 0 {
            return Err(ValidationError::InvalidField {
                field: "microvm.subnet_base",
                value: raw.subnet_base,
                reason: "must be the base of a /16 (x.y.0.0)".to_string(),
            }
            .into());
        }

        let pool = raw.warm_pool;
        if pool.size > 64 {
            return Err(ValidationError::InvalidField {
                field: "microvm.warm_pool.size",
                value: pool.size.to_string(),
                reason: "must be between 0 and 64".to_string(),
            }
            .into());
        }
        if pool.maintenance_interval_secs == 0 {
            return Err(ValidationError::InvalidField {
                field: "microvm.warm_pool.maintenance_interval_secs",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if pool.memory_mb == 0 {
            return Err(ValidationError::InvalidField {
                field: "microvm.warm_pool.memory_mb",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(MicroVmConfig {
            enabled: raw.enabled,
            firecracker_bin: PathBuf::from(raw.firecracker_bin),
            kernel_path: raw
                .kernel_path
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("images").join("vmlinux")),
            rootfs_path: raw
                .rootfs_path
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("images").join("rootfs.ext4")),
            data_dir,
            vcpus: raw.vcpus,
            boot_args: raw.boot_args,
            guest_port: raw.guest_port,
            api_socket_timeout: Duration::from_millis(raw.api_socket_timeout_ms),
            boot_timeout: Duration::from_millis(raw.boot_timeout_ms),
            subnet_base,
            warm_pool: WarmPoolConfig {
                size: pool.size,
                memory_mb: pool.memory_mb,
                idle_timeout: Duration::from_secs(pool.idle_timeout_secs),
                maintenance_interval: Duration::from_secs(pool.maintenance_interval_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
storage:
  backend: sql
  database_url: "sqlite::memory:"

local:
  python_bin: python3.12
  compile_grace_secs: 45

microvm:
  firecracker_bin: /opt/fc/firecracker
  data_dir: /srv/strato
  vcpus: 2
  warm_pool:
    size: 2
    idle_timeout_secs: 60
    maintenance_interval_secs: 5
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(
            config.storage.backend,
            StorageBackend::Sql {
                database_url: "sqlite::memory:".to_string()
            }
        );
        assert_eq!(config.local.python_bin, "python3.12");
        assert_eq!(config.local.compile_grace, Duration::from_secs(45));
        assert_eq!(config.microvm.vcpus, 2);
        assert_eq!(config.microvm.warm_pool.size, 2);
        assert_eq!(
            config.microvm.warm_pool.maintenance_interval,
            Duration::from_secs(5)
        );
        assert_eq!(
            config.microvm.kernel_path,
            PathBuf::from("/srv/strato/images/vmlinux")
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(
            config.storage.backend,
            StorageBackend::File {
                data_dir: PathBuf::from("/var/lib/strato/functions")
            }
        );
        assert_eq!(config.local.node_bin, "node");
        assert_eq!(config.microvm.guest_port, 8080);
        assert_eq!(config.microvm.warm_pool.size, 0);
        assert_eq!(config.microvm.subnet_base, Ipv4Addr::new(172, 16, 0, 0));
    }

    #[test]
    fn test_sql_backend_requires_url() {
        let yaml = r#"
storage:
  backend: sql
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            StratoError::Validation(ValidationError::MissingField {
                field: "storage.database_url"
            })
        ));
    }

    #[test]
    fn test_unknown_backend() {
        let yaml = r#"
storage:
  backend: etcd
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_invalid_subnet() {
        let yaml = r#"
microvm:
  subnet_base: 10.1.2.0
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
microvm:
  vcpu: 2
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(StratoError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("strato.yaml");
        assert!(matches!(
            ConfigLoader::load_file(&missing),
            Err(StratoError::ConfigNotFound { .. })
        ));
        assert!(ConfigLoader::load_or_default(&missing).is_ok());
    }
}
