/// `load_config` module: loads the static YAML config and injects secrets from the environment.
///
/// This module is the only place where untrusted YAML is parsed and mapped to the typed
/// configuration of `content-sync-core`.
///
/// # Responsibilities
/// - Parse the `remote`, `sync`, `clone` and `mapping` sections into type-safe structs
/// - Inject the API key (`CONTENT_API_KEY`) and, unless set in YAML, the endpoint (`CONTENT_API_URL`)
/// - Validate the field mapping once, so typos fail before any remote call
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich diagnostics, and are surfaced at
/// the CLI boundary.
use anyhow::Result;
use content_sync_core::duplicate::DuplicateOptions;
use content_sync_core::mapping::MappingConfig;
use content_sync_core::synchronise::SyncOptions;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const API_KEY_VAR: &str = "CONTENT_API_KEY";
pub const API_URL_VAR: &str = "CONTENT_API_URL";

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub remote: RemoteConfig,
    pub sync: SyncOptions,
    pub duplicate: DuplicateOptions,
    pub mapping: MappingConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteSection {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    remote: Option<RemoteSection>,
    #[serde(default)]
    sync: SyncOptions,
    #[serde(default, rename = "clone")]
    duplicate: DuplicateOptions,
    mapping: MappingConfig,
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = raw.mapping.validate() {
        error!(error = %e, config_path = ?path_ref, "Invalid field mapping");
        return Err(anyhow::anyhow!("Invalid field mapping: {e}"));
    }
    raw.mapping.trace_loaded();

    let api_key = match std::env::var(API_KEY_VAR) {
        Ok(key) => {
            info!("{API_KEY_VAR} found in env");
            key
        }
        Err(e) => {
            error!(error = ?e, "{API_KEY_VAR} environment variable not set");
            return Err(anyhow::anyhow!(
                "{API_KEY_VAR} environment variable not set: {e}"
            ));
        }
    };

    let remote = raw.remote.unwrap_or_default();
    let base_url = match remote.base_url.or_else(|| std::env::var(API_URL_VAR).ok()) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            error!("No remote.base_url in config and {API_URL_VAR} not set");
            anyhow::bail!("No remote.base_url in config and {API_URL_VAR} not set");
        }
    };
    let timeout_secs = if remote.timeout_secs == 0 {
        default_timeout_secs()
    } else {
        remote.timeout_secs
    };

    info!(
        base_url = %base_url,
        concurrency = raw.sync.concurrency,
        max_attempts = raw.sync.retry.max_attempts,
        "Config loaded and merged successfully"
    );

    Ok(CliConfig {
        remote: RemoteConfig {
            base_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        },
        sync: raw.sync,
        duplicate: raw.duplicate,
        mapping: raw.mapping,
    })
}
