//! Configuration loading from YAML / JSON files with env overrides.

use super::KernelConfig;
use crate::{Error, ErrorContext, Result};
use std::env;
use std::path::Path;
use tracing::{debug, info};

const CONFIG_PATH_ENV: &str = "PROMPT_KERNEL_CONFIG";
const GLOBAL_CONCURRENCY_ENV: &str = "PROMPT_KERNEL_GLOBAL_CONCURRENCY";

impl KernelConfig {
    /// Parse a config document. `format` is a file extension (`yaml`, `yml`, `json`).
    pub fn from_str_with_format(raw: &str, format: &str) -> Result<Self> {
        let mut cfg: KernelConfig = match format.to_ascii_lowercase().as_str() {
            "json" => serde_json::from_str(raw)?,
            "yaml" | "yml" => serde_yaml::from_str(raw)?,
            other => {
                return Err(Error::configuration_with_context(
                    "unsupported config format",
                    ErrorContext::new()
                        .with_details(format!("'{}' (expected yaml, yml or json)", other))
                        .with_source("config_loader"),
                ))
            }
        };
        cfg.normalize();
        Ok(cfg)
    }

    /// Load, apply env overrides, and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                "failed to read config file",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("yaml");
        let mut cfg = Self::from_str_with_format(&raw, format)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        info!(
            path = %path.display(),
            providers = cfg.providers.len(),
            "prompt-kernel configuration loaded"
        );
        Ok(cfg)
    }

    /// Load from the path named by `PROMPT_KERNEL_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = env::var(CONFIG_PATH_ENV).map_err(|_| {
            Error::configuration_with_context(
                "config path not set",
                ErrorContext::new()
                    .with_field_path(CONFIG_PATH_ENV)
                    .with_source("config_loader"),
            )
        })?;
        Self::from_path(path)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env::var(GLOBAL_CONCURRENCY_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            debug!(global_concurrency = n, "global concurrency overridden from env");
            self.dispatch.global_concurrency = n;
        }
    }
}
