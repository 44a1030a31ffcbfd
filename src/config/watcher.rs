//! File watcher that republishes the registry snapshot when the config changes.

use super::KernelConfig;
use crate::registry::ProviderRegistry;
use crate::{Error, ErrorContext, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Keeps a `notify` watcher alive; dropping it stops reloading.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path` and call [`ProviderRegistry::reload`] on every change.
    ///
    /// The parent directory is watched so editors that replace the file
    /// atomically are still seen. A file that fails to parse or validate is
    /// logged and the previous snapshot stays published.
    pub fn spawn(path: impl AsRef<Path>, registry: Arc<ProviderRegistry>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let target = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(error = %e, "config watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name() == target.file_name()) {
                return;
            }
            match KernelConfig::from_path(&target) {
                Ok(cfg) => match registry.reload(&cfg) {
                    Ok(()) => info!(path = %target.display(), "provider registry reloaded"),
                    Err(e) => warn!(error = %e, "reload rejected, keeping previous snapshot"),
                },
                Err(e) => warn!(error = %e, "config change ignored, keeping previous snapshot"),
            }
        })
        .map_err(watch_error)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        Ok(Self {
            path,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn watch_error(e: notify::Error) -> Error {
    Error::configuration_with_context(
        "failed to watch config file",
        ErrorContext::new()
            .with_details(e.to_string())
            .with_source("config_watcher"),
    )
}
