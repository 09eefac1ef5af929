//! Registry of installed sync plugins

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use super::{ConfigSchema, PluginCapabilities, PluginContext, PluginInfo, SyncPlugin};
use crate::{Error, Result};

/// Full description of a registered plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    #[serde(flatten)]
    pub info: PluginInfo,
    pub capabilities: PluginCapabilities,
    pub config_schema: ConfigSchema,
}

struct Entry {
    info: PluginInfo,
    plugin: Arc<dyn SyncPlugin>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    closed: bool,
}

/// Plugin registry keyed by plugin name
///
/// Plugins are initialized once on registration and cleaned up once on
/// [`shutdown`](Self::shutdown). Lookups hand out an `Arc` so callers never
/// hold the registry lock across plugin I/O.
#[derive(Default)]
pub struct PluginRegistry {
    inner: RwLock<Inner>,
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register a plugin
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if the name is taken, or `Initialization` if
    /// the plugin fails to initialize (it is not added in either case)
    pub async fn register(&self, mut plugin: Box<dyn SyncPlugin>) -> Result<PluginInfo> {
        let info = plugin.info();
        if info.name.trim().is_empty() {
            return Err(Error::Validation("plugin name must not be empty".to_string()));
        }

        {
            let inner = self.inner.read().await;
            if inner.closed {
                return Err(Error::Initialization(format!(
                    "{}: registry is shut down",
                    info.name
                )));
            }
            if inner.entries.iter().any(|e| e.info.name == info.name) {
                return Err(Error::DuplicateName(info.name));
            }
        }

        tracing::info!(plugin = %info.name, version = %info.version, "registering plugin");

        let ctx = PluginContext::for_plugin(&info.name);
        plugin
            .initialize(&ctx)
            .await
            .map_err(|e| Error::Initialization(format!("{}: {e}", info.name)))?;

        let plugin: Arc<dyn SyncPlugin> = Arc::from(plugin);

        let mut inner = self.inner.write().await;
        // A concurrent register may have claimed the name while we initialized
        let rejection = if inner.closed {
            Some(Error::Initialization(format!("{}: registry is shut down", info.name)))
        } else if inner.entries.iter().any(|e| e.info.name == info.name) {
            Some(Error::DuplicateName(info.name.clone()))
        } else {
            None
        };
        if let Some(err) = rejection {
            drop(inner);
            if let Err(e) = plugin.cleanup().await {
                tracing::warn!(plugin = %info.name, error = %e, "cleanup after rejected registration failed");
            }
            return Err(err);
        }

        inner.entries.push(Entry {
            info: info.clone(),
            plugin,
        });

        Ok(info)
    }

    /// Look up a plugin by name
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plugin has that name
    pub async fn get(&self, name: &str) -> Result<Arc<dyn SyncPlugin>> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| Arc::clone(&e.plugin))
            .ok_or_else(|| Error::NotFound(format!("plugin '{name}'")))
    }

    /// Describe a plugin: descriptor, capabilities and config schema
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plugin has that name
    pub async fn describe(&self, name: &str) -> Result<PluginDescriptor> {
        let inner = self.inner.read().await;
        let entry = inner
            .entries
            .iter()
            .find(|e| e.info.name == name)
            .ok_or_else(|| Error::NotFound(format!("plugin '{name}'")))?;

        Ok(PluginDescriptor {
            info: entry.info.clone(),
            capabilities: entry.plugin.capabilities(),
            config_schema: entry.plugin.config_schema(),
        })
    }

    /// Descriptors in registration order
    pub async fn list(&self) -> Vec<PluginInfo> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.info.clone())
            .collect()
    }

    /// Number of registered plugins
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Check if no plugins are registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Clean up every plugin and close the registry
    ///
    /// Errors are collected rather than aborting the remaining cleanups.
    /// Calling this again is a no-op.
    pub async fn shutdown(&self) -> Vec<(String, Error)> {
        let entries = {
            let mut inner = self.inner.write().await;
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };

        let mut failures = Vec::new();
        for entry in entries {
            if let Err(e) = entry.plugin.cleanup().await {
                tracing::warn!(plugin = %entry.info.name, error = %e, "plugin cleanup failed");
                failures.push((entry.info.name, e));
            }
        }

        failures
    }
}
