//! Typed adapter slots, name resolution, and lifecycle fan-out.
//!
//! Names resolve against built-ins (`shell`) and factories registered by
//! the embedding application; there is no dynamic library loading. Unknown
//! names fail at load time.

pub mod shell;
pub mod traits;

pub use traits::{Adapter, MessageAdapter, NluAdapter, StorageAdapter};

use crate::bot::Bot;
use crate::error::{AdapterError, Result};
use crate::settings::Settings;
use shell::ShellAdapter;
use std::collections::HashMap;
use std::sync::Arc;

pub type MessageFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn MessageAdapter>> + Send + Sync>;
pub type NluFactory = Box<dyn Fn(&Settings) -> Result<Arc<dyn NluAdapter>> + Send + Sync>;
pub type StorageFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn StorageAdapter>> + Send + Sync>;

/// The three adapter slots plus the factories that can fill them.
pub struct AdapterRegistry {
    message: Option<Arc<dyn MessageAdapter>>,
    nlu: Option<Arc<dyn NluAdapter>>,
    storage: Option<Arc<dyn StorageAdapter>>,
    message_factories: HashMap<String, MessageFactory>,
    nlu_factories: HashMap<String, NluFactory>,
    storage_factories: HashMap<String, StorageFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            message: None,
            nlu: None,
            storage: None,
            message_factories: HashMap::new(),
            nlu_factories: HashMap::new(),
            storage_factories: HashMap::new(),
        };
        registry.register_message_factory("shell", |settings| {
            Ok(Arc::new(ShellAdapter::new(settings.name.clone())))
        });
        registry
    }

    pub fn register_message_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn MessageAdapter>> + Send + Sync + 'static,
    {
        self.message_factories.insert(name.into(), Box::new(factory));
    }

    pub fn register_nlu_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn NluAdapter>> + Send + Sync + 'static,
    {
        self.nlu_factories.insert(name.into(), Box::new(factory));
    }

    pub fn register_storage_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn StorageAdapter>> + Send + Sync + 'static,
    {
        self.storage_factories.insert(name.into(), Box::new(factory));
    }

    /// Inject an already-built message adapter (tests, embedders).
    pub fn use_message(&mut self, adapter: Arc<dyn MessageAdapter>) {
        self.message = Some(adapter);
    }

    pub fn use_nlu(&mut self, adapter: Arc<dyn NluAdapter>) {
        self.nlu = Some(adapter);
    }

    pub fn use_storage(&mut self, adapter: Arc<dyn StorageAdapter>) {
        self.storage = Some(adapter);
    }

    pub fn message(&self) -> Option<Arc<dyn MessageAdapter>> {
        self.message.clone()
    }

    pub fn nlu(&self) -> Option<Arc<dyn NluAdapter>> {
        self.nlu.clone()
    }

    pub fn storage(&self) -> Option<Arc<dyn StorageAdapter>> {
        self.storage.clone()
    }

    /// Fill every configured slot from its factory. The message slot is
    /// required; nlu and storage load only when configured. Slots already
    /// filled by injection are left alone.
    pub fn load_all(&mut self, settings: &Settings) -> Result<()> {
        if self.message.is_none() {
            let name = settings.message_adapter.as_str();
            let factory = self.message_factories.get(name).ok_or(AdapterError::Unknown {
                slot: "message",
                name: name.to_string(),
            })?;
            self.message = Some(load(factory, "message", name, settings)?);
        }

        if self.nlu.is_none()
            && let Some(name) = settings.nlu_adapter.as_deref()
        {
            let factory = self.nlu_factories.get(name).ok_or(AdapterError::Unknown {
                slot: "nlu",
                name: name.to_string(),
            })?;
            self.nlu = Some(load(factory, "nlu", name, settings)?);
        }

        if self.storage.is_none()
            && let Some(name) = settings.storage_adapter.as_deref()
        {
            let factory = self.storage_factories.get(name).ok_or(AdapterError::Unknown {
                slot: "storage",
                name: name.to_string(),
            })?;
            self.storage = Some(load(factory, "storage", name, settings)?);
        }

        Ok(())
    }

    /// All populated slots as base adapters, in start order: storage first
    /// so memory can load, message last so traffic only flows once the rest
    /// is up.
    pub(crate) fn populated(&self) -> Vec<(&'static str, Arc<dyn Adapter>)> {
        let mut slots: Vec<(&'static str, Arc<dyn Adapter>)> = Vec::new();
        if let Some(storage) = &self.storage {
            slots.push(("storage", upcast_storage(storage.clone())));
        }
        if let Some(nlu) = &self.nlu {
            slots.push(("nlu", upcast_nlu(nlu.clone())));
        }
        if let Some(message) = &self.message {
            slots.push(("message", upcast_message(message.clone())));
        }
        slots
    }

    pub async fn start_all(&self, bot: Arc<Bot>) -> Result<()> {
        for (slot, adapter) in self.populated() {
            tracing::info!(slot, adapter = adapter.name(), "starting adapter");
            adapter.start(bot.clone()).await?;
        }
        Ok(())
    }

    /// Shut down populated slots in reverse start order. Failures are
    /// logged, not propagated.
    pub async fn shutdown_all(&self) {
        for (slot, adapter) in self.populated().into_iter().rev() {
            if let Err(error) = adapter.shutdown().await {
                tracing::error!(slot, adapter = adapter.name(), %error, "adapter shutdown failed");
            }
        }
    }

    /// Empty every slot, keeping registered factories.
    pub fn unload_all(&mut self) {
        self.message = None;
        self.nlu = None;
        self.storage = None;
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn load<T: ?Sized>(
    factory: &(dyn Fn(&Settings) -> Result<Arc<T>> + Send + Sync),
    slot: &'static str,
    name: &str,
    settings: &Settings,
) -> Result<Arc<T>> {
    factory(settings).map_err(|source| {
        AdapterError::Load {
            slot,
            name: name.to_string(),
            source: source.into(),
        }
        .into()
    })
}

fn upcast_message(adapter: Arc<dyn MessageAdapter>) -> Arc<dyn Adapter> {
    adapter
}

fn upcast_nlu(adapter: Arc<dyn NluAdapter>) -> Arc<dyn Adapter> {
    adapter
}

fn upcast_storage(adapter: Arc<dyn StorageAdapter>) -> Arc<dyn Adapter> {
    adapter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_is_a_builtin_message_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.load_all(&Settings::default()).unwrap();
        assert_eq!(registry.message().unwrap().name(), "shell");
        assert!(registry.nlu().is_none());
        assert!(registry.storage().is_none());
    }

    #[test]
    fn unknown_adapter_name_fails_to_load() {
        let mut registry = AdapterRegistry::new();
        let settings = Settings {
            message_adapter: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        let err = registry.load_all(&settings).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Adapter(AdapterError::Unknown { slot: "message", .. })
        ));
    }

    #[test]
    fn configured_nlu_without_a_factory_fails() {
        let mut registry = AdapterRegistry::new();
        let settings = Settings {
            nlu_adapter: Some("oracle".to_string()),
            ..Default::default()
        };
        let err = registry.load_all(&settings).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Adapter(AdapterError::Unknown { slot: "nlu", .. })
        ));
    }

    #[test]
    fn unload_keeps_factories() {
        let mut registry = AdapterRegistry::new();
        registry.load_all(&Settings::default()).unwrap();
        registry.unload_all();
        assert!(registry.message().is_none());
        registry.load_all(&Settings::default()).unwrap();
        assert!(registry.message().is_some());
    }
}
