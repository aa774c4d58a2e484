//! Add-on registry.
//!
//! Add-ons are named extensions notified of every applied change whose key
//! starts with their configured prefix. Installation is create-once: a
//! name, once taken, is never replaced.

use crate::cache::EventSink;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roster_core::{AddOnError, KvEvent, Revision};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Change callback of an add-on.
pub type OnEvent = Arc<dyn Fn(&KvEvent) + Send + Sync>;

/// Subscription of an add-on: key prefix and callback.
#[derive(Clone)]
pub struct AddOnConfig {
    /// Empty matches every key.
    pub prefix: Vec<u8>,
    pub on_event: OnEvent,
}

impl AddOnConfig {
    pub fn new(prefix: impl Into<Vec<u8>>, on_event: impl Fn(&KvEvent) + Send + Sync + 'static) -> Self {
        Self {
            prefix: prefix.into(),
            on_event: Arc::new(on_event),
        }
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }
}

impl fmt::Debug for AddOnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddOnConfig")
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .finish_non_exhaustive()
    }
}

pub trait AddOn: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> Option<&AddOnConfig>;
}

/// Add-on defined by a name and an optional config.
#[derive(Debug, Clone)]
pub struct SimpleAddOn {
    name: String,
    config: Option<AddOnConfig>,
}

impl SimpleAddOn {
    pub fn new(name: impl Into<String>, config: Option<AddOnConfig>) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl AddOn for SimpleAddOn {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> Option<&AddOnConfig> {
        self.config.as_ref()
    }
}

#[derive(Default)]
pub struct AddOnRegistry {
    addons: DashMap<String, Arc<dyn AddOn>>,
    revision: AtomicI64,
}

impl AddOnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an add-on; the returned id is its name.
    pub fn install(&self, addon: Option<Arc<dyn AddOn>>) -> Result<String, AddOnError> {
        let addon = addon.ok_or_else(|| AddOnError::InvalidAddOn {
            reason: "add-on is absent".to_string(),
        })?;
        let name = addon.name().to_string();
        if name.is_empty() {
            return Err(AddOnError::InvalidAddOn {
                reason: "add-on name is empty".to_string(),
            });
        }
        if addon.config().is_none() {
            return Err(AddOnError::InvalidAddOn {
                reason: format!("add-on {name} has no config"),
            });
        }

        match self.addons.entry(name.clone()) {
            Entry::Occupied(_) => Err(AddOnError::DuplicateAddOn { name }),
            Entry::Vacant(slot) => {
                slot.insert(addon);
                tracing::info!(addon = %name, "Add-on installed");
                Ok(name)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AddOn>> {
        self.addons.get(name).map(|a| Arc::clone(a.value()))
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// Highest revision delivered so far.
    pub fn revision(&self) -> Revision {
        self.revision.load(Ordering::SeqCst)
    }

    /// Advance the watermark and call every add-on whose prefix matches.
    pub fn notify(&self, event: &KvEvent) {
        self.revision.fetch_max(event.revision, Ordering::SeqCst);

        // Callbacks run outside the map's shard locks so they may install.
        let matching: Vec<OnEvent> = self
            .addons
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .config()
                    .filter(|cfg| cfg.matches(&event.kv.key))
                    .map(|cfg| Arc::clone(&cfg.on_event))
            })
            .collect();
        for on_event in matching {
            on_event(event);
        }
    }
}

impl EventSink for AddOnRegistry {
    fn on_events(&self, _type_name: &str, events: &[KvEvent]) {
        for event in events {
            self.notify(event);
        }
    }
}
