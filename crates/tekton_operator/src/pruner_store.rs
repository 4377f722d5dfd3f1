//! Live view of the event pruner's ConfigMaps.
//!
//! The pruner component renders `tekton-pruner-default-spec` into its target namespace and
//! users edit `tekton-pruner-namespace-spec` next to it. [`watch_config_maps`] keeps a
//! [`PrunerConfigStore`] in sync with both, and the pruner reconciler reads the store to check
//! the namespace overrides against the live global limits.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use futures::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client, ResourceExt,
};
use tracing::{debug, info, warn};

use crate::api::v1alpha1::pruner::{
    GlobalConfig, PrunerConfig, ENFORCED_CONFIG_LEVEL_GLOBAL, PRUNER_CONFIG_MAP_NAME, PRUNER_GLOBAL_CONFIG_KEY,
    PRUNER_NAMESPACE_CONFIG_KEY, PRUNER_NAMESPACE_CONFIG_MAP_NAME,
};
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Clone, Default, PartialEq)]
struct Snapshot {
    global: Option<GlobalConfig>,
    namespaces: BTreeMap<String, PrunerConfig>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Namespace the pruner is installed into; only its ConfigMaps are read.
    target: Option<String>,
    /// Observed ConfigMaps, keyed by the namespace they live in.
    by_namespace: BTreeMap<String, Snapshot>,
}

/// Shared, lock guarded pruner configuration. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct PrunerConfigStore {
    inner: Arc<RwLock<Inner>>,
}

impl PrunerConfigStore {
    pub fn new() -> PrunerConfigStore {
        PrunerConfigStore::default()
    }

    fn read(&self) -> Snapshot {
        let read = |inner: &Inner| {
            inner
                .target
                .as_ref()
                .and_then(|ns| inner.by_namespace.get(ns))
                .cloned()
                .unwrap_or_default()
        };
        match self.inner.read() {
            Ok(guard) => read(&guard),
            Err(poisoned) => read(&poisoned.into_inner()),
        }
    }

    fn write(&self, update: impl FnOnce(&mut Inner)) {
        match self.inner.write() {
            Ok(mut guard) => update(&mut guard),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }

    /// Points the store at the namespace the pruner is installed into.
    pub fn set_target_namespace(&self, namespace: &str) {
        self.write(|inner| inner.target = Some(namespace.to_string()));
    }

    pub fn target_namespace(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.target.clone(),
            Err(poisoned) => poisoned.into_inner().target.clone(),
        }
    }

    /// The global config last observed in the target namespace, `None` until its ConfigMap is seen.
    pub fn global(&self) -> Option<GlobalConfig> {
        self.read().global
    }

    /// The global config with the namespace ConfigMap folded over its `namespaces` block.
    pub fn live_config(&self) -> GlobalConfig {
        let snapshot = self.read();
        let mut config = snapshot.global.unwrap_or_default();
        config.namespaces.extend(snapshot.namespaces);
        config
    }

    /// Effective settings for runs in `namespace`.
    ///
    /// With `enforcedConfigLevel: global` the namespace blocks are ignored. Otherwise the
    /// namespace ConfigMap wins over the `namespaces` block of the global config, and unset
    /// fields fall back to the global defaults.
    pub fn effective(&self, namespace: &str) -> PrunerConfig {
        let config = self.live_config();
        let defaults = config.defaults;
        if defaults.enforced_config_level.as_deref() == Some(ENFORCED_CONFIG_LEVEL_GLOBAL) {
            return defaults;
        }
        let Some(ns) = config.namespaces.get(namespace) else {
            return defaults;
        };
        PrunerConfig {
            enforced_config_level: ns.enforced_config_level.clone().or(defaults.enforced_config_level),
            ttl_seconds_after_finished: ns.ttl_seconds_after_finished.or(defaults.ttl_seconds_after_finished),
            successful_history_limit: ns.successful_history_limit.or(defaults.successful_history_limit),
            failed_history_limit: ns.failed_history_limit.or(defaults.failed_history_limit),
            history_limit: ns.history_limit.or(defaults.history_limit),
        }
    }

    /// Folds one observed ConfigMap into the store. Unrelated ConfigMaps are ignored.
    pub fn apply_config_map(&self, cm: &ConfigMap) -> Result<()> {
        let namespace = cm.namespace().unwrap_or_default();
        let data = cm.data.clone().unwrap_or_default();
        match cm.name_any().as_str() {
            PRUNER_CONFIG_MAP_NAME => {
                let global = parse_global_config(data.get(PRUNER_GLOBAL_CONFIG_KEY).map(String::as_str))?;
                self.write(|inner| inner.by_namespace.entry(namespace).or_default().global = Some(global));
            }
            PRUNER_NAMESPACE_CONFIG_MAP_NAME => {
                let namespaces = parse_namespace_config(data.get(PRUNER_NAMESPACE_CONFIG_KEY).map(String::as_str))?;
                self.write(|inner| inner.by_namespace.entry(namespace).or_default().namespaces = namespaces);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn remove_config_map(&self, namespace: &str, name: &str) {
        self.write(|inner| {
            let Some(snapshot) = inner.by_namespace.get_mut(namespace) else {
                return;
            };
            match name {
                PRUNER_CONFIG_MAP_NAME => snapshot.global = None,
                PRUNER_NAMESPACE_CONFIG_MAP_NAME => snapshot.namespaces.clear(),
                _ => {}
            }
        });
    }
}

pub fn parse_global_config(text: Option<&str>) -> Result<GlobalConfig> {
    match text.map(str::trim) {
        None | Some("") => Ok(GlobalConfig::default()),
        Some(text) => serde_yaml::from_str(text).map_err(|e| {
            Error::StdError(StdError::InvalidArgument(format!(
                "{PRUNER_CONFIG_MAP_NAME}/{PRUNER_GLOBAL_CONFIG_KEY}: {e}"
            )))
        }),
    }
}

pub fn parse_namespace_config(text: Option<&str>) -> Result<BTreeMap<String, PrunerConfig>> {
    match text.map(str::trim) {
        None | Some("") => Ok(BTreeMap::new()),
        Some(text) => serde_yaml::from_str(text).map_err(|e| {
            Error::StdError(StdError::InvalidArgument(format!(
                "{PRUNER_NAMESPACE_CONFIG_MAP_NAME}/{PRUNER_NAMESPACE_CONFIG_KEY}: {e}"
            )))
        }),
    }
}

/// Keeps `store` in sync with the pruner ConfigMaps of every namespace until the watches end.
///
/// The target namespace is only known once a pruner is reconciled, so both names are watched
/// cluster wide and the store picks the namespace it reads from.
pub async fn watch_config_maps(client: Client, store: PrunerConfigStore) {
    let api = Api::<ConfigMap>::all(client);
    info!("watching pruner config maps");

    let by_name = |name: &str| {
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        watcher(api.clone(), config).default_backoff().boxed()
    };
    let mut events = stream::select(by_name(PRUNER_CONFIG_MAP_NAME), by_name(PRUNER_NAMESPACE_CONFIG_MAP_NAME));
    loop {
        match events.try_next().await {
            Ok(Some(watcher::Event::Apply(cm) | watcher::Event::InitApply(cm))) => {
                if let Err(e) = store.apply_config_map(&cm) {
                    warn!("ignoring pruner config map {}: {e}", cm.name_any());
                } else {
                    debug!("pruner config map {} observed", cm.name_any());
                }
            }
            Ok(Some(watcher::Event::Delete(cm))) => {
                store.remove_config_map(&cm.namespace().unwrap_or_default(), &cm.name_any())
            }
            Ok(Some(watcher::Event::Init | watcher::Event::InitDone)) => {}
            Ok(None) => break,
            Err(e) => warn!("pruner config map watch failed: {e}"),
        }
    }
}
