use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus};

pub const ENFORCED_CONFIG_LEVEL_GLOBAL: &str = "global";
pub const ENFORCED_CONFIG_LEVEL_NAMESPACE: &str = "namespace";
pub const ENFORCED_CONFIG_LEVEL_RESOURCE: &str = "resource";
pub const ENFORCED_CONFIG_LEVELS: [&str; 3] = [
    ENFORCED_CONFIG_LEVEL_GLOBAL,
    ENFORCED_CONFIG_LEVEL_NAMESPACE,
    ENFORCED_CONFIG_LEVEL_RESOURCE,
];

/// Upper bound for `ttlSecondsAfterFinished` when no global cap is configured (30 days).
pub const MAX_TTL_SECONDS_AFTER_FINISHED: i32 = 2_592_000;

pub const PRUNER_CONFIG_MAP_NAME: &str = "tekton-pruner-default-spec";
pub const PRUNER_NAMESPACE_CONFIG_MAP_NAME: &str = "tekton-pruner-namespace-spec";
pub const PRUNER_GLOBAL_CONFIG_KEY: &str = "global-config";
pub const PRUNER_NAMESPACE_CONFIG_KEY: &str = "ns-config";

/// The event based pruner, distinct from the cron pruner configured on `TektonConfig.spec.pruner`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonPruner", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus")]
pub struct TektonPrunerSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub pruner: Pruner,
    #[serde(default, skip_serializing_if = "GlobalConfig::is_empty")]
    pub config: GlobalConfig,
}

tekton_component!(TektonPruner, ComponentKind::Pruner, pruner.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Pruner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

impl Pruner {
    /// Unset counts as disabled: the event pruner is opt-in.
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(true)
    }
}

/// Retention settings shared by the global block and each namespace block.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct PrunerConfig {
    #[serde(rename = "enforcedConfigLevel", default, skip_serializing_if = "Option::is_none")]
    pub enforced_config_level: Option<String>,
    #[serde(rename = "ttlSecondsAfterFinished", default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    #[serde(rename = "successfulHistoryLimit", default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<i32>,
    #[serde(rename = "failedHistoryLimit", default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<i32>,
    #[serde(rename = "historyLimit", default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<i32>,
}

impl PrunerConfig {
    /// Effective limit for successful runs; `historyLimit` is the fallback.
    pub fn successful_limit(&self) -> Option<i32> {
        self.successful_history_limit.or(self.history_limit)
    }

    pub fn failed_limit(&self) -> Option<i32> {
        self.failed_history_limit.or(self.history_limit)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct GlobalConfig {
    #[serde(flatten)]
    pub defaults: PrunerConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, PrunerConfig>,
}

impl GlobalConfig {
    pub fn is_empty(&self) -> bool {
        self == &GlobalConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_config_reads_the_pruner_yaml_shape() {
        let config: GlobalConfig = serde_yaml::from_str(
            "enforcedConfigLevel: namespace\n\
             ttlSecondsAfterFinished: 3600\n\
             historyLimit: 10\n\
             namespaces:\n  \
               team-a:\n    \
                 successfulHistoryLimit: 5\n",
        )
        .unwrap();

        assert_eq!(config.defaults.enforced_config_level.as_deref(), Some("namespace"));
        assert_eq!(config.defaults.successful_limit(), Some(10));
        assert_eq!(config.namespaces["team-a"].successful_limit(), Some(5));
        assert_eq!(config.namespaces["team-a"].failed_limit(), None);
    }

    #[test]
    fn event_pruner_is_opt_in() {
        assert!(Pruner::default().is_disabled());
        assert!(!Pruner { disabled: Some(false), ..Default::default() }.is_disabled());
    }
}
