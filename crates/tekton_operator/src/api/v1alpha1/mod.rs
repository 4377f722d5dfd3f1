//! `operator.tekton.dev/v1alpha1` resources.
//!
//! Every component is a cluster-scoped custom resource with a well-known singleton name. The
//! [`TektonComponent`] trait gives the reconcilers uniform access to the common spec block, the
//! additional options overlay and the shared status shape.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::ClusterResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::api::{conditions_schema, preserve_unknown_fields, preserve_unknown_list};

pub mod addon;
pub mod chain;
pub mod config;
pub mod dashboard;
pub mod hub;
pub mod installer_set;
pub mod manual_approval_gate;
pub mod multicluster_proxy_aae;
pub mod pipeline;
pub mod pipelines_as_code;
pub mod pruner;
pub mod result;
pub mod scheduler;
pub mod syncer_service;
pub mod trigger;

pub use addon::{TektonAddon, TektonAddonSpec};
pub use chain::{TektonChain, TektonChainSpec};
pub use config::{TektonConfig, TektonConfigSpec, TektonConfigStatus};
pub use dashboard::{TektonDashboard, TektonDashboardSpec};
pub use hub::{TektonHub, TektonHubSpec, TektonHubStatus};
pub use installer_set::{TektonInstallerSet, TektonInstallerSetSpec, TektonInstallerSetStatus};
pub use manual_approval_gate::{ManualApprovalGate, ManualApprovalGateSpec};
pub use multicluster_proxy_aae::{TektonMulticlusterProxyAAE, TektonMulticlusterProxyAAESpec};
pub use pipeline::{TektonPipeline, TektonPipelineSpec};
pub use pipelines_as_code::{OpenShiftPipelinesAsCode, OpenShiftPipelinesAsCodeSpec};
pub use pruner::{TektonPruner, TektonPrunerSpec};
pub use result::{TektonResult, TektonResultSpec};
pub use scheduler::{TektonScheduler, TektonSchedulerSpec};
pub use syncer_service::{SyncerService, SyncerServiceSpec};
pub use trigger::{TektonTrigger, TektonTriggerSpec};

pub const FINALIZER: &str = "operator.tekton.dev/finalizer";

pub const PROFILE_LITE: &str = "lite";
pub const PROFILE_BASIC: &str = "basic";
pub const PROFILE_ALL: &str = "all";
pub const PROFILES: [&str; 3] = [PROFILE_LITE, PROFILE_BASIC, PROFILE_ALL];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Config,
    Pipeline,
    Trigger,
    Dashboard,
    Chain,
    Hub,
    Result,
    ManualApprovalGate,
    Addon,
    Pruner,
    Scheduler,
    MulticlusterProxyAae,
    SyncerService,
    PipelinesAsCode,
    InstallerSet,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 15] = [
        ComponentKind::Config,
        ComponentKind::Pipeline,
        ComponentKind::Trigger,
        ComponentKind::Dashboard,
        ComponentKind::Chain,
        ComponentKind::Hub,
        ComponentKind::Result,
        ComponentKind::ManualApprovalGate,
        ComponentKind::Addon,
        ComponentKind::Pruner,
        ComponentKind::Scheduler,
        ComponentKind::MulticlusterProxyAae,
        ComponentKind::SyncerService,
        ComponentKind::PipelinesAsCode,
        ComponentKind::InstallerSet,
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ComponentKind::Config => "TektonConfig",
            ComponentKind::Pipeline => "TektonPipeline",
            ComponentKind::Trigger => "TektonTrigger",
            ComponentKind::Dashboard => "TektonDashboard",
            ComponentKind::Chain => "TektonChain",
            ComponentKind::Hub => "TektonHub",
            ComponentKind::Result => "TektonResult",
            ComponentKind::ManualApprovalGate => "ManualApprovalGate",
            ComponentKind::Addon => "TektonAddon",
            ComponentKind::Pruner => "TektonPruner",
            ComponentKind::Scheduler => "TektonScheduler",
            ComponentKind::MulticlusterProxyAae => "TektonMulticlusterProxyAAE",
            ComponentKind::SyncerService => "SyncerService",
            ComponentKind::PipelinesAsCode => "OpenShiftPipelinesAsCode",
            ComponentKind::InstallerSet => "TektonInstallerSet",
        }
    }

    pub fn from_kind(kind: &str) -> Option<ComponentKind> {
        ComponentKind::ALL.into_iter().find(|k| k.kind() == kind)
    }

    /// The only name an instance of this kind may carry. Installer-sets are not singletons.
    pub fn singleton_name(&self) -> Option<&'static str> {
        match self {
            ComponentKind::Config => Some("config"),
            ComponentKind::Pipeline => Some("pipeline"),
            ComponentKind::Trigger => Some("trigger"),
            ComponentKind::Dashboard => Some("dashboard"),
            ComponentKind::Chain => Some("chain"),
            ComponentKind::Hub => Some("hub"),
            ComponentKind::Result => Some("result"),
            ComponentKind::ManualApprovalGate => Some("manual-approval-gate"),
            ComponentKind::Addon => Some("addon"),
            ComponentKind::Pruner => Some("pruner"),
            ComponentKind::Scheduler => Some("scheduler"),
            ComponentKind::MulticlusterProxyAae => Some("multicluster-proxy-aae"),
            ComponentKind::SyncerService => Some("syncer-service"),
            ComponentKind::PipelinesAsCode => Some("pipelines-as-code"),
            ComponentKind::InstallerSet => None,
        }
    }

    /// Directory of the component's bundles under `KO_DATA_PATH`.
    pub fn manifest_dir(&self) -> &'static str {
        match self {
            ComponentKind::Config => "info",
            ComponentKind::Pipeline => "tekton-pipeline",
            ComponentKind::Trigger => "tekton-triggers",
            ComponentKind::Dashboard => "tekton-dashboard",
            ComponentKind::Chain => "tekton-chains",
            ComponentKind::Hub => "tekton-hub",
            ComponentKind::Result => "tekton-results",
            ComponentKind::ManualApprovalGate => "manual-approval-gate",
            ComponentKind::Addon => "tekton-addon",
            ComponentKind::Pruner => "tekton-pruner",
            ComponentKind::Scheduler => "tekton-kueue",
            ComponentKind::MulticlusterProxyAae => "multicluster-proxy-aae",
            ComponentKind::SyncerService => "syncer-service",
            ComponentKind::PipelinesAsCode => "pipelines-as-code",
            ComponentKind::InstallerSet => "",
        }
    }

    /// Short name used for installer-set names and the `<component>-version` ConfigMap.
    pub fn short_name(&self) -> &'static str {
        match self {
            ComponentKind::Config => "config",
            ComponentKind::Pipeline => "pipeline",
            ComponentKind::Trigger => "trigger",
            ComponentKind::Dashboard => "dashboard",
            ComponentKind::Chain => "chain",
            ComponentKind::Hub => "hub",
            ComponentKind::Result => "result",
            ComponentKind::ManualApprovalGate => "manualapprovalgate",
            ComponentKind::Addon => "addon",
            ComponentKind::Pruner => "pruner",
            ComponentKind::Scheduler => "scheduler",
            ComponentKind::MulticlusterProxyAae => "multicluster-proxy-aae",
            ComponentKind::SyncerService => "syncer-service",
            ComponentKind::PipelinesAsCode => "pipelinesascode",
            ComponentKind::InstallerSet => "installerset",
        }
    }

    /// Components that refuse to install until the pipeline component is ready.
    pub fn depends_on_pipeline(&self) -> bool {
        !matches!(
            self,
            ComponentKind::Config | ComponentKind::Pipeline | ComponentKind::Hub | ComponentKind::InstallerSet
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// Spec block shared by every component.
///
/// The wire shape is the plain `{"targetNamespace": ...}` object; the optional bundle pin and
/// registry overrides ride along in the same flattened map.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CommonSpec {
    #[serde(rename = "targetNamespace", default)]
    pub target_namespace: String,
    /// Pins the bundle version instead of the newest one shipped with the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Registry>,
}

impl CommonSpec {
    pub fn new(target_namespace: impl Into<String>) -> Self {
        CommonSpec {
            target_namespace: target_namespace.into(),
            ..Default::default()
        }
    }
}

/// Image overrides keyed by container name.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Registry {
    #[serde(rename = "override", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
}

/// Overlays applied on top of the generated manifests, keyed by object name.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AdditionalOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(rename = "configMaps", default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config_maps: BTreeMap<String, ConfigMap>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub deployments: BTreeMap<String, Deployment>,
    #[serde(rename = "statefulSets", default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub stateful_sets: BTreeMap<String, StatefulSet>,
    #[serde(rename = "horizontalPodAutoscalers", default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub horizontal_pod_autoscalers: BTreeMap<String, HorizontalPodAutoscaler>,
    #[serde(rename = "webhookConfigurationOptions", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub webhook_configuration_options: BTreeMap<String, WebhookConfigurationOptions>,
}

impl AdditionalOptions {
    pub fn is_empty(&self) -> bool {
        self == &AdditionalOptions::default()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WebhookConfigurationOptions {
    #[serde(rename = "failurePolicy", default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,
    #[serde(rename = "timeoutSeconds", default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(rename = "sideEffects", default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,
}

/// Scheduling constraints applied to every workload of a component.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Config {
    #[serde(rename = "nodeSelector", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub tolerations: Vec<Toleration>,
    #[serde(rename = "priorityClassName", default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(rename = "highAvailability", default, skip_serializing_if = "Option::is_none")]
    pub high_availability: Option<HighAvailability>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self == &Config::default()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HighAvailability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// Status block shared by every component.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ComponentStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(rename = "observedGeneration", default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Name of the installer-set holding the main bundle.
    #[serde(rename = "tektonInstallerSet", default, skip_serializing_if = "Option::is_none")]
    pub tekton_installer_set: Option<String>,
    /// Installer-set names of the secondary stages, keyed by stage.
    #[serde(rename = "tektonInstallerSets", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tekton_installer_sets: BTreeMap<String, String>,
}

impl ComponentStatus {
    pub fn installer_set(&self, stage: &str) -> Option<&str> {
        if stage == MAIN_STAGE {
            self.tekton_installer_set.as_deref()
        } else {
            self.tekton_installer_sets.get(stage).map(String::as_str)
        }
    }

    pub fn set_installer_set(&mut self, stage: &str, name: Option<String>) {
        if stage == MAIN_STAGE {
            self.tekton_installer_set = name;
        } else {
            match name {
                Some(name) => {
                    self.tekton_installer_sets.insert(stage.to_string(), name);
                }
                None => {
                    self.tekton_installer_sets.remove(stage);
                }
            }
        }
    }
}

/// Stage name of a component's primary installer-set.
pub const MAIN_STAGE: &str = "main";

/// Status types that embed the shared [`ComponentStatus`].
pub trait AsComponentStatus: Default {
    fn as_component(&self) -> &ComponentStatus;
    fn as_component_mut(&mut self) -> &mut ComponentStatus;
}

impl AsComponentStatus for ComponentStatus {
    fn as_component(&self) -> &ComponentStatus {
        self
    }
    fn as_component_mut(&mut self) -> &mut ComponentStatus {
        self
    }
}

/// Uniform view over every component resource.
pub trait TektonComponent:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + PartialEq
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ComponentKind;

    fn common(&self) -> &CommonSpec;

    fn options(&self) -> Option<&AdditionalOptions>;

    fn options_mut(&mut self) -> Option<&mut AdditionalOptions>;

    fn component_status(&self) -> Option<&ComponentStatus>;

    fn component_status_mut(&mut self) -> &mut ComponentStatus;

    fn target_namespace(&self) -> &str {
        &self.common().target_namespace
    }

    fn conditions(&self) -> &[Condition] {
        self.component_status().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}

macro_rules! tekton_component {
    (@status $ty:ident, $kind:expr) => {
        const KIND: $crate::api::v1alpha1::ComponentKind = $kind;

        fn common(&self) -> &$crate::api::v1alpha1::CommonSpec {
            &self.spec.common
        }

        fn component_status(&self) -> Option<&$crate::api::v1alpha1::ComponentStatus> {
            self.status
                .as_ref()
                .map($crate::api::v1alpha1::AsComponentStatus::as_component)
        }

        fn component_status_mut(&mut self) -> &mut $crate::api::v1alpha1::ComponentStatus {
            $crate::api::v1alpha1::AsComponentStatus::as_component_mut(
                self.status.get_or_insert_with(Default::default),
            )
        }
    };
    ($ty:ident, $kind:expr) => {
        impl $crate::api::v1alpha1::TektonComponent for $ty {
            $crate::api::v1alpha1::tekton_component!(@status $ty, $kind);

            fn options(&self) -> Option<&$crate::api::v1alpha1::AdditionalOptions> {
                None
            }

            fn options_mut(&mut self) -> Option<&mut $crate::api::v1alpha1::AdditionalOptions> {
                None
            }
        }
    };
    ($ty:ident, $kind:expr, $($field:ident).+) => {
        impl $crate::api::v1alpha1::TektonComponent for $ty {
            $crate::api::v1alpha1::tekton_component!(@status $ty, $kind);

            fn options(&self) -> Option<&$crate::api::v1alpha1::AdditionalOptions> {
                Some(&self.spec.$($field).+)
            }

            fn options_mut(&mut self) -> Option<&mut $crate::api::v1alpha1::AdditionalOptions> {
                Some(&mut self.spec.$($field).+)
            }
        }
    };
}
pub(crate) use tekton_component;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_kind(kind.kind()), Some(kind));
        }
        assert_eq!(ComponentKind::InstallerSet.singleton_name(), None);
        assert_eq!(ComponentKind::SyncerService.singleton_name(), Some("syncer-service"));
    }

    #[test]
    fn common_spec_accepts_the_plain_shape() {
        let spec: CommonSpec = serde_json::from_value(serde_json::json!({
            "targetNamespace": "tekton-pipelines"
        }))
        .unwrap();
        assert_eq!(spec, CommonSpec::new("tekton-pipelines"));
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            serde_json::json!({"targetNamespace": "tekton-pipelines"})
        );
    }

    #[test]
    fn options_clone_shares_nothing() {
        let mut original = AdditionalOptions::default();
        original
            .webhook_configuration_options
            .insert("validation.webhook.pipeline.tekton.dev".into(), WebhookConfigurationOptions {
                failure_policy: Some("Fail".into()),
                ..Default::default()
            });
        let mut copy = original.clone();
        assert_eq!(copy, original);

        copy.webhook_configuration_options
            .values_mut()
            .for_each(|o| o.failure_policy = Some("Ignore".into()));
        assert_eq!(
            original.webhook_configuration_options["validation.webhook.pipeline.tekton.dev"]
                .failure_policy
                .as_deref(),
            Some("Fail")
        );
    }
}
