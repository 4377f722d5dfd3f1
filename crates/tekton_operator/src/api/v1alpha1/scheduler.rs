use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus};

pub const MULTI_CLUSTER_ROLE_HUB: &str = "Hub";
pub const MULTI_CLUSTER_ROLE_SPOKE: &str = "Spoke";
pub const MULTI_CLUSTER_ROLES: [&str; 2] = [MULTI_CLUSTER_ROLE_HUB, MULTI_CLUSTER_ROLE_SPOKE];

pub const DEFAULT_QUEUE_NAME: &str = "pipelines-queue";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonScheduler", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus")]
pub struct TektonSchedulerSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub scheduler: Scheduler,
}

tekton_component!(TektonScheduler, ComponentKind::Scheduler, scheduler.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Scheduler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    /// Rendered verbatim as the `config.yaml` key of the queue controller's ConfigMap.
    #[serde(rename = "config.yaml", default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SchedulerConfig>,
    #[serde(flatten)]
    pub multi_cluster: MultiClusterConfig,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

impl Scheduler {
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }

    /// Syncer and proxy run only on the hub of an enabled multi-cluster setup.
    pub fn is_multi_cluster_hub(&self) -> bool {
        !self.is_disabled()
            && !self.multi_cluster.is_disabled()
            && self.multi_cluster.role.as_deref() == Some(MULTI_CLUSTER_ROLE_HUB)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SchedulerConfig {
    #[serde(rename = "queueName", default)]
    pub queue_name: String,
    #[serde(rename = "multiClusterEnabled", default)]
    pub multi_cluster_enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MultiClusterConfig {
    #[serde(rename = "multi-cluster-disabled", default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(rename = "multi-cluster-role", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl MultiClusterConfig {
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(true)
    }
}
