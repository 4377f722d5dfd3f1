use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Param};

pub const CLUSTER_TASKS_PARAM: &str = "clusterTasks";
pub const COMMUNITY_CLUSTER_TASKS_PARAM: &str = "communityClusterTasks";
pub const PIPELINE_TEMPLATES_PARAM: &str = "pipelineTemplates";
pub const RESOLVER_TASKS_PARAM: &str = "resolverTasks";
pub const RESOLVER_STEP_ACTIONS_PARAM: &str = "resolverStepActions";
pub const COMMUNITY_RESOLVER_TASKS_PARAM: &str = "communityResolverTasks";

/// Accepted add-on params with their allowed values and default.
pub const ADDON_PARAMS: [(&str, &[&str], &str); 6] = [
    (CLUSTER_TASKS_PARAM, &["true", "false"], "true"),
    (COMMUNITY_CLUSTER_TASKS_PARAM, &["true", "false"], "true"),
    (PIPELINE_TEMPLATES_PARAM, &["true", "false"], "true"),
    (RESOLVER_TASKS_PARAM, &["true", "false"], "true"),
    (RESOLVER_STEP_ACTIONS_PARAM, &["true", "false"], "true"),
    (COMMUNITY_RESOLVER_TASKS_PARAM, &["true", "false"], "true"),
];

/// Params dropped by the pre-upgrade scrub and no longer defaulted.
pub const DEPRECATED_ADDON_PARAMS: [&str; 2] = [CLUSTER_TASKS_PARAM, COMMUNITY_CLUSTER_TASKS_PARAM];

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonAddon", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus")]
pub struct TektonAddonSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub addon: Addon,
}

tekton_component!(TektonAddon, ComponentKind::Addon, addon.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Addon {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(rename = "enablePAC", default, skip_serializing_if = "Option::is_none")]
    pub enable_pac: Option<bool>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

impl Addon {
    pub fn is_empty(&self) -> bool {
        self == &Addon::default()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value.as_str())
    }
}
