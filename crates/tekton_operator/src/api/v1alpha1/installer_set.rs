use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::{conditions_schema, preserve_unknown_list};

/// Installer-set types produced for cluster tasks, which are removed on upgrade.
pub const DEPRECATED_CLUSTER_TASK_TYPES: [&str; 3] =
    ["custom-clustertask", "custom-communityclustertask", "custom-versionedclustertask"];

/// Installer-sets carrying one version of the resolver tasks; only the newest few are kept.
pub const VERSIONED_RESOLVER_TASK_TYPE: &str = "custom-versionedresolvertask";

/// Installer-sets carrying one version of the resolver step actions; only the newest few are kept.
pub const VERSIONED_RESOLVER_STEP_ACTION_TYPE: &str = "custom-versionedresolverstepaction";

/// One batch of manifests applied and tracked as a unit.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonInstallerSet", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "TektonInstallerSetStatus", shortname = "tis")]
pub struct TektonInstallerSetSpec {
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TektonInstallerSetStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    #[serde(rename = "observedGeneration", default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TektonInstallerSet {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}
