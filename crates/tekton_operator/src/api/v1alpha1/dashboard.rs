use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Config};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonDashboard", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus", shortname = "td")]
pub struct TektonDashboardSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub dashboard: Dashboard,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
}

tekton_component!(TektonDashboard, ComponentKind::Dashboard, dashboard.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Dashboard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    #[serde(rename = "external-logs", default, skip_serializing_if = "Option::is_none")]
    pub external_logs: Option<String>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}
