use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Config};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonTrigger", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus", shortname = "tt")]
pub struct TektonTriggerSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
}

tekton_component!(TektonTrigger, ComponentKind::Trigger, trigger.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Trigger {
    #[serde(flatten)]
    pub properties: TriggersProperties,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TriggersProperties {
    #[serde(rename = "enable-api-fields", default, skip_serializing_if = "Option::is_none")]
    pub enable_api_fields: Option<String>,
    #[serde(rename = "default-service-account", default, skip_serializing_if = "Option::is_none")]
    pub default_service_account: Option<String>,
}
