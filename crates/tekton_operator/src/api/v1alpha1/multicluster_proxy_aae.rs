use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "TektonMulticlusterProxyAAE",
    group = "operator.tekton.dev",
    version = "v1alpha1",
    derive = "PartialEq"
)]
#[kube(status = "ComponentStatus")]
pub struct TektonMulticlusterProxyAAESpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

tekton_component!(TektonMulticlusterProxyAAE, ComponentKind::MulticlusterProxyAae, options);
