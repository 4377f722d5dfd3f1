use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Config};

pub const ALLOWED_STORAGES: [&str; 6] = ["tekton", "oci", "gcs", "docdb", "grafeas", "kafka"];
pub const ALLOWED_SIGNERS: [&str; 2] = ["x509", "kms"];
pub const ALLOWED_TRANSPARENCY: [&str; 3] = ["true", "false", "manual"];
pub const FORMAT_IN_TOTO: &str = "in-toto";
pub const FORMAT_SIMPLE_SIGNING: &str = "simplesigning";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonChain", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus", shortname = "tc")]
pub struct TektonChainSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
}

tekton_component!(TektonChain, ComponentKind::Chain, chain.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Chain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(flatten)]
    pub properties: ChainProperties,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

impl Chain {
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

/// Keys rendered into the `chains-config` ConfigMap.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ChainProperties {
    #[serde(rename = "artifacts.taskrun.format", default, skip_serializing_if = "Option::is_none")]
    pub taskrun_format: Option<String>,
    #[serde(rename = "artifacts.taskrun.storage", default, skip_serializing_if = "Option::is_none")]
    pub taskrun_storage: Option<String>,
    #[serde(rename = "artifacts.taskrun.signer", default, skip_serializing_if = "Option::is_none")]
    pub taskrun_signer: Option<String>,
    #[serde(rename = "artifacts.pipelinerun.format", default, skip_serializing_if = "Option::is_none")]
    pub pipelinerun_format: Option<String>,
    #[serde(rename = "artifacts.pipelinerun.storage", default, skip_serializing_if = "Option::is_none")]
    pub pipelinerun_storage: Option<String>,
    #[serde(rename = "artifacts.pipelinerun.signer", default, skip_serializing_if = "Option::is_none")]
    pub pipelinerun_signer: Option<String>,
    #[serde(rename = "artifacts.oci.format", default, skip_serializing_if = "Option::is_none")]
    pub oci_format: Option<String>,
    #[serde(rename = "artifacts.oci.storage", default, skip_serializing_if = "Option::is_none")]
    pub oci_storage: Option<String>,
    #[serde(rename = "artifacts.oci.signer", default, skip_serializing_if = "Option::is_none")]
    pub oci_signer: Option<String>,
    #[serde(rename = "storage.oci.repository", default, skip_serializing_if = "Option::is_none")]
    pub storage_oci_repository: Option<String>,
    #[serde(rename = "transparency.enabled", default, skip_serializing_if = "Option::is_none")]
    pub transparency_enabled: Option<String>,
    #[serde(rename = "transparency.url", default, skip_serializing_if = "Option::is_none")]
    pub transparency_url: Option<String>,
    #[serde(rename = "builder.id", default, skip_serializing_if = "Option::is_none")]
    pub builder_id: Option<String>,
    #[serde(rename = "signers.x509.fulcio.enabled", default, skip_serializing_if = "Option::is_none")]
    pub x509_fulcio_enabled: Option<bool>,
}
