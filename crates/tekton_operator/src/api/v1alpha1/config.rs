use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::addon::Addon;
use super::chain::Chain;
use super::dashboard::Dashboard;
use super::hub::Hub;
use super::pipeline::Pipeline;
use super::pipelines_as_code::PipelinesAsCode;
use super::pruner::{GlobalConfig, Pruner};
use super::result::Results;
use super::scheduler::Scheduler;
use super::trigger::Trigger;
use super::{tekton_component, AsComponentStatus, CommonSpec, ComponentKind, ComponentStatus, Config, Param};

pub const PRUNE_RESOURCES: [&str; 2] = ["taskrun", "pipelinerun"];
pub const DEFAULT_SCC: &str = "pipelines-scc";

/// The top-level resource. Everything else is derived from it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonConfig", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "TektonConfigStatus", shortname = "tcfg")]
#[kube(
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
pub struct TektonConfigSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
    #[serde(default)]
    pub pruner: Prune,
    #[serde(default, skip_serializing_if = "Addon::is_empty")]
    pub addon: Addon,
    #[serde(default, skip_serializing_if = "Hub::is_empty")]
    pub hub: Hub,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub dashboard: Dashboard,
    #[serde(default)]
    pub chain: Chain,
    #[serde(default)]
    pub result: Results,
    #[serde(default)]
    pub tektonpruner: EventPruner,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Platforms::is_empty")]
    pub platforms: Platforms,
}

tekton_component!(TektonConfig, ComponentKind::Config);

/// Schedule of the cron based pruner.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Prune {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<u32>,
    #[serde(rename = "keep-since", default, skip_serializing_if = "Option::is_none")]
    pub keep_since: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// `spec.tektonpruner`: the event pruner switch plus its retention settings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct EventPruner {
    #[serde(flatten)]
    pub pruner: Pruner,
    #[serde(default, skip_serializing_if = "GlobalConfig::is_empty")]
    pub config: GlobalConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Platforms {
    #[serde(default, skip_serializing_if = "OpenShift::is_empty")]
    pub openshift: OpenShift,
}

impl Platforms {
    pub fn is_empty(&self) -> bool {
        self.openshift.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OpenShift {
    #[serde(rename = "pipelinesAsCode", default, skip_serializing_if = "Option::is_none")]
    pub pipelines_as_code: Option<PipelinesAsCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scc: Option<Scc>,
}

impl OpenShift {
    pub fn is_empty(&self) -> bool {
        self == &OpenShift::default()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Scc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "maxAllowed", default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TektonConfigStatus {
    #[serde(flatten)]
    pub common: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl AsComponentStatus for TektonConfigStatus {
    fn as_component(&self) -> &ComponentStatus {
        &self.common
    }
    fn as_component_mut(&mut self) -> &mut ComponentStatus {
        &mut self.common
    }
}

impl TektonConfig {
    pub fn pipelines_as_code(&self) -> Option<&PipelinesAsCode> {
        self.spec.platforms.openshift.pipelines_as_code.as_ref()
    }
}
