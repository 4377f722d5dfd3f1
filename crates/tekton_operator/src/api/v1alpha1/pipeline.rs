use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Config};

pub const API_FIELDS_STABLE: &str = "stable";
pub const API_FIELDS_BETA: &str = "beta";
pub const API_FIELDS_ALPHA: &str = "alpha";
pub const ALLOWED_API_FIELDS: [&str; 3] = [API_FIELDS_STABLE, API_FIELDS_BETA, API_FIELDS_ALPHA];

pub const NO_MATCH_POLICY_FAIL: &str = "fail";
pub const NO_MATCH_POLICY_WARN: &str = "warn";
pub const NO_MATCH_POLICY_IGNORE: &str = "ignore";
pub const ALLOWED_NO_MATCH_POLICIES: [&str; 3] =
    [NO_MATCH_POLICY_FAIL, NO_MATCH_POLICY_WARN, NO_MATCH_POLICY_IGNORE];

/// Results larger than this are rejected by the pipelines controller.
pub const MAX_RESULT_SIZE_LIMIT: u32 = 1_572_864;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonPipeline", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus", shortname = "tp")]
pub struct TektonPipelineSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub pipeline: Pipeline,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
}

tekton_component!(TektonPipeline, ComponentKind::Pipeline, pipeline.options);

/// Pipeline settings, embedded both in `TektonPipeline` and in `TektonConfig.spec.pipeline`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Pipeline {
    #[serde(flatten)]
    pub properties: PipelineProperties,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

/// Feature flags rendered into the `feature-flags` and `config-defaults` ConfigMaps.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PipelineProperties {
    #[serde(rename = "disable-affinity-assistant", default, skip_serializing_if = "Option::is_none")]
    pub disable_affinity_assistant: Option<bool>,
    /// Replaces the affinity assistant; any value puts the pipelines controller in coexistence mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coschedule: Option<String>,
    #[serde(rename = "disable-home-env-overwrite", default, skip_serializing_if = "Option::is_none")]
    pub disable_home_env_overwrite: Option<bool>,
    #[serde(
        rename = "disable-working-directory-overwrite",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub disable_working_directory_overwrite: Option<bool>,
    #[serde(rename = "disable-creds-init", default, skip_serializing_if = "Option::is_none")]
    pub disable_creds_init: Option<bool>,
    #[serde(rename = "await-sidecar-readiness", default, skip_serializing_if = "Option::is_none")]
    pub await_sidecar_readiness: Option<bool>,
    #[serde(
        rename = "running-in-environment-with-injected-sidecars",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub running_in_environment_with_injected_sidecars: Option<bool>,
    #[serde(
        rename = "require-git-ssh-secret-known-hosts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub require_git_ssh_secret_known_hosts: Option<bool>,
    #[serde(rename = "enable-tekton-oci-bundles", default, skip_serializing_if = "Option::is_none")]
    pub enable_tekton_oci_bundles: Option<bool>,
    #[serde(rename = "enable-custom-tasks", default, skip_serializing_if = "Option::is_none")]
    pub enable_custom_tasks: Option<bool>,
    #[serde(rename = "enable-api-fields", default, skip_serializing_if = "Option::is_none")]
    pub enable_api_fields: Option<String>,
    #[serde(rename = "enable-step-actions", default, skip_serializing_if = "Option::is_none")]
    pub enable_step_actions: Option<bool>,
    #[serde(
        rename = "trusted-resources-verification-no-match-policy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub verification_no_match_policy: Option<String>,
    #[serde(rename = "default-timeout-minutes", default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_minutes: Option<u32>,
    #[serde(rename = "default-service-account", default, skip_serializing_if = "Option::is_none")]
    pub default_service_account: Option<String>,
    #[serde(rename = "max-result-size", default, skip_serializing_if = "Option::is_none")]
    pub max_result_size: Option<u32>,
    #[serde(rename = "metrics.taskrun.level", default, skip_serializing_if = "Option::is_none")]
    pub metrics_taskrun_level: Option<String>,
    #[serde(rename = "metrics.pipelinerun.level", default, skip_serializing_if = "Option::is_none")]
    pub metrics_pipelinerun_level: Option<String>,
    #[serde(default, skip_serializing_if = "PipelineResolvers::is_empty")]
    pub resolvers: PipelineResolvers,
    #[serde(default, skip_serializing_if = "PipelinePerformanceProperties::is_empty")]
    pub performance: PipelinePerformanceProperties,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PipelineResolvers {
    #[serde(rename = "enable-bundles-resolver", default, skip_serializing_if = "Option::is_none")]
    pub enable_bundles_resolver: Option<bool>,
    #[serde(rename = "enable-cluster-resolver", default, skip_serializing_if = "Option::is_none")]
    pub enable_cluster_resolver: Option<bool>,
    #[serde(rename = "enable-git-resolver", default, skip_serializing_if = "Option::is_none")]
    pub enable_git_resolver: Option<bool>,
    #[serde(rename = "enable-hub-resolver", default, skip_serializing_if = "Option::is_none")]
    pub enable_hub_resolver: Option<bool>,
}

impl PipelineResolvers {
    pub fn is_empty(&self) -> bool {
        self == &PipelineResolvers::default()
    }
}

/// Leader-election and client tuning of the pipelines controller.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PipelinePerformanceProperties {
    #[serde(rename = "disable-ha", default, skip_serializing_if = "Option::is_none")]
    pub disable_ha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(rename = "statefulset-ordinals", default, skip_serializing_if = "Option::is_none")]
    pub statefulset_ordinals: Option<bool>,
    #[serde(rename = "threads-per-controller", default, skip_serializing_if = "Option::is_none")]
    pub threads_per_controller: Option<u32>,
    #[serde(rename = "kube-api-qps", default, skip_serializing_if = "Option::is_none")]
    pub kube_api_qps: Option<f32>,
    #[serde(rename = "kube-api-burst", default, skip_serializing_if = "Option::is_none")]
    pub kube_api_burst: Option<u32>,
}

impl PipelinePerformanceProperties {
    pub fn is_empty(&self) -> bool {
        self == &PipelinePerformanceProperties::default()
    }
}
