use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, CommonSpec, ComponentKind, ComponentStatus, Config};

pub const ADDITIONAL_CONTROLLER_STAGE: &str = "additional-controller";

/// Maximum length of an additional controller name; derived object names append suffixes.
pub const MAX_ADDITIONAL_CONTROLLER_NAME: usize = 25;

pub const HUB_URL_KEY: &str = "hub-url";
pub const HUB_CATALOG_TYPE_KEY: &str = "hub-catalog-type";
pub const ERROR_DETECTION_REGEXP_KEY: &str = "error-detection-simple-regexp";
pub const CUSTOM_CONSOLE_URL_KEY: &str = "custom-console-url";
pub const CUSTOM_CONSOLE_PR_DETAILS_KEY: &str = "custom-console-url-pr-details";
pub const CUSTOM_CONSOLE_PR_TASKLOG_KEY: &str = "custom-console-url-pr-tasklog";
pub const TEKTON_DASHBOARD_URL_KEY: &str = "tekton-dashboard-url";

pub const TEKTON_HUB_API_URL: &str = "https://api.hub.tekton.dev/v1";
pub const ARTIFACT_HUB_URL: &str = "https://artifacthub.io";
pub const CATALOG_TYPE_TEKTONHUB: &str = "tektonhub";
pub const CATALOG_TYPE_ARTIFACTHUB: &str = "artifacthub";

/// Settings filled in when the user leaves them unset.
pub const DEFAULT_SETTINGS: [(&str, &str); 32] = [
    ("application-name", "Pipelines as Code CI"),
    ("auto-configure-new-github-repo", "false"),
    ("auto-configure-repo-namespace-template", ""),
    ("bitbucket-cloud-additional-source-ip", ""),
    ("bitbucket-cloud-check-source-ip", "true"),
    ("custom-console-name", ""),
    (CUSTOM_CONSOLE_URL_KEY, ""),
    ("custom-console-url-namespace", ""),
    (CUSTOM_CONSOLE_PR_DETAILS_KEY, ""),
    (CUSTOM_CONSOLE_PR_TASKLOG_KEY, ""),
    ("default-max-keep-runs", "0"),
    ("enable-cancel-in-progress-on-pull-requests", "false"),
    ("enable-cancel-in-progress-on-push", "false"),
    ("error-detection-from-container-logs", "true"),
    ("error-detection-max-number-of-lines", "50"),
    (
        ERROR_DETECTION_REGEXP_KEY,
        "^(?P<filename>[^:]*):(?P<line>[0-9]+):(?P<column>[0-9]+):([ ]*)?(?P<error>.*)",
    ),
    ("error-log-snippet", "true"),
    ("hub-catalog-name", "tekton"),
    (HUB_CATALOG_TYPE_KEY, CATALOG_TYPE_ARTIFACTHUB),
    (HUB_URL_KEY, ARTIFACT_HUB_URL),
    ("max-keep-run-upper-limit", "0"),
    ("remember-ok-to-test", "false"),
    ("remote-tasks", "true"),
    ("require-ok-to-test-sha", "false"),
    ("secret-auto-create", "true"),
    ("secret-github-app-scope-extra-repos", ""),
    ("secret-github-app-token-scoped", "true"),
    ("skip-push-event-for-pr-commits", "true"),
    (TEKTON_DASHBOARD_URL_KEY, ""),
    ("tekton-dashboard-url-pr-details", ""),
    ("enable-otel", "false"),
    ("custom-params", ""),
];

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "OpenShiftPipelinesAsCode", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "ComponentStatus", shortname = "opac")]
pub struct OpenShiftPipelinesAsCodeSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
    #[serde(flatten)]
    pub settings: PacSettings,
}

tekton_component!(OpenShiftPipelinesAsCode, ComponentKind::PipelinesAsCode, settings.options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PacSettings {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
    #[serde(rename = "additionalPACControllers", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_controllers: BTreeMap<String, AdditionalPacControllerConfig>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AdditionalPacControllerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(rename = "configMapName", default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    #[serde(rename = "secretName", default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl AdditionalPacControllerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }
}

/// `TektonConfig.spec.platforms.openshift.pipelinesAsCode`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PipelinesAsCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(flatten)]
    pub settings: PacSettings,
}

impl PipelinesAsCode {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn default_settings_have_unique_keys() {
        let keys: BTreeSet<_> = DEFAULT_SETTINGS.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), DEFAULT_SETTINGS.len());
    }

    #[test]
    fn additional_controllers_are_enabled_unless_switched_off() {
        assert!(AdditionalPacControllerConfig::default().is_enabled());
        let off = AdditionalPacControllerConfig { enable: Some(false), ..Default::default() };
        assert!(!off.is_enabled());
    }
}
