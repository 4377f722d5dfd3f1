use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{tekton_component, AdditionalOptions, AsComponentStatus, CommonSpec, ComponentKind, ComponentStatus, Param};

pub const HUB_DB_STAGE: &str = "db";
pub const HUB_DB_MIGRATION_STAGE: &str = "db-migration";
pub const HUB_API_STAGE: &str = "api";
pub const HUB_UI_STAGE: &str = "ui";

/// Hub params accepted on `TektonConfig.spec.hub.params`.
pub const HUB_PARAM_ENABLE_DEVCONSOLE: &str = "enable-devconsole-integration";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "TektonHub", group = "operator.tekton.dev", version = "v1alpha1", derive = "PartialEq")]
#[kube(status = "TektonHubStatus", shortname = "th")]
pub struct TektonHubSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default)]
    pub db: HubDb,
    #[serde(default)]
    pub api: HubApi,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

tekton_component!(TektonHub, ComponentKind::Hub, options);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HubDb {
    /// Secret holding the database credentials; the bundled database is used when unset.
    #[serde(rename = "secret", default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HubApi {
    #[serde(rename = "hubConfigUrl", default, skip_serializing_if = "Option::is_none")]
    pub hub_config_url: Option<String>,
    #[serde(rename = "catalogRefreshInterval", default, skip_serializing_if = "Option::is_none")]
    pub catalog_refresh_interval: Option<String>,
    #[serde(rename = "routeHostUrl", default, skip_serializing_if = "Option::is_none")]
    pub route_host_url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TektonHubStatus {
    #[serde(flatten)]
    pub common: ComponentStatus,
    #[serde(rename = "apiUrl", default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(rename = "uiUrl", default, skip_serializing_if = "Option::is_none")]
    pub ui_url: Option<String>,
}

impl AsComponentStatus for TektonHubStatus {
    fn as_component(&self) -> &ComponentStatus {
        &self.common
    }
    fn as_component_mut(&mut self) -> &mut ComponentStatus {
        &mut self.common
    }
}

/// `TektonConfig.spec.hub`: only params and overlays are projected from the config.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Hub {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,
}

impl Hub {
    pub fn is_empty(&self) -> bool {
        self == &Hub::default()
    }
}
