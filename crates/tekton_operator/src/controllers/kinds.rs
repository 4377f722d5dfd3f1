//! What each component kind adds on top of the shared reconciler.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::{json, Value};
use tracing::*;

use super::component::{ensure_stage, install_main, reflect, remove_stage, render, Bundle, Component, Progress};
use super::{conditions, Context};
use crate::api::v1alpha1::pipeline::PipelineProperties;
use crate::api::v1alpha1::pipelines_as_code::{AdditionalPacControllerConfig, ADDITIONAL_CONTROLLER_STAGE};
use crate::api::v1alpha1::pruner::{PRUNER_CONFIG_MAP_NAME, PRUNER_GLOBAL_CONFIG_KEY, PRUNER_NAMESPACE_CONFIG_MAP_NAME};
use crate::api::v1alpha1::*;
use crate::client::get_typed;
use crate::conditions::{ADDITIONAL_CONTROLLER_INSTALLED, POST_RECONCILER, REASON_INVALID};
use crate::manifests::{Manifest, Transformer};
use crate::transform::{
    config_map_data, container_args, flatten_properties, inject_env, kind_of, name_of, scheduling, string_map,
};
use crate::util::errors::{Error, Result, StdError};
use crate::validation::pruner::validate_global_config;

pub const PIPELINES_CONTROLLER: &str = "tekton-pipelines-controller";
pub const DASHBOARD_DEPLOYMENT: &str = "tekton-dashboard";
pub const PAC_CONTROLLER: &str = "pipelines-as-code-controller";
pub const PAC_CONFIG_MAP: &str = "pipelines-as-code";
pub const KUEUE_CONFIG_MAP: &str = "tekton-kueue-config";
pub const RESULTS_API_CONFIG_MAP: &str = "tekton-results-api-config";

/// Bundle objects carrying this label are dropped when the add-on param it names is "false".
pub const ADDON_PARAM_LABEL: &str = "operator.tekton.dev/addon-param";

/// Keys of [`PipelineProperties`] that belong in `config-defaults` rather than `feature-flags`.
const CONFIG_DEFAULTS_KEYS: [&str; 2] = ["default-timeout-minutes", "default-service-account"];

/// Splits the flattened pipeline properties over the three ConfigMaps that read them.
fn pipeline_config_maps(properties: &PipelineProperties) -> Result<Vec<Transformer>> {
    let mut feature_flags = BTreeMap::new();
    let mut defaults = BTreeMap::new();
    let mut observability = BTreeMap::new();
    for (key, value) in flatten_properties(properties)? {
        if CONFIG_DEFAULTS_KEYS.contains(&key.as_str()) {
            defaults.insert(key, value);
        } else if key.starts_with("metrics.") {
            observability.insert(key, value);
        } else {
            feature_flags.insert(key, value);
        }
    }
    Ok(vec![
        config_map_data("feature-flags", feature_flags),
        config_map_data("config-defaults", defaults),
        config_map_data("config-observability", observability),
        config_map_data("resolvers-feature-flags", flatten_properties(&properties.resolvers)?),
    ])
}

fn pipeline_performance(properties: &PipelineProperties) -> Vec<Transformer> {
    let perf = &properties.performance;
    let args = [
        ("disable-ha", perf.disable_ha.map(|v| v.to_string())),
        ("threads-per-controller", perf.threads_per_controller.map(|v| v.to_string())),
        ("kube-api-qps", perf.kube_api_qps.map(|v| v.to_string())),
        ("kube-api-burst", perf.kube_api_burst.map(|v| v.to_string())),
    ]
    .into_iter()
    .filter_map(|(flag, value)| value.map(|v| (flag.to_string(), v)))
    .collect();

    let mut transformers = vec![
        container_args(PIPELINES_CONTROLLER, args),
        config_map_data(
            "config-leader-election-controller",
            string_map(&[("buckets", perf.buckets.map(|b| b.to_string()))]),
        ),
    ];
    if let Some(replicas) = perf.replicas {
        transformers.push(Box::new(move |obj: &mut Value| {
            if kind_of(obj) == "Deployment" && name_of(obj) == PIPELINES_CONTROLLER {
                obj["spec"]["replicas"] = json!(replicas);
            }
            Ok(())
        }));
    }
    transformers
}

#[async_trait]
impl Component for TektonPipeline {
    const INFO_CONFIG_MAP: Option<&'static str> = Some("pipelines-info");

    fn transformers(&self) -> Result<Vec<Transformer>> {
        let properties = &self.spec.pipeline.properties;
        let mut transformers = pipeline_config_maps(properties)?;
        transformers.extend(pipeline_performance(properties));
        transformers.push(scheduling(self.spec.config.clone()));
        Ok(transformers)
    }
}

#[async_trait]
impl Component for TektonTrigger {
    const INFO_CONFIG_MAP: Option<&'static str> = Some("triggers-info");

    fn transformers(&self) -> Result<Vec<Transformer>> {
        let p = &self.spec.trigger.properties;
        Ok(vec![
            config_map_data(
                "feature-flags-triggers",
                string_map(&[("enable-api-fields", p.enable_api_fields.clone())]),
            ),
            config_map_data(
                "config-defaults-triggers",
                string_map(&[("default-service-account", p.default_service_account.clone())]),
            ),
            scheduling(self.spec.config.clone()),
        ])
    }
}

#[async_trait]
impl Component for TektonChain {
    const INFO_CONFIG_MAP: Option<&'static str> = Some("chains-info");

    fn transformers(&self) -> Result<Vec<Transformer>> {
        Ok(vec![
            config_map_data("chains-config", flatten_properties(&self.spec.chain.properties)?),
            scheduling(self.spec.config.clone()),
        ])
    }
}

#[async_trait]
impl Component for TektonDashboard {
    const INFO_CONFIG_MAP: Option<&'static str> = Some("dashboard-info");

    fn transformers(&self) -> Result<Vec<Transformer>> {
        let d = &self.spec.dashboard;
        let args = [
            ("read-only", d.readonly.map(|v| v.to_string())),
            ("external-logs", d.external_logs.clone()),
        ]
        .into_iter()
        .filter_map(|(flag, value)| value.map(|v| (flag.to_string(), v)))
        .collect();
        Ok(vec![
            container_args(DASHBOARD_DEPLOYMENT, args),
            scheduling(self.spec.config.clone()),
        ])
    }
}

#[async_trait]
impl Component for TektonResult {
    const INFO_CONFIG_MAP: Option<&'static str> = Some("tekton-results-info");

    fn transformers(&self) -> Result<Vec<Transformer>> {
        let r = &self.spec.result;
        Ok(vec![config_map_data(
            RESULTS_API_CONFIG_MAP,
            string_map(&[
                ("DB_HOST", r.db_host.clone()),
                ("DB_PORT", r.db_port.map(|p| p.to_string())),
                ("LOGS_API", r.logs_api.map(|v| v.to_string())),
            ]),
        )])
    }
}

#[async_trait]
impl Component for TektonScheduler {
    fn transformers(&self) -> Result<Vec<Transformer>> {
        let Some(config) = &self.spec.scheduler.config else {
            return Ok(Vec::new());
        };
        let rendered = serde_yaml::to_string(config).map_err(|e| Error::StdError(StdError::YamlError(e)))?;
        Ok(vec![config_map_data(
            KUEUE_CONFIG_MAP,
            BTreeMap::from([("config.yaml".to_string(), rendered)]),
        )])
    }
}

#[async_trait]
impl Component for TektonPruner {
    fn transformers(&self) -> Result<Vec<Transformer>> {
        if self.spec.config.is_empty() {
            return Ok(Vec::new());
        }
        let rendered =
            serde_yaml::to_string(&self.spec.config).map_err(|e| Error::StdError(StdError::YamlError(e)))?;
        Ok(vec![config_map_data(
            PRUNER_CONFIG_MAP_NAME,
            BTreeMap::from([(PRUNER_GLOBAL_CONFIG_KEY.to_string(), rendered)]),
        )])
    }

    /// Feeds the installed ConfigMaps to the store without waiting for the watch, then checks
    /// the hand-edited namespace overrides against the live global limits.
    async fn post_install(&mut self, ctx: &Context) -> Result<Progress> {
        let namespace = self.target_namespace().to_string();
        ctx.pruner_store.set_target_namespace(&namespace);
        for name in [PRUNER_CONFIG_MAP_NAME, PRUNER_NAMESPACE_CONFIG_MAP_NAME] {
            let cm: Option<ConfigMap> = get_typed(ctx.client(), Some(&namespace), name).await?;
            if let Some(cm) = cm {
                ctx.pruner_store.apply_config_map(&cm)?;
            }
        }

        let errs = validate_global_config(&ctx.pruner_store.live_config(), PRUNER_NAMESPACE_CONFIG_MAP_NAME);
        if !errs.is_empty() {
            warn!("pruner config in {namespace} is invalid: {errs}");
            conditions(self).mark_false(POST_RECONCILER, REASON_INVALID, errs.to_string());
            return Err(Error::StdError(StdError::Validation(errs)));
        }
        Ok(Progress::Ready)
    }
}

#[async_trait]
impl Component for TektonAddon {
    fn filter(&self, manifest: Manifest) -> Manifest {
        let addon = &self.spec.addon;
        let resources = manifest
            .resources
            .into_iter()
            .filter(|obj| {
                let param = obj
                    .pointer(&format!("/metadata/labels/{}", crate::client::escape_pointer(ADDON_PARAM_LABEL)))
                    .and_then(Value::as_str);
                match param {
                    Some(name) => addon.param(name) != Some("false"),
                    None => true,
                }
            })
            .collect();
        Manifest::new(resources)
    }
}

#[async_trait]
impl Component for ManualApprovalGate {}

#[async_trait]
impl Component for SyncerService {}

#[async_trait]
impl Component for TektonMulticlusterProxyAAE {}

#[async_trait]
impl Component for OpenShiftPipelinesAsCode {
    fn transformers(&self) -> Result<Vec<Transformer>> {
        Ok(vec![
            config_map_data(PAC_CONFIG_MAP, self.spec.settings.settings.clone()),
            scheduling(self.spec.config.clone()),
        ])
    }

    /// The main bundle plus one controller copy per additional controller, in its own stage.
    async fn install(&mut self, ctx: &Context, bundle: Bundle) -> Result<Progress> {
        let controllers: Vec<(String, AdditionalPacControllerConfig)> = self
            .spec
            .settings
            .additional_controllers
            .iter()
            .filter(|(_, c)| c.is_enabled())
            .map(|(n, c)| (n.clone(), c.clone()))
            .collect();
        let mut copies = Manifest::default();
        for (name, controller) in &controllers {
            copies.append(additional_controller(&bundle.manifest, name, controller)?);
        }

        let main = install_main(self, ctx, bundle.manifest).await?;
        let extra = if controllers.is_empty() {
            remove_stage(self, ctx, ADDITIONAL_CONTROLLER_STAGE).await?;
            Progress::Ready
        } else {
            let rendered = render(self, ctx, copies, Vec::new())?;
            ensure_stage(self, ctx, ADDITIONAL_CONTROLLER_STAGE, &rendered).await?
        };
        reflect(self, ADDITIONAL_CONTROLLER_INSTALLED, &extra);
        Ok(match (main, extra) {
            (Progress::Ready, Progress::Ready) => Progress::Ready,
            (Progress::Waiting(reason), _) | (_, Progress::Waiting(reason)) => Progress::Waiting(reason),
        })
    }
}

/// Copies the PAC controller Deployment, its Service and its ConfigMap for one additional
/// controller.
fn additional_controller(bundle: &Manifest, name: &str, config: &AdditionalPacControllerConfig) -> Result<Manifest> {
    let controller_name = format!("{name}-pac-controller");
    let config_map_name = config
        .config_map_name
        .clone()
        .unwrap_or_else(|| format!("{name}-pipelines-as-code-configmap"));
    let secret_name = config
        .secret_name
        .clone()
        .unwrap_or_else(|| format!("{name}-pipelines-as-code-secret"));

    let pick = |kind: &str, source: &str| {
        bundle
            .resources
            .iter()
            .find(|o| kind_of(o) == kind && name_of(o) == source)
            .cloned()
            .ok_or_else(|| Error::StdError(StdError::Manifest(format!("bundle has no {kind} {source}"))))
    };

    let mut deployment = pick("Deployment", PAC_CONTROLLER)?;
    deployment["metadata"]["name"] = json!(controller_name);
    let selector = json!({"app.kubernetes.io/name": controller_name});
    deployment["spec"]["selector"] = json!({"matchLabels": selector});
    let labels = &mut deployment["spec"]["template"]["metadata"]["labels"];
    if !labels.is_object() {
        *labels = json!({});
    }
    crate::transform::merge_overlay(labels, &selector);
    for (var, value) in [
        ("PAC_CONTROLLER_LABEL", name),
        ("PAC_CONTROLLER_SECRET", secret_name.as_str()),
        ("PAC_CONTROLLER_CONFIGMAP", config_map_name.as_str()),
    ] {
        inject_env(var, value)(&mut deployment)?;
    }

    let mut service = pick("Service", PAC_CONTROLLER)?;
    service["metadata"]["name"] = json!(controller_name);
    service["spec"]["selector"] = selector;

    let mut config_map = pick("ConfigMap", PAC_CONFIG_MAP)?;
    config_map["metadata"]["name"] = json!(config_map_name);
    config_map_data(&config_map_name, config.settings.clone())(&mut config_map)?;

    debug!("rendering additional PAC controller {controller_name}");
    Ok(Manifest::new(vec![deployment, service, config_map]))
}
