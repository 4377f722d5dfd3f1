//! Defaulting. Every function only fills unset values, so running it twice is a no-op.

use crate::api::v1alpha1::addon::{Addon, ADDON_PARAMS, DEPRECATED_ADDON_PARAMS};
use crate::api::v1alpha1::chain::{Chain, FORMAT_IN_TOTO, FORMAT_SIMPLE_SIGNING};
use crate::api::v1alpha1::config::{OpenShift, Prune, Scc, DEFAULT_SCC};
use crate::api::v1alpha1::pipeline::{PipelineProperties, API_FIELDS_STABLE, NO_MATCH_POLICY_IGNORE};
use crate::api::v1alpha1::pipelines_as_code::{PacSettings, PipelinesAsCode, DEFAULT_SETTINGS};
use crate::api::v1alpha1::pruner::Pruner;
use crate::api::v1alpha1::result::Results;
use crate::api::v1alpha1::scheduler::{Scheduler, SchedulerConfig, DEFAULT_QUEUE_NAME};
use crate::api::v1alpha1::trigger::TriggersProperties;
use crate::api::v1alpha1::*;
use crate::settings::{Platform, Settings};

const OCI_STORAGE: &str = "oci";

/// Types that know how to fill their own unset fields.
pub trait SetDefaults {
    fn set_defaults(&mut self, settings: &Settings);
}

/// Runs the defaulter and reports whether anything changed.
pub fn apply_defaults<T: SetDefaults + Clone + PartialEq>(obj: &mut T, settings: &Settings) -> bool {
    let before = obj.clone();
    obj.set_defaults(settings);
    *obj != before
}

fn fill<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn fill_str(slot: &mut Option<String>, value: &str) {
    fill(slot, value.to_string());
}

pub fn default_pipeline(p: &mut PipelineProperties) {
    fill(&mut p.disable_affinity_assistant, false);
    fill(&mut p.disable_home_env_overwrite, true);
    fill(&mut p.disable_working_directory_overwrite, true);
    fill(&mut p.disable_creds_init, false);
    fill(&mut p.running_in_environment_with_injected_sidecars, true);
    fill(&mut p.require_git_ssh_secret_known_hosts, false);
    fill(&mut p.enable_tekton_oci_bundles, false);
    fill(&mut p.enable_custom_tasks, false);
    fill_str(&mut p.enable_api_fields, API_FIELDS_STABLE);
    fill(&mut p.await_sidecar_readiness, true);
    fill(&mut p.enable_step_actions, true);
    fill_str(&mut p.verification_no_match_policy, NO_MATCH_POLICY_IGNORE);
    fill(&mut p.performance.disable_ha, false);
    fill(&mut p.performance.buckets, 1);
}

pub fn default_trigger(t: &mut TriggersProperties) {
    fill_str(&mut t.enable_api_fields, API_FIELDS_STABLE);
}

pub fn default_chain(c: &mut Chain) {
    fill(&mut c.disabled, false);
    let p = &mut c.properties;
    fill_str(&mut p.taskrun_format, FORMAT_IN_TOTO);
    fill_str(&mut p.taskrun_storage, OCI_STORAGE);
    fill_str(&mut p.pipelinerun_format, FORMAT_IN_TOTO);
    fill_str(&mut p.pipelinerun_storage, OCI_STORAGE);
    fill_str(&mut p.oci_format, FORMAT_SIMPLE_SIGNING);
    fill_str(&mut p.oci_storage, OCI_STORAGE);
}

pub fn default_results(r: &mut Results) {
    fill(&mut r.disabled, false);
}

pub fn default_event_pruner(p: &mut Pruner) {
    fill(&mut p.disabled, true);
}

pub fn default_scheduler(s: &mut Scheduler) {
    fill(&mut s.disabled, false);
    fill(&mut s.config, SchedulerConfig {
        queue_name: DEFAULT_QUEUE_NAME.to_string(),
        multi_cluster_enabled: false,
    });
}

/// Without resources there is nothing to prune, so the schedule goes too.
pub fn default_prune(p: &mut Prune) {
    if p.resources.is_empty() {
        p.keep = None;
        p.keep_since = None;
        p.schedule = None;
    }
}

pub fn default_pac_settings(s: &mut PacSettings) {
    for (key, value) in DEFAULT_SETTINGS {
        s.settings.entry(key.to_string()).or_insert_with(|| value.to_string());
    }
    for (name, controller) in s.additional_controllers.iter_mut() {
        fill(&mut controller.enable, true);
        fill(&mut controller.config_map_name, format!("{name}-pipelines-as-code-configmap"));
        fill(&mut controller.secret_name, format!("{name}-pipelines-as-code-secret"));
    }
}

/// Add-on params absent from the spec get their default value; deprecated ones are never added.
pub fn default_addon(a: &mut Addon) {
    for (name, _, default) in ADDON_PARAMS {
        if DEPRECATED_ADDON_PARAMS.contains(&name) || a.param(name).is_some() {
            continue;
        }
        a.params.push(Param {
            name: name.to_string(),
            value: default.to_string(),
        });
    }
}

fn default_target_namespace(common: &mut CommonSpec, settings: &Settings) {
    if common.target_namespace.is_empty() {
        common.target_namespace = settings.default_target_namespace.clone();
    }
}

fn default_openshift(o: &mut OpenShift, addon: &Addon) {
    let pac = o.pipelines_as_code.get_or_insert_with(|| PipelinesAsCode {
        enable: Some(true),
        ..Default::default()
    });
    fill(&mut pac.enable, true);
    if addon.enable_pac == Some(false) {
        pac.enable = Some(false);
    }
    default_pac_settings(&mut pac.settings);

    let scc = o.scc.get_or_insert_with(Scc::default);
    fill_str(&mut scc.default, DEFAULT_SCC);
}

impl SetDefaults for TektonConfig {
    fn set_defaults(&mut self, settings: &Settings) {
        let spec = &mut self.spec;
        if spec.profile.is_empty() {
            spec.profile = PROFILE_BASIC.to_string();
        }
        default_target_namespace(&mut spec.common, settings);
        default_prune(&mut spec.pruner);
        default_pipeline(&mut spec.pipeline.properties);
        default_trigger(&mut spec.trigger.properties);
        default_chain(&mut spec.chain);
        default_results(&mut spec.result);
        default_event_pruner(&mut spec.tektonpruner.pruner);
        default_scheduler(&mut spec.scheduler);
        match settings.platform {
            Platform::OpenShift => {
                default_addon(&mut spec.addon);
                default_openshift(&mut spec.platforms.openshift, &spec.addon);
            }
            Platform::Kubernetes => {
                spec.addon = Addon::default();
                spec.platforms.openshift = OpenShift::default();
            }
        }
    }
}

impl SetDefaults for TektonPipeline {
    fn set_defaults(&mut self, _: &Settings) {
        default_pipeline(&mut self.spec.pipeline.properties);
    }
}

impl SetDefaults for TektonTrigger {
    fn set_defaults(&mut self, _: &Settings) {
        default_trigger(&mut self.spec.trigger.properties);
    }
}

impl SetDefaults for TektonChain {
    fn set_defaults(&mut self, _: &Settings) {
        default_chain(&mut self.spec.chain);
    }
}

impl SetDefaults for TektonResult {
    fn set_defaults(&mut self, _: &Settings) {
        default_results(&mut self.spec.result);
    }
}

impl SetDefaults for TektonPruner {
    fn set_defaults(&mut self, _: &Settings) {
        default_event_pruner(&mut self.spec.pruner);
    }
}

impl SetDefaults for TektonScheduler {
    fn set_defaults(&mut self, _: &Settings) {
        default_scheduler(&mut self.spec.scheduler);
    }
}

impl SetDefaults for OpenShiftPipelinesAsCode {
    fn set_defaults(&mut self, _: &Settings) {
        default_pac_settings(&mut self.spec.settings);
    }
}

impl SetDefaults for TektonAddon {
    fn set_defaults(&mut self, _: &Settings) {
        default_addon(&mut self.spec.addon);
    }
}

impl SetDefaults for TektonHub {
    fn set_defaults(&mut self, settings: &Settings) {
        default_target_namespace(&mut self.spec.common, settings);
    }
}

macro_rules! no_defaults {
    ($($ty:ty),*) => {
        $(impl SetDefaults for $ty {
            fn set_defaults(&mut self, _: &Settings) {}
        })*
    };
}

no_defaults!(
    TektonDashboard,
    ManualApprovalGate,
    SyncerService,
    TektonMulticlusterProxyAAE,
    TektonInstallerSet
);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(spec: serde_json::Value) -> TektonConfig {
        TektonConfig::new("config", serde_json::from_value(spec).unwrap())
    }

    #[test]
    fn config_defaults_fill_and_are_idempotent() {
        let settings = Settings::new("0.68.0", Platform::Kubernetes);
        let mut cfg = config(json!({"pruner": {"keep": 3, "schedule": "* * * * *"}}));

        assert!(apply_defaults(&mut cfg, &settings));
        assert_eq!(cfg.spec.profile, PROFILE_BASIC);
        assert_eq!(cfg.spec.common.target_namespace, "tekton-pipelines");
        assert_eq!(cfg.spec.pruner.keep, None);
        assert_eq!(cfg.spec.pruner.schedule, None);
        assert_eq!(cfg.spec.pipeline.properties.enable_api_fields.as_deref(), Some("stable"));
        assert_eq!(cfg.spec.pipeline.properties.performance.buckets, Some(1));
        assert_eq!(cfg.spec.chain.properties.oci_format.as_deref(), Some("simplesigning"));
        assert_eq!(
            cfg.spec.scheduler.config.as_ref().map(|c| c.queue_name.as_str()),
            Some("pipelines-queue")
        );
        assert!(cfg.spec.platforms.is_empty());

        let once = cfg.clone();
        assert!(!apply_defaults(&mut cfg, &settings));
        assert_eq!(cfg, once);
    }

    #[test]
    fn user_values_survive_defaulting() {
        let settings = Settings::new("0.68.0", Platform::Kubernetes);
        let mut cfg = config(json!({
            "profile": "all",
            "pipeline": {"enable-api-fields": "alpha", "disable-creds-init": true}
        }));
        cfg.set_defaults(&settings);
        assert_eq!(cfg.spec.profile, "all");
        assert_eq!(cfg.spec.pipeline.properties.enable_api_fields.as_deref(), Some("alpha"));
        assert_eq!(cfg.spec.pipeline.properties.disable_creds_init, Some(true));
    }

    #[test]
    fn openshift_enables_pipelines_as_code_unless_addon_opts_out() {
        let settings = Settings::new("0.68.0", Platform::OpenShift);
        let mut cfg = config(json!({}));
        cfg.set_defaults(&settings);
        let pac = cfg.pipelines_as_code().unwrap();
        assert!(pac.is_enabled());
        assert_eq!(pac.settings.settings["hub-catalog-type"], "artifacthub");
        assert_eq!(cfg.spec.platforms.openshift.scc.as_ref().unwrap().default.as_deref(), Some(DEFAULT_SCC));
        assert_eq!(cfg.spec.common.target_namespace, "openshift-pipelines");
        assert_eq!(cfg.spec.addon.param("pipelineTemplates"), Some("true"));
        assert_eq!(cfg.spec.addon.param("clusterTasks"), None);

        let mut cfg = config(json!({"addon": {"enablePAC": false}}));
        cfg.set_defaults(&settings);
        assert!(!cfg.pipelines_as_code().unwrap().is_enabled());
    }

    #[test]
    fn additional_controllers_get_derived_names() {
        let mut settings: PacSettings = serde_json::from_value(json!({
            "settings": {"hub-url": "https://example.com"},
            "additionalPACControllers": {"ghe": {}}
        }))
        .unwrap();
        default_pac_settings(&mut settings);
        assert_eq!(settings.settings["hub-url"], "https://example.com");
        assert_eq!(settings.settings.len(), DEFAULT_SETTINGS.len());
        let ghe = &settings.additional_controllers["ghe"];
        assert_eq!(ghe.enable, Some(true));
        assert_eq!(ghe.config_map_name.as_deref(), Some("ghe-pipelines-as-code-configmap"));
        assert_eq!(ghe.secret_name.as_deref(), Some("ghe-pipelines-as-code-secret"));
    }
}
