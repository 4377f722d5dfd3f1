//! One-shot migrations run when the operator version changes.
//!
//! The pre-upgrade steps run once the config is defaulted and valid, the post-upgrade steps once every
//! component is ready. Each list is gated by an annotation on the `config` resource that records
//! the operator version it last completed for.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Secret;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::v1alpha1::addon::DEPRECATED_ADDON_PARAMS;
use crate::api::v1alpha1::installer_set::{
    DEPRECATED_CLUSTER_TASK_TYPES, VERSIONED_RESOLVER_STEP_ACTION_TYPE, VERSIONED_RESOLVER_TASK_TYPE,
};
use crate::api::v1alpha1::pipelines_as_code::{
    ARTIFACT_HUB_URL, CATALOG_TYPE_ARTIFACTHUB, CATALOG_TYPE_TEKTONHUB, HUB_CATALOG_TYPE_KEY, HUB_URL_KEY,
    TEKTON_HUB_API_URL,
};
use crate::api::v1alpha1::*;
use crate::api::{INSTALLER_SET_TYPE_KEY, POST_UPGRADE_VERSION_KEY, PRE_UPGRADE_VERSION_KEY};
use crate::client::{delete_typed, get_typed, list_typed, replace_typed, ObjectKey, ResourceClient};
use crate::settings::Platform;
use crate::util::errors::Result;

const CONFIG_NAME: &str = "config";
const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
const CRD_KIND: &str = "CustomResourceDefinition";

/// Default TLS secret the results component used to generate; OpenShift now serves its own.
pub const RESULTS_TLS_SECRET: &str = "tekton-results-tls";

/// Versioned resolver installer-sets kept by the post-upgrade cleanup.
pub const VERSIONED_RETENTION: usize = 2;

/// CRDs of the installed components whose objects are rewritten under the storage version.
pub const MIGRATED_CRDS: [&str; 17] = [
    "extensions.dashboard.tekton.dev",
    "clustertasks.tekton.dev",
    "customruns.tekton.dev",
    "pipelineruns.tekton.dev",
    "pipelines.tekton.dev",
    "taskruns.tekton.dev",
    "tasks.tekton.dev",
    "verificationpolicies.tekton.dev",
    "resolutionrequests.resolution.tekton.dev",
    "repositories.pipelinesascode.tekton.dev",
    "clusterinterceptors.triggers.tekton.dev",
    "clustertriggerbindings.triggers.tekton.dev",
    "eventlisteners.triggers.tekton.dev",
    "interceptors.triggers.tekton.dev",
    "triggerbindings.triggers.tekton.dev",
    "triggers.triggers.tekton.dev",
    "triggertemplates.triggers.tekton.dev",
];

pub struct UpgradeContext {
    pub client: Arc<dyn ResourceClient>,
    /// Operator version the annotations are advanced to.
    pub version: String,
    pub platform: Platform,
}

impl UpgradeContext {
    pub fn new(client: Arc<dyn ResourceClient>, version: impl Into<String>, platform: Platform) -> UpgradeContext {
        UpgradeContext {
            client,
            version: version.into(),
            platform,
        }
    }

    /// Whether the steps gated by `annotation` still have to run against `config`.
    pub fn is_pending(&self, config: &TektonConfig, annotation: &str) -> bool {
        config.metadata.annotations.as_ref().and_then(|a| a.get(annotation)) != Some(&self.version)
    }

    fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    async fn config(&self) -> Result<Option<TektonConfig>> {
        get_typed::<TektonConfig>(self.client(), None, CONFIG_NAME).await
    }

    /// Loads the config, lets `mutate` edit it and writes it back if `mutate` reports a change.
    async fn update_config<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TektonConfig) -> bool + Send,
    {
        let Some(mut config) = self.config().await? else {
            return Ok(());
        };
        if mutate(&mut config) {
            replace_typed(self.client(), &config).await?;
        }
        Ok(())
    }
}

pub type StepFn = for<'a> fn(&'a UpgradeContext) -> BoxFuture<'a, Result<()>>;

pub struct UpgradeStep {
    pub name: &'static str,
    pub run: StepFn,
}

pub const PRE_UPGRADE_STEPS: [UpgradeStep; 6] = [
    UpgradeStep {
        name: "reset-config-conditions",
        run: reset_config_conditions,
    },
    UpgradeStep {
        name: "enable-step-actions",
        run: enable_step_actions,
    },
    UpgradeStep {
        name: "delete-results-tls-secret",
        run: delete_results_tls_secret,
    },
    UpgradeStep {
        name: "scrub-deprecated-addon-params",
        run: scrub_deprecated_addon_params,
    },
    UpgradeStep {
        name: "artifact-hub-urls",
        run: rewrite_pac_hub_urls,
    },
    UpgradeStep {
        name: "coschedule-affinity-assistant",
        run: drop_affinity_assistant_flag,
    },
];

pub const POST_UPGRADE_STEPS: [UpgradeStep; 4] = [
    UpgradeStep {
        name: "crd-storage-version",
        run: migrate_storage_versions,
    },
    UpgradeStep {
        name: "delete-clustertask-installersets",
        run: delete_cluster_task_installer_sets,
    },
    UpgradeStep {
        name: "prune-versioned-task-installersets",
        run: prune_versioned_task_sets,
    },
    UpgradeStep {
        name: "prune-versioned-stepaction-installersets",
        run: prune_versioned_step_action_sets,
    },
];

/// Runs the pre-upgrade steps unless they already ran for this version. Returns whether they ran.
pub async fn run_pre_upgrade(ctx: &UpgradeContext) -> Result<bool> {
    run_steps(ctx, PRE_UPGRADE_VERSION_KEY, &PRE_UPGRADE_STEPS).await
}

/// Runs the post-upgrade steps unless they already ran for this version. Returns whether they ran.
pub async fn run_post_upgrade(ctx: &UpgradeContext) -> Result<bool> {
    run_steps(ctx, POST_UPGRADE_VERSION_KEY, &POST_UPGRADE_STEPS).await
}

async fn run_steps(ctx: &UpgradeContext, annotation: &str, steps: &[UpgradeStep]) -> Result<bool> {
    let Some(config) = ctx.config().await? else {
        return Ok(false);
    };
    if !ctx.is_pending(&config, annotation) {
        return Ok(false);
    }

    for step in steps {
        info!("running upgrade step {} ({annotation})", step.name);
        (step.run)(ctx).await?;
    }

    let key = ObjectKey::of::<TektonConfig>(None, CONFIG_NAME);
    let patch = json!({"metadata": {"annotations": {annotation: ctx.version}}});
    ctx.client().merge_patch(&key, &patch).await?;
    info!("{annotation} advanced to {}", ctx.version);
    Ok(true)
}

fn reset_config_conditions(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let Some(config) = ctx.config().await? else {
            return Ok(());
        };
        if config.conditions().is_empty() {
            return Ok(());
        }
        let key = ObjectKey::of::<TektonConfig>(None, CONFIG_NAME);
        ctx.client()
            .merge_patch_status(&key, &json!({"status": {"conditions": []}}))
            .await?;
        Ok(())
    })
}

fn enable_step_actions(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(ctx.update_config(|config| {
        let flag = &mut config.spec.pipeline.properties.enable_step_actions;
        if *flag == Some(false) {
            *flag = Some(true);
            return true;
        }
        false
    }))
}

fn delete_results_tls_secret(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        if ctx.platform != Platform::OpenShift {
            return Ok(());
        }
        let Some(config) = ctx.config().await? else {
            return Ok(());
        };
        let namespace = config.target_namespace();
        if get_typed::<Secret>(ctx.client(), Some(namespace), RESULTS_TLS_SECRET).await?.is_some() {
            info!("deleting generated results TLS secret in {namespace}");
            delete_typed::<Secret>(ctx.client(), Some(namespace), RESULTS_TLS_SECRET).await?;
        }
        Ok(())
    })
}

fn scrub_deprecated_addon_params(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(ctx.update_config(|config| {
        let params = &mut config.spec.addon.params;
        let before = params.len();
        params.retain(|p| !DEPRECATED_ADDON_PARAMS.contains(&p.name.as_str()));
        params.len() != before
    }))
}

fn rewrite_hub_settings(settings: &mut BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (key, from, to) in [
        (HUB_URL_KEY, TEKTON_HUB_API_URL, ARTIFACT_HUB_URL),
        (HUB_CATALOG_TYPE_KEY, CATALOG_TYPE_TEKTONHUB, CATALOG_TYPE_ARTIFACTHUB),
    ] {
        if let Some(value) = settings.get_mut(key) {
            if value.trim_end_matches('/') == from {
                *value = to.to_string();
                changed = true;
            }
        }
    }
    changed
}

fn rewrite_pac_hub_urls(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(ctx.update_config(|config| {
        let Some(pac) = config.spec.platforms.openshift.pipelines_as_code.as_mut() else {
            return false;
        };
        let mut changed = rewrite_hub_settings(&mut pac.settings.settings);
        for controller in pac.settings.additional_controllers.values_mut() {
            changed |= rewrite_hub_settings(&mut controller.settings);
        }
        changed
    }))
}

fn drop_affinity_assistant_flag(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(ctx.update_config(|config| {
        let properties = &mut config.spec.pipeline.properties;
        if properties.coschedule.is_some() && properties.disable_affinity_assistant == Some(true) {
            properties.disable_affinity_assistant = None;
            return true;
        }
        false
    }))
}

fn storage_version(crd: &Value) -> Option<&str> {
    crd.pointer("/spec/versions")?
        .as_array()?
        .iter()
        .find(|v| v["storage"].as_bool() == Some(true))?
        .get("name")?
        .as_str()
}

fn migrate_storage_versions(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        for name in MIGRATED_CRDS {
            let crd_key = ObjectKey::new(CRD_API_VERSION, CRD_KIND, None, name);
            let Some(crd) = ctx.client().get(&crd_key).await? else {
                debug!("crd {name} not installed, skipping storage migration");
                continue;
            };
            let (Some(version), Some(group), Some(kind)) = (
                storage_version(&crd),
                crd.pointer("/spec/group").and_then(Value::as_str),
                crd.pointer("/spec/names/kind").and_then(Value::as_str),
            ) else {
                continue;
            };
            let stored = json!([version]);
            if crd.pointer("/status/storedVersions") == Some(&stored) {
                continue;
            }

            let api_version = format!("{group}/{version}");
            let objects = ctx.client().list(&api_version, kind, None, None).await?;
            for obj in &objects {
                ctx.client().merge_patch(&ObjectKey::from_value(obj)?, &json!({})).await?;
            }
            ctx.client()
                .merge_patch_status(&crd_key, &json!({"status": {"storedVersions": stored}}))
                .await?;
            info!("migrated {} {name} objects to {version}", objects.len());
        }
        Ok(())
    })
}

fn delete_cluster_task_installer_sets(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        if ctx.platform != Platform::OpenShift {
            return Ok(());
        }
        for type_ in DEPRECATED_CLUSTER_TASK_TYPES {
            for name in installer_sets_of_type(ctx, type_).await? {
                info!("deleting deprecated installer-set {name}");
                delete_typed::<TektonInstallerSet>(ctx.client(), None, &name).await?;
            }
        }
        Ok(())
    })
}

fn prune_versioned_task_sets(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(prune_versioned_sets(ctx, VERSIONED_RESOLVER_TASK_TYPE))
}

fn prune_versioned_step_action_sets(ctx: &UpgradeContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(prune_versioned_sets(ctx, VERSIONED_RESOLVER_STEP_ACTION_TYPE))
}

/// Keeps the [`VERSIONED_RETENTION`] installer-sets of `type_` whose names sort last.
async fn prune_versioned_sets(ctx: &UpgradeContext, type_: &str) -> Result<()> {
    if ctx.platform != Platform::OpenShift {
        return Ok(());
    }
    let mut names = installer_sets_of_type(ctx, type_).await?;
    names.sort_unstable_by(|a, b| b.cmp(a));
    for name in names.into_iter().skip(VERSIONED_RETENTION) {
        info!("deleting outdated {type_} installer-set {name}");
        delete_typed::<TektonInstallerSet>(ctx.client(), None, &name).await?;
    }
    Ok(())
}

async fn installer_sets_of_type(ctx: &UpgradeContext, type_: &str) -> Result<Vec<String>> {
    let selector = format!("{INSTALLER_SET_TYPE_KEY}={type_}");
    let sets = list_typed::<TektonInstallerSet>(ctx.client(), None, Some(&selector)).await?;
    Ok(sets.into_iter().filter_map(|s| s.metadata.name).collect())
}
