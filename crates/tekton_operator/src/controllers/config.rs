//! The `config` reconciler: projects one TektonConfig onto the component resources of its
//! profile and aggregates their readiness.

use std::sync::Arc;

use chrono::Utc;
use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::*;

use super::component::Component;
use super::{add_finalizer, conditions, has_finalizer, is_release, remove_finalizer, set_release_label, write_status, Context};
use crate::api::v1alpha1::*;
use crate::api::{
    POST_UPGRADE_VERSION_KEY, PRE_UPGRADE_VERSION_KEY, TARGET_NAMESPACE_DELETION_LABEL, TARGET_NAMESPACE_LABEL,
};
use crate::client::{create_typed, delete_typed, get_typed, replace_typed, ObjectKey};
use crate::conditions::{
    is_ready, COMPONENTS_READY, DEPENDENCIES_INSTALLED, DEPLOYMENTS_AVAILABLE, INSTALL_SUCCEEDED, POST_UPGRADE,
    PRE_UPGRADE, REASON_ERROR, REASON_INVALID, REASON_UPGRADE_PENDING, REASON_WAITING,
};
use crate::defaults::apply_defaults;
use crate::settings::Platform;
use crate::upgrade::{run_post_upgrade, run_pre_upgrade, UpgradeContext};
use crate::util::errors::{Error, Result, StdError, REQUEUE_DELAY};
use crate::validation::validate;

/// Component kinds the config creates and deletes.
pub const MANAGED: [ComponentKind; 11] = [
    ComponentKind::Pipeline,
    ComponentKind::Trigger,
    ComponentKind::Chain,
    ComponentKind::Result,
    ComponentKind::Pruner,
    ComponentKind::Scheduler,
    ComponentKind::SyncerService,
    ComponentKind::MulticlusterProxyAae,
    ComponentKind::Dashboard,
    ComponentKind::Addon,
    ComponentKind::PipelinesAsCode,
];

/// What the config learned about one of its components.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Health {
    Ready,
    Waiting(String),
    UpgradePending(String),
}

/// Components of `config`'s profile, after the per-component gates.
pub fn desired_components(config: &TektonConfig, platform: Platform) -> Vec<ComponentKind> {
    let spec = &config.spec;
    let profile = spec.profile.as_str();
    let basic = matches!(profile, PROFILE_BASIC | PROFILE_ALL);
    let all = profile == PROFILE_ALL;
    let openshift = platform == Platform::OpenShift;
    let multi_cluster_hub = !spec.scheduler.is_disabled() && spec.scheduler.is_multi_cluster_hub();

    MANAGED
        .into_iter()
        .filter(|kind| match kind {
            ComponentKind::Pipeline => true,
            ComponentKind::Trigger => basic,
            ComponentKind::Chain => basic && !spec.chain.is_disabled(),
            ComponentKind::Result => basic && !spec.result.is_disabled(),
            ComponentKind::Pruner => basic && !spec.tektonpruner.pruner.is_disabled(),
            ComponentKind::Scheduler => basic && !spec.scheduler.is_disabled(),
            ComponentKind::SyncerService | ComponentKind::MulticlusterProxyAae => basic && multi_cluster_hub,
            ComponentKind::Dashboard => all && !openshift,
            ComponentKind::Addon => all && openshift,
            ComponentKind::PipelinesAsCode => openshift && config.pipelines_as_code().is_some_and(|p| p.is_enabled()),
            _ => false,
        })
        .collect()
}

pub async fn reconcile(config: Arc<TektonConfig>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(ComponentKind::Config.short_name());
    ctx.diagnostics.write().await.last_event = Utc::now();
    info!("Reconciling TektonConfig \"{}\"", config.name_any());

    let mut config = (*config).clone();
    if config.meta().deletion_timestamp.is_some() {
        if has_finalizer(&config) {
            ctx.platform
                .finalize(ctx.client(), ComponentKind::Config, config.target_namespace())
                .await?;
            remove_finalizer(ctx.client(), &config).await?;
        }
        return Ok(Action::await_change());
    }
    if !has_finalizer(&config) {
        config = add_finalizer(ctx.client(), &config).await?;
    }

    let before = config.clone();
    let result = reconcile_config(&mut config, &ctx).await;
    write_status(ctx.client(), &before, &config).await?;
    result
}

async fn reconcile_config(config: &mut TektonConfig, ctx: &Context) -> Result<Action> {
    let version = ctx.settings.version.clone();
    conditions(config).initialize();

    let mut defaulted = config.clone();
    if apply_defaults(&mut defaulted, &ctx.settings) {
        debug!("persisting defaults of TektonConfig \"{}\"", config.name_any());
        replace_typed(ctx.client(), &defaulted).await?;
        return Err(Error::ReconcileAgain);
    }

    let errs = validate(config, None, ctx.settings.platform);
    if !errs.is_empty() {
        warn!("TektonConfig \"{}\" is invalid: {errs}", config.name_any());
        conditions(config).mark_false(DEPENDENCIES_INSTALLED, REASON_INVALID, errs.to_string());
        return Ok(Action::await_change());
    }

    let upgrade = UpgradeContext::new(ctx.client.clone(), version.clone(), ctx.settings.platform);
    if upgrade.is_pending(config, PRE_UPGRADE_VERSION_KEY) {
        conditions(config).mark_false(PRE_UPGRADE, REASON_UPGRADE_PENDING, "pre upgrade is in progress");
        if let Err(e) = run_pre_upgrade(&upgrade).await {
            conditions(config).mark_false(PRE_UPGRADE, REASON_ERROR, e.to_string());
            return Err(e);
        }
        // The first step cleared the stored conditions; the status written now follows suit.
        info!("pre-upgrade migrations ran for {version}");
        conditions(config).reset();
        conditions(config).mark_unknown(PRE_UPGRADE, REASON_UPGRADE_PENDING, format!("migrated to {version}"));
        return Err(Error::ReconcileAgain);
    }
    conditions(config).mark_true(PRE_UPGRADE);

    if !is_release(config.labels(), &version) {
        info!("TektonConfig upgrade pending to {version}");
        conditions(config).mark_false(DEPENDENCIES_INSTALLED, REASON_UPGRADE_PENDING, format!("upgrading to {version}"));
        config.component_status_mut().version = None;
        set_release_label(ctx.client(), config, &version).await?;
        return Err(Error::ReconcileAgain);
    }

    let namespace = config.target_namespace().to_string();
    ensure_target_namespace(ctx, &namespace).await?;
    if let Err(e) = ctx.platform.pre_reconcile(ctx.client(), ComponentKind::Config, &namespace).await {
        conditions(config).mark_false(DEPENDENCIES_INSTALLED, REASON_ERROR, e.to_string());
        return Err(e);
    }
    conditions(config).mark_true(DEPENDENCIES_INSTALLED);

    let desired = desired_components(config, ctx.settings.platform);
    let mut health = Vec::new();
    for kind in &desired {
        health.push(ensure_kind(config, ctx, *kind).await?);
    }
    let mut removed = Vec::new();
    for kind in MANAGED.into_iter().filter(|k| !desired.contains(k)) {
        if remove_kind(config, ctx, kind).await? {
            removed.push(kind.kind());
        }
    }
    if !removed.is_empty() {
        let message = format!("removing {}", removed.join(", "));
        conditions(config).mark_false(COMPONENTS_READY, REASON_WAITING, message);
        return Ok(Action::requeue(REQUEUE_DELAY));
    }

    let pending: Vec<&str> = health
        .iter()
        .filter_map(|h| match h {
            Health::UpgradePending(m) => Some(m.as_str()),
            _ => None,
        })
        .collect();
    if !pending.is_empty() {
        conditions(config).mark_false(COMPONENTS_READY, REASON_UPGRADE_PENDING, pending.join(", "));
        return Err(Error::DependencyUpgradePending);
    }
    let waiting: Vec<&str> = health
        .iter()
        .filter_map(|h| match h {
            Health::Waiting(m) => Some(m.as_str()),
            _ => None,
        })
        .collect();
    if !waiting.is_empty() {
        conditions(config).mark_false(COMPONENTS_READY, REASON_WAITING, waiting.join(", "));
        return Ok(Action::requeue(REQUEUE_DELAY));
    }
    conditions(config).mark_true(COMPONENTS_READY);
    conditions(config).mark_true(DEPLOYMENTS_AVAILABLE);

    delete_marked_namespaces(ctx).await?;
    if upgrade.is_pending(config, POST_UPGRADE_VERSION_KEY) {
        conditions(config).mark_false(POST_UPGRADE, REASON_UPGRADE_PENDING, "post upgrade is in progress");
        if let Err(e) = run_post_upgrade(&upgrade).await {
            conditions(config).mark_false(POST_UPGRADE, REASON_ERROR, e.to_string());
            return Err(e);
        }
        info!("post-upgrade migrations ran for {version}");
        return Err(Error::ReconcileAgain);
    }
    conditions(config).mark_true(POST_UPGRADE);
    if let Err(e) = ctx.platform.post_reconcile(ctx.client(), ComponentKind::Config, &namespace).await {
        conditions(config).mark_false(INSTALL_SUCCEEDED, REASON_ERROR, e.to_string());
        return Err(e);
    }

    let was_ready = is_ready(config.conditions());
    conditions(config).mark_true(INSTALL_SUCCEEDED);
    let generation = config.meta().generation;
    let profile = config.spec.profile.clone();
    let status = config.status.get_or_insert_with(Default::default);
    status.common.version = Some(version.clone());
    status.common.observed_generation = generation;
    status.profile = Some(profile);
    if !was_ready && is_ready(config.conditions()) {
        ctx.publish(&*config, "Installed", format!("Tekton {version} is ready")).await;
    }
    Ok(Action::requeue(Duration::from_secs(5 * 60)))
}

/// Labels the target namespace, creating it when absent, and marks every other target namespace
/// for deletion.
async fn ensure_target_namespace(ctx: &Context, namespace: &str) -> Result<()> {
    let client = ctx.client();
    let key = ObjectKey::new("v1", "Namespace", None, namespace);
    match client.get(&key).await? {
        None => {
            info!("creating target namespace {namespace}");
            client
                .create(&json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": {"name": namespace, "labels": {TARGET_NAMESPACE_LABEL: "true"}}
                }))
                .await?;
        }
        Some(ns) if ns["metadata"]["labels"][TARGET_NAMESPACE_LABEL] != "true" => {
            let patch = json!({"metadata": {"labels": {
                TARGET_NAMESPACE_LABEL: "true",
                TARGET_NAMESPACE_DELETION_LABEL: Value::Null,
            }}});
            client.merge_patch(&key, &patch).await?;
        }
        Some(_) => {}
    }

    let selector = format!("{TARGET_NAMESPACE_LABEL}=true");
    for ns in client.list("v1", "Namespace", None, Some(&selector)).await? {
        let name = ns["metadata"]["name"].as_str().unwrap_or_default();
        if name == namespace || ns["metadata"]["labels"][TARGET_NAMESPACE_DELETION_LABEL] == "true" {
            continue;
        }
        info!("marking obsolete target namespace {name} for deletion");
        let patch = json!({"metadata": {"labels": {TARGET_NAMESPACE_DELETION_LABEL: "true"}}});
        client.merge_patch(&ObjectKey::new("v1", "Namespace", None, name), &patch).await?;
    }
    Ok(())
}

async fn delete_marked_namespaces(ctx: &Context) -> Result<()> {
    let selector = format!("{TARGET_NAMESPACE_DELETION_LABEL}=true");
    for ns in ctx.client().list("v1", "Namespace", None, Some(&selector)).await? {
        let key = ObjectKey::from_value(&ns)?;
        info!("deleting obsolete target namespace {}", key.name);
        ctx.client().delete(&key).await?;
    }
    Ok(())
}

fn common(config: &TektonConfig) -> CommonSpec {
    CommonSpec {
        version: None,
        ..config.spec.common.clone()
    }
}

async fn ensure_kind(config: &TektonConfig, ctx: &Context, kind: ComponentKind) -> Result<Health> {
    let spec = &config.spec;
    let name = kind
        .singleton_name()
        .ok_or_else(|| Error::StdError(StdError::InvalidArgument(format!("{kind} is not a singleton"))))?;
    match kind {
        ComponentKind::Pipeline => {
            let desired = TektonPipeline::new(name, TektonPipelineSpec {
                common: common(config),
                pipeline: spec.pipeline.clone(),
                config: spec.config.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Trigger => {
            let desired = TektonTrigger::new(name, TektonTriggerSpec {
                common: common(config),
                trigger: spec.trigger.clone(),
                config: spec.config.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Chain => {
            let desired = TektonChain::new(name, TektonChainSpec {
                common: common(config),
                chain: spec.chain.clone(),
                config: Config::default(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Result => {
            let desired = TektonResult::new(name, TektonResultSpec {
                common: common(config),
                result: spec.result.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Pruner => {
            let desired = TektonPruner::new(name, TektonPrunerSpec {
                common: common(config),
                pruner: spec.tektonpruner.pruner.clone(),
                config: spec.tektonpruner.config.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Scheduler => {
            let desired = TektonScheduler::new(name, TektonSchedulerSpec {
                common: common(config),
                scheduler: spec.scheduler.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::SyncerService => {
            let desired = SyncerService::new(name, SyncerServiceSpec {
                common: common(config),
                ..Default::default()
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::MulticlusterProxyAae => {
            let desired = TektonMulticlusterProxyAAE::new(name, TektonMulticlusterProxyAAESpec {
                common: common(config),
                ..Default::default()
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Dashboard => {
            let desired = TektonDashboard::new(name, TektonDashboardSpec {
                common: common(config),
                dashboard: spec.dashboard.clone(),
                config: spec.config.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::Addon => {
            let desired = TektonAddon::new(name, TektonAddonSpec {
                common: common(config),
                addon: spec.addon.clone(),
            });
            ensure_component(config, ctx, desired).await
        }
        ComponentKind::PipelinesAsCode => {
            let settings = config.pipelines_as_code().map(|p| p.settings.clone()).unwrap_or_default();
            let desired = OpenShiftPipelinesAsCode::new(name, OpenShiftPipelinesAsCodeSpec {
                common: common(config),
                config: spec.config.clone(),
                settings,
            });
            ensure_component(config, ctx, desired).await
        }
        other => Err(Error::StdError(StdError::InvalidArgument(format!(
            "{other} is not managed by the config"
        )))),
    }
}

/// Creates or updates one component from its projection and reports how it is doing.
///
/// Only the spec and the owner references are compared, so labels and finalizers written by the
/// component's own reconciler never cause an update. Existing `options` survive when the config
/// carries none for the component.
async fn ensure_component<K: Component>(config: &TektonConfig, ctx: &Context, mut desired: K) -> Result<Health> {
    let client = ctx.client();
    let name = desired.name_any();
    apply_defaults(&mut desired, &ctx.settings);
    let owner = config
        .controller_owner_ref(&())
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("config has no uid".to_string())))?;
    desired.meta_mut().owner_references = Some(vec![owner]);

    let Some(existing) = get_typed::<K>(client, None, &name).await? else {
        info!("creating {} \"{name}\"", K::KIND);
        create_typed(client, &desired).await?;
        return Ok(Health::Waiting(format!("{name} was created")));
    };

    let kept = existing.options().filter(|o| !o.is_empty()).cloned();
    if let (Some(kept), Some(options)) = (kept, desired.options_mut()) {
        if options.is_empty() {
            *options = kept;
        }
    }
    let wanted = serde_json::to_value(&desired)?;
    let mut stored = serde_json::to_value(&existing)?;
    if stored["spec"] != wanted["spec"] || existing.owner_references() != desired.owner_references() {
        info!("updating {} \"{name}\"", K::KIND);
        stored["spec"] = wanted["spec"].clone();
        stored["metadata"]["ownerReferences"] = wanted["metadata"]["ownerReferences"].clone();
        let updated: K = serde_json::from_value(stored)?;
        replace_typed(client, &updated).await?;
        return Ok(Health::Waiting(format!("{name} was updated")));
    }

    if !is_release(existing.labels(), &ctx.settings.version) {
        return Ok(Health::UpgradePending(format!("{name} upgrade pending")));
    }
    if !is_ready(existing.conditions()) {
        return Ok(Health::Waiting(format!("{name} is not ready")));
    }
    Ok(Health::Ready)
}

async fn remove_kind(config: &TektonConfig, ctx: &Context, kind: ComponentKind) -> Result<bool> {
    match kind {
        ComponentKind::Pipeline => remove_component::<TektonPipeline>(config, ctx).await,
        ComponentKind::Trigger => remove_component::<TektonTrigger>(config, ctx).await,
        ComponentKind::Chain => remove_component::<TektonChain>(config, ctx).await,
        ComponentKind::Result => remove_component::<TektonResult>(config, ctx).await,
        ComponentKind::Pruner => remove_component::<TektonPruner>(config, ctx).await,
        ComponentKind::Scheduler => remove_component::<TektonScheduler>(config, ctx).await,
        ComponentKind::SyncerService => remove_component::<SyncerService>(config, ctx).await,
        ComponentKind::MulticlusterProxyAae => remove_component::<TektonMulticlusterProxyAAE>(config, ctx).await,
        ComponentKind::Dashboard => remove_component::<TektonDashboard>(config, ctx).await,
        ComponentKind::Addon => remove_component::<TektonAddon>(config, ctx).await,
        ComponentKind::PipelinesAsCode => remove_component::<OpenShiftPipelinesAsCode>(config, ctx).await,
        _ => Ok(false),
    }
}

/// Deletes the component if this config owns it. Returns whether it still exists.
async fn remove_component<K: TektonComponent>(config: &TektonConfig, ctx: &Context) -> Result<bool> {
    let Some(name) = K::KIND.singleton_name() else {
        return Ok(false);
    };
    let Some(existing) = get_typed::<K>(ctx.client(), None, name).await? else {
        return Ok(false);
    };
    let owned = config
        .uid()
        .is_some_and(|uid| existing.owner_references().iter().any(|o| o.uid == uid));
    if !owned {
        return Ok(false);
    }
    if existing.meta().deletion_timestamp.is_none() {
        info!("deleting {} \"{name}\", it is not part of profile {}", K::KIND, config.spec.profile);
        delete_typed::<K>(ctx.client(), None, name).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::scheduler::{MultiClusterConfig, MULTI_CLUSTER_ROLE_HUB};
    use crate::conditions::{find_condition, TRUE, UNKNOWN};
    use crate::controllers::fixtures::{bundle, write_bundle, TestEnv, OPERATOR_VERSION};
    use crate::client::ResourceClient;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    const TRIGGER_BUNDLE: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: feature-flags-triggers
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: tekton-triggers-controller
spec:
  template:
    spec:
      containers:
        - name: controller
          image: gcr.io/tekton-releases/triggers/controller:v0.30.0
"#;

    fn config(profile: &str) -> TektonConfig {
        let mut config = TektonConfig::new("config", TektonConfigSpec {
            profile: profile.to_string(),
            common: CommonSpec::new("tekton-pipelines"),
            ..Default::default()
        });
        config.spec.chain.disabled = Some(true);
        config.spec.result.disabled = Some(true);
        config.spec.scheduler.disabled = Some(true);
        config
    }

    fn kinds(config: &TektonConfig, platform: Platform) -> BTreeSet<ComponentKind> {
        desired_components(config, platform).into_iter().collect()
    }

    /// Drives the config, its pipeline and trigger and their installer-sets until the config is
    /// ready.
    async fn converge(env: &TestEnv) -> TektonConfig {
        for _ in 0..20 {
            let _ = env.reconcile_config().await;
            if env.find::<TektonPipeline>("pipeline").await.is_some() {
                let _ = env.reconcile::<TektonPipeline>("pipeline").await;
            }
            if env.find::<TektonTrigger>("trigger").await.is_some() {
                let _ = env.reconcile::<TektonTrigger>("trigger").await;
            }
            env.converge_sets().await;
            let config: TektonConfig = env.get("config").await;
            if is_ready(config.conditions()) {
                return config;
            }
        }
        env.get("config").await
    }

    #[test]
    fn profiles_nest() {
        let mut c = config(PROFILE_LITE);
        assert_eq!(kinds(&c, Platform::Kubernetes), BTreeSet::from([ComponentKind::Pipeline]));

        c.spec.profile = PROFILE_BASIC.into();
        assert_eq!(
            kinds(&c, Platform::Kubernetes),
            BTreeSet::from([ComponentKind::Pipeline, ComponentKind::Trigger])
        );

        c.spec.profile = PROFILE_ALL.into();
        assert_eq!(
            kinds(&c, Platform::Kubernetes),
            BTreeSet::from([ComponentKind::Pipeline, ComponentKind::Trigger, ComponentKind::Dashboard])
        );
    }

    #[test]
    fn platform_and_flags_gate_components() {
        let mut c = config(PROFILE_ALL);
        c.spec.platforms.openshift.pipelines_as_code = Some(pipelines_as_code::PipelinesAsCode {
            enable: Some(true),
            ..Default::default()
        });
        let openshift = kinds(&c, Platform::OpenShift);
        assert!(openshift.contains(&ComponentKind::Addon));
        assert!(openshift.contains(&ComponentKind::PipelinesAsCode));
        assert!(!openshift.contains(&ComponentKind::Dashboard));
        assert!(!kinds(&c, Platform::Kubernetes).contains(&ComponentKind::PipelinesAsCode));

        c.spec.chain.disabled = Some(false);
        c.spec.scheduler.disabled = Some(false);
        assert!(kinds(&c, Platform::Kubernetes).contains(&ComponentKind::Chain));
        assert!(!kinds(&c, Platform::Kubernetes).contains(&ComponentKind::SyncerService));

        c.spec.scheduler.multi_cluster = MultiClusterConfig {
            disabled: Some(false),
            role: Some(MULTI_CLUSTER_ROLE_HUB.into()),
        };
        let hub = kinds(&c, Platform::Kubernetes);
        assert!(hub.contains(&ComponentKind::SyncerService));
        assert!(hub.contains(&ComponentKind::MulticlusterProxyAae));
    }

    #[tokio::test]
    async fn basic_profile_reaches_ready() {
        let env = TestEnv::new();
        bundle(&env, ComponentKind::Pipeline, "0.68.0", &[]);
        write_bundle(env.ko_data_path(), ComponentKind::Trigger, "0.30.0", "", TRIGGER_BUNDLE, &[]);
        env.cluster
            .create(&json!({"apiVersion": "v1", "kind": "Namespace",
                           "metadata": {"name": "old-pipelines", "labels": {TARGET_NAMESPACE_LABEL: "true"}}}))
            .await
            .unwrap();
        env.create(&config(PROFILE_BASIC)).await;

        let config = converge(&env).await;
        assert!(is_ready(config.conditions()), "{:#?}", config.conditions());
        let status = config.status.clone().unwrap();
        assert_eq!(status.common.version.as_deref(), Some(OPERATOR_VERSION));
        assert_eq!(status.profile.as_deref(), Some(PROFILE_BASIC));
        assert_eq!(config.annotations()[PRE_UPGRADE_VERSION_KEY], OPERATOR_VERSION);
        assert_eq!(config.annotations()[POST_UPGRADE_VERSION_KEY], OPERATOR_VERSION);

        let pipeline: TektonPipeline = env.get("pipeline").await;
        assert_eq!(pipeline.owner_references()[0].uid, config.uid().unwrap());
        assert_eq!(pipeline.spec.common.target_namespace, "tekton-pipelines");
        assert!(env.find::<TektonTrigger>("trigger").await.is_some());
        assert!(env.find::<TektonChain>("chain").await.is_none());

        let namespaces = env.cluster.names("Namespace");
        assert_eq!(namespaces, BTreeSet::from(["tekton-pipelines".to_string()]));
        let ns = env.cluster.objects("Namespace").remove(0);
        assert_eq!(ns["metadata"]["labels"][TARGET_NAMESPACE_LABEL], "true");
        assert!(env
            .cluster
            .events()
            .iter()
            .any(|e| e.object == "config" && e.reason == "Installed"));
    }

    /// One Deployment per component so the installer-sets of different kinds never share objects.
    fn component_bundle(kind: ComponentKind) -> String {
        let name = kind.manifest_dir();
        format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}-controller\nspec:\n  template:\n    spec:\n      containers:\n        - name: controller\n          image: gcr.io/example/{name}:v1\n"
        )
    }

    #[tokio::test]
    async fn default_basic_profile_installs_every_component() {
        let env = TestEnv::new();
        bundle(&env, ComponentKind::Pipeline, "0.68.0", &[]);
        write_bundle(env.ko_data_path(), ComponentKind::Trigger, "0.30.0", "", TRIGGER_BUNDLE, &[]);
        for (kind, version) in [
            (ComponentKind::Chain, "0.24.0"),
            (ComponentKind::Result, "0.14.0"),
            (ComponentKind::Scheduler, "0.2.0"),
        ] {
            write_bundle(env.ko_data_path(), kind, version, "", &component_bundle(kind), &[]);
        }
        env.create(&TektonConfig::new("config", TektonConfigSpec {
            profile: PROFILE_BASIC.to_string(),
            common: CommonSpec::new("tekton-pipelines"),
            ..Default::default()
        }))
        .await;

        let mut config: TektonConfig = env.get("config").await;
        for _ in 0..30 {
            let _ = env.reconcile_config().await;
            reconcile_present::<TektonPipeline>(&env).await;
            reconcile_present::<TektonTrigger>(&env).await;
            reconcile_present::<TektonChain>(&env).await;
            reconcile_present::<TektonResult>(&env).await;
            reconcile_present::<TektonScheduler>(&env).await;
            env.converge_sets().await;
            config = env.get("config").await;
            if is_ready(config.conditions()) {
                break;
            }
        }
        assert!(is_ready(config.conditions()), "{:#?}", config.conditions());
        assert!(is_ready(env.get::<TektonChain>("chain").await.conditions()));
        assert!(is_ready(env.get::<TektonResult>("result").await.conditions()));
        assert!(is_ready(env.get::<TektonScheduler>("scheduler").await.conditions()));
        assert!(env.cluster.objects("TektonPruner").is_empty());
        assert!(env.cluster.objects("SyncerService").is_empty());
        let deployments = env.cluster.names("Deployment");
        for name in ["tekton-chains-controller", "tekton-results-controller", "tekton-kueue-controller"] {
            assert!(deployments.contains(name), "{name} missing from {deployments:?}");
        }
    }

    async fn reconcile_present<K: Component>(env: &TestEnv) {
        let Some(name) = K::KIND.singleton_name() else {
            return;
        };
        if env.find::<K>(name).await.is_some() {
            let _ = env.reconcile::<K>(name).await;
        }
    }

    #[tokio::test]
    async fn empty_target_namespace_is_defaulted_before_validation() {
        let env = TestEnv::new();
        bundle(&env, ComponentKind::Pipeline, "0.68.0", &[]);
        let mut c = config(PROFILE_LITE);
        c.spec.common.target_namespace = String::new();
        env.create(&c).await;

        assert!(matches!(env.reconcile_config().await, Err(Error::ReconcileAgain)));
        let stored: TektonConfig = env.get("config").await;
        assert_eq!(stored.spec.common.target_namespace, "tekton-pipelines");

        let config = converge(&env).await;
        assert!(is_ready(config.conditions()), "{:#?}", config.conditions());
        let pipeline: TektonPipeline = env.get("pipeline").await;
        assert_eq!(pipeline.spec.common.target_namespace, "tekton-pipelines");
    }

    #[tokio::test]
    async fn upgrade_conditions_follow_the_migrations() {
        let env = TestEnv::new();
        bundle(&env, ComponentKind::Pipeline, "0.68.0", &[]);
        env.create(&config(PROFILE_LITE)).await;

        // Defaults first, then the pre-upgrade steps, which start the conditions over.
        assert!(matches!(env.reconcile_config().await, Err(Error::ReconcileAgain)));
        assert!(matches!(env.reconcile_config().await, Err(Error::ReconcileAgain)));
        let stored: TektonConfig = env.get("config").await;
        assert_eq!(stored.annotations()[PRE_UPGRADE_VERSION_KEY], OPERATOR_VERSION);
        assert_eq!(find_condition(stored.conditions(), PRE_UPGRADE).map(|c| c.status.as_str()), Some(UNKNOWN));
        assert!(stored.annotations().get(POST_UPGRADE_VERSION_KEY).is_none());

        let _ = env.reconcile_config().await;
        let stored: TektonConfig = env.get("config").await;
        assert_eq!(find_condition(stored.conditions(), PRE_UPGRADE).map(|c| c.status.as_str()), Some(TRUE));

        let config = converge(&env).await;
        assert!(is_ready(config.conditions()), "{:#?}", config.conditions());
        assert_eq!(find_condition(config.conditions(), POST_UPGRADE).map(|c| c.status.as_str()), Some(TRUE));
        assert_eq!(config.annotations()[POST_UPGRADE_VERSION_KEY], OPERATOR_VERSION);
    }

    #[tokio::test]
    async fn switching_to_lite_removes_components_outside_the_profile() {
        let env = TestEnv::new();
        env.create(&config(PROFILE_ALL)).await;
        for _ in 0..4 {
            let _ = env.reconcile_config().await;
        }
        for (kind, name) in [("TektonPipeline", "pipeline"), ("TektonTrigger", "trigger"), ("TektonDashboard", "dashboard")] {
            assert!(env.cluster.names(kind).contains(name), "{name} was not created");
        }

        let mut config: TektonConfig = env.get("config").await;
        config.spec.profile = PROFILE_LITE.into();
        replace_typed(env.cluster.as_ref(), &config).await.unwrap();
        let action = env.reconcile_config().await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_DELAY));

        assert_eq!(env.cluster.names("TektonPipeline").len(), 1);
        assert!(env.cluster.objects("TektonTrigger").is_empty());
        assert!(env.cluster.objects("TektonDashboard").is_empty());
        let config: TektonConfig = env.get("config").await;
        let ready = find_condition(config.conditions(), COMPONENTS_READY).unwrap();
        assert_eq!(ready.reason, REASON_WAITING);
        assert!(ready.message.contains("TektonTrigger"));
    }

    #[tokio::test]
    async fn component_options_survive_an_empty_projection() {
        let env = TestEnv::new();
        env.create(&config(PROFILE_LITE)).await;
        for _ in 0..4 {
            let _ = env.reconcile_config().await;
        }
        let mut pipeline: TektonPipeline = env.get("pipeline").await;
        pipeline.spec.pipeline.options.disabled = Some(true);
        replace_typed(env.cluster.as_ref(), &pipeline).await.unwrap();

        let _ = env.reconcile_config().await;
        let pipeline: TektonPipeline = env.get("pipeline").await;
        assert_eq!(pipeline.spec.pipeline.options.disabled, Some(true));
        assert_eq!(pipeline.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn projection_overwrites_drift_in_owned_fields() {
        let env = TestEnv::new();
        env.create(&config(PROFILE_LITE)).await;
        for _ in 0..4 {
            let _ = env.reconcile_config().await;
        }
        let mut pipeline: TektonPipeline = env.get("pipeline").await;
        pipeline.spec.pipeline.properties.enable_api_fields = Some("alpha".into());
        replace_typed(env.cluster.as_ref(), &pipeline).await.unwrap();

        let _ = env.reconcile_config().await;
        let pipeline: TektonPipeline = env.get("pipeline").await;
        assert_eq!(pipeline.spec.pipeline.properties.enable_api_fields.as_deref(), Some("stable"));
    }

    #[tokio::test]
    async fn invalid_configs_are_marked_and_left_alone() {
        let env = TestEnv::new();
        let mut c = config(PROFILE_BASIC);
        c.spec.profile = "everything".into();
        env.create(&c).await;
        for _ in 0..3 {
            let _ = env.reconcile_config().await;
        }

        let action = env.reconcile_config().await.unwrap();
        assert_eq!(action, Action::await_change());
        let stored: TektonConfig = env.get("config").await;
        let deps = find_condition(stored.conditions(), DEPENDENCIES_INSTALLED).unwrap();
        assert_eq!(deps.reason, REASON_INVALID);
        assert!(env.cluster.objects("TektonPipeline").is_empty());
    }

    #[tokio::test]
    async fn deleting_the_config_cascades_to_its_components() {
        let env = TestEnv::new();
        env.create(&config(PROFILE_BASIC)).await;
        for _ in 0..4 {
            let _ = env.reconcile_config().await;
        }
        assert_eq!(env.cluster.names("TektonTrigger").len(), 1);

        delete_typed::<TektonConfig>(env.cluster.as_ref(), None, "config").await.unwrap();
        let action = env.reconcile_config().await.unwrap();
        assert_eq!(action, Action::await_change());

        assert!(env.find::<TektonConfig>("config").await.is_none());
        assert!(env.cluster.objects("TektonPipeline").is_empty());
        assert!(env.cluster.objects("TektonTrigger").is_empty());
    }
}
