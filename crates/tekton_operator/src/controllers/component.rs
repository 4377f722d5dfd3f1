//! The reconciler shared by every component kind.
//!
//! A component resolves its bundle, renders it through the transformer chain, hands the result
//! to an installer-set and reflects the installer-set's readiness into its own ladder. Kinds
//! plug in through [`Component`]; everything else is common.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde_json::Value;
use tokio::time::Duration;
use tracing::*;

use super::{add_finalizer, conditions, has_finalizer, is_release, remove_finalizer, set_release_label, write_status, Context};
use crate::api::v1alpha1::*;
use crate::api::{COMPONENT_KEY, CREATED_BY_KEY, INSTALLER_SET_TYPE_KEY, RELEASE_VERSION_KEY};
use crate::client::{create_typed, delete_typed, get_typed, list_typed, patch_status_typed, replace_typed, ObjectKey};
use crate::conditions::{is_ready, ladder, REASON_ERROR, REASON_INVALID, REASON_UPGRADE_PENDING, REASON_WAITING};
use crate::defaults::{apply_defaults, SetDefaults};
use crate::installerset::{build_installer_set, is_current};
use crate::manifests::{component_dir, newest_version, Manifest, Transformer};
use crate::transform::{add_labels, apply_additional_options, deployment_spec_hash, inject_namespace, registry_overrides};
use crate::util::errors::{Error, Result, StdError};
use crate::validation::{validate, Validate};

const PIPELINE: &str = "pipeline";

/// Where an install step stands after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Ready,
    /// Waiting on an owned installer-set; its next status change wakes the reconciler.
    Waiting(String),
}

impl Progress {
    pub fn is_ready(&self) -> bool {
        matches!(self, Progress::Ready)
    }
}

/// The resolved bundle of one component.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub version: String,
    pub dir: PathBuf,
    /// Objects of the bundle's top-level files.
    pub manifest: Manifest,
}

/// Per-kind behaviour of the component reconciler.
#[async_trait]
pub trait Component: TektonComponent + SetDefaults + Validate {
    /// ConfigMap in the target namespace whose `version` key reports what got installed.
    const INFO_CONFIG_MAP: Option<&'static str> = None;

    /// Kind specific rewrites, run after namespace injection and before the platform's.
    fn transformers(&self) -> Result<Vec<Transformer>> {
        Ok(Vec::new())
    }

    /// Drops bundle objects the spec switches off.
    fn filter(&self, manifest: Manifest) -> Manifest {
        manifest
    }

    /// Installs the bundle and marks the installer-set rungs of the ladder.
    async fn install(&mut self, ctx: &Context, bundle: Bundle) -> Result<Progress> {
        install_main(self, ctx, bundle.manifest).await
    }

    /// Runs once the installer-sets are ready, before `PostReconciler` is marked.
    async fn post_install(&mut self, _ctx: &Context) -> Result<Progress> {
        Ok(Progress::Ready)
    }
}

pub async fn reconcile<K: Component>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(K::KIND.short_name());
    ctx.diagnostics.write().await.last_event = Utc::now();
    info!("Reconciling {} \"{}\"", K::KIND, obj.name_any());

    let mut obj = (*obj).clone();
    if obj.meta().deletion_timestamp.is_some() {
        finalize(&obj, &ctx).await?;
        return Ok(Action::await_change());
    }
    if !has_finalizer(&obj) {
        obj = add_finalizer(ctx.client(), &obj).await?;
    }

    let before = obj.clone();
    let result = reconcile_component(&mut obj, &ctx).await;
    write_status(ctx.client(), &before, &obj).await?;
    result
}

async fn reconcile_component<K: Component>(obj: &mut K, ctx: &Context) -> Result<Action> {
    let ladder = ladder(K::KIND);
    let version = ctx.settings.version.clone();
    conditions(obj).initialize();

    // Defaults land first so the validator sees the object as it will be installed.
    let mut defaulted = obj.clone();
    if apply_defaults(&mut defaulted, &ctx.settings) {
        debug!("persisting defaults of {} \"{}\"", K::KIND, obj.name_any());
        replace_typed(ctx.client(), &defaulted).await?;
        return Err(Error::ReconcileAgain);
    }

    let errs = validate(obj, None, ctx.settings.platform);
    if !errs.is_empty() {
        warn!("{} \"{}\" is invalid: {errs}", K::KIND, obj.name_any());
        conditions(obj).mark_false(ladder.dependencies, REASON_INVALID, errs.to_string());
        return Ok(Action::await_change());
    }

    if !is_release(obj.labels(), &version) {
        info!("{} \"{}\" upgrade pending to {version}", K::KIND, obj.name_any());
        conditions(obj).mark_false(ladder.dependencies, REASON_UPGRADE_PENDING, format!("upgrading to {version}"));
        obj.component_status_mut().version = None;
        set_release_label(ctx.client(), obj, &version).await?;
        return Err(Error::ReconcileAgain);
    }

    if K::KIND.depends_on_pipeline() {
        check_pipeline(obj, ctx).await?;
    }
    if K::KIND != ComponentKind::Hub {
        conditions(obj).mark_true(ladder.dependencies);
    }

    let bundle = match load_bundle(obj, ctx).await {
        Ok(bundle) => bundle,
        Err(e) => {
            let rung = ladder.installer_set_available.unwrap_or(ladder.installer_set_ready);
            conditions(obj).mark_false(rung, REASON_ERROR, e.to_string());
            return Err(e);
        }
    };

    if let Err(e) = ctx.platform.pre_reconcile(ctx.client(), K::KIND, obj.target_namespace()).await {
        if let Some(rung) = ladder.pre_reconcile {
            conditions(obj).mark_false(rung, REASON_ERROR, e.to_string());
        }
        return Err(e);
    }
    if let Some(rung) = ladder.pre_reconcile {
        conditions(obj).mark_true(rung);
    }

    let bundle_version = bundle.version.clone();
    if let Progress::Waiting(reason) = obj.install(ctx, bundle).await? {
        debug!("{} \"{}\": {reason}", K::KIND, obj.name_any());
        return Ok(Action::await_change());
    }
    if let Progress::Waiting(reason) = obj.post_install(ctx).await? {
        debug!("{} \"{}\": {reason}", K::KIND, obj.name_any());
        return Ok(Action::await_change());
    }

    if let Err(e) = ctx.platform.post_reconcile(ctx.client(), K::KIND, obj.target_namespace()).await {
        conditions(obj).mark_false(ladder.post_reconcile, REASON_ERROR, e.to_string());
        return Err(e);
    }

    let was_ready = is_ready(obj.conditions());
    conditions(obj).mark_true(ladder.post_reconcile);
    let installed = installed_version::<K>(obj, ctx).await?.unwrap_or(bundle_version);
    let generation = obj.meta().generation;
    let status = obj.component_status_mut();
    status.version = Some(installed.clone());
    status.observed_generation = generation;

    if !was_ready && is_ready(obj.conditions()) {
        ctx.publish(&*obj, "Installed", format!("{} {installed} is ready", K::KIND)).await;
    }
    Ok(Action::requeue(Duration::from_secs(5 * 60)))
}

/// Requires the pipeline component to exist, be ready and run the current release.
async fn check_pipeline<K: Component>(obj: &mut K, ctx: &Context) -> Result<()> {
    let rung = ladder(K::KIND).dependencies;
    let Some(pipeline) = get_typed::<TektonPipeline>(ctx.client(), None, PIPELINE).await? else {
        conditions(obj).mark_false(rung, REASON_WAITING, "tekton-pipelines does not exist");
        return Err(Error::ReconcileAgain);
    };
    if !is_release(pipeline.labels(), &ctx.settings.version) {
        conditions(obj).mark_false(rung, REASON_UPGRADE_PENDING, "tekton-pipelines upgrade pending");
        return Err(Error::DependencyUpgradePending);
    }
    if !is_ready(pipeline.conditions()) {
        conditions(obj).mark_false(rung, REASON_WAITING, "tekton-pipelines is not ready");
        return Err(Error::ReconcileAgain);
    }
    Ok(())
}

/// Picks the bundle version: the spec pin, then the recorded version, then the
/// `<component>-version` ConfigMap, then the newest bundle shipped with the operator.
pub async fn resolve_version<K: TektonComponent>(obj: &K, ctx: &Context) -> Result<String> {
    let dir = component_dir(&ctx.settings.ko_data_path, K::KIND);
    let shipped = |v: &str| dir.join(v).is_dir();

    if let Some(pinned) = obj.common().version.as_deref() {
        if shipped(pinned) {
            return Ok(pinned.to_string());
        }
        return Err(Error::StdError(StdError::Manifest(format!(
            "{} bundle {pinned} is not shipped in {}",
            K::KIND,
            dir.display()
        ))));
    }
    if let Some(recorded) = obj.component_status().and_then(|s| s.version.as_deref()) {
        if shipped(recorded) {
            return Ok(recorded.to_string());
        }
    }
    let version_cm = format!("{}-version", K::KIND.short_name());
    if let Some(v) = config_map_value(ctx, obj.target_namespace(), &version_cm, "version").await? {
        if shipped(&v) {
            return Ok(v);
        }
    }
    newest_version(&dir)?.ok_or_else(|| {
        Error::StdError(StdError::Manifest(format!(
            "no {} bundle under {}",
            K::KIND,
            dir.display()
        )))
    })
}

async fn load_bundle<K: Component>(obj: &K, ctx: &Context) -> Result<Bundle> {
    let version = resolve_version(obj, ctx).await?;
    let dir = component_dir(&ctx.settings.ko_data_path, K::KIND).join(&version);
    let manifest = Manifest::from_dir(&dir)?;
    Ok(Bundle { version, dir, manifest })
}

async fn installed_version<K: Component>(obj: &K, ctx: &Context) -> Result<Option<String>> {
    match K::INFO_CONFIG_MAP {
        Some(name) => config_map_value(ctx, obj.target_namespace(), name, "version").await,
        None => Ok(None),
    }
}

pub async fn config_map_value(ctx: &Context, namespace: &str, name: &str, key: &str) -> Result<Option<String>> {
    let cm = ctx
        .client()
        .get(&ObjectKey::new("v1", "ConfigMap", Some(namespace), name))
        .await?;
    Ok(cm
        .as_ref()
        .and_then(|cm| cm.get("data"))
        .and_then(|data| data.get(key))
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// Runs the transformer chain: namespace, labels, registry, kind, `extra`, platform, then the
/// additional-options overlay and finally the deployment spec hash.
pub fn render<K: Component>(obj: &K, ctx: &Context, manifest: Manifest, extra: Vec<Transformer>) -> Result<Manifest> {
    let namespace = obj.target_namespace();
    let labels = BTreeMap::from([
        (RELEASE_VERSION_KEY.to_string(), ctx.settings.version.clone()),
        (COMPONENT_KEY.to_string(), K::KIND.short_name().to_string()),
    ]);
    let mut transformers = vec![inject_namespace(namespace), add_labels(labels)];
    if let Some(registry) = &obj.common().registry {
        transformers.push(registry_overrides(registry.overrides.clone()));
    }
    transformers.extend(obj.transformers()?);
    transformers.extend(extra);
    transformers.extend(ctx.platform.transformers(K::KIND));

    let mut manifest = obj.filter(manifest).transform(&transformers)?;
    if let Some(options) = obj.options() {
        apply_additional_options(&mut manifest, options, namespace)?;
    }
    manifest.transform(&[deployment_spec_hash()])
}

/// Default install: the whole bundle in the main installer-set.
pub async fn install_main<K: Component>(obj: &mut K, ctx: &Context, manifest: Manifest) -> Result<Progress> {
    let ladder = ladder(K::KIND);
    let rendered = render(obj, ctx, manifest, Vec::new())?;
    let progress = ensure_stage(obj, ctx, MAIN_STAGE, &rendered).await?;
    if let Some(rung) = ladder.installer_set_available {
        conditions(obj).mark_true(rung);
    }
    reflect(obj, ladder.installer_set_ready, &progress);
    Ok(progress)
}

/// Mirrors `progress` into `rung`.
pub fn reflect<K: TektonComponent>(obj: &mut K, rung: &str, progress: &Progress) {
    match progress {
        Progress::Ready => conditions(obj).mark_true(rung),
        Progress::Waiting(reason) => conditions(obj).mark_false(rung, REASON_WAITING, reason),
    }
}

/// Makes sure the installer-set for `stage` holds `manifest`.
///
/// A new set is created first, then the status reference moves to it, then older sets of the
/// same stage are deleted.
pub async fn ensure_stage<K: TektonComponent>(
    obj: &mut K,
    ctx: &Context,
    stage: &str,
    manifest: &Manifest,
) -> Result<Progress> {
    let client = ctx.client();
    let desired = build_installer_set(obj, stage, manifest, &ctx.settings.version)?;
    let name = desired.name_any();

    let current = match get_typed::<TektonInstallerSet>(client, None, &name).await? {
        Some(existing) if is_current(&existing, &desired) => existing,
        Some(_) => {
            debug!("installer-set {name} is stale, replacing it");
            delete_typed::<TektonInstallerSet>(client, None, &name).await?;
            return Err(Error::ReconcileAgain);
        }
        None => {
            info!("creating installer-set {name} for {}", K::KIND);
            create_typed(client, &desired).await?
        }
    };

    let recorded = obj.component_status().and_then(|s| s.installer_set(stage)).map(str::to_string);
    if recorded.as_deref() != Some(name.as_str()) {
        obj.component_status_mut().set_installer_set(stage, Some(name.clone()));
        patch_status_typed(client, obj).await?;
    }
    delete_stage_sets::<K>(ctx, stage, Some(&name)).await?;

    if is_ready(current.conditions()) {
        Ok(Progress::Ready)
    } else {
        Ok(Progress::Waiting(format!("installer-set {name} is not ready")))
    }
}

/// Removes every installer-set of `stage` and forgets the reference.
pub async fn remove_stage<K: TektonComponent>(obj: &mut K, ctx: &Context, stage: &str) -> Result<()> {
    delete_stage_sets::<K>(ctx, stage, None).await?;
    if obj.component_status().and_then(|s| s.installer_set(stage)).is_some() {
        obj.component_status_mut().set_installer_set(stage, None);
    }
    Ok(())
}

async fn delete_stage_sets<K: TektonComponent>(ctx: &Context, stage: &str, keep: Option<&str>) -> Result<()> {
    let selector = format!("{CREATED_BY_KEY}={},{INSTALLER_SET_TYPE_KEY}={stage}", K::KIND.kind());
    let sets = list_typed::<TektonInstallerSet>(ctx.client(), None, Some(&selector)).await?;
    for set in sets {
        let name = set.name_any();
        if Some(name.as_str()) == keep || set.metadata.deletion_timestamp.is_some() {
            continue;
        }
        info!("deleting installer-set {name}");
        delete_typed::<TektonInstallerSet>(ctx.client(), None, &name).await?;
    }
    Ok(())
}

/// Deletes the installer-sets of `obj`, runs the platform cleanup and releases the finalizer.
async fn finalize<K: Component>(obj: &K, ctx: &Context) -> Result<()> {
    if !has_finalizer(obj) {
        return Ok(());
    }
    info!("finalizing {} \"{}\"", K::KIND, obj.name_any());
    let selector = format!("{CREATED_BY_KEY}={}", K::KIND.kind());
    for set in list_typed::<TektonInstallerSet>(ctx.client(), None, Some(&selector)).await? {
        delete_typed::<TektonInstallerSet>(ctx.client(), None, &set.name_any()).await?;
    }
    ctx.platform
        .finalize(ctx.client(), K::KIND, obj.target_namespace())
        .await?;
    remove_finalizer(ctx.client(), obj).await?;
    Ok(())
}
