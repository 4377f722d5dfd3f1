//! Controllers, their shared state and the plumbing every reconciler uses.

pub mod component;
pub mod config;
pub mod hub;
pub mod installer_set;
pub mod kinds;

#[cfg(test)]
pub mod fixtures;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Reporter},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::*;

use crate::api::v1alpha1::*;
use crate::api::RELEASE_VERSION_KEY;
use crate::client::{
    patch_status_typed, EventRecorder, KubeClient, KubeEventRecorder, ManifestApplier, ObjectKey, ResourceClient,
};
use crate::conditions::ConditionManager;
use crate::platform::{for_platform, PlatformExtension};
use crate::pruner_store::{watch_config_maps, PrunerConfigStore};
use crate::settings::Settings;
use crate::util::errors::{Error, Result, StdError, REQUEUE_DELAY};
use crate::util::metrics::Metrics;

use component::Component;

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, settings: Settings) -> Result<Arc<Context>> {
        let kube_client = Arc::new(KubeClient::new(client.clone()));
        let recorder = Arc::new(KubeEventRecorder::new(client, Diagnostics::default().reporter));
        self.context_with(kube_client.clone(), kube_client, recorder, settings)
    }

    /// Context over arbitrary cluster seams.
    pub fn context_with(
        &self,
        client: Arc<dyn ResourceClient>,
        applier: Arc<dyn ManifestApplier>,
        recorder: Arc<dyn EventRecorder>,
        settings: Settings,
    ) -> Result<Arc<Context>> {
        let metrics = Metrics::default()
            .register(&self.registry)
            .map_err(|e| Error::StdError(StdError::InvalidArgument(e.to_string())))?;
        Ok(Arc::new(Context {
            client,
            applier,
            recorder,
            platform: for_platform(settings.platform),
            settings,
            metrics,
            diagnostics: self.diagnostics.clone(),
            pruner_store: PrunerConfigStore::new(),
        }))
    }
}

/// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    pub client: Arc<dyn ResourceClient>,
    pub applier: Arc<dyn ManifestApplier>,
    pub recorder: Arc<dyn EventRecorder>,
    pub settings: Settings,
    pub platform: Arc<dyn PlatformExtension>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    pub pruner_store: PrunerConfigStore,
}

impl Context {
    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    /// Publishes a Normal event about `obj`. Failing to publish never fails the reconcile.
    pub async fn publish<K: Resource<DynamicType = ()>>(&self, obj: &K, reason: &str, note: String) {
        let event = Event {
            type_: EventType::Normal,
            reason: reason.into(),
            note: Some(note),
            action: reason.into(),
            secondary: None,
        };
        let reference: ObjectReference = obj.object_ref(&());
        if let Err(e) = self.recorder.publish(&reference, event).await {
            warn!("failed to publish {reason} event: {e}");
        }
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "tekton-operator".into(),
        }
    }
}

/// Conditions of `obj`, managed with its kind's ladder.
pub fn conditions<K: TektonComponent>(obj: &mut K) -> ConditionManager<'_> {
    let generation = obj.meta().generation;
    ConditionManager::new(K::KIND, &mut obj.component_status_mut().conditions, generation)
}

/// Whether `labels` carry the release-version label of `version`.
pub fn is_release(labels: &BTreeMap<String, String>, version: &str) -> bool {
    labels.get(RELEASE_VERSION_KEY).is_some_and(|v| v == version)
}

pub async fn set_release_label<K: Resource<DynamicType = ()>>(
    client: &dyn ResourceClient,
    obj: &K,
    version: &str,
) -> Result<()> {
    let key = ObjectKey::of::<K>(obj.meta().namespace.as_deref(), &obj.name_any());
    let patch = json!({"metadata": {"labels": {RELEASE_VERSION_KEY: version}}});
    client.merge_patch(&key, &patch).await?;
    Ok(())
}

pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Adds [`FINALIZER`], keeping any finalizers other controllers put there, and returns the
/// stored object.
pub async fn add_finalizer<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let key = ObjectKey::of::<K>(obj.meta().namespace.as_deref(), &obj.name_any());
    let patched = client
        .merge_patch(&key, &json!({"metadata": {"finalizers": finalizers}}))
        .await?;
    Ok(serde_json::from_value(patched)?)
}

pub async fn remove_finalizer<K: Resource<DynamicType = ()>>(client: &dyn ResourceClient, obj: &K) -> Result<()> {
    let finalizers: Vec<&String> = obj.finalizers().iter().filter(|f| *f != FINALIZER).collect();
    let key = ObjectKey::of::<K>(obj.meta().namespace.as_deref(), &obj.name_any());
    client
        .merge_patch(&key, &json!({"metadata": {"finalizers": finalizers}}))
        .await?;
    Ok(())
}

/// Persists the status of `obj` if it differs from `before`.
pub async fn write_status<K>(client: &dyn ResourceClient, before: &K, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let status = |o: &K| serde_json::to_value(o).map(|v| v.get("status").cloned());
    if status(before)? != status(obj)? {
        patch_status_typed(client, obj).await?;
    }
    Ok(())
}

/// Requeue policy shared by every controller.
///
/// Sentinels are expected outcomes and requeue quietly; everything else is counted and logged.
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let instance = format!("{}/{}", K::kind(&()), obj.name_any());
    if error.is_sentinel() {
        debug!("{instance}: {error}, requeueing");
    } else {
        warn!("reconcile failed: {:?}", error);
        ctx.metrics.reconcile_failure(&instance, error);
    }
    Action::requeue(error.requeue_after().unwrap_or(REQUEUE_DELAY))
}

/// A component controller, woken by its own changes and by those of its installer-sets.
fn component_controller<K: Component>(client: &Client, ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    Controller::new(Api::<K>::all(client.clone()), Config::default().any_semantic())
        .owns(Api::<TektonInstallerSet>::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(component::reconcile::<K>, error_policy::<K>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed()
}

/// The installer-set controller follows the workloads it applied.
fn installer_set_controller(client: &Client, ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    let watch = Config::default();
    Controller::new(Api::<TektonInstallerSet>::all(client.clone()), Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), watch.clone())
        .owns(Api::<StatefulSet>::all(client.clone()), watch.clone())
        .owns(Api::<Job>::all(client.clone()), watch)
        .shutdown_on_signal()
        .run(installer_set::reconcile, error_policy::<TektonInstallerSet>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed()
}

/// The config controller also watches the components it owns.
fn config_controller(client: &Client, ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    let watch = Config::default();
    Controller::new(Api::<TektonConfig>::all(client.clone()), Config::default().any_semantic())
        .owns(Api::<TektonPipeline>::all(client.clone()), watch.clone())
        .owns(Api::<TektonTrigger>::all(client.clone()), watch.clone())
        .owns(Api::<TektonDashboard>::all(client.clone()), watch.clone())
        .owns(Api::<TektonChain>::all(client.clone()), watch.clone())
        .owns(Api::<TektonResult>::all(client.clone()), watch.clone())
        .owns(Api::<TektonAddon>::all(client.clone()), watch.clone())
        .owns(Api::<TektonPruner>::all(client.clone()), watch.clone())
        .owns(Api::<TektonScheduler>::all(client.clone()), watch.clone())
        .owns(Api::<TektonMulticlusterProxyAAE>::all(client.clone()), watch.clone())
        .owns(Api::<SyncerService>::all(client.clone()), watch.clone())
        .owns(Api::<OpenShiftPipelinesAsCode>::all(client.clone()), watch)
        .shutdown_on_signal()
        .run(config::reconcile, error_policy::<TektonConfig>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed()
}

/// Initialize the controllers and shared state (given the crds are installed)
pub async fn run(state: State) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let client = Client::try_default().await?;

    let configs = Api::<TektonConfig>::all(client.clone());
    if let Err(e) = configs.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    info!(
        "starting tekton operator {} on {}",
        settings.version, settings.platform
    );

    let ctx = state.to_context(client.clone(), settings)?;
    tokio::spawn(watch_config_maps(client.clone(), ctx.pruner_store.clone()));

    let controllers = vec![
        config_controller(&client, ctx.clone()),
        installer_set_controller(&client, ctx.clone()),
        component_controller::<TektonPipeline>(&client, ctx.clone()),
        component_controller::<TektonTrigger>(&client, ctx.clone()),
        component_controller::<TektonDashboard>(&client, ctx.clone()),
        component_controller::<TektonChain>(&client, ctx.clone()),
        component_controller::<TektonResult>(&client, ctx.clone()),
        component_controller::<ManualApprovalGate>(&client, ctx.clone()),
        component_controller::<TektonAddon>(&client, ctx.clone()),
        component_controller::<TektonPruner>(&client, ctx.clone()),
        component_controller::<TektonScheduler>(&client, ctx.clone()),
        component_controller::<TektonMulticlusterProxyAAE>(&client, ctx.clone()),
        component_controller::<SyncerService>(&client, ctx.clone()),
        component_controller::<OpenShiftPipelinesAsCode>(&client, ctx.clone()),
        component_controller::<TektonHub>(&client, ctx),
    ];
    futures::future::join_all(controllers).await;
    Ok(())
}
