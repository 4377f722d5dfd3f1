//! Harness driving the reconcilers against [`FakeCluster`] with bundles in a temporary
//! `KO_DATA_PATH`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::TempDir;

use super::component::{self, Component};
use super::{config, installer_set, Context, State};
use crate::api::v1alpha1::*;
use crate::client::{create_typed, get_typed, list_typed};
use crate::conditions::is_ready;
use crate::settings::{Platform, Settings};
use crate::testing::FakeCluster;
use crate::util::errors::Result;

pub const OPERATOR_VERSION: &str = "v0.75.0";

/// A CRD, a ConfigMap and a controller plus webhook Deployment.
pub const BASE_BUNDLE: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.dev
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: feature-flags
data:
  enable-api-fields: stable
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: example-controller
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: controller
          image: gcr.io/example/controller:v1
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: example-webhook
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: webhook
          image: gcr.io/example/webhook:v1
"#;

pub struct TestEnv {
    pub cluster: Arc<FakeCluster>,
    pub ctx: Arc<Context>,
    ko: TempDir,
}

impl TestEnv {
    pub fn new() -> TestEnv {
        TestEnv::on(Platform::Kubernetes)
    }

    pub fn on(platform: Platform) -> TestEnv {
        let ko = tempfile::tempdir().expect("temp dir");
        let mut settings = Settings::new(OPERATOR_VERSION, platform);
        settings.ko_data_path = ko.path().to_path_buf();
        let cluster = Arc::new(FakeCluster::new());
        let ctx = State::default()
            .context_with(cluster.clone(), cluster.clone(), cluster.clone(), settings)
            .expect("context");
        TestEnv { cluster, ctx, ko }
    }

    pub fn ko_data_path(&self) -> &Path {
        self.ko.path()
    }

    pub async fn create<K>(&self, obj: &K) -> K
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        create_typed(self.cluster.as_ref(), obj).await.expect("create")
    }

    pub async fn get<K>(&self, name: &str) -> K
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.find(name).await.unwrap_or_else(|| panic!("{} {name} not found", K::kind(&())))
    }

    pub async fn find<K>(&self, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        get_typed(self.cluster.as_ref(), None, name).await.expect("get")
    }

    /// One pass of the component reconciler over the stored object.
    pub async fn reconcile<K: Component>(&self, name: &str) -> Result<Action> {
        let obj: K = self.get(name).await;
        component::reconcile(Arc::new(obj), self.ctx.clone()).await
    }

    pub async fn reconcile_config(&self) -> Result<Action> {
        let obj: TektonConfig = self.get("config").await;
        config::reconcile(Arc::new(obj), self.ctx.clone()).await
    }

    /// Drives one component until it is ready, standing in for the workload controllers.
    pub async fn settle<K: Component>(&self, name: &str) {
        for _ in 0..10 {
            let _ = self.reconcile::<K>(name).await;
            if self.find::<K>(name).await.is_some_and(|o| is_ready(o.conditions())) {
                return;
            }
            self.converge_sets().await;
        }
    }

    /// Reconciles every installer-set, settles the workloads and reconciles them once more.
    pub async fn converge_sets(&self) {
        reconcile_sets(self).await;
        self.cluster.settle_workloads();
        reconcile_sets(self).await;
    }
}

pub async fn reconcile_sets(env: &TestEnv) {
    let sets: Vec<TektonInstallerSet> = list_typed(env.cluster.as_ref(), None, None).await.expect("list");
    for set in sets {
        let _ = installer_set::reconcile(Arc::new(set), env.ctx.clone()).await;
    }
}

/// Writes `BASE_BUNDLE` plus `extra` documents as the `version` bundle of `kind`.
pub fn bundle(env: &TestEnv, kind: ComponentKind, version: &str, extra: &[&str]) {
    write_bundle(env.ko_data_path(), kind, version, "", BASE_BUNDLE, extra);
}

/// Writes one file of a bundle; `subdir` selects a stage directory.
pub fn write_bundle(ko: &Path, kind: ComponentKind, version: &str, subdir: &str, base: &str, extra: &[&str]) {
    let dir = ko.join(kind.manifest_dir()).join(version).join(subdir);
    fs::create_dir_all(&dir).expect("bundle dir");
    let mut text = base.to_string();
    for doc in extra {
        text.push_str("\n---\n");
        text.push_str(doc);
    }
    fs::write(dir.join("release.yaml"), text).expect("bundle file");
}

pub fn pipeline() -> TektonPipeline {
    TektonPipeline::new("pipeline", TektonPipelineSpec {
        common: CommonSpec::new("tekton-pipelines"),
        ..Default::default()
    })
}

/// Names of the installer-sets created for `kind`.
pub fn set_names(env: &TestEnv, kind: ComponentKind) -> Vec<String> {
    env.cluster
        .objects("TektonInstallerSet")
        .iter()
        .filter(|s| s["metadata"]["labels"][crate::api::CREATED_BY_KEY] == kind.kind())
        .filter_map(|s| s["metadata"]["name"].as_str().map(str::to_string))
        .collect()
}

/// A ready pipeline component installed from a 0.68.0 bundle.
pub async fn installed_pipeline(env: &TestEnv) -> TektonPipeline {
    bundle(env, ComponentKind::Pipeline, "0.68.0", &[]);
    env.create(&pipeline()).await;
    env.settle::<TektonPipeline>("pipeline").await;
    let stored: TektonPipeline = env.get("pipeline").await;
    assert!(is_ready(stored.conditions()), "pipeline not ready: {:#?}", stored.conditions());
    assert_eq!(stored.name_any(), "pipeline");
    stored
}
