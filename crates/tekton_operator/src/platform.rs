//! Platform specific hooks around the component reconcilers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::api::v1alpha1::ComponentKind;
use crate::client::{ObjectKey, ResourceClient};
use crate::manifests::Transformer;
use crate::settings::Platform;
use crate::transform::{inject_env, strip_run_as_ids};
use crate::util::errors::Result;

/// Namespace label that enables cluster monitoring to scrape the target namespace.
pub const CLUSTER_MONITORING_LABEL: &str = "openshift.io/cluster-monitoring";

/// Env var injected into every container on OpenShift.
pub const PLATFORM_ENV_VAR: &str = "PLATFORM";

#[async_trait]
pub trait PlatformExtension: Send + Sync {
    fn platform(&self) -> Platform;

    /// Extra transformers, applied after namespace injection.
    fn transformers(&self, kind: ComponentKind) -> Vec<Transformer>;

    async fn pre_reconcile(&self, client: &dyn ResourceClient, kind: ComponentKind, target_namespace: &str)
        -> Result<()>;

    async fn post_reconcile(&self, client: &dyn ResourceClient, kind: ComponentKind, target_namespace: &str)
        -> Result<()>;

    async fn finalize(&self, client: &dyn ResourceClient, kind: ComponentKind, target_namespace: &str) -> Result<()>;
}

pub fn for_platform(platform: Platform) -> Arc<dyn PlatformExtension> {
    match platform {
        Platform::Kubernetes => Arc::new(KubernetesExtension),
        Platform::OpenShift => Arc::new(OpenShiftExtension),
    }
}

pub struct KubernetesExtension;

#[async_trait]
impl PlatformExtension for KubernetesExtension {
    fn platform(&self) -> Platform {
        Platform::Kubernetes
    }

    fn transformers(&self, _kind: ComponentKind) -> Vec<Transformer> {
        Vec::new()
    }

    async fn pre_reconcile(&self, _: &dyn ResourceClient, _: ComponentKind, _: &str) -> Result<()> {
        Ok(())
    }

    async fn post_reconcile(&self, _: &dyn ResourceClient, _: ComponentKind, _: &str) -> Result<()> {
        Ok(())
    }

    async fn finalize(&self, _: &dyn ResourceClient, _: ComponentKind, _: &str) -> Result<()> {
        Ok(())
    }
}

pub struct OpenShiftExtension;

impl OpenShiftExtension {
    async fn set_monitoring_label(client: &dyn ResourceClient, namespace: &str, value: Option<&str>) -> Result<()> {
        let key = ObjectKey::new("v1", "Namespace", None, namespace);
        if client.get(&key).await?.is_none() {
            return Ok(());
        }
        debug!("setting {CLUSTER_MONITORING_LABEL}={value:?} on {namespace}");
        let patch = json!({"metadata": {"labels": {CLUSTER_MONITORING_LABEL: value}}});
        client.merge_patch(&key, &patch).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformExtension for OpenShiftExtension {
    fn platform(&self) -> Platform {
        Platform::OpenShift
    }

    fn transformers(&self, kind: ComponentKind) -> Vec<Transformer> {
        match kind {
            ComponentKind::Config | ComponentKind::InstallerSet => Vec::new(),
            _ => vec![strip_run_as_ids(), inject_env(PLATFORM_ENV_VAR, "openshift")],
        }
    }

    async fn pre_reconcile(&self, client: &dyn ResourceClient, kind: ComponentKind, target_namespace: &str)
        -> Result<()> {
        if matches!(kind, ComponentKind::Config | ComponentKind::Pipeline) {
            OpenShiftExtension::set_monitoring_label(client, target_namespace, Some("true")).await?;
        }
        Ok(())
    }

    async fn post_reconcile(&self, _: &dyn ResourceClient, _: ComponentKind, _: &str) -> Result<()> {
        Ok(())
    }

    async fn finalize(&self, client: &dyn ResourceClient, kind: ComponentKind, target_namespace: &str) -> Result<()> {
        if kind == ComponentKind::Config {
            OpenShiftExtension::set_monitoring_label(client, target_namespace, None).await?;
        }
        Ok(())
    }
}
