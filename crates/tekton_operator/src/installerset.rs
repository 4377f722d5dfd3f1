//! Installer-set building blocks: naming, phase classification, workload readiness and cleanup.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::v1alpha1::{
    ComponentKind, TektonComponent, TektonInstallerSet, TektonInstallerSetSpec, MAIN_STAGE,
};
use crate::api::{
    CREATED_BY_KEY, INSTALLER_SET_TYPE_KEY, LAST_APPLIED_HASH_KEY, RELEASE_VERSION_KEY, TARGET_NAMESPACE_KEY,
};
use crate::client::{ManifestApplier, ObjectKey, ResourceClient};
use crate::conditions::{
    ALL_DEPLOYMENTS_READY, CLUSTER_SCOPED_INSTALLED, CONTROLLERS_READY, CRDS_INSTALLED, DEPLOYMENTS_AVAILABLE,
    NAMESPACE_SCOPED_INSTALLED, WEBHOOKS_READY,
};
use crate::manifests::Manifest;
use crate::transform::{kind_of, name_of};
use crate::util::errors::{Error, Result, StdError};
use crate::util::hash::content_hash;

/// Kinds applied in the cluster-scoped phase. ClusterRoleBinding is applied with the namespaced
/// objects so the service accounts it names already exist.
pub const CLUSTER_SCOPED_PHASE_KINDS: [&str; 14] = [
    "Namespace",
    "ClusterRole",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "PriorityClass",
    "StorageClass",
    "APIService",
    "PersistentVolume",
    "ClusterInterceptor",
    "ClusterTriggerBinding",
    "SecurityContextConstraints",
    "ConsoleCLIDownload",
    "ConsoleQuickStart",
    "ConsoleYAMLSample",
];

/// Kinds that outlive the installer-set that created them.
const RETAINED_KINDS: [&str; 2] = ["CustomResourceDefinition", "Namespace"];

const HASH_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Crds,
    ClusterScoped,
    NamespaceScoped,
    Workloads,
    Jobs,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Crds,
        Phase::ClusterScoped,
        Phase::NamespaceScoped,
        Phase::Workloads,
        Phase::Jobs,
    ];

    pub fn of(obj: &Value) -> Phase {
        match kind_of(obj) {
            "CustomResourceDefinition" => Phase::Crds,
            "Deployment" | "StatefulSet" => Phase::Workloads,
            "Job" => Phase::Jobs,
            kind if CLUSTER_SCOPED_PHASE_KINDS.contains(&kind) => Phase::ClusterScoped,
            _ => Phase::NamespaceScoped,
        }
    }

    /// Condition marked once the phase has been applied.
    pub fn condition(&self) -> &'static str {
        match self {
            Phase::Crds => CRDS_INSTALLED,
            Phase::ClusterScoped => CLUSTER_SCOPED_INSTALLED,
            Phase::NamespaceScoped => NAMESPACE_SCOPED_INSTALLED,
            Phase::Workloads | Phase::Jobs => DEPLOYMENTS_AVAILABLE,
        }
    }
}

/// Groups objects by phase, keeping their relative order.
pub fn classify(manifests: &[Value]) -> BTreeMap<Phase, Vec<Value>> {
    let mut phases: BTreeMap<Phase, Vec<Value>> = Phase::ALL.iter().map(|p| (*p, Vec::new())).collect();
    for obj in manifests {
        phases.entry(Phase::of(obj)).or_default().push(obj.clone());
    }
    phases
}

/// Applies one phase, making every object except CRDs and Namespaces a dependent of `owner`.
pub async fn apply_phase(applier: &dyn ManifestApplier, objects: &[Value], owner: Option<&OwnerReference>) -> Result<()> {
    for obj in objects {
        let mut obj = obj.clone();
        if let Some(owner) = owner.filter(|_| !RETAINED_KINDS.contains(&kind_of(&obj))) {
            obj["metadata"]["ownerReferences"] = json!([owner]);
        }
        applier.apply(&obj).await?;
    }
    Ok(())
}

/// Deletes the applied objects in reverse phase order. CRDs and Namespaces are left behind, and
/// so is anything a newer installer-set has taken over since.
pub async fn cleanup(
    client: &dyn ResourceClient,
    applier: &dyn ManifestApplier,
    manifests: &[Value],
    owner_uid: &str,
) -> Result<()> {
    let phases = classify(manifests);
    for (_, objects) in phases.iter().rev() {
        for obj in objects.iter().rev() {
            if RETAINED_KINDS.contains(&kind_of(obj)) {
                continue;
            }
            let Some(live) = client.get(&ObjectKey::from_value(obj)?).await? else {
                continue;
            };
            if !owned_by(&live, owner_uid) {
                debug!("{} {} has moved to another owner, keeping it", kind_of(obj), name_of(obj));
                continue;
            }
            debug!("removing {} {}", kind_of(obj), name_of(obj));
            applier.remove(obj).await?;
        }
    }
    Ok(())
}

fn owned_by(obj: &Value, uid: &str) -> bool {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid))
}

/// Readiness of the workloads of one installer-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReadiness {
    pub webhooks_ready: bool,
    pub controllers_ready: bool,
    pub all_ready: bool,
    /// `Kind/name` of every workload still settling.
    pub pending: Vec<String>,
}

impl WorkloadReadiness {
    /// Conditions, in ladder order, and whether each one holds.
    pub fn conditions(&self) -> [(&'static str, bool); 3] {
        [
            (WEBHOOKS_READY, self.webhooks_ready),
            (CONTROLLERS_READY, self.controllers_ready),
            (ALL_DEPLOYMENTS_READY, self.all_ready),
        ]
    }
}

pub async fn workload_readiness(client: &dyn ResourceClient, manifests: &[Value]) -> Result<WorkloadReadiness> {
    let mut readiness = WorkloadReadiness {
        webhooks_ready: true,
        controllers_ready: true,
        all_ready: true,
        pending: Vec::new(),
    };
    for obj in manifests {
        let kind = kind_of(obj);
        if !matches!(kind, "Deployment" | "StatefulSet" | "Job") {
            continue;
        }
        let live = client.get(&ObjectKey::from_value(obj)?).await?;
        let ready = live.as_ref().is_some_and(is_workload_ready);
        if ready {
            continue;
        }
        let name = name_of(obj);
        readiness.pending.push(format!("{kind}/{name}"));
        readiness.all_ready = false;
        if kind == "Deployment" {
            if name.contains("webhook") {
                readiness.webhooks_ready = false;
            } else {
                readiness.controllers_ready = false;
            }
        }
    }
    Ok(readiness)
}

fn is_workload_ready(obj: &Value) -> bool {
    let status = &obj["status"];
    let condition = |type_: &str| {
        status["conditions"]
            .as_array()
            .is_some_and(|cs| cs.iter().any(|c| c["type"] == type_ && c["status"] == "True"))
    };
    let observed = status["observedGeneration"].as_i64().unwrap_or(0);
    let generation = obj.pointer("/metadata/generation").and_then(Value::as_i64).unwrap_or(0);
    match kind_of(obj) {
        "Deployment" => condition("Available") && observed >= generation,
        "StatefulSet" => {
            let wanted = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
            status["readyReplicas"].as_i64().unwrap_or(0) >= wanted && observed >= generation
        }
        "Job" => condition("Complete"),
        _ => true,
    }
}

/// Name of the installer-set holding a manifest with content hash `hash`.
pub fn installer_set_name(kind: ComponentKind, stage: &str, hash: &str) -> String {
    let short = &hash[..HASH_PREFIX_LEN.min(hash.len())];
    if stage == MAIN_STAGE {
        format!("{}-{short}", kind.short_name())
    } else {
        format!("{}-{stage}-{short}", kind.short_name())
    }
}

/// The installer-set for `manifest`, owned by `owner` and stamped with the release version.
pub fn build_installer_set<K: TektonComponent>(
    owner: &K,
    stage: &str,
    manifest: &Manifest,
    version: &str,
) -> Result<TektonInstallerSet> {
    let hash = content_hash(&manifest.resources)?;
    let owner_ref = owner
        .controller_owner_ref(&())
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("uid".to_string())))?;
    let labels = BTreeMap::from([
        (CREATED_BY_KEY.to_string(), K::KIND.kind().to_string()),
        (INSTALLER_SET_TYPE_KEY.to_string(), stage.to_string()),
        (RELEASE_VERSION_KEY.to_string(), version.to_string()),
    ]);
    let annotations = BTreeMap::from([
        (LAST_APPLIED_HASH_KEY.to_string(), hash.clone()),
        (TARGET_NAMESPACE_KEY.to_string(), owner.target_namespace().to_string()),
    ]);
    Ok(TektonInstallerSet {
        metadata: ObjectMeta {
            name: Some(installer_set_name(K::KIND, stage, &hash)),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: TektonInstallerSetSpec {
            manifests: manifest.resources.clone(),
        },
        status: None,
    })
}

/// Whether an existing installer-set already holds `desired`: same hash, same release.
pub fn is_current(existing: &TektonInstallerSet, desired: &TektonInstallerSet) -> bool {
    let annotation = |set: &TektonInstallerSet| {
        set.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LAST_APPLIED_HASH_KEY))
            .cloned()
    };
    let release = |set: &TektonInstallerSet| set.labels().get(RELEASE_VERSION_KEY).cloned();
    existing.metadata.deletion_timestamp.is_none()
        && annotation(existing).is_some()
        && annotation(existing) == annotation(desired)
        && release(existing) == release(desired)
}
