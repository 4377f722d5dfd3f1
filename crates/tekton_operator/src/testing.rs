//! In-memory cluster used by the reconciler tests.
//!
//! Models the parts of the API server the lifecycle engine depends on: UID, generation and
//! resourceVersion bookkeeping, the status subresource, finalizers with `deletionTimestamp`,
//! and owner-reference garbage collection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::Event;
use serde_json::{json, Value};

use crate::client::{apply_with_hash, ApplyOutcome, EventRecorder, ManifestApplier, ObjectKey, ResourceClient};
use crate::util::errors::{Error, Result, StdError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: String,
    pub note: Option<String>,
}

#[derive(Default)]
struct Store {
    objects: BTreeMap<ObjectKey, Value>,
    next_uid: u64,
    next_resource_version: u64,
    events: Vec<RecordedEvent>,
}

#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<Store>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| Error::StdError(StdError::InvalidArgument("fake cluster lock poisoned".into())))
    }

    /// Every stored object of a kind, in key order.
    pub fn objects(&self, kind: &str) -> Vec<Value> {
        self.lock()
            .map(|s| s.objects.iter().filter(|(k, _)| k.kind == kind).map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    pub fn names(&self, kind: &str) -> BTreeSet<String> {
        self.objects(kind)
            .iter()
            .filter_map(|o| o.pointer("/metadata/name").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    /// Stands in for the workload controllers: every Deployment and StatefulSet becomes
    /// available and every Job completes.
    pub fn settle_workloads(&self) {
        let Ok(mut store) = self.lock() else { return };
        for (key, obj) in store.objects.iter_mut() {
            match key.kind.as_str() {
                "Deployment" | "StatefulSet" => {
                    let replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
                    let generation = obj["metadata"]["generation"].clone();
                    obj["status"] = json!({
                        "replicas": replicas,
                        "readyReplicas": replicas,
                        "availableReplicas": replicas,
                        "updatedReplicas": replicas,
                        "observedGeneration": generation,
                        "conditions": [{"type": "Available", "status": "True"}]
                    });
                }
                "Job" => {
                    obj["status"] = json!({
                        "succeeded": 1,
                        "conditions": [{"type": "Complete", "status": "True"}]
                    });
                }
                _ => {}
            }
        }
    }

    fn stamp_new(store: &mut Store, obj: &mut Value) {
        store.next_uid += 1;
        store.next_resource_version += 1;
        let metadata = &mut obj["metadata"];
        metadata["uid"] = json!(format!("uid-{}", store.next_uid));
        metadata["generation"] = json!(1);
        metadata["resourceVersion"] = json!(store.next_resource_version.to_string());
        metadata["creationTimestamp"] = json!(Utc::now().to_rfc3339());
    }

    /// Writes `updated` over `existing`, keeping server-owned metadata and bumping the
    /// generation when anything outside metadata and status changed.
    fn store_update(store: &mut Store, key: &ObjectKey, existing: &Value, mut updated: Value) -> Value {
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match existing["metadata"].get(field) {
                Some(v) => updated["metadata"][field] = v.clone(),
                None => {
                    if let Some(m) = updated["metadata"].as_object_mut() {
                        m.remove(field);
                    }
                }
            }
        }
        let generation = existing["metadata"]["generation"].as_i64().unwrap_or(1);
        let generation = if body(existing) != body(&updated) {
            generation + 1
        } else {
            generation
        };
        updated["metadata"]["generation"] = json!(generation);
        store.next_resource_version += 1;
        updated["metadata"]["resourceVersion"] = json!(store.next_resource_version.to_string());

        let released = updated["metadata"].get("deletionTimestamp").is_some()
            && finalizers(&updated).is_empty();
        if released {
            Self::remove_cascading(store, key);
        } else {
            store.objects.insert(key.clone(), updated.clone());
        }
        updated
    }

    /// Deletes `key`, honouring finalizers, and garbage-collects its dependents.
    fn delete_in(store: &mut Store, key: &ObjectKey) {
        let Some(obj) = store.objects.get_mut(key) else { return };
        if !finalizers(obj).is_empty() {
            if obj["metadata"].get("deletionTimestamp").is_none() {
                obj["metadata"]["deletionTimestamp"] = json!(Utc::now().to_rfc3339());
            }
            return;
        }
        Self::remove_cascading(store, key);
    }

    fn remove_cascading(store: &mut Store, key: &ObjectKey) {
        let Some(removed) = store.objects.remove(key) else { return };
        let Some(uid) = removed.pointer("/metadata/uid").and_then(Value::as_str) else { return };
        let dependents: Vec<ObjectKey> = store
            .objects
            .iter()
            .filter(|(_, o)| owned_by(o, uid))
            .map(|(k, _)| k.clone())
            .collect();
        for dependent in dependents {
            Self::delete_in(store, &dependent);
        }
    }
}

fn body(obj: &Value) -> Value {
    let mut v = obj.clone();
    if let Some(m) = v.as_object_mut() {
        m.remove("metadata");
        m.remove("status");
    }
    v
}

fn finalizers(obj: &Value) -> Vec<Value> {
    obj.pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn owned_by(obj: &Value, uid: &str) -> bool {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid))
}

fn matches_selector(obj: &Value, selector: &str) -> bool {
    let labels = obj.pointer("/metadata/labels").and_then(Value::as_object);
    let label = |k: &str| labels.and_then(|l| l.get(k)).and_then(Value::as_str);
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|term| {
        if let Some((k, v)) = term.split_once("!=") {
            label(k.trim()) != Some(v.trim())
        } else if let Some((k, v)) = term.split_once('=') {
            label(k.trim()) == Some(v.trim())
        } else if let Some(k) = term.strip_prefix('!') {
            label(k).is_none()
        } else {
            label(term).is_some()
        }
    })
}

/// RFC 7386 merge.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = json!({});
            }
            if let Some(map) = target.as_object_mut() {
                for (k, v) in entries {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        Ok(self.lock()?.objects.get(key).cloned())
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let store = self.lock()?;
        Ok(store
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == api_version && k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| label_selector.map_or(true, |s| matches_selector(o, s)))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &Value) -> Result<Value> {
        let key = ObjectKey::from_value(obj)?;
        let mut store = self.lock()?;
        if store.objects.contains_key(&key) {
            return Err(Error::StdError(StdError::InvalidArgument(format!("{key} already exists"))));
        }
        let mut obj = obj.clone();
        Self::stamp_new(&mut store, &mut obj);
        store.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn replace(&self, obj: &Value) -> Result<Value> {
        let key = ObjectKey::from_value(obj)?;
        let mut store = self.lock()?;
        let existing = store
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::StdError(StdError::NotFound(key.to_string())))?;
        let sent_rv = obj.pointer("/metadata/resourceVersion");
        if sent_rv.is_some() && sent_rv != existing.pointer("/metadata/resourceVersion") {
            return Err(Error::StdError(StdError::InvalidArgument(format!("{key}: resourceVersion conflict"))));
        }
        let mut updated = obj.clone();
        match existing.get("status") {
            Some(status) => updated["status"] = status.clone(),
            None => {
                if let Some(m) = updated.as_object_mut() {
                    m.remove("status");
                }
            }
        }
        Ok(Self::store_update(&mut store, &key, &existing, updated))
    }

    async fn merge_patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value> {
        let mut store = self.lock()?;
        let existing = store
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::StdError(StdError::NotFound(key.to_string())))?;
        let mut updated = existing.clone();
        let mut patch = patch.clone();
        if let Some(m) = patch.as_object_mut() {
            m.remove("status");
        }
        merge_patch(&mut updated, &patch);
        Ok(Self::store_update(&mut store, key, &existing, updated))
    }

    async fn merge_patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<Value> {
        let mut store = self.lock()?;
        store.next_resource_version += 1;
        let rv = store.next_resource_version.to_string();
        let obj = store
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::StdError(StdError::NotFound(key.to_string())))?;
        if let Some(status) = patch.get("status") {
            merge_patch(&mut obj["status"], status);
        }
        obj["metadata"]["resourceVersion"] = json!(rv);
        Ok(obj.clone())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut store = self.lock()?;
        Self::delete_in(&mut store, key);
        Ok(())
    }
}

#[async_trait]
impl ManifestApplier for FakeCluster {
    async fn apply(&self, obj: &Value) -> Result<ApplyOutcome> {
        apply_with_hash(self, obj).await
    }

    async fn remove(&self, obj: &Value) -> Result<()> {
        self.delete(&ObjectKey::from_value(obj)?).await
    }
}

#[async_trait]
impl EventRecorder for FakeCluster {
    async fn publish(&self, reference: &ObjectReference, event: Event) -> Result<()> {
        self.lock()?.events.push(RecordedEvent {
            object: reference.name.clone().unwrap_or_default(),
            reason: event.reason,
            note: event.note,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(kind: &str, name: &str, owner_uid: Option<&str>) -> Value {
        let mut obj = json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": kind,
            "metadata": {"name": name},
            "spec": {}
        });
        if let Some(uid) = owner_uid {
            obj["metadata"]["ownerReferences"] = json!([{"uid": uid, "name": "owner", "kind": "TektonConfig"}]);
        }
        obj
    }

    #[tokio::test]
    async fn assigns_identity_and_bumps_generation_on_spec_change() {
        let cluster = FakeCluster::new();
        let created = cluster.create(&owned("TektonPipeline", "pipeline", None)).await.unwrap();
        assert_eq!(created["metadata"]["uid"], "uid-1");
        assert_eq!(created["metadata"]["generation"], 1);

        let key = ObjectKey::from_value(&created).unwrap();
        let same = cluster.merge_patch(&key, &json!({"metadata": {"labels": {"a": "b"}}})).await.unwrap();
        assert_eq!(same["metadata"]["generation"], 1);
        let changed = cluster.merge_patch(&key, &json!({"spec": {"targetNamespace": "x"}})).await.unwrap();
        assert_eq!(changed["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn deletion_cascades_through_owner_references() {
        let cluster = FakeCluster::new();
        let config = cluster.create(&owned("TektonConfig", "config", None)).await.unwrap();
        let uid = config["metadata"]["uid"].as_str().unwrap().to_string();
        let pipeline = cluster.create(&owned("TektonPipeline", "pipeline", Some(&uid))).await.unwrap();
        let pipeline_uid = pipeline["metadata"]["uid"].as_str().unwrap().to_string();
        cluster
            .create(&owned("TektonInstallerSet", "pipeline-abc", Some(&pipeline_uid)))
            .await
            .unwrap();

        cluster.delete(&ObjectKey::from_value(&config).unwrap()).await.unwrap();
        assert!(cluster.objects("TektonPipeline").is_empty());
        assert!(cluster.objects("TektonInstallerSet").is_empty());
    }

    #[tokio::test]
    async fn finalizers_hold_deletion_until_released() {
        let cluster = FakeCluster::new();
        let mut obj = owned("TektonChain", "chain", None);
        obj["metadata"]["finalizers"] = json!(["operator.tekton.dev/finalizer"]);
        let created = cluster.create(&obj).await.unwrap();
        let key = ObjectKey::from_value(&created).unwrap();

        cluster.delete(&key).await.unwrap();
        let held = cluster.get(&key).await.unwrap().unwrap();
        assert!(held["metadata"]["deletionTimestamp"].is_string());

        cluster
            .merge_patch(&key, &json!({"metadata": {"finalizers": null}}))
            .await
            .unwrap();
        assert!(cluster.get(&key).await.unwrap().is_none());
    }

    #[test]
    fn label_selectors() {
        let obj = json!({"metadata": {"labels": {"operator.tekton.dev/type": "main", "app": "x"}}});
        assert!(matches_selector(&obj, "operator.tekton.dev/type=main"));
        assert!(matches_selector(&obj, "app,operator.tekton.dev/type!=pre"));
        assert!(!matches_selector(&obj, "app=y"));
        assert!(matches_selector(&obj, "!missing"));
    }
}
