//! Cluster access seams.
//!
//! Reconcilers only talk to the cluster through [`ResourceClient`], [`ManifestApplier`] and
//! [`EventRecorder`], so the whole lifecycle engine runs against the in-memory
//! [`crate::testing::FakeCluster`] in tests and against kube-rs in the operator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::{self, ApiResource, Scope},
    runtime::events::{Event, Recorder, Reporter},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::LAST_APPLIED_HASH_KEY;
use crate::util::errors::{Error, Result, StdError};
use crate::util::hash::content_hash;

pub const FIELD_MANAGER: &str = "tekton-operator";

/// Identity of one object on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
        ObjectKey {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> ObjectKey {
        ObjectKey::new(&K::api_version(&()), &K::kind(&()), namespace, name)
    }

    pub fn from_value(obj: &Value) -> Result<ObjectKey> {
        let field = |path: &str| obj.pointer(path).and_then(Value::as_str);
        let missing = |what: &str| Error::StdError(StdError::MetadataMissing(format!("object has no {what}")));
        Ok(ObjectKey::new(
            field("/apiVersion").ok_or_else(|| missing("apiVersion"))?,
            field("/kind").ok_or_else(|| missing("kind"))?,
            field("/metadata/namespace"),
            field("/metadata/name").ok_or_else(|| missing("metadata.name"))?,
        ))
    }

    pub fn group_version(&self) -> (&str, &str) {
        self.api_version.split_once('/').unwrap_or(("", self.api_version.as_str()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Untyped CRUD over any kind the API server knows.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>>;

    /// Lists a kind, optionally scoped to a namespace and filtered by a label selector.
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>>;

    async fn create(&self, obj: &Value) -> Result<Value>;

    /// Full replacement; `obj` must carry the current `metadata.resourceVersion`.
    async fn replace(&self, obj: &Value) -> Result<Value>;

    async fn merge_patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value>;

    async fn merge_patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<Value>;

    /// Deleting an absent object is not an error.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Replaced,
    Unchanged,
}

/// Writes manifest objects, skipping those already carrying the same content hash.
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(&self, obj: &Value) -> Result<ApplyOutcome>;

    async fn remove(&self, obj: &Value) -> Result<()>;
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(&self, reference: &ObjectReference, event: Event) -> Result<()>;
}

/// Create when missing, skip when the `last-applied-hash` annotation matches, replace otherwise.
///
/// An existing object that is being deleted yields [`Error::ReconcileAgain`].
pub async fn apply_with_hash(client: &dyn ResourceClient, obj: &Value) -> Result<ApplyOutcome> {
    let key = ObjectKey::from_value(obj)?;
    let mut desired = obj.clone();
    if let Some(annotations) = desired
        .pointer_mut("/metadata/annotations")
        .and_then(Value::as_object_mut)
    {
        annotations.remove(LAST_APPLIED_HASH_KEY);
    }
    let hash = content_hash(&desired)?;
    set_annotation(&mut desired, LAST_APPLIED_HASH_KEY, &hash);

    let Some(existing) = client.get(&key).await? else {
        debug!("creating {key}");
        client.create(&desired).await?;
        return Ok(ApplyOutcome::Created);
    };

    if existing.pointer("/metadata/deletionTimestamp").is_some_and(|t| !t.is_null()) {
        debug!("{key} is being deleted, waiting");
        return Err(Error::ReconcileAgain);
    }
    let applied = existing
        .pointer(&format!("/metadata/annotations/{}", escape_pointer(LAST_APPLIED_HASH_KEY)))
        .and_then(Value::as_str);
    if applied == Some(hash.as_str()) {
        return Ok(ApplyOutcome::Unchanged);
    }

    if let Some(rv) = existing.pointer("/metadata/resourceVersion") {
        desired["metadata"]["resourceVersion"] = rv.clone();
    }
    if key.kind == "Service" {
        // clusterIP is immutable once allocated
        for field in ["clusterIP", "clusterIPs"] {
            if let Some(ip) = existing.pointer(&format!("/spec/{field}")) {
                if desired.pointer(&format!("/spec/{field}")).is_none() {
                    desired["spec"][field] = ip.clone();
                }
            }
        }
    }
    debug!("replacing {key}");
    client.replace(&desired).await?;
    Ok(ApplyOutcome::Replaced)
}

pub fn set_annotation(obj: &mut Value, key: &str, value: &str) {
    set_metadata_entry(obj, "annotations", key, value);
}

pub fn set_label(obj: &mut Value, key: &str, value: &str) {
    set_metadata_entry(obj, "labels", key, value);
}

fn set_metadata_entry(obj: &mut Value, field: &str, key: &str, value: &str) {
    if !obj["metadata"].is_object() {
        obj["metadata"] = json!({});
    }
    if !obj["metadata"][field].is_object() {
        obj["metadata"][field] = json!({});
    }
    obj["metadata"][field][key] = Value::String(value.to_string());
}

/// Escapes a key for use inside a JSON pointer.
pub fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

// Typed helpers on top of the untyped client.

pub async fn get_typed<K>(client: &dyn ResourceClient, namespace: Option<&str>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match client.get(&ObjectKey::of::<K>(namespace, name)).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub async fn list_typed<K>(
    client: &dyn ResourceClient,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&K::api_version(&()), &K::kind(&()), namespace, label_selector)
        .await?
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(Error::from))
        .collect()
}

pub async fn create_typed<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let created = client.create(&serde_json::to_value(obj)?).await?;
    Ok(serde_json::from_value(created)?)
}

pub async fn replace_typed<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let replaced = client.replace(&serde_json::to_value(obj)?).await?;
    Ok(serde_json::from_value(replaced)?)
}

/// Writes the `status` of `obj` through the status subresource.
pub async fn patch_status_typed<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let value = serde_json::to_value(obj)?;
    let key = ObjectKey::from_value(&value)?;
    let patch = json!({ "status": value.get("status").cloned().unwrap_or(Value::Null) });
    let patched = client.merge_patch_status(&key, &patch).await?;
    Ok(serde_json::from_value(patched)?)
}

pub async fn delete_typed<K>(client: &dyn ResourceClient, namespace: Option<&str>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    client.delete(&ObjectKey::of::<K>(namespace, name)).await
}

/// [`ResourceClient`] backed by kube-rs dynamic objects.
pub struct KubeClient {
    client: Client,
    resources: Mutex<HashMap<(String, String), (ApiResource, bool)>>,
}

impl KubeClient {
    pub fn new(client: Client) -> KubeClient {
        KubeClient {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves (and caches) the plural and scope of a kind through discovery.
    async fn resource(&self, api_version: &str, kind: &str) -> Result<(ApiResource, bool)> {
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(found) = self.cached(&cache_key) {
            return Ok(found);
        }
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        let namespaced = caps.scope == Scope::Namespaced;
        if let Ok(mut cache) = self.resources.lock() {
            cache.insert(cache_key, (ar.clone(), namespaced));
        }
        Ok((ar, namespaced))
    }

    fn cached(&self, key: &(String, String)) -> Option<(ApiResource, bool)> {
        self.resources.lock().ok().and_then(|cache| cache.get(key).cloned())
    }

    async fn api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resource(api_version, kind).await?;
        Ok(match namespace {
            Some(ns) if namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        self.api(&key.api_version, &key.kind, key.namespace.as_deref()).await
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        let api = self.api_for(key).await?;
        match api.get_opt(&key.name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let api = self.api(api_version, kind, namespace).await?;
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        api.list(&lp)
            .await?
            .items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Error::from))
            .collect()
    }

    async fn create(&self, obj: &Value) -> Result<Value> {
        let key = ObjectKey::from_value(obj)?;
        let api = self.api_for(&key).await?;
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        let created = api.create(&PostParams::default(), &dynamic).await?;
        Ok(serde_json::to_value(created)?)
    }

    async fn replace(&self, obj: &Value) -> Result<Value> {
        let key = ObjectKey::from_value(obj)?;
        let api = self.api_for(&key).await?;
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        let replaced = api.replace(&key.name, &PostParams::default(), &dynamic).await?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn merge_patch(&self, key: &ObjectKey, patch: &Value) -> Result<Value> {
        let api = self.api_for(key).await?;
        let patched = api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn merge_patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<Value> {
        let api = self.api_for(key).await?;
        let patched = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let api = self.api_for(key).await?;
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ManifestApplier for KubeClient {
    async fn apply(&self, obj: &Value) -> Result<ApplyOutcome> {
        apply_with_hash(self, obj).await
    }

    async fn remove(&self, obj: &Value) -> Result<()> {
        self.delete(&ObjectKey::from_value(obj)?).await
    }
}

/// [`EventRecorder`] publishing through the kube-rs events API.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, reporter: Reporter) -> KubeEventRecorder {
        KubeEventRecorder {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(&self, reference: &ObjectReference, event: Event) -> Result<()> {
        self.recorder.publish(&event, reference).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use serde_json::json;

    fn config_map(data: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "feature-flags", "namespace": "tekton-pipelines"},
            "data": {"enable-api-fields": data}
        })
    }

    #[tokio::test]
    async fn apply_creates_skips_and_replaces() {
        let cluster = FakeCluster::new();

        assert_eq!(apply_with_hash(&cluster, &config_map("stable")).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(apply_with_hash(&cluster, &config_map("stable")).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(apply_with_hash(&cluster, &config_map("beta")).await.unwrap(), ApplyOutcome::Replaced);

        let key = ObjectKey::from_value(&config_map("beta")).unwrap();
        let stored = cluster.get(&key).await.unwrap().unwrap();
        assert_eq!(stored["data"]["enable-api-fields"], "beta");
        assert!(stored["metadata"]["annotations"][LAST_APPLIED_HASH_KEY].is_string());
    }

    #[tokio::test]
    async fn apply_waits_for_terminating_objects() {
        let cluster = FakeCluster::new();
        let mut cm = config_map("stable");
        cm["metadata"]["finalizers"] = json!(["example.com/hold"]);
        cluster.create(&cm).await.unwrap();
        cluster.delete(&ObjectKey::from_value(&cm).unwrap()).await.unwrap();

        let err = apply_with_hash(&cluster, &config_map("beta")).await.unwrap_err();
        assert!(matches!(err, Error::ReconcileAgain));
    }

    #[test]
    fn keys_come_from_object_metadata() {
        let key = ObjectKey::from_value(&config_map("x")).unwrap();
        assert_eq!(key.to_string(), "ConfigMap/tekton-pipelines/feature-flags");
        assert_eq!(key.group_version(), ("", "v1"));

        let missing = ObjectKey::from_value(&json!({"apiVersion": "v1", "kind": "ConfigMap"}));
        assert!(missing.is_err());
    }
}
