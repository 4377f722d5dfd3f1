//! Manifest transformers.
//!
//! Each constructor returns a [`Transformer`] that rewrites one object in place. Overlays that
//! may add objects work on the whole [`Manifest`] instead.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::api::v1alpha1::{AdditionalOptions, Config, WebhookConfigurationOptions};
use crate::api::DEPLOYMENT_SPEC_HASH_KEY;
use crate::manifests::{Manifest, Transformer};
use crate::util::errors::Result;
use crate::util::hash::content_hash;

/// Kinds that never carry a namespace.
pub const CLUSTER_SCOPED_KINDS: [&str; 16] = [
    "CustomResourceDefinition",
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
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

const POD_TEMPLATE_KINDS: [&str; 4] = ["Deployment", "StatefulSet", "DaemonSet", "Job"];

/// Label values are capped at 63 characters; the hash label keeps half of the sha256 digest.
const SPEC_HASH_LABEL_LEN: usize = 32;

pub fn kind_of(obj: &Value) -> &str {
    obj["kind"].as_str().unwrap_or_default()
}

pub fn name_of(obj: &Value) -> &str {
    obj.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default()
}

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// The pod template of a workload, if the object has one.
fn pod_template_mut(obj: &mut Value) -> Option<&mut Value> {
    let kind = kind_of(obj).to_string();
    if POD_TEMPLATE_KINDS.contains(&kind.as_str()) {
        obj.pointer_mut("/spec/template")
    } else if kind == "CronJob" {
        obj.pointer_mut("/spec/jobTemplate/spec/template")
    } else {
        None
    }
}

fn containers_mut(pod_spec: &mut Value) -> impl Iterator<Item = &mut Value> {
    let mut all = Vec::new();
    if let Some(map) = pod_spec.as_object_mut() {
        for (key, list) in map.iter_mut() {
            if key == "containers" || key == "initContainers" {
                if let Some(items) = list.as_array_mut() {
                    all.extend(items.iter_mut());
                }
            }
        }
    }
    all.into_iter()
}

/// Moves namespaced objects, and every namespace reference of cluster objects, into `namespace`.
pub fn inject_namespace(namespace: &str) -> Transformer {
    let namespace = namespace.to_string();
    Box::new(move |obj| {
        let ns = Value::String(namespace.clone());
        let kind = kind_of(obj).to_string();
        match kind.as_str() {
            "Namespace" => obj["metadata"]["name"] = ns,
            "ClusterRoleBinding" | "RoleBinding" => {
                if kind == "RoleBinding" {
                    obj["metadata"]["namespace"] = ns.clone();
                }
                if let Some(subjects) = obj.get_mut("subjects").and_then(Value::as_array_mut) {
                    for subject in subjects.iter_mut().filter(|s| s["kind"] == "ServiceAccount") {
                        subject["namespace"] = ns.clone();
                    }
                }
            }
            "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => {
                if let Some(webhooks) = obj.get_mut("webhooks").and_then(Value::as_array_mut) {
                    for webhook in webhooks.iter_mut() {
                        if let Some(service) = webhook.pointer_mut("/clientConfig/service") {
                            service["namespace"] = ns.clone();
                        }
                    }
                }
            }
            "CustomResourceDefinition" => {
                if let Some(service) = obj.pointer_mut("/spec/conversion/webhook/clientConfig/service") {
                    service["namespace"] = ns;
                }
            }
            "APIService" => {
                if let Some(service) = obj.pointer_mut("/spec/service") {
                    service["namespace"] = ns;
                }
            }
            kind if !is_cluster_scoped(kind) => obj["metadata"]["namespace"] = ns,
            _ => {}
        }
        Ok(())
    })
}

/// Merges `labels` into every object's metadata.
pub fn add_labels(labels: BTreeMap<String, String>) -> Transformer {
    Box::new(move |obj| {
        if !obj["metadata"]["labels"].is_object() {
            obj["metadata"]["labels"] = json!({});
        }
        for (k, v) in &labels {
            obj["metadata"]["labels"][k] = Value::String(v.clone());
        }
        Ok(())
    })
}

/// Replaces container images (by container name) and `IMAGE_*` env values (by env name).
pub fn registry_overrides(overrides: BTreeMap<String, String>) -> Transformer {
    Box::new(move |obj| {
        if overrides.is_empty() {
            return Ok(());
        }
        let Some(spec) = pod_template_mut(obj).and_then(|t| t.get_mut("spec")) else {
            return Ok(());
        };
        for container in containers_mut(spec) {
            if let Some(image) = container["name"].as_str().and_then(|n| overrides.get(n)) {
                container["image"] = Value::String(image.clone());
            }
            if let Some(env) = container.get_mut("env").and_then(Value::as_array_mut) {
                for var in env.iter_mut() {
                    let replacement = var["name"]
                        .as_str()
                        .filter(|n| n.starts_with("IMAGE_"))
                        .and_then(|n| overrides.get(n));
                    if let Some(image) = replacement {
                        var["value"] = Value::String(image.clone());
                    }
                }
            }
        }
        Ok(())
    })
}

/// Applies the component-wide scheduling constraints to every workload.
pub fn scheduling(config: Config) -> Transformer {
    Box::new(move |obj| {
        if config.is_empty() {
            return Ok(());
        }
        if kind_of(obj) == "Deployment" {
            if let Some(replicas) = config.high_availability.as_ref().and_then(|ha| ha.replicas) {
                obj["spec"]["replicas"] = json!(replicas);
            }
        }
        let Some(template) = pod_template_mut(obj) else {
            return Ok(());
        };
        let spec = &mut template["spec"];
        if !config.node_selector.is_empty() {
            spec["nodeSelector"] = serde_json::to_value(&config.node_selector)?;
        }
        if !config.tolerations.is_empty() {
            spec["tolerations"] = serde_json::to_value(&config.tolerations)?;
        }
        if let Some(priority) = &config.priority_class_name {
            spec["priorityClassName"] = Value::String(priority.clone());
        }
        Ok(())
    })
}

/// Merges string settings into the data of the ConfigMap named `name`.
pub fn config_map_data(name: &str, data: BTreeMap<String, String>) -> Transformer {
    let name = name.to_string();
    Box::new(move |obj| {
        if kind_of(obj) != "ConfigMap" || name_of(obj) != name || data.is_empty() {
            return Ok(());
        }
        if !obj["data"].is_object() {
            obj["data"] = json!({});
        }
        for (k, v) in &data {
            obj["data"][k] = Value::String(v.clone());
        }
        Ok(())
    })
}

/// Renders the scalar fields of a settings struct as ConfigMap data. Nested blocks are skipped.
pub fn flatten_properties<T: serde::Serialize>(properties: &T) -> Result<BTreeMap<String, String>> {
    let value = serde_json::to_value(properties)?;
    let mut data = BTreeMap::new();
    if let Value::Object(map) = value {
        for (k, v) in map {
            let rendered = match v {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            data.insert(k, rendered);
        }
    }
    Ok(data)
}

/// Adds `args` to the containers of the named deployment, replacing flags already present.
pub fn container_args(deployment: &str, args: Vec<(String, String)>) -> Transformer {
    let deployment = deployment.to_string();
    Box::new(move |obj| {
        if kind_of(obj) != "Deployment" || name_of(obj) != deployment || args.is_empty() {
            return Ok(());
        }
        let Some(spec) = obj.pointer_mut("/spec/template/spec") else {
            return Ok(());
        };
        for container in containers_mut(spec) {
            if !container["args"].is_array() {
                container["args"] = json!([]);
            }
            if let Some(list) = container["args"].as_array_mut() {
                for (flag, value) in &args {
                    let prefix = format!("-{flag}=");
                    list.retain(|a| a.as_str().map_or(true, |a| !a.starts_with(&prefix)));
                    list.push(Value::String(format!("{prefix}{value}")));
                }
            }
        }
        Ok(())
    })
}

/// Drops fixed user and group ids so the platform can assign them.
pub fn strip_run_as_ids() -> Transformer {
    Box::new(|obj| {
        let Some(spec) = pod_template_mut(obj).and_then(|t| t.get_mut("spec")) else {
            return Ok(());
        };
        remove_ids(spec.get_mut("securityContext"));
        for container in containers_mut(spec) {
            remove_ids(container.get_mut("securityContext"));
        }
        Ok(())
    })
}

fn remove_ids(security_context: Option<&mut Value>) {
    if let Some(ctx) = security_context.and_then(Value::as_object_mut) {
        ctx.remove("runAsUser");
        ctx.remove("runAsGroup");
    }
}

/// Sets `name=value` on every container unless it already defines `name`.
pub fn inject_env(name: &str, value: &str) -> Transformer {
    let (name, value) = (name.to_string(), value.to_string());
    Box::new(move |obj| {
        let Some(spec) = pod_template_mut(obj).and_then(|t| t.get_mut("spec")) else {
            return Ok(());
        };
        for container in containers_mut(spec) {
            if !container["env"].is_array() {
                container["env"] = json!([]);
            }
            if let Some(env) = container["env"].as_array_mut() {
                if !env.iter().any(|e| e["name"] == name.as_str()) {
                    env.push(json!({"name": name, "value": value}));
                }
            }
        }
        Ok(())
    })
}

/// Labels the pod template with a hash of the workload spec, so any spec change rolls the pods.
pub fn deployment_spec_hash() -> Transformer {
    Box::new(|obj| {
        if !matches!(kind_of(obj), "Deployment" | "StatefulSet") {
            return Ok(());
        }
        if let Some(labels) = obj
            .pointer_mut("/spec/template/metadata/labels")
            .and_then(Value::as_object_mut)
        {
            labels.remove(DEPLOYMENT_SPEC_HASH_KEY);
        }
        let hash = content_hash(&obj["spec"])?;
        let template = &mut obj["spec"]["template"];
        if !template["metadata"]["labels"].is_object() {
            template["metadata"]["labels"] = json!({});
        }
        template["metadata"]["labels"][DEPLOYMENT_SPEC_HASH_KEY] =
            Value::String(hash[..SPEC_HASH_LABEL_LEN].to_string());
        Ok(())
    })
}

/// Overlays user supplied objects on top of the manifest.
///
/// ConfigMaps and HorizontalPodAutoscalers that the bundle lacks are added in `namespace`;
/// Deployments and StatefulSets are only ever merged into existing objects.
pub fn apply_additional_options(manifest: &mut Manifest, options: &AdditionalOptions, namespace: &str) -> Result<()> {
    if options.is_disabled() || options.is_empty() {
        return Ok(());
    }
    overlay_kind(manifest, ("v1", "ConfigMap"), &options.config_maps, Some(namespace))?;
    overlay_kind(manifest, ("apps/v1", "Deployment"), &options.deployments, None)?;
    overlay_kind(manifest, ("apps/v1", "StatefulSet"), &options.stateful_sets, None)?;
    overlay_kind(
        manifest,
        ("autoscaling/v2", "HorizontalPodAutoscaler"),
        &options.horizontal_pod_autoscalers,
        Some(namespace),
    )?;

    for obj in manifest.resources.iter_mut() {
        if matches!(kind_of(obj), "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration") {
            apply_webhook_options(obj, &options.webhook_configuration_options);
        }
    }
    Ok(())
}

fn overlay_kind<T: serde::Serialize>(
    manifest: &mut Manifest,
    (api_version, kind): (&str, &str),
    overlays: &BTreeMap<String, T>,
    add_missing_in: Option<&str>,
) -> Result<()> {
    for (name, overlay) in overlays {
        let mut overlay = serde_json::to_value(overlay)?;
        if let Some(meta) = overlay.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("name");
            meta.remove("namespace");
        }
        match manifest
            .resources
            .iter_mut()
            .find(|o| kind_of(o) == kind && name_of(o) == name)
        {
            Some(existing) => merge_overlay(existing, &overlay),
            None => {
                if let Some(namespace) = add_missing_in {
                    let mut created = overlay;
                    created["apiVersion"] = Value::String(api_version.to_string());
                    created["kind"] = Value::String(kind.to_string());
                    created["metadata"]["name"] = Value::String(name.clone());
                    created["metadata"]["namespace"] = Value::String(namespace.to_string());
                    manifest.resources.push(created);
                }
            }
        }
    }
    Ok(())
}

fn apply_webhook_options(obj: &mut Value, options: &BTreeMap<String, WebhookConfigurationOptions>) {
    let Some(webhooks) = obj.get_mut("webhooks").and_then(Value::as_array_mut) else {
        return;
    };
    for webhook in webhooks.iter_mut() {
        let Some(opts) = webhook["name"].as_str().and_then(|n| options.get(n)) else {
            continue;
        };
        if let Some(policy) = &opts.failure_policy {
            webhook["failurePolicy"] = Value::String(policy.clone());
        }
        if let Some(timeout) = opts.timeout_seconds {
            webhook["timeoutSeconds"] = json!(timeout);
        }
        if let Some(side_effects) = &opts.side_effects {
            webhook["sideEffects"] = Value::String(side_effects.clone());
        }
    }
}

/// Recursive merge where lists of named entries (containers, env, volumes) merge by name and
/// empty overlay values never clear what the base has.
pub fn merge_overlay(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                if is_blank(v) {
                    continue;
                }
                match base.get_mut(k) {
                    Some(existing) => merge_overlay(existing, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) if is_named_list(overlay) => {
            for item in overlay {
                match base.iter_mut().find(|b| b["name"] == item["name"]) {
                    Some(existing) => merge_overlay(existing, item),
                    None => base.push(item.clone()),
                }
            }
        }
        (base, overlay) => {
            if !is_blank(overlay) {
                *base = overlay.clone();
            }
        }
    }
}

fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|i| i.get("name").is_some_and(Value::is_string))
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty() || o.values().all(is_blank),
        _ => false,
    }
}

/// Turns a map into ConfigMap-style string data, keeping only present values.
pub fn string_map(entries: &[(&str, Option<String>)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::HighAvailability;
    use assert_json_diff::assert_json_include;
    use k8s_openapi::api::apps::v1::Deployment;
    use pretty_assertions::assert_eq;

    fn deployment(name: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "tekton-pipelines"},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {
                        "securityContext": {"runAsUser": 65532, "runAsNonRoot": true},
                        "containers": [{
                            "name": name,
                            "image": "gcr.io/tekton/controller:v1",
                            "env": [{"name": "IMAGE_ENTRYPOINT", "value": "gcr.io/tekton/entrypoint:v1"}],
                            "securityContext": {"runAsUser": 65532, "runAsGroup": 65532}
                        }]
                    }
                }
            }
        })
    }

    fn run(t: Transformer, mut obj: Value) -> Value {
        t(&mut obj).unwrap();
        obj
    }

    #[test]
    fn namespace_injection_covers_references() {
        let t = inject_namespace("ci");
        let crb = run(
            inject_namespace("ci"),
            json!({
                "kind": "ClusterRoleBinding",
                "metadata": {"name": "x"},
                "subjects": [{"kind": "ServiceAccount", "name": "sa", "namespace": "tekton-pipelines"},
                             {"kind": "User", "name": "bob"}]
            }),
        );
        assert_eq!(crb["subjects"][0]["namespace"], "ci");
        assert!(crb["subjects"][1].get("namespace").is_none());
        assert!(crb["metadata"].get("namespace").is_none());

        let d = run(t, deployment("controller"));
        assert_eq!(d["metadata"]["namespace"], "ci");

        let ns = run(inject_namespace("ci"), json!({"kind": "Namespace", "metadata": {"name": "tekton-pipelines"}}));
        assert_eq!(ns["metadata"]["name"], "ci");
    }

    #[test]
    fn registry_overrides_match_containers_and_image_env() {
        let overrides = BTreeMap::from([
            ("controller".to_string(), "mirror/controller:v1".to_string()),
            ("IMAGE_ENTRYPOINT".to_string(), "mirror/entrypoint:v1".to_string()),
        ]);
        let d = run(registry_overrides(overrides), deployment("controller"));
        let c = &d["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(c["image"], "mirror/controller:v1");
        assert_eq!(c["env"][0]["value"], "mirror/entrypoint:v1");
    }

    #[test]
    fn scheduling_sets_pod_constraints_and_replicas() {
        let config = Config {
            node_selector: BTreeMap::from([("role".to_string(), "ci".to_string())]),
            priority_class_name: Some("high".into()),
            high_availability: Some(HighAvailability { replicas: Some(3) }),
            ..Default::default()
        };
        let d = run(scheduling(config), deployment("controller"));
        assert_eq!(d["spec"]["replicas"], 3);
        assert_json_include!(
            actual: d["spec"]["template"]["spec"].clone(),
            expected: json!({"nodeSelector": {"role": "ci"}, "priorityClassName": "high"})
        );
    }

    #[test]
    fn openshift_strips_fixed_ids() {
        let d = run(strip_run_as_ids(), deployment("controller"));
        let pod = &d["spec"]["template"]["spec"];
        assert_eq!(pod["securityContext"], json!({"runAsNonRoot": true}));
        assert_eq!(pod["containers"][0]["securityContext"], json!({}));

        let d = run(inject_env("PLATFORM", "openshift"), d);
        let env = d["spec"]["template"]["spec"]["containers"][0]["env"].as_array().unwrap().clone();
        assert_eq!(env.len(), 2);
        assert_eq!(env[1], json!({"name": "PLATFORM", "value": "openshift"}));
    }

    #[test]
    fn spec_hash_follows_the_spec() {
        let first = run(deployment_spec_hash(), deployment("controller"));
        let again = run(deployment_spec_hash(), first.clone());
        let label = |d: &Value| d["spec"]["template"]["metadata"]["labels"][DEPLOYMENT_SPEC_HASH_KEY].clone();
        assert_eq!(label(&first), label(&again));

        let overrides = BTreeMap::from([("controller".to_string(), "mirror/controller:v2".to_string())]);
        let changed = run(registry_overrides(overrides), deployment("controller"));
        let changed = run(deployment_spec_hash(), changed);
        assert_ne!(label(&first), label(&changed));
        assert_eq!(label(&first).as_str().map(str::len), Some(32));
    }

    #[test]
    fn additional_options_merge_and_add() {
        let mut manifest = Manifest::new(vec![
            deployment("tekton-pipelines-controller"),
            json!({
                "apiVersion": "admissionregistration.k8s.io/v1",
                "kind": "ValidatingWebhookConfiguration",
                "metadata": {"name": "validation.webhook.pipeline.tekton.dev"},
                "webhooks": [{"name": "validation.webhook.pipeline.tekton.dev", "failurePolicy": "Fail"}]
            }),
        ]);
        let options: AdditionalOptions = serde_json::from_value(json!({
            "deployments": {
                "tekton-pipelines-controller": {
                    "spec": {
                        "replicas": 2,
                        "template": {"spec": {"containers": [{
                            "name": "tekton-pipelines-controller",
                            "env": [{"name": "LOG_LEVEL", "value": "debug"}]
                        }]}}
                    }
                }
            },
            "configMaps": {"config-extra": {"data": {"k": "v"}}},
            "webhookConfigurationOptions": {
                "validation.webhook.pipeline.tekton.dev": {"failurePolicy": "Ignore", "timeoutSeconds": 20}
            }
        }))
        .unwrap();

        apply_additional_options(&mut manifest, &options, "ci").unwrap();

        let d = &manifest.resources[0];
        assert_eq!(d["spec"]["replicas"], 2);
        let container = &d["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "gcr.io/tekton/controller:v1");
        assert_eq!(container["env"].as_array().map(Vec::len), Some(2));
        assert_eq!(d["spec"]["selector"]["matchLabels"]["app"], "tekton-pipelines-controller");

        let webhook = &manifest.resources[1]["webhooks"][0];
        assert_eq!(webhook["failurePolicy"], "Ignore");
        assert_eq!(webhook["timeoutSeconds"], 20);

        let cm = &manifest.resources[2];
        assert_eq!(kind_of(cm), "ConfigMap");
        assert_eq!(cm["metadata"]["namespace"], "ci");
        assert_eq!(cm["data"]["k"], "v");
    }

    #[test]
    fn disabled_options_are_ignored() {
        let mut manifest = Manifest::new(vec![deployment("controller")]);
        let mut options = AdditionalOptions {
            disabled: Some(true),
            ..Default::default()
        };
        options.deployments.insert("controller".into(), Deployment::default());
        apply_additional_options(&mut manifest, &options, "ci").unwrap();
        assert_eq!(manifest.resources, vec![deployment("controller")]);
    }

    #[test]
    fn properties_flatten_to_strings() {
        let data = flatten_properties(&json!({"a": true, "b": 3, "c": "x", "d": {"nested": 1}, "e": null})).unwrap();
        assert_eq!(
            data,
            BTreeMap::from([
                ("a".to_string(), "true".to_string()),
                ("b".to_string(), "3".to_string()),
                ("c".to_string(), "x".to_string()),
            ])
        );
    }

    #[test]
    fn container_args_replace_existing_flags() {
        let mut d = deployment("tekton-pipelines-controller");
        d["spec"]["template"]["spec"]["containers"][0]["args"] = json!(["-kube-api-qps=5", "-other=1"]);
        let d = run(
            container_args("tekton-pipelines-controller", vec![("kube-api-qps".into(), "50".into())]),
            d,
        );
        assert_eq!(
            d["spec"]["template"]["spec"]["containers"][0]["args"],
            json!(["-other=1", "-kube-api-qps=50"])
        );
    }
}
