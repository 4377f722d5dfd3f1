pub mod v1alpha1;

pub const GROUP: &str = "operator.tekton.dev";
pub const VERSION: &str = "v1alpha1";
pub const API_VERSION: &str = "operator.tekton.dev/v1alpha1";

// Annotations and labels read and written by the operator.
pub const PRE_UPGRADE_VERSION_KEY: &str = "operator.tekton.dev/pre-upgrade-version";
pub const POST_UPGRADE_VERSION_KEY: &str = "operator.tekton.dev/post-upgrade-version";
pub const LAST_APPLIED_HASH_KEY: &str = "operator.tekton.dev/last-applied-hash";
pub const RELEASE_VERSION_KEY: &str = "operator.tekton.dev/release-version";
pub const TARGET_NAMESPACE_KEY: &str = "operator.tekton.dev/target-namespace";
pub const CREATED_BY_KEY: &str = "operator.tekton.dev/created-by";
pub const COMPONENT_KEY: &str = "operator.tekton.dev/component";
pub const DEPLOYMENT_SPEC_HASH_KEY: &str = "operator.tekton.dev/deployment-spec-applied-hash";
pub const DB_SECRET_HASH_KEY: &str = "operator.tekton.dev/db-secret-hash";
pub const INSTALLER_SET_TYPE_KEY: &str = "operator.tekton.dev/type";

// Target namespace bookkeeping labels on Namespace objects.
pub const TARGET_NAMESPACE_LABEL: &str = "operator.tekton.dev/targetNamespace";
pub const TARGET_NAMESPACE_DELETION_LABEL: &str = "operator.tekton.dev/targetNamespace-mark-for-deletion";

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    }))
    .unwrap()
}

/// Schema for embedded Kubernetes objects (overlays, tolerations, manifests) which are stored verbatim.
pub fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    }))
    .unwrap()
}

pub fn preserve_unknown_list(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        },
    }))
    .unwrap()
}
