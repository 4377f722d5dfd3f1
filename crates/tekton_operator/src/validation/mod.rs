//! Field-path scoped validation for every operator resource.
//!
//! Validators are plain functions returning [`FieldErrors`]; an empty list means the object is
//! valid. Paths use the dotted form `spec.pruner.resources[0]` and always round-trip through
//! [`FieldPath::parse`].

use std::fmt;

use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::v1alpha1::*;
use crate::settings::Platform;
use crate::util::errors::Result;

pub mod addon;
pub mod chain;
pub mod config;
pub mod options;
pub mod pipeline;
pub mod pipelines_as_code;
pub mod pruner;
pub mod scheduler;

pub use config::{validate_config, validate_immutable_namespace, validate_singleton, validate_target_namespace};

/// Namespace that may never host components on OpenShift.
pub const OPENSHIFT_OPERATORS_NAMESPACE: &str = "openshift-operators";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub message: String,
    pub paths: Vec<String>,
    pub details: Option<String>,
}

impl FieldError {
    pub fn new(message: impl Into<String>, paths: &[&str]) -> Self {
        FieldError {
            message: message.into(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            details: None,
        }
    }

    pub fn invalid_value(value: impl fmt::Display, path: impl Into<String>) -> Self {
        FieldError {
            message: format!("invalid value: {value}"),
            paths: vec![path.into()],
            details: None,
        }
    }

    pub fn invalid_array_value(value: impl fmt::Display, path: &str, index: usize) -> Self {
        Self::invalid_value(value, format!("{path}[{index}]"))
    }

    pub fn missing_field(path: impl Into<String>) -> Self {
        FieldError {
            message: "missing field(s)".to_string(),
            paths: vec![path.into()],
            details: None,
        }
    }

    pub fn multiple_one_of(a: &str, b: &str) -> Self {
        Self::new("expected exactly one, got both", &[a, b])
    }

    pub fn generic(message: impl Into<String>, path: impl Into<String>) -> Self {
        FieldError {
            message: message.into(),
            paths: vec![path.into()],
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.paths.join(", "))?;
        if let Some(details) = &self.details {
            write!(f, ", {details}")?;
        }
        Ok(())
    }
}

/// Accumulated validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn also(mut self, other: FieldErrors) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn extend(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Rendered errors, one per entry, in insertion order.
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl From<FieldError> for FieldErrors {
    fn from(e: FieldError) -> Self {
        FieldErrors(vec![e])
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.messages().join("\n"))
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Key(String),
}

/// A parsed dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(pub Vec<Segment>);

impl FieldPath {
    pub fn parse(path: &str) -> Result<FieldPath, String> {
        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();
        let mut expect_field = true;

        while let Some(&c) = chars.peek() {
            match c {
                '.' => {
                    if expect_field {
                        return Err(format!("empty field name in {path:?}"));
                    }
                    chars.next();
                    expect_field = true;
                }
                '[' => {
                    if expect_field {
                        return Err(format!("subscript without field in {path:?}"));
                    }
                    chars.next();
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(format!("unterminated subscript in {path:?}")),
                        }
                    }
                    if inner.is_empty() {
                        return Err(format!("empty subscript in {path:?}"));
                    }
                    match inner.parse::<usize>() {
                        Ok(i) => segments.push(Segment::Index(i)),
                        Err(_) => segments.push(Segment::Key(inner)),
                    }
                }
                _ => {
                    if !expect_field {
                        return Err(format!("unexpected {c:?} in {path:?}"));
                    }
                    let mut name = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                            name.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(format!("invalid character {c:?} in {path:?}"));
                    }
                    segments.push(Segment::Field(name));
                    expect_field = false;
                }
            }
        }

        if expect_field {
            return Err(format!("path {path:?} must end with a field or subscript"));
        }
        Ok(FieldPath(segments))
    }
}

/// Kind specific rules, run after the checks every component shares.
pub trait Validate: TektonComponent {
    fn validate_spec(&self, _old: Option<&Self>, _platform: Platform) -> FieldErrors {
        FieldErrors::new()
    }
}

/// Full validation of one component. Objects being deleted are never rejected.
pub fn validate<K: Validate>(obj: &K, old: Option<&K>, platform: Platform) -> FieldErrors {
    if obj.meta().deletion_timestamp.is_some() {
        return FieldErrors::new();
    }
    let mut errs = validate_singleton(K::KIND, &obj.name_any());
    errs.extend(validate_target_namespace(obj.target_namespace(), platform));
    if let Some(options) = obj.options() {
        errs.extend(options::validate_options(options, "spec.options"));
    }
    errs.also(obj.validate_spec(old, platform))
}

/// Validates an untyped object of any operator kind, as received by the admission webhook.
pub fn validate_object(obj: &Value, old: Option<&Value>, platform: Platform) -> Result<FieldErrors> {
    let kind = obj["kind"].as_str().and_then(ComponentKind::from_kind);
    match kind {
        Some(ComponentKind::Config) => validate_typed::<TektonConfig>(obj, old, platform),
        Some(ComponentKind::Pipeline) => validate_typed::<TektonPipeline>(obj, old, platform),
        Some(ComponentKind::Trigger) => validate_typed::<TektonTrigger>(obj, old, platform),
        Some(ComponentKind::Dashboard) => validate_typed::<TektonDashboard>(obj, old, platform),
        Some(ComponentKind::Chain) => validate_typed::<TektonChain>(obj, old, platform),
        Some(ComponentKind::Hub) => validate_typed::<TektonHub>(obj, old, platform),
        Some(ComponentKind::Result) => validate_typed::<TektonResult>(obj, old, platform),
        Some(ComponentKind::ManualApprovalGate) => validate_typed::<ManualApprovalGate>(obj, old, platform),
        Some(ComponentKind::Addon) => validate_typed::<TektonAddon>(obj, old, platform),
        Some(ComponentKind::Pruner) => validate_typed::<TektonPruner>(obj, old, platform),
        Some(ComponentKind::Scheduler) => validate_typed::<TektonScheduler>(obj, old, platform),
        Some(ComponentKind::MulticlusterProxyAae) => {
            validate_typed::<TektonMulticlusterProxyAAE>(obj, old, platform)
        }
        Some(ComponentKind::SyncerService) => validate_typed::<SyncerService>(obj, old, platform),
        Some(ComponentKind::PipelinesAsCode) => validate_typed::<OpenShiftPipelinesAsCode>(obj, old, platform),
        Some(ComponentKind::InstallerSet) | None => Ok(FieldErrors::new()),
    }
}

fn validate_typed<K: Validate + DeserializeOwned>(obj: &Value, old: Option<&Value>, platform: Platform) -> Result<FieldErrors> {
    let new: K = serde_json::from_value(obj.clone())?;
    let old: Option<K> = old.map(|o| serde_json::from_value(o.clone())).transpose()?;
    Ok(validate(&new, old.as_ref(), platform))
}

impl Validate for TektonConfig {
    fn validate_spec(&self, old: Option<&Self>, platform: Platform) -> FieldErrors {
        validate_config(self, old, platform)
    }
}

impl Validate for TektonPipeline {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        pipeline::validate_pipeline(&self.spec.pipeline.properties, "spec")
    }
}

impl Validate for TektonTrigger {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        pipeline::validate_trigger(&self.spec.trigger.properties, "spec")
    }
}

impl Validate for TektonChain {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        chain::validate_chain(&self.spec.chain, "spec")
    }
}

impl Validate for TektonAddon {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        addon::validate_addon(&self.spec.addon, "spec")
    }
}

impl Validate for TektonPruner {
    fn validate_spec(&self, old: Option<&Self>, _: Platform) -> FieldErrors {
        let errs = validate_immutable_namespace(
            &self.spec.common.target_namespace,
            old.map(|o| o.spec.common.target_namespace.as_str()),
        );
        if self.spec.pruner.is_disabled() {
            return errs;
        }
        errs.also(pruner::validate_global_config(&self.spec.config, "spec.config"))
    }
}

impl Validate for TektonScheduler {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        scheduler::validate_scheduler(&self.spec.scheduler, "spec")
    }
}

impl Validate for OpenShiftPipelinesAsCode {
    fn validate_spec(&self, _: Option<&Self>, _: Platform) -> FieldErrors {
        pipelines_as_code::validate_pac(&self.spec.settings, "spec")
    }
}

impl Validate for TektonDashboard {}
impl Validate for TektonHub {}
impl Validate for TektonResult {}
impl Validate for ManualApprovalGate {}
impl Validate for TektonMulticlusterProxyAAE {}
impl Validate for SyncerService {}

pub(crate) fn is_value_in(allowed: &[&str], value: &str) -> bool {
    allowed.iter().any(|a| *a == value)
}

/// RFC 1123 label: lowercase alphanumerics and '-', starting and ending alphanumeric, max 63.
pub fn is_dns1123_label(value: &str) -> bool {
    use std::sync::OnceLock;
    static LABEL: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex compiles")
    });
    value.len() <= 63 && re.is_match(value)
}

/// Minimal absolute URL check: scheme, "://", non-empty host.
pub fn is_absolute_url(value: &str) -> bool {
    use std::sync::OnceLock;
    static URL: OnceLock<regex::Regex> = OnceLock::new();
    let re = URL.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^/\s?#:]+(:[0-9]{1,5})?([/?#]\S*)?$")
            .expect("static regex compiles")
    });
    re.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_like_field_paths() {
        let e = FieldError::invalid_array_value("task", "spec.pruner.resources", 0);
        assert_eq!(e.to_string(), "invalid value: task: spec.pruner.resources[0]");

        let e = FieldError::missing_field("spec.pruner.schedule");
        assert_eq!(e.to_string(), "missing field(s): spec.pruner.schedule");

        let e = FieldError::multiple_one_of("spec.pruner.keep", "spec.pruner.keep-since");
        assert_eq!(
            e.to_string(),
            "expected exactly one, got both: spec.pruner.keep, spec.pruner.keep-since"
        );
    }

    #[test]
    fn parses_nested_paths() {
        let p = FieldPath::parse("spec.options.deployments[tekton-pipelines-controller].replicas")
            .unwrap();
        assert_eq!(
            p.0,
            vec![
                Segment::Field("spec".into()),
                Segment::Field("options".into()),
                Segment::Field("deployments".into()),
                Segment::Key("tekton-pipelines-controller".into()),
                Segment::Field("replicas".into()),
            ]
        );
        assert_eq!(
            FieldPath::parse("spec.pruner.resources[0]").unwrap().0.last(),
            Some(&Segment::Index(0))
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "spec.", ".spec", "spec..x", "spec[0", "[0]", "spec[]", "spec x"] {
            assert!(FieldPath::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn only_the_singleton_name_is_accepted() {
        let obj = serde_json::json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonConfig",
            "metadata": {"name": "config-2"},
            "spec": {"targetNamespace": "tekton-pipelines", "profile": "basic"}
        });
        let errs = validate_object(&obj, None, Platform::Kubernetes).unwrap();
        assert_eq!(
            errs.messages(),
            vec!["invalid value: config-2: metadata.name, Only one instance of TektonConfig is allowed by name, config"]
        );

        let mut ok = obj.clone();
        ok["metadata"]["name"] = serde_json::json!("config");
        assert!(validate_object(&ok, None, Platform::Kubernetes).unwrap().is_empty());
    }

    #[test]
    fn objects_being_deleted_pass() {
        let obj = serde_json::json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonPipeline",
            "metadata": {"name": "other", "deletionTimestamp": "2024-01-01T00:00:00Z"},
            "spec": {"targetNamespace": ""}
        });
        assert!(validate_object(&obj, None, Platform::Kubernetes).unwrap().is_empty());
    }

    #[test]
    fn openshift_operators_namespace_is_reserved() {
        let obj = serde_json::json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonChain",
            "metadata": {"name": "chain"},
            "spec": {"targetNamespace": "openshift-operators"}
        });
        assert!(validate_object(&obj, None, Platform::Kubernetes).unwrap().is_empty());
        assert_eq!(validate_object(&obj, None, Platform::OpenShift).unwrap().len(), 1);
    }

    #[test]
    fn target_namespace_is_immutable() {
        let old = serde_json::json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonPruner",
            "metadata": {"name": "pruner"},
            "spec": {"targetNamespace": "tekton-pipelines"}
        });
        let mut new = old.clone();
        new["spec"]["targetNamespace"] = serde_json::json!("elsewhere");
        let errs = validate_object(&new, Some(&old), Platform::Kubernetes).unwrap();
        assert_eq!(errs.len(), 1);
        assert!(validate_object(&old, Some(&old), Platform::Kubernetes).unwrap().is_empty());
    }

    #[test]
    fn every_reported_path_parses() {
        let obj = serde_json::json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonConfig",
            "metadata": {"name": "cfg"},
            "spec": {
                "profile": "everything",
                "pruner": {"resources": ["task"], "keep": 0, "keep-since": 0},
                "pipeline": {
                    "enable-api-fields": "gamma",
                    "performance": {"buckets": 0, "statefulset-ordinals": true},
                    "options": {"webhookConfigurationOptions": {"w": {"sideEffects": "Maybe"}}}
                },
                "chain": {"artifacts.oci.storage": "s3"},
                "scheduler": {"multi-cluster-disabled": false},
                "tektonpruner": {"disabled": false, "config": {"historyLimit": -1}},
                "addon": {"params": [{"name": "x", "value": "y"}]},
                "platforms": {"openshift": {"pipelinesAsCode": {
                    "settings": {"custom-console-url": "nope"},
                    "additionalPACControllers": {"Bad": {}}
                }}}
            }
        });
        let errs = validate_object(&obj, None, Platform::OpenShift).unwrap();
        assert!(errs.len() >= 14, "{errs}");
        for e in errs.iter() {
            assert!(!e.paths.is_empty());
            for path in &e.paths {
                assert!(FieldPath::parse(path).is_ok(), "{path} does not parse");
            }
        }
    }

    #[test]
    fn dns_labels_and_urls() {
        assert!(is_dns1123_label("my-controller"));
        assert!(!is_dns1123_label("My_Controller"));
        assert!(!is_dns1123_label("-leading"));
        assert!(!is_dns1123_label(&"a".repeat(64)));

        assert!(is_absolute_url("https://console.example.com/pipelines"));
        assert!(is_absolute_url("http://localhost:9097"));
        assert!(!is_absolute_url("console.example.com"));
        assert!(!is_absolute_url("https://"));
    }
}
