use anyhow::Result;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    DynamicObject,
};
use tekton_operator::settings::Platform;
use tekton_operator::validation::validate_object;
use tracing::{debug, warn};

/// Validates every operator kind with the same rules the reconcilers apply.
#[derive(Clone)]
pub struct ComponentValidator {
    platform: Platform,
}

impl ComponentValidator {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn review(&self, review: AdmissionReview<DynamicObject>) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid admission review: {e}");
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };
        debug!("Processing admission review for {} {}", request.kind.kind, request.name);

        let response = AdmissionResponse::from(&request);
        let response = match self.validate_request(&request) {
            Ok(()) => response,
            Err(e) => {
                warn!("Validation failed: {}", e);
                response.deny(e.to_string())
            }
        };
        response.into_review()
    }

    fn validate_request(&self, request: &AdmissionRequest<DynamicObject>) -> Result<()> {
        if !matches!(request.operation, Operation::Create | Operation::Update) {
            return Ok(());
        }
        let object = request
            .object
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Missing object in {:?} request", request.operation))?;
        let object = serde_json::to_value(object)?;
        let old = request.old_object.as_ref().map(serde_json::to_value).transpose()?;

        let errs = validate_object(&object, old.as_ref(), self.platform)?;
        if !errs.is_empty() {
            anyhow::bail!("{errs}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(object: serde_json::Value, old: Option<serde_json::Value>) -> AdmissionReview<DynamicObject> {
        let operation = if old.is_some() { "UPDATE" } else { "CREATE" };
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "operator.tekton.dev", "version": "v1alpha1", "kind": object["kind"]},
                "resource": {"group": "operator.tekton.dev", "version": "v1alpha1", "resource": "tektonconfigs"},
                "name": object["metadata"]["name"],
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn config(profile: &str, namespace: &str) -> serde_json::Value {
        json!({
            "apiVersion": "operator.tekton.dev/v1alpha1",
            "kind": "TektonConfig",
            "metadata": {"name": "config"},
            "spec": {"profile": profile, "targetNamespace": namespace}
        })
    }

    fn allowed(review: AdmissionReview<DynamicObject>) -> bool {
        review.response.map(|r| r.allowed).unwrap_or(false)
    }

    #[test]
    fn accepts_a_valid_config() {
        let validator = ComponentValidator::new(Platform::Kubernetes);
        assert!(allowed(validator.review(review(config("all", "tekton-pipelines"), None))));
    }

    #[test]
    fn rejects_an_unknown_profile() {
        let validator = ComponentValidator::new(Platform::Kubernetes);
        assert!(!allowed(validator.review(review(config("everything", "tekton-pipelines"), None))));
    }

    #[test]
    fn rejects_moving_the_target_namespace() {
        let validator = ComponentValidator::new(Platform::Kubernetes);
        let old = config("all", "tekton-pipelines");
        assert!(!allowed(validator.review(review(config("all", "elsewhere"), Some(old)))));
    }
}
