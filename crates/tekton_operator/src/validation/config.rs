use crate::api::v1alpha1::{ComponentKind, TektonConfig, PROFILES};
use crate::settings::Platform;

use super::addon::validate_addon;
use super::chain::validate_chain;
use super::options::validate_options;
use super::pipeline::{validate_pipeline, validate_trigger};
use super::pipelines_as_code::validate_pac;
use super::pruner::{validate_global_config, validate_prune};
use super::scheduler::validate_scheduler;
use super::{is_value_in, FieldError, FieldErrors, OPENSHIFT_OPERATORS_NAMESPACE};

/// Rejects any name other than the kind's singleton name.
pub fn validate_singleton(kind: ComponentKind, name: &str) -> FieldErrors {
    match kind.singleton_name() {
        Some(singleton) if singleton != name => FieldError::invalid_value(name, "metadata.name")
            .with_details(format!("Only one instance of {kind} is allowed by name, {singleton}"))
            .into(),
        _ => FieldErrors::new(),
    }
}

pub fn validate_target_namespace(namespace: &str, platform: Platform) -> FieldErrors {
    if namespace.is_empty() {
        return FieldError::missing_field("spec.targetNamespace").into();
    }
    if platform.is_openshift() && namespace == OPENSHIFT_OPERATORS_NAMESPACE {
        return FieldError::invalid_value(namespace, "spec.targetNamespace")
            .with_details(format!("{OPENSHIFT_OPERATORS_NAMESPACE} cannot host components"))
            .into();
    }
    FieldErrors::new()
}

/// Rejects a change of `spec.targetNamespace` on update.
pub fn validate_immutable_namespace(new: &str, old: Option<&str>) -> FieldErrors {
    match old {
        Some(old) if !old.is_empty() && old != new => FieldError::invalid_value(new, "spec.targetNamespace")
            .with_details(format!("field is immutable, was {old}"))
            .into(),
        _ => FieldErrors::new(),
    }
}

/// The spec rules of `TektonConfig`; name and namespace are checked by the caller.
pub fn validate_config(config: &TektonConfig, old: Option<&TektonConfig>, platform: Platform) -> FieldErrors {
    let spec = &config.spec;
    let mut errs = FieldErrors::new();

    if !spec.profile.is_empty() && !is_value_in(&PROFILES, &spec.profile) {
        errs.push(FieldError::invalid_value(&spec.profile, "spec.profile"));
    }
    errs.extend(validate_immutable_namespace(
        &spec.common.target_namespace,
        old.map(|o| o.spec.common.target_namespace.as_str()),
    ));
    errs.extend(validate_prune(&spec.pruner, "spec.pruner"));

    errs.extend(validate_pipeline(&spec.pipeline.properties, "spec.pipeline"));
    errs.extend(validate_options(&spec.pipeline.options, "spec.pipeline.options"));
    errs.extend(validate_trigger(&spec.trigger.properties, "spec.trigger"));
    errs.extend(validate_options(&spec.trigger.options, "spec.trigger.options"));
    errs.extend(validate_chain(&spec.chain, "spec.chain"));
    errs.extend(validate_options(&spec.chain.options, "spec.chain.options"));
    errs.extend(validate_options(&spec.dashboard.options, "spec.dashboard.options"));
    errs.extend(validate_options(&spec.result.options, "spec.result.options"));
    errs.extend(validate_options(&spec.hub.options, "spec.hub.options"));
    errs.extend(validate_scheduler(&spec.scheduler, "spec.scheduler"));
    errs.extend(validate_options(&spec.scheduler.options, "spec.scheduler.options"));
    if !spec.tektonpruner.pruner.is_disabled() {
        errs.extend(validate_global_config(&spec.tektonpruner.config, "spec.tektonpruner.config"));
    }
    errs.extend(validate_options(&spec.tektonpruner.pruner.options, "spec.tektonpruner.options"));

    if platform.is_openshift() {
        errs.extend(validate_addon(&spec.addon, "spec.addon"));
        errs.extend(validate_options(&spec.addon.options, "spec.addon.options"));
        if let Some(pac) = config.pipelines_as_code() {
            errs.extend(validate_pac(&pac.settings, "spec.platforms.openshift.pipelinesAsCode"));
        }
    }
    errs
}
