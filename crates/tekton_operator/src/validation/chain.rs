use crate::api::v1alpha1::chain::{
    Chain, ALLOWED_SIGNERS, ALLOWED_STORAGES, ALLOWED_TRANSPARENCY, FORMAT_IN_TOTO, FORMAT_SIMPLE_SIGNING,
};

use super::{is_value_in, FieldError, FieldErrors};

/// Disabled chains are not rendered, so their settings are not checked.
pub fn validate_chain(chain: &Chain, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if chain.is_disabled() {
        return errs;
    }
    let p = &chain.properties;

    for (key, value) in [
        ("artifacts.taskrun.storage", &p.taskrun_storage),
        ("artifacts.pipelinerun.storage", &p.pipelinerun_storage),
        ("artifacts.oci.storage", &p.oci_storage),
    ] {
        let Some(value) = value else { continue };
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !is_value_in(&ALLOWED_STORAGES, token) {
                errs.push(FieldError::invalid_value(token, format!("{path}.{key}")));
            }
        }
    }

    for (key, value, expected) in [
        ("artifacts.taskrun.format", &p.taskrun_format, FORMAT_IN_TOTO),
        ("artifacts.pipelinerun.format", &p.pipelinerun_format, FORMAT_IN_TOTO),
        ("artifacts.oci.format", &p.oci_format, FORMAT_SIMPLE_SIGNING),
    ] {
        if let Some(value) = value.as_deref().filter(|v| *v != expected) {
            errs.push(FieldError::invalid_value(value, format!("{path}.{key}")));
        }
    }

    for (key, value) in [
        ("artifacts.taskrun.signer", &p.taskrun_signer),
        ("artifacts.pipelinerun.signer", &p.pipelinerun_signer),
        ("artifacts.oci.signer", &p.oci_signer),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !is_value_in(&ALLOWED_SIGNERS, v)) {
            errs.push(FieldError::invalid_value(value, format!("{path}.{key}")));
        }
    }

    if let Some(enabled) = p
        .transparency_enabled
        .as_deref()
        .filter(|v| !is_value_in(&ALLOWED_TRANSPARENCY, v))
    {
        errs.push(FieldError::invalid_value(enabled, format!("{path}.transparency.enabled")));
    }
    errs
}
