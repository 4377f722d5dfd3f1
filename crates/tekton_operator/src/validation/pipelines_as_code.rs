use std::collections::BTreeMap;

use regex::Regex;

use crate::api::v1alpha1::pipelines_as_code::{
    AdditionalPacControllerConfig, PacSettings, CUSTOM_CONSOLE_PR_DETAILS_KEY, CUSTOM_CONSOLE_PR_TASKLOG_KEY,
    CUSTOM_CONSOLE_URL_KEY, ERROR_DETECTION_REGEXP_KEY, MAX_ADDITIONAL_CONTROLLER_NAME, TEKTON_DASHBOARD_URL_KEY,
};

use super::{is_absolute_url, is_dns1123_label, FieldError, FieldErrors};

pub fn validate_pac(pac: &PacSettings, path: &str) -> FieldErrors {
    let mut errs = validate_settings(&pac.settings, &format!("{path}.settings"));
    for (name, controller) in &pac.additional_controllers {
        errs.extend(validate_additional_controller(
            name,
            controller,
            &format!("{path}.additionalPACControllers"),
        ));
    }
    errs
}

/// Checks the settings the controller would otherwise fail on at runtime. Empty values are unset.
pub fn validate_settings(settings: &BTreeMap<String, String>, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let set = |key: &str| settings.get(key).map(String::as_str).filter(|v| !v.is_empty());

    if let Some(pattern) = set(ERROR_DETECTION_REGEXP_KEY) {
        if let Err(e) = Regex::new(pattern) {
            errs.push(
                FieldError::invalid_value(pattern, format!("{path}[{ERROR_DETECTION_REGEXP_KEY}]"))
                    .with_details(format!("invalid regex: {e}")),
            );
        }
    }
    for key in [CUSTOM_CONSOLE_URL_KEY, TEKTON_DASHBOARD_URL_KEY] {
        if let Some(url) = set(key).filter(|u| !is_absolute_url(u)) {
            errs.push(
                FieldError::invalid_value(url, format!("{path}[{key}]")).with_details("invalid value for URL"),
            );
        }
    }
    for key in [CUSTOM_CONSOLE_PR_DETAILS_KEY, CUSTOM_CONSOLE_PR_TASKLOG_KEY] {
        if let Some(url) = set(key).filter(|u| !u.starts_with("http://") && !u.starts_with("https://")) {
            errs.push(
                FieldError::invalid_value(url, format!("{path}[{key}]"))
                    .with_details("must start with http:// or https://"),
            );
        }
    }
    errs
}

pub fn validate_additional_controller(
    name: &str,
    controller: &AdditionalPacControllerConfig,
    path: &str,
) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let path = format!("{path}[{name}]");
    if name.len() > MAX_ADDITIONAL_CONTROLLER_NAME || !is_dns1123_label(name) {
        errs.push(FieldError::invalid_value(name, path.clone()).with_details(format!(
            "must be a DNS-1123 label of at most {MAX_ADDITIONAL_CONTROLLER_NAME} characters"
        )));
    }
    for (field, value) in [
        ("configMapName", &controller.config_map_name),
        ("secretName", &controller.secret_name),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !is_dns1123_label(v)) {
            errs.push(
                FieldError::invalid_value(value, format!("{path}.{field}")).with_details("must be a DNS-1123 label"),
            );
        }
    }
    errs.also(validate_settings(&controller.settings, &format!("{path}.settings")))
}
