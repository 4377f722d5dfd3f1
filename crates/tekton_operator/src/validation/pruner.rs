use crate::api::v1alpha1::config::{Prune, PRUNE_RESOURCES};
use crate::api::v1alpha1::pruner::{GlobalConfig, PrunerConfig, ENFORCED_CONFIG_LEVELS, MAX_TTL_SECONDS_AFTER_FINISHED};

use super::{is_value_in, FieldError, FieldErrors};

/// The cron pruner of `TektonConfig.spec.pruner`.
pub fn validate_prune(prune: &Prune, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if prune.disabled {
        return errs;
    }
    let configured = !prune.resources.is_empty()
        || prune.keep.is_some()
        || prune.keep_since.is_some()
        || prune.schedule.is_some();
    if !configured {
        return errs;
    }

    if prune.resources.is_empty() {
        errs.push(FieldError::missing_field(format!("{path}.resources")));
    }
    for (i, resource) in prune.resources.iter().enumerate() {
        if !is_value_in(&PRUNE_RESOURCES, resource) {
            errs.push(FieldError::invalid_array_value(resource, &format!("{path}.resources"), i));
        }
    }
    if prune.keep == Some(0) {
        errs.push(FieldError::invalid_value(0, format!("{path}.keep")));
    }
    if prune.keep_since == Some(0) {
        errs.push(FieldError::invalid_value(0, format!("{path}.keep-since")));
    }
    if prune.keep.is_some() && prune.keep_since.is_some() {
        errs.push(FieldError::multiple_one_of(
            &format!("{path}.keep"),
            &format!("{path}.keep-since"),
        ));
    }
    if prune.schedule.as_deref().map_or(true, str::is_empty) {
        errs.push(FieldError::missing_field(format!("{path}.schedule")));
    }
    errs
}

/// The event pruner's retention settings.
pub fn validate_global_config(config: &GlobalConfig, path: &str) -> FieldErrors {
    let mut errs = validate_pruner_config(&config.defaults, path);
    let global_ttl = config.defaults.ttl_seconds_after_finished;
    if let Some(ttl) = global_ttl.filter(|t| *t > MAX_TTL_SECONDS_AFTER_FINISHED) {
        errs.push(ttl_too_large(ttl, path));
    }

    for (namespace, ns_config) in &config.namespaces {
        let ns_path = format!("{path}.namespaces[{namespace}]");
        errs.extend(validate_pruner_config(ns_config, &ns_path));

        match (ns_config.ttl_seconds_after_finished, global_ttl) {
            (Some(ttl), Some(max)) if ttl > max => errs.push(
                FieldError::invalid_value(ttl, format!("{ns_path}.ttlSecondsAfterFinished"))
                    .with_details(format!("must not exceed the global value {max}")),
            ),
            (Some(ttl), None) if ttl > MAX_TTL_SECONDS_AFTER_FINISHED => errs.push(ttl_too_large(ttl, &ns_path)),
            _ => {}
        }

        for (field, limit, max) in [
            ("successfulHistoryLimit", ns_config.successful_limit(), config.defaults.successful_limit()),
            ("failedHistoryLimit", ns_config.failed_limit(), config.defaults.failed_limit()),
        ] {
            if let (Some(limit), Some(max)) = (limit, max) {
                if limit > max {
                    errs.push(
                        FieldError::invalid_value(limit, format!("{ns_path}.{field}"))
                            .with_details(format!("must not exceed the global value {max}")),
                    );
                }
            }
        }
    }
    errs
}

fn validate_pruner_config(config: &PrunerConfig, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if let Some(level) = config
        .enforced_config_level
        .as_deref()
        .filter(|l| !is_value_in(&ENFORCED_CONFIG_LEVELS, l))
    {
        errs.push(FieldError::invalid_value(level, format!("{path}.enforcedConfigLevel")));
    }
    if let Some(ttl) = config.ttl_seconds_after_finished.filter(|t| *t < 0) {
        errs.push(FieldError::invalid_value(ttl, format!("{path}.ttlSecondsAfterFinished")));
    }
    for (field, value) in [
        ("successfulHistoryLimit", config.successful_history_limit),
        ("failedHistoryLimit", config.failed_history_limit),
        ("historyLimit", config.history_limit),
    ] {
        if let Some(value) = value.filter(|v| *v < 0) {
            errs.push(
                FieldError::invalid_value(value, format!("{path}.{field}")).with_details("must be non-negative"),
            );
        }
    }
    errs
}

fn ttl_too_large(ttl: i32, path: &str) -> FieldError {
    FieldError::invalid_value(ttl, format!("{path}.ttlSecondsAfterFinished"))
        .with_details(format!("must not exceed {MAX_TTL_SECONDS_AFTER_FINISHED} seconds"))
}
