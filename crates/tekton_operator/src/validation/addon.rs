use crate::api::v1alpha1::addon::{
    Addon, ADDON_PARAMS, CLUSTER_TASKS_PARAM, COMMUNITY_CLUSTER_TASKS_PARAM, PIPELINE_TEMPLATES_PARAM,
};

use super::{is_value_in, FieldError, FieldErrors};

pub fn validate_addon(addon: &Addon, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    for (i, param) in addon.params.iter().enumerate() {
        match ADDON_PARAMS.iter().find(|(name, _, _)| *name == param.name) {
            None => errs.push(FieldError::invalid_array_value(&param.name, &format!("{path}.params"), i)),
            Some((_, allowed, _)) if !is_value_in(allowed, &param.value) => errs.push(
                FieldError::invalid_value(&param.value, format!("{path}.params[{}]", param.name))
                    .with_details(format!("allowed values: {}", allowed.join(", "))),
            ),
            Some(_) => {}
        }
    }

    if addon.param(CLUSTER_TASKS_PARAM) == Some("false") {
        for dependent in [PIPELINE_TEMPLATES_PARAM, COMMUNITY_CLUSTER_TASKS_PARAM] {
            if addon.param(dependent) == Some("true") {
                errs.push(
                    FieldError::invalid_value("true", format!("{path}.params[{dependent}]"))
                        .with_details(format!("{dependent} cannot be true if {CLUSTER_TASKS_PARAM} is false")),
                );
            }
        }
    }
    errs
}
