use crate::api::v1alpha1::pipeline::{
    PipelinePerformanceProperties, PipelineProperties, ALLOWED_API_FIELDS, ALLOWED_NO_MATCH_POLICIES,
    MAX_RESULT_SIZE_LIMIT,
};
use crate::api::v1alpha1::trigger::TriggersProperties;

use super::{is_value_in, FieldError, FieldErrors};

pub const MIN_BUCKETS: u32 = 1;
pub const MAX_BUCKETS: u32 = 10;

pub fn validate_pipeline(p: &PipelineProperties, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if let Some(fields) = &p.enable_api_fields {
        if !is_value_in(&ALLOWED_API_FIELDS, fields) {
            errs.push(FieldError::invalid_value(fields, format!("{path}.enable-api-fields")));
        }
    }
    if p.default_timeout_minutes == Some(0) {
        errs.push(FieldError::invalid_value(0, format!("{path}.default-timeout-minutes")));
    }
    if let Some(policy) = &p.verification_no_match_policy {
        if !is_value_in(&ALLOWED_NO_MATCH_POLICIES, policy) {
            errs.push(FieldError::invalid_value(
                policy,
                format!("{path}.trusted-resources-verification-no-match-policy"),
            ));
        }
    }
    if let Some(size) = p.max_result_size {
        if size >= MAX_RESULT_SIZE_LIMIT {
            errs.push(
                FieldError::invalid_value(size, format!("{path}.max-result-size"))
                    .with_details(format!("must be less than {MAX_RESULT_SIZE_LIMIT}")),
            );
        }
    }
    errs.also(validate_performance(&p.performance, &format!("{path}.performance")))
}

pub fn validate_performance(p: &PipelinePerformanceProperties, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if let Some(buckets) = p.buckets {
        if !(MIN_BUCKETS..=MAX_BUCKETS).contains(&buckets) {
            errs.push(
                FieldError::invalid_value(buckets, format!("{path}.buckets"))
                    .with_details(format!("must be between {MIN_BUCKETS} and {MAX_BUCKETS}")),
            );
        }
    }
    if p.statefulset_ordinals == Some(true) {
        match p.buckets {
            None => errs.push(FieldError::missing_field(format!("{path}.buckets"))),
            Some(buckets) if p.replicas != Some(buckets) => errs.push(
                FieldError::invalid_value(p.replicas.unwrap_or(0), format!("{path}.replicas"))
                    .with_details("must equal buckets when statefulset-ordinals is true"),
            ),
            Some(_) => {}
        }
    }
    errs
}

pub fn validate_trigger(t: &TriggersProperties, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if let Some(fields) = &t.enable_api_fields {
        if !is_value_in(&ALLOWED_API_FIELDS, fields) {
            errs.push(FieldError::invalid_value(fields, format!("{path}.enable-api-fields")));
        }
    }
    errs
}
