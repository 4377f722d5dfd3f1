use crate::api::v1alpha1::scheduler::{Scheduler, MULTI_CLUSTER_ROLES};

use super::{is_value_in, FieldError, FieldErrors};

pub fn validate_scheduler(scheduler: &Scheduler, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let role = scheduler.multi_cluster.role.as_deref().unwrap_or_default();
    if scheduler.multi_cluster.is_disabled() {
        if !role.is_empty() {
            errs.push(
                FieldError::invalid_value(role, format!("{path}.multi-cluster-role"))
                    .with_details("must be empty when multi-cluster is disabled"),
            );
        }
    } else if !is_value_in(&MULTI_CLUSTER_ROLES, role) {
        errs.push(
            FieldError::invalid_value(role, format!("{path}.multi-cluster-role"))
                .with_details(format!("allowed values: {}", MULTI_CLUSTER_ROLES.join(", "))),
        );
    }
    errs
}
