use crate::api::v1alpha1::AdditionalOptions;

use super::{is_value_in, FieldError, FieldErrors};

pub const FAILURE_POLICIES: [&str; 2] = ["Ignore", "Fail"];
pub const SIDE_EFFECTS: [&str; 4] = ["NoneOnDryRun", "None", "Unknown", "Some"];
pub const MIN_WEBHOOK_TIMEOUT: i32 = 1;
pub const MAX_WEBHOOK_TIMEOUT: i32 = 30;

/// Checks the webhook overrides of an additional options block rooted at `path`.
pub fn validate_options(options: &AdditionalOptions, path: &str) -> FieldErrors {
    let mut errs = FieldErrors::new();
    for (name, webhook) in &options.webhook_configuration_options {
        let path = format!("{path}.webhookConfigurationOptions[{name}]");
        if let Some(policy) = &webhook.failure_policy {
            if !is_value_in(&FAILURE_POLICIES, policy) {
                errs.push(FieldError::invalid_value(policy, format!("{path}.failurePolicy")));
            }
        }
        if let Some(side_effects) = &webhook.side_effects {
            if !is_value_in(&SIDE_EFFECTS, side_effects) {
                errs.push(FieldError::invalid_value(side_effects, format!("{path}.sideEffects")));
            }
        }
        if let Some(timeout) = webhook.timeout_seconds {
            if !(MIN_WEBHOOK_TIMEOUT..=MAX_WEBHOOK_TIMEOUT).contains(&timeout) {
                errs.push(
                    FieldError::invalid_value(timeout, format!("{path}.timeoutSeconds"))
                        .with_details(format!("must be between {MIN_WEBHOOK_TIMEOUT} and {MAX_WEBHOOK_TIMEOUT}")),
                );
            }
        }
    }
    errs
}
