use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

use crate::validation::FieldErrors;

/// Fixed delay used for every "try again later" outcome.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("IoError: {0}")]
    IoError(#[source] std::io::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("ValidationError: {0}")]
    Validation(FieldErrors),

    #[error("MissingEnv: required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("ManifestError: {0}")]
    Manifest(String),

    #[error("NotFound: {0}")]
    NotFound(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::YamlError(_) => "yamlerror",
            StdError::IoError(_) => "ioerror",
            StdError::KubeError(_) => "kubeerror",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::InvalidArgument(_) => "invalidargument",
            StdError::Validation(_) => "validation",
            StdError::MissingEnv(_) => "missingenv",
            StdError::Manifest(_) => "manifest",
            StdError::NotFound(_) => "notfound",
        }
        .to_string()
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),

    /// The object was mutated and must be observed again before going on.
    #[error("reconcile again and proceed")]
    ReconcileAgain,

    /// A dependency carries a release-version label that differs from the running operator.
    #[error("dependency upgrade pending")]
    DependencyUpgradePending,
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
            Error::ReconcileAgain => "reconcileagain".to_string(),
            Error::DependencyUpgradePending => "dependencyupgradepending".to_string(),
        }
    }

    /// Sentinels and explicit requeues carry their own delay; hard failures do not.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::ReconcileAgain | Error::DependencyUpgradePending => Some(REQUEUE_DELAY),
            Error::ErrorWithRequeue(e) => Some(e.duration),
            Error::StdError(_) => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Error::ReconcileAgain | Error::DependencyUpgradePending)
    }

    pub fn requeue(error: StdError) -> Self {
        Error::ErrorWithRequeue(ErrorWithRequeue::new(error, REQUEUE_DELAY))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::KubeError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StdError(StdError::JsonSerializationError(e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::StdError(StdError::YamlError(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StdError(StdError::IoError(e))
    }
}

impl From<FieldErrors> for Error {
    fn from(e: FieldErrors) -> Self {
        Error::StdError(StdError::Validation(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_requeue_after_fixed_delay() {
        assert_eq!(Error::ReconcileAgain.requeue_after(), Some(REQUEUE_DELAY));
        assert_eq!(Error::DependencyUpgradePending.requeue_after(), Some(REQUEUE_DELAY));
        assert!(Error::ReconcileAgain.is_sentinel());

        let hard = Error::StdError(StdError::InvalidArgument("bad".into()));
        assert_eq!(hard.requeue_after(), None);
        assert!(!hard.is_sentinel());
        assert_eq!(hard.metric_label(), "invalidargument");
    }

    #[test]
    fn error_with_requeue_keeps_its_duration() {
        let e = Error::ErrorWithRequeue(ErrorWithRequeue::new(
            StdError::MetadataMissing("name".into()),
            Duration::from_secs(42),
        ));
        assert_eq!(e.requeue_after(), Some(Duration::from_secs(42)));
        assert_eq!(e.to_string(), "Error With Requeue: MetadataMissing: name");
    }
}
