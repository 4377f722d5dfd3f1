//! Process configuration read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;

use crate::util::errors::{Error, Result, StdError};

pub const VERSION_ENV: &str = "VERSION";
pub const PLATFORM_ENV: &str = "PLATFORM";
pub const DEFAULT_TARGET_NAMESPACE_ENV: &str = "DEFAULT_TARGET_NAMESPACE";
pub const KO_DATA_PATH_ENV: &str = "KO_DATA_PATH";

pub const DEFAULT_KO_DATA_PATH: &str = "/var/run/ko";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Kubernetes,
    OpenShift,
}

impl Platform {
    /// Anything that is not `openshift` (case-insensitive) is plain Kubernetes.
    pub fn from_env_value(value: Option<&str>) -> Platform {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("openshift") => Platform::OpenShift,
            _ => Platform::Kubernetes,
        }
    }

    pub fn default_target_namespace(&self) -> &'static str {
        match self {
            Platform::Kubernetes => "tekton-pipelines",
            Platform::OpenShift => "openshift-pipelines",
        }
    }

    pub fn is_openshift(&self) -> bool {
        *self == Platform::OpenShift
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Platform::Kubernetes => write!(f, "kubernetes"),
            Platform::OpenShift => write!(f, "openshift"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Operator release; stamped on every object as the release-version label.
    pub version: String,
    pub platform: Platform,
    pub default_target_namespace: String,
    pub ko_data_path: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        Settings::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Settings> {
        let version = lookup(VERSION_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::StdError(StdError::MissingEnv(VERSION_ENV.to_string())))?;
        let platform = Platform::from_env_value(lookup(PLATFORM_ENV).as_deref());
        let default_target_namespace = lookup(DEFAULT_TARGET_NAMESPACE_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| platform.default_target_namespace().to_string());
        let ko_data_path = lookup(KO_DATA_PATH_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_KO_DATA_PATH.to_string());

        Ok(Settings {
            version,
            platform,
            default_target_namespace,
            ko_data_path: PathBuf::from(ko_data_path),
        })
    }

    /// Settings for tests and tools that never touch the environment.
    pub fn new(version: impl Into<String>, platform: Platform) -> Settings {
        Settings {
            version: version.into(),
            platform,
            default_target_namespace: platform.default_target_namespace().to_string(),
            ko_data_path: PathBuf::from(DEFAULT_KO_DATA_PATH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn version_is_mandatory() {
        let err = Settings::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.metric_label(), "missingenv");
    }

    #[test]
    fn platform_drives_the_default_namespace() {
        let env: HashMap<&str, &str> = [("VERSION", "0.68.0"), ("PLATFORM", "OpenShift")].into();
        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.platform, Platform::OpenShift);
        assert_eq!(settings.default_target_namespace, "openshift-pipelines");
        assert_eq!(settings.ko_data_path, PathBuf::from("/var/run/ko"));
    }

    #[test]
    #[serial]
    fn reads_the_process_environment() {
        std::env::set_var(VERSION_ENV, "0.70.1");
        std::env::set_var(DEFAULT_TARGET_NAMESPACE_ENV, "ci");
        std::env::remove_var(PLATFORM_ENV);
        let settings = Settings::from_env().unwrap();
        std::env::remove_var(VERSION_ENV);
        std::env::remove_var(DEFAULT_TARGET_NAMESPACE_ENV);

        assert_eq!(settings.version, "0.70.1");
        assert_eq!(settings.platform, Platform::Kubernetes);
        assert_eq!(settings.default_target_namespace, "ci");
    }
}
