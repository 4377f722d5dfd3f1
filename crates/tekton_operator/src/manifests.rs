//! Versioned YAML bundles shipped under `KO_DATA_PATH`.
//!
//! Layout: `$KO_DATA_PATH/<component>/<version>/*.yaml`, each file holding one or more
//! `---`-separated documents.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::v1alpha1::ComponentKind;
use crate::util::errors::{Error, Result, StdError};

/// A per-object manifest rewrite.
pub type Transformer = Box<dyn Fn(&mut Value) -> Result<()> + Send + Sync>;

/// An ordered list of Kubernetes objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub resources: Vec<Value>,
}

impl Manifest {
    pub fn new(resources: Vec<Value>) -> Manifest {
        Manifest { resources }
    }

    /// Reads every `.yaml`/`.yml` file of `dir`, in file name order.
    pub fn from_dir(dir: &Path) -> Result<Manifest> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .collect();
        files.sort();

        let mut resources = Vec::new();
        for file in files {
            let text = fs::read_to_string(&file)?;
            let parsed = Manifest::parse(&text)
                .map_err(|e| Error::StdError(StdError::Manifest(format!("{}: {e}", file.display()))))?;
            resources.extend(parsed.resources);
        }
        debug!("loaded {} objects from {}", resources.len(), dir.display());
        Ok(Manifest { resources })
    }

    /// Parses a multi-document YAML stream, dropping empty documents.
    pub fn parse(text: &str) -> Result<Manifest> {
        let mut resources = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)?;
            match value {
                Value::Null => continue,
                Value::Object(_) if value.get("kind").is_some() => resources.push(value),
                _ => {
                    return Err(Error::StdError(StdError::Manifest(
                        "document is not a Kubernetes object".to_string(),
                    )))
                }
            }
        }
        Ok(Manifest { resources })
    }

    /// Objects whose kind is one of `kinds`.
    pub fn filter_kinds(&self, kinds: &[&str]) -> Manifest {
        Manifest {
            resources: self
                .resources
                .iter()
                .filter(|r| r["kind"].as_str().is_some_and(|k| kinds.contains(&k)))
                .cloned()
                .collect(),
        }
    }

    /// Applies `transformers` in order to every object.
    pub fn transform(mut self, transformers: &[Transformer]) -> Result<Manifest> {
        for resource in self.resources.iter_mut() {
            for transformer in transformers {
                transformer(resource)?;
            }
        }
        Ok(self)
    }

    pub fn append(&mut self, other: Manifest) {
        self.resources.extend(other.resources);
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Directory holding every bundled version of `kind`.
pub fn component_dir(ko_data_path: &Path, kind: ComponentKind) -> PathBuf {
    ko_data_path.join(kind.manifest_dir())
}

pub fn bundle_dir(ko_data_path: &Path, kind: ComponentKind, version: &str) -> PathBuf {
    component_dir(ko_data_path, kind).join(version)
}

/// Newest version directory under `dir`, compared numerically (`v0.9.0` < `0.10.0`).
pub fn newest_version(dir: &Path) -> Result<Option<String>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut versions: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    versions.sort_by(|a, b| compare_versions(a, b));
    Ok(versions.pop())
}

/// Orders dotted versions numerically (`v0.9.0` < `0.10.0`); a pre-release sorts before its release.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> (Vec<u64>, Option<String>) {
        let v = v.trim_start_matches('v');
        let (core, pre) = match v.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (v, None),
        };
        (core.split('.').map(|p| p.parse().unwrap_or(0)).collect(), pre)
    };
    let (core_a, pre_a) = split(a);
    let (core_b, pre_b) = split(b);
    core_a.cmp(&core_b).then_with(|| match (pre_a, pre_b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BUNDLE: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: tekton-pipelines
---
# comment only
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: tekton-pipelines-controller
  namespace: tekton-pipelines
spec:
  replicas: 1
"#;

    #[test]
    fn parses_multi_document_streams() {
        let manifest = Manifest::parse(BUNDLE).unwrap();
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.filter_kinds(&["Deployment"]).resources.len(), 1);
        assert!(Manifest::parse("- just\n- a list\n").is_err());
    }

    #[test]
    fn reads_bundles_and_picks_the_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let component = component_dir(dir.path(), ComponentKind::Pipeline);
        for v in ["0.9.2", "0.10.0", "0.10.0-rc1"] {
            fs::create_dir_all(component.join(v)).unwrap();
        }
        fs::write(component.join("0.10.0").join("00-release.yaml"), BUNDLE).unwrap();
        fs::write(component.join("0.10.0").join("README.md"), "ignored").unwrap();

        let newest = newest_version(&component).unwrap();
        assert_eq!(newest.as_deref(), Some("0.10.0"));
        assert_eq!(compare_versions("0.10.0-rc1", "0.10.0"), Ordering::Less);
        assert_eq!(compare_versions("0.10.0", "0.9.2"), Ordering::Greater);
        assert_eq!(compare_versions("v0.68.0", "0.68.0"), Ordering::Equal);

        let manifest = Manifest::from_dir(&bundle_dir(dir.path(), ComponentKind::Pipeline, "0.10.0")).unwrap();
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(newest_version(&dir.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn transformers_run_in_order() {
        let manifest = Manifest::new(vec![json!({"kind": "ConfigMap", "metadata": {"name": "a"}})]);
        let first: Transformer = Box::new(|o| {
            o["data"] = json!({"step": "1"});
            Ok(())
        });
        let second: Transformer = Box::new(|o| {
            o["data"]["step"] = json!("2");
            Ok(())
        });
        let out = manifest.transform(&[first, second]).unwrap();
        assert_eq!(out.resources[0]["data"]["step"], "2");
    }
}
