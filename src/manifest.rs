//! Manifest loading: YAML/JSON payloads into [`DynamicDocument`]s
//!
//! Fixtures are usually embedded with `include_str!` and parsed once per
//! process. YAML goes through yaml-rust2 and is converted to
//! `serde_json::Value` so every document has one in-memory representation.

use std::path::Path;

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::document::DynamicDocument;
use crate::{Error, Result};

/// Parse a single manifest (JSON or YAML) into a document.
///
/// For multi-document YAML only the first non-empty document is used; see
/// [`parse_manifests`] for the rest.
pub fn parse_manifest(manifest: &str) -> Result<DynamicDocument> {
    parse_manifests(manifest)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::manifest("manifest contains no documents"))
}

/// Parse every document of a (possibly multi-document) manifest.
///
/// Empty documents between `---` separators are skipped.
pub fn parse_manifests(manifest: &str) -> Result<Vec<DynamicDocument>> {
    let values = if manifest.trim_start().starts_with('{') {
        vec![serde_json::from_str::<Value>(manifest)
            .map_err(|e| Error::manifest(format!("invalid JSON: {}", e)))?]
    } else {
        parse_yaml_multi(manifest)?
    };

    values
        .into_iter()
        .filter(|v| !v.is_null())
        .map(DynamicDocument::from_value)
        .collect()
}

/// Parse a byte payload, e.g. an embedded fixture
pub fn parse_manifest_bytes(bytes: &[u8]) -> Result<DynamicDocument> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::manifest(format!("manifest is not UTF-8: {}", e)))?;
    parse_manifest(text)
}

/// Read and parse every document in a manifest file
pub fn load_manifest_file(path: &Path) -> Result<Vec<DynamicDocument>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::manifest(format!("failed to read {}: {}", path.display(), e)))?;
    parse_manifests(&text)
}

fn parse_yaml_multi(input: &str) -> Result<Vec<Value>> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::manifest(format!("invalid YAML: {}", e)))?;
    docs.into_iter().map(yaml_to_json).collect()
}

fn yaml_to_json(yaml: Yaml) -> Result<Value> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e| Error::manifest(format!("invalid number '{}': {}", s, e)))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(items) => items
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) | Yaml::Real(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(Error::manifest("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::manifest("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::manifest("bad YAML value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    const CLAIM: &str = r#"
apiVersion: dummy.crossplane.io/v1alpha1
kind: Robot
metadata:
  name: test-robot
  namespace: default
spec:
  color: yellow
  replicas: 2
  enabled: true
"#;

    #[test]
    fn parses_a_yaml_claim() {
        let doc = parse_manifest(CLAIM).expect("claim should parse");
        assert_eq!(doc.object_ref().to_string(), "Robot/default/test-robot");
        assert_eq!(doc.value()["spec"]["color"], "yellow");
        assert_eq!(doc.value()["spec"]["replicas"], 2);
        assert_eq!(doc.value()["spec"]["enabled"], true);
    }

    #[test]
    fn parses_json() {
        let doc = parse_manifest(
            r#"{"apiVersion":"pkg.crossplane.io/v1","kind":"Provider","metadata":{"name":"provider-dummy"}}"#,
        )
        .expect("JSON manifest should parse");
        assert_eq!(doc.object_ref().namespace, None);
        assert_eq!(doc.object_ref().kind, "Provider");
    }

    #[test]
    fn parses_multi_document_and_skips_empty_ones() {
        let manifest = r#"
apiVersion: v1
kind: Service
metadata:
  name: server-dummy
  namespace: crossplane-system
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: server-dummy
  namespace: crossplane-system
spec:
  replicas: 1
"#;
        let docs = parse_manifests(manifest).expect("multi-doc should parse");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].object_ref().kind, "Service");
        assert_eq!(docs[1].object_ref().kind, "Deployment");
    }

    #[test]
    fn bytes_must_be_utf8() {
        assert!(parse_manifest_bytes(&[0xff, 0xfe]).is_err());
        let doc = parse_manifest_bytes(CLAIM.as_bytes()).expect("bytes should parse");
        assert_eq!(doc.object_ref().name, "test-robot");
    }

    #[test]
    fn loads_every_document_in_a_file() {
        let path = std::env::temp_dir()
            .join(format!("converge-manifest-{}.yaml", std::process::id()));
        let other = CLAIM.replace("test-robot", "other-robot");
        std::fs::write(&path, format!("{}---\n{}", CLAIM, other))
            .expect("temp manifest should be writable");

        let docs = load_manifest_file(&path).expect("file should load");
        std::fs::remove_file(&path).ok();

        let names: Vec<String> = docs.iter().map(|d| d.object_ref().name).collect();
        assert_eq!(names, vec!["test-robot", "other-robot"]);
        assert!(load_manifest_file(&path).is_err());
    }

    #[test]
    fn rejects_invalid_or_incomplete_manifests() {
        assert!(parse_manifest("not: valid: yaml: {{").is_err());
        assert!(parse_manifest("{not valid json").is_err());
        assert!(parse_manifest("").is_err());

        let err = parse_manifest("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn floats_and_nulls_convert() {
        let doc = parse_manifest(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\ndata:\n  ratio: 1.5\n  empty: null\n",
        )
        .expect("config map should parse");
        let ratio = doc.value()["data"]["ratio"].as_f64().expect("float");
        assert!((ratio - 1.5).abs() < 0.0001);
        assert!(doc.value()["data"]["empty"].is_null());
    }
}
