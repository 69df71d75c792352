//! Addon manifest assembly
//!
//! Loads a directory of templated manifests, renders each file against the
//! cluster description, splits the output into single documents, labels every
//! resource with [`ADDON_LABEL`] and combines the result into one
//! multi-document stream suitable for `kubectl apply --prune`.

use crate::BootstrapError;
use crate::template::{TemplateRenderer, TemplateVars};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Label put on every addon-managed resource, scoping prune to addons
pub const ADDON_LABEL: &str = "clusterboot.io/addon";

/// YAML document separator
pub const DOCUMENT_SEPARATOR: &str = "---";

/// One decoded resource document
#[derive(Debug, Clone, PartialEq)]
pub struct RawResourceDocument {
    object: Mapping,
    raw_len: usize,
}

impl RawResourceDocument {
    /// Decode one YAML or JSON document.
    ///
    /// Returns `Ok(None)` for documents that hold nothing but comments or
    /// whitespace. `metadata` and `metadata.labels` must be mappings when
    /// present.
    pub fn decode(source: &str) -> Result<Option<Self>, BootstrapError> {
        if is_blank_document(source) {
            return Ok(None);
        }

        match serde_yaml::from_str::<Value>(source)? {
            Value::Null => Ok(None),
            Value::Mapping(object) => {
                check_metadata(&object)?;
                Ok(Some(Self {
                    object,
                    raw_len: source.len(),
                }))
            }
            other => Err(BootstrapError::Manifest(format!(
                "expected a mapping, found {}",
                value_kind(&other)
            ))),
        }
    }

    /// Byte length of the source this document was decoded from
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// The whole document
    pub fn object(&self) -> &Mapping {
        &self.object
    }

    pub fn kind(&self) -> Option<&str> {
        self.object.get("kind").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
    }

    fn metadata(&self) -> Option<&Mapping> {
        self.object.get("metadata").and_then(Value::as_mapping)
    }

    /// Current `metadata.labels`, empty when absent
    pub fn labels(&self) -> Result<Mapping, BootstrapError> {
        match self.metadata().and_then(|m| m.get("labels")) {
            None | Some(Value::Null) => Ok(Mapping::new()),
            Some(Value::Mapping(labels)) => Ok(labels.clone()),
            Some(other) => Err(BootstrapError::Manifest(format!(
                "metadata.labels is a {}, expected a mapping",
                value_kind(other)
            ))),
        }
    }

    /// Replace `metadata.labels`, creating `metadata` if needed
    pub fn set_labels(&mut self, labels: Mapping) -> Result<(), BootstrapError> {
        let metadata = self
            .object
            .entry(Value::from("metadata"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));

        if metadata.is_null() {
            *metadata = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(metadata) = metadata else {
            return Err(BootstrapError::Manifest(
                "metadata is not a mapping".to_string(),
            ));
        };

        metadata.insert(Value::from("labels"), Value::Mapping(labels));
        Ok(())
    }

    /// Set `key` to an empty value, keeping every other label
    pub fn ensure_label(&mut self, key: &str) -> Result<(), BootstrapError> {
        let mut labels = self.labels()?;
        labels.insert(Value::from(key), Value::from(""));
        self.set_labels(labels)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String, BootstrapError> {
        Ok(serde_yaml::to_string(&self.object)?)
    }
}

fn check_metadata(object: &Mapping) -> Result<(), BootstrapError> {
    let metadata = match object.get("metadata") {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Mapping(metadata)) => metadata,
        Some(other) => {
            return Err(BootstrapError::Manifest(format!(
                "metadata is a {}, expected a mapping",
                value_kind(other)
            )));
        }
    };

    match metadata.get("labels") {
        None | Some(Value::Null) | Some(Value::Mapping(_)) => Ok(()),
        Some(other) => Err(BootstrapError::Manifest(format!(
            "metadata.labels is a {}, expected a mapping",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// True if the document has no content besides comments and whitespace
fn is_blank_document(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

/// Split a multi-document stream on `---` separator lines.
///
/// A separator is a line starting with `---` followed only by whitespace.
/// Empty documents are kept; callers decide what to drop.
pub fn split_documents(stream: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in stream.split_inclusive('\n') {
        let is_separator = line
            .strip_prefix(DOCUMENT_SEPARATOR)
            .is_some_and(|rest| rest.trim().is_empty());

        if is_separator {
            documents.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
        }
    }
    documents.push(current);

    documents
}

/// Load, render and decode every manifest in `dir`.
///
/// Files are processed in file-name order. Sub-directories and files that
/// render to whitespace are skipped.
pub async fn load_addons_manifests(
    dir: impl AsRef<Path>,
    verbose: bool,
    vars: &TemplateVars<'_>,
) -> Result<Vec<RawResourceDocument>, BootstrapError> {
    let dir = dir.as_ref();
    let read_err = |source| BootstrapError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(dir).await.map_err(read_err)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(read_err)? {
        entries.push(entry);
    }
    entries.sort_by_key(|e| e.file_name());

    let renderer = TemplateRenderer::with_vars(vars);
    let mut manifests = Vec::new();

    for entry in entries {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        let metadata = fs::metadata(&path)
            .await
            .map_err(|source| BootstrapError::Read {
                path: path.clone(),
                source,
            })?;
        if metadata.is_dir() {
            info!("Found directory '{}' in the addons path. Ignoring.", file_name);
            continue;
        }
        if verbose {
            info!("Parsing addons manifest '{}'", file_name);
        } else {
            debug!("Parsing addons manifest '{}'", file_name);
        }

        let source = fs::read_to_string(&path)
            .await
            .map_err(|source| BootstrapError::Read {
                path: path.clone(),
                source,
            })?;

        let rendered = renderer
            .render(&file_name, &source)
            .map_err(|e| BootstrapError::template(&file_name, e))?;

        if rendered.trim().is_empty() {
            info!(
                "Addons manifest '{}' is empty after parsing. Skipping.",
                file_name
            );
            continue;
        }

        manifests.extend(decode_stream(&file_name, &rendered)?);
    }

    Ok(manifests)
}

/// Decode every non-empty document of a rendered file
pub fn decode_stream(
    file_name: &str,
    rendered: &str,
) -> Result<Vec<RawResourceDocument>, BootstrapError> {
    let mut documents = Vec::new();
    for document in split_documents(rendered) {
        if let Some(doc) =
            RawResourceDocument::decode(&document).map_err(|e| BootstrapError::decode(file_name, e))?
        {
            documents.push(doc);
        }
    }
    Ok(documents)
}

/// Put [`ADDON_LABEL`] on every document and serialize it back to YAML
pub fn ensure_addons_labels(
    documents: Vec<RawResourceDocument>,
) -> Result<Vec<String>, BootstrapError> {
    documents
        .into_iter()
        .map(|mut doc| {
            doc.ensure_label(ADDON_LABEL)?;
            doc.to_yaml()
        })
        .collect()
}

/// Combine documents into one stream separated by `---` lines
pub fn combine_manifests<S: AsRef<str>>(documents: &[S]) -> String {
    let parts: Vec<&str> = documents
        .iter()
        .map(|d| d.as_ref().trim_end_matches('\n').trim())
        .collect();

    let mut combined = parts.join(&format!("\n{}\n", DOCUMENT_SEPARATOR));
    combined.push('\n');
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(source: &str) -> RawResourceDocument {
        RawResourceDocument::decode(source).unwrap().unwrap()
    }

    #[test]
    fn test_split_documents() {
        let docs = split_documents("a: 1\n---\nb: 2\n--- \nc: 3\n");
        assert_eq!(docs, vec!["a: 1\n", "b: 2\n", "c: 3\n"]);
    }

    #[test]
    fn test_split_keeps_non_separator_dashes() {
        let docs = split_documents("a: ---x\n----- not a separator? no\n");
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_split_leading_separator() {
        let docs = split_documents("---\na: 1\n");
        assert_eq!(docs, vec!["", "a: 1\n"]);
    }

    #[test]
    fn test_decode_comment_only() {
        assert!(RawResourceDocument::decode("# just a comment\n\n# another\n")
            .unwrap()
            .is_none());
        assert!(RawResourceDocument::decode("   \n").unwrap().is_none());
    }

    #[test]
    fn test_decode_json_document() {
        let doc = decode(r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}}"#);
        assert_eq!(doc.kind(), Some("ConfigMap"));
        assert_eq!(doc.name(), Some("cm"));
    }

    #[test]
    fn test_decode_rejects_scalar() {
        let err = RawResourceDocument::decode("just a string").unwrap_err();
        assert!(err.to_string().contains("expected a mapping, found string"));
    }

    #[test]
    fn test_decode_records_length() {
        let source = "kind: Namespace\n";
        assert_eq!(decode(source).raw_len(), source.len());
    }

    #[test]
    fn test_ensure_label_without_metadata() {
        let mut doc = decode("kind: Namespace\n");
        doc.ensure_label(ADDON_LABEL).unwrap();

        let labels = doc.labels().unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get(ADDON_LABEL), Some(&Value::from("")));
    }

    #[test]
    fn test_ensure_label_keeps_existing() {
        let mut doc = decode(
            "kind: Service\nmetadata:\n  name: dns\n  labels:\n    app: dns\n    tier: core\n",
        );
        doc.ensure_label(ADDON_LABEL).unwrap();

        let labels = doc.labels().unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get("app"), Some(&Value::from("dns")));
        assert_eq!(labels.get("tier"), Some(&Value::from("core")));
        assert_eq!(doc.name(), Some("dns"));
    }

    #[test]
    fn test_ensure_label_idempotent() {
        let mut doc = decode("kind: Pod\nmetadata:\n  labels:\n    app: x\n");
        doc.ensure_label(ADDON_LABEL).unwrap();
        let once = doc.labels().unwrap();
        doc.ensure_label(ADDON_LABEL).unwrap();
        let twice = doc.labels().unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_ensure_label_overrides_existing_value() {
        let mut doc = decode("kind: Pod\nmetadata:\n  labels:\n    clusterboot.io/addon: \"yes\"\n");
        doc.ensure_label(ADDON_LABEL).unwrap();
        assert_eq!(
            doc.labels().unwrap().get(ADDON_LABEL),
            Some(&Value::from(""))
        );
    }

    #[test]
    fn test_null_labels_treated_as_empty() {
        let mut doc = decode("kind: Pod\nmetadata:\n  labels:\n");
        doc.ensure_label(ADDON_LABEL).unwrap();
        assert_eq!(doc.labels().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_labels_rejected_on_decode() {
        let err = RawResourceDocument::decode("kind: Pod\nmetadata:\n  labels: [a, b]\n").unwrap_err();
        assert!(err.to_string().contains("metadata.labels is a sequence"));

        let err = RawResourceDocument::decode("kind: Pod\nmetadata: pod\n").unwrap_err();
        assert!(err.to_string().contains("metadata is a string"));
    }

    #[test]
    fn test_decode_stream_names_file_for_bad_labels() {
        let err = decode_stream("labels.yaml", "kind: A\n---\nkind: B\nmetadata:\n  labels: x\n")
            .unwrap_err();
        match err {
            BootstrapError::Decode { file, message } => {
                assert_eq!(file, "labels.yaml");
                assert!(message.contains("metadata.labels is a string"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_labelled_yaml_reparses() {
        let labelled = ensure_addons_labels(vec![decode("kind: Namespace\nmetadata:\n  name: x\n")])
            .unwrap();
        assert_eq!(labelled.len(), 1);

        let reparsed = decode(&labelled[0]);
        assert_eq!(reparsed.name(), Some("x"));
        assert!(reparsed.labels().unwrap().contains_key(ADDON_LABEL));
        assert!(!labelled[0].starts_with(DOCUMENT_SEPARATOR));
    }

    #[test]
    fn test_combine_manifests() {
        let combined = combine_manifests(&["a: 1\n", "  b: 2\n\n", "c: 3"]);
        assert_eq!(combined, "a: 1\n---\nb: 2\n---\nc: 3\n");
    }

    #[test]
    fn test_combine_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(combine_manifests(&empty), "\n");
    }

    #[test]
    fn test_combine_round_trip() {
        let docs = vec![
            "kind: Namespace\nmetadata:\n  name: a\n".to_string(),
            "kind: ConfigMap\ndata:\n  key: value\n".to_string(),
            "kind: Secret\n".to_string(),
        ];
        let combined = combine_manifests(&docs);

        let split: Vec<String> = split_documents(&combined)
            .into_iter()
            .filter(|d| !d.trim().is_empty())
            .collect();

        assert_eq!(split.len(), docs.len());
        for (original, parsed) in docs.iter().zip(&split) {
            assert_eq!(original.trim(), parsed.trim());
        }
    }

    fn assert_round_trip(docs: &[String]) {
        let combined = combine_manifests(docs);
        let split = split_documents(&combined);

        assert_eq!(split.len(), docs.len());
        for (original, parsed) in docs.iter().zip(&split) {
            assert_eq!(original.trim(), parsed.trim());
        }
    }

    #[test]
    fn test_combine_round_trip_single_document() {
        assert_round_trip(&["kind: Namespace\nmetadata:\n  name: only\n".to_string()]);
    }

    #[test]
    fn test_combine_round_trip_blank_lines_and_comments() {
        assert_round_trip(&[
            "# leading comment\nkind: ConfigMap\n\ndata:\n  # inline comment\n  key: value\n\n  other: x\n"
                .to_string(),
            "kind: Secret\n\n\nstringData:\n  a: |\n    line one\n\n    line three\n".to_string(),
        ]);
    }

    #[test]
    fn test_combine_round_trip_labelled_documents() {
        let labelled = ensure_addons_labels(vec![
            decode("kind: Namespace\nmetadata:\n  name: a\n"),
            decode("kind: Pod\nmetadata:\n  name: b\n  labels:\n    app: b\n"),
            decode("kind: ConfigMap\n"),
        ])
        .unwrap();
        assert_round_trip(&labelled);

        let combined = combine_manifests(&labelled);
        let reparsed = decode_stream("combined", &combined).unwrap();
        assert_eq!(reparsed.len(), 3);
        for doc in &reparsed {
            assert!(doc.labels().unwrap().contains_key(ADDON_LABEL));
        }
        assert_eq!(reparsed[1].labels().unwrap().get("app"), Some(&Value::from("b")));
    }

    #[test]
    fn test_decode_stream_names_file() {
        let err = decode_stream("broken.yaml", "a: 1\n---\n: : [\n").unwrap_err();
        match err {
            BootstrapError::Decode { file, .. } => assert_eq!(file, "broken.yaml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_stream_skips_comment_documents() {
        let docs = decode_stream("f", "# header\n---\nkind: A\n---\n# trailer\n").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind(), Some("A"));
    }
}
