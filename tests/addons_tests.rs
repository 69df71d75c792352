//! Integration tests for addon manifest loading using tempfile directories

use clusterboot::BootstrapError;
use clusterboot::addons::{
    ADDON_LABEL, build_addons_manifest, combine_manifests, ensure_addons_labels,
    load_addons_manifests, split_documents,
};
use clusterboot::config::ClusterConfig;
use clusterboot::template::TemplateVars;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cluster(addons: &Path) -> ClusterConfig {
    let mut cluster = ClusterConfig::from_yaml(
        r#"
name: demo
versions:
  kubernetes: "1.13.5"
hosts:
  - public_address: 10.0.0.1
  - public_address: 10.0.0.2
"#,
    )
    .unwrap();
    cluster.addons.enable = true;
    cluster.addons.path = addons.to_path_buf();
    cluster
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn test_templates_see_cluster() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "cm.yaml",
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ Cluster.name }}-info
data:
  version: "{{ Cluster.versions.kubernetes }}"
  hosts: "{% for h in Cluster.hosts %}{{ h.public_address }} {% endfor %}"
"#,
    );
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name(), Some("demo-info"));
    let data = &docs[0].object()["data"];
    assert_eq!(data["version"], "1.13.5");
    assert_eq!(data["hosts"], "10.0.0.1 10.0.0.2 ");
}

#[tokio::test]
async fn test_files_loaded_in_name_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b.yaml", "kind: B\nmetadata:\n  name: b\n");
    write(
        dir.path(),
        "a.yaml",
        "kind: A1\nmetadata:\n  name: a1\n---\nkind: A2\nmetadata:\n  name: a2\n",
    );
    write(dir.path(), "c.json", r#"{"kind": "C", "metadata": {"name": "c"}}"#);
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), true, &TemplateVars::new(&cluster))
        .await
        .unwrap();

    let kinds: Vec<_> = docs.iter().map(|d| d.kind().unwrap().to_string()).collect();
    assert_eq!(kinds, vec!["A1", "A2", "B", "C"]);
}

#[tokio::test]
async fn test_empty_template_skipped() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "optional.yaml",
        "{% if Cluster.name == \"other\" %}kind: Never\n{% endif %}\n",
    );
    write(dir.path(), "real.yaml", "kind: Real\n");
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].kind(), Some("Real"));
}

#[tokio::test]
async fn test_subdirectories_ignored() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    write(&dir.path().join("nested"), "hidden.yaml", "kind: Hidden\n");
    write(dir.path(), "top.yaml", "kind: Top\n");
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].kind(), Some("Top"));
}

#[tokio::test]
async fn test_comment_only_documents_skipped() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "mixed.yaml",
        "# header comment\n---\nkind: One\n---\n# trailing\n",
    );
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_undefined_variable_names_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.yaml", "kind: {{ Cluster.no_such_field }}\n");
    let cluster = cluster(dir.path());

    let err = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap_err();

    match err {
        BootstrapError::Template { file, .. } => assert_eq!(file, "broken.yaml"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_invalid_yaml_names_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "ok.yaml", "kind: Fine\n");
    write(dir.path(), "bad.yaml", "kind: [unclosed\n");
    let cluster = cluster(dir.path());

    let err = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Decode { ref file, .. } if file == "bad.yaml"));
}

#[tokio::test]
async fn test_non_mapping_labels_name_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.yaml", "kind: Fine\n");
    write(
        dir.path(),
        "bad-labels.yaml",
        "kind: Pod\nmetadata:\n  labels: [x, y]\n",
    );
    let cluster = cluster(dir.path());

    let err = build_addons_manifest(&cluster, false).await.unwrap_err();

    assert!(err.to_string().contains("bad-labels.yaml"));
    assert!(matches!(err, BootstrapError::Decode { ref file, .. } if file == "bad-labels.yaml"));
}

#[tokio::test]
async fn test_scalar_metadata_names_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "scalar.yaml", "kind: Pod\nmetadata: oops\n");
    let cluster = cluster(dir.path());

    let err = build_addons_manifest(&cluster, false).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Decode { ref file, .. } if file == "scalar.yaml"));
}

#[tokio::test]
async fn test_missing_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    let cluster = cluster(&missing);

    let err = load_addons_manifests(&missing, false, &TemplateVars::new(&cluster))
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Read { .. }));
}

// ============================================================================
// Labelling and combining
// ============================================================================

#[tokio::test]
async fn test_combined_manifest_is_labelled() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "one.yaml",
        "kind: One\nmetadata:\n  name: one\n  labels:\n    app: x\n",
    );
    write(dir.path(), "two.yaml", "kind: Two\n");
    let cluster = cluster(dir.path());

    let combined = build_addons_manifest(&cluster, false).await.unwrap();
    assert!(combined.ends_with('\n'));

    let docs: Vec<serde_yaml::Value> = split_documents(&combined)
        .iter()
        .map(|d| serde_yaml::from_str(d).unwrap())
        .collect();
    assert_eq!(docs.len(), 2);
    for doc in &docs {
        assert_eq!(doc["metadata"]["labels"][ADDON_LABEL], "");
    }
    assert_eq!(docs[0]["metadata"]["labels"]["app"], "x");
}

#[tokio::test]
async fn test_empty_directory_combines_to_empty_manifest() {
    let dir = TempDir::new().unwrap();
    let cluster = cluster(dir.path());

    let docs = load_addons_manifests(dir.path(), false, &TemplateVars::new(&cluster))
        .await
        .unwrap();
    let labelled = ensure_addons_labels(docs).unwrap();

    assert_eq!(combine_manifests(&labelled), "\n");
}
