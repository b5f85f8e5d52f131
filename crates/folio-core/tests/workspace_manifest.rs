//! Every workspace crate inherits the workspace version.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn manifest(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path.join("Cargo.toml")).unwrap();
    raw.parse().unwrap()
}

#[test]
fn members_inherit_workspace_version() {
    let root = workspace_root();
    let doc = manifest(&root);
    let members = doc["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let krate = manifest(&root.join(member));
        let inherited = krate["package"]["version"]
            .get("workspace")
            .and_then(toml::Value::as_bool);
        assert_eq!(
            inherited,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let doc = manifest(&workspace_root());
    let version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));
    assert_eq!(version, folio_core::VERSION);

    let pinned = doc["workspace"]["dependencies"]["folio-core"]["version"]
        .as_str()
        .unwrap();
    assert_eq!(pinned, version);
}
