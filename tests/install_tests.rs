//! Tests for the kernelspec install/remove rewrite and status classification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use respawn::internal::launch::install::{
    classify_all, install_on, remove_from, status_of, InstallStatus,
};
use respawn::internal::launch::spec::KernelSpecRecord;

fn make_spec(root: &Path, name: &str, value: serde_json::Value) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("kernel.json"),
        serde_json::to_string_pretty(&value).unwrap(),
    )
    .unwrap();
    dir
}

fn plain_spec() -> serde_json::Value {
    serde_json::json!({
        "argv": ["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
        "display_name": "Python 3",
        "language": "python",
        "metadata": { "debugger": true },
    })
}

#[test]
fn test_install_stashes_original_argv() {
    let root = tempfile::tempdir().unwrap();
    let dir = make_spec(root.path(), "python3", plain_spec());
    let mut specs = BTreeMap::new();
    specs.insert("python3".to_string(), dir.clone());

    install_on("python3", &specs).expect("install should succeed");

    let record = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(status_of(&record), InstallStatus::Installed);
    assert_eq!(record.argv[0], "respawn-kernel");
    assert!(record.argv.contains(&"{connection_file}".to_string()));
    assert!(record.argv.contains(&"{resource_dir}".to_string()));
    assert_eq!(
        record.original_argv.as_deref().unwrap()[..2],
        ["python".to_string(), "-m".to_string()]
    );
    // Fields the rewrite does not own are preserved.
    assert_eq!(record.display_name.as_deref(), Some("Python 3"));
    assert_eq!(record.extra["metadata"]["debugger"], true);
}

#[test]
fn test_remove_restores_original_argv() {
    let root = tempfile::tempdir().unwrap();
    let dir = make_spec(root.path(), "python3", plain_spec());
    let mut specs = BTreeMap::new();
    specs.insert("python3".to_string(), dir.clone());

    install_on("python3", &specs).unwrap();
    remove_from("python3", &specs).unwrap();

    let record = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(status_of(&record), InstallStatus::Installable);
    assert_eq!(
        record.argv,
        vec!["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"]
    );
    assert!(record.original_argv.is_none());
}

#[test]
fn test_install_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let dir = make_spec(root.path(), "python3", plain_spec());
    let mut specs = BTreeMap::new();
    specs.insert("python3".to_string(), dir.clone());

    install_on("python3", &specs).unwrap();
    let first = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();

    // A second install finds the spec already installed and leaves it alone.
    install_on("python3", &specs).unwrap();
    let second = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(first.argv, second.argv);
    assert_eq!(first.original_argv, second.original_argv);
}

#[test]
fn test_remote_spec_install_and_remove() {
    let root = tempfile::tempdir().unwrap();
    let dir = make_spec(
        root.path(),
        "remote",
        serde_json::json!({
            "argv": ["remote_ikernel", "--interface", "ssh", "--kernel_cmd",
                     "python -m ipykernel_launcher -f {host_connection_file}"],
            "display_name": "Remote Python",
            "remote_ikernel_argv": ["remote_ikernel", "manage"],
        }),
    );
    let mut specs = BTreeMap::new();
    specs.insert("remote".to_string(), dir.clone());

    install_on("remote", &specs).unwrap();
    let record = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(status_of(&record), InstallStatus::RemoteInstalled);
    assert!(record.argv[3].contains("respawn-kernel"));
    assert!(record.original_argv.is_none(), "remote rewrite keeps no stash");

    remove_from("remote", &specs).unwrap();
    let record = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(status_of(&record), InstallStatus::Installable);
    assert!(record.argv[3].contains("ipykernel_launcher"));
}

#[test]
fn test_unknown_spec_layout_is_left_alone() {
    let root = tempfile::tempdir().unwrap();
    // Has the stash key but argv does not launch the proxy: some other tool
    // has been here.
    let dir = make_spec(
        root.path(),
        "odd",
        serde_json::json!({
            "argv": ["something-else", "-f", "{connection_file}"],
            "respawn_original_argv": ["python", "-m", "ipykernel_launcher"],
        }),
    );
    let mut specs = BTreeMap::new();
    specs.insert("odd".to_string(), dir.clone());

    let record = KernelSpecRecord::load(&dir.join("kernel.json")).unwrap();
    assert_eq!(status_of(&record), InstallStatus::Unknown);

    let before = std::fs::read_to_string(dir.join("kernel.json")).unwrap();
    install_on("odd", &specs).unwrap();
    remove_from("odd", &specs).unwrap();
    let after = std::fs::read_to_string(dir.join("kernel.json")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_classify_all_groups_by_status() {
    let root = tempfile::tempdir().unwrap();
    let plain = make_spec(root.path(), "plain", plain_spec());
    let mut specs = BTreeMap::new();
    specs.insert("plain".to_string(), plain);

    let classified = classify_all(&specs);
    assert_eq!(classified.len(), 1);
    assert_eq!(classified[0].0, "plain");
    assert_eq!(classified[0].1, InstallStatus::Installable);
}

#[test]
fn test_install_unknown_name_is_an_error() {
    let specs = BTreeMap::new();
    assert!(install_on("missing", &specs).is_err());
}
