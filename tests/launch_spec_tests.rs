//! Tests for launch vector resolution: saved argv extraction, placeholder
//! substitution, the no-recursion post-condition, and the remote rewrite.

use std::path::Path;

use respawn::internal::launch::spec::{
    ensure_not_recursive, substitute_tokens, swap_remote_launcher, LaunchSpecResolver, SpecError,
};

fn write_spec(dir: &Path, value: serde_json::Value) {
    std::fs::write(
        dir.join("kernel.json"),
        serde_json::to_string_pretty(&value).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_resolve_uses_saved_argv() {
    let dir = tempfile::tempdir().unwrap();
    write_spec(
        dir.path(),
        serde_json::json!({
            "argv": ["respawn-kernel", "-f", "{connection_file}"],
            "display_name": "Python 3",
            "respawn_original_argv":
                ["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
        }),
    );

    let resolver = LaunchSpecResolver::new(Some(dir.path().to_path_buf()), None);
    let argv = resolver
        .resolve(Path::new("/tmp/kernel-respawn.json"))
        .expect("resolution should succeed");

    assert_eq!(
        argv,
        vec![
            "python",
            "-m",
            "ipykernel_launcher",
            "-f",
            "/tmp/kernel-respawn.json"
        ]
    );
}

#[test]
fn test_resolve_substitutes_resource_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_spec(
        dir.path(),
        serde_json::json!({
            "argv": ["respawn-kernel", "-f", "{connection_file}"],
            "respawn_original_argv": ["kernel-bin", "--home", "{resource_dir}"],
        }),
    );

    let resolver = LaunchSpecResolver::new(Some(dir.path().to_path_buf()), None);
    let argv = resolver.resolve(Path::new("/tmp/cf.json")).unwrap();
    assert_eq!(argv[2], dir.path().to_string_lossy());
}

#[test]
fn test_resolve_without_saved_argv_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_spec(
        dir.path(),
        serde_json::json!({
            "argv": ["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
        }),
    );

    let resolver = LaunchSpecResolver::new(Some(dir.path().to_path_buf()), None);
    let result = resolver.resolve(Path::new("/tmp/cf.json"));
    assert!(matches!(result, Err(SpecError::NotInstalled(_))));
}

#[test]
fn test_resolve_detects_recursive_launch_vector() {
    let dir = tempfile::tempdir().unwrap();
    // An installation bug: the stashed vector still launches the proxy.
    write_spec(
        dir.path(),
        serde_json::json!({
            "argv": ["respawn-kernel", "-f", "{connection_file}"],
            "respawn_original_argv": ["respawn-kernel", "-f", "{connection_file}"],
        }),
    );

    let resolver = LaunchSpecResolver::new(Some(dir.path().to_path_buf()), None);
    let result = resolver.resolve(Path::new("/tmp/cf.json"));
    assert!(matches!(result, Err(SpecError::SelfReferential(_))));
}

#[test]
fn test_resolve_falls_back_when_unconfigured() {
    let resolver = LaunchSpecResolver::new(
        None,
        Some(vec![
            "kernel-bin".to_string(),
            "-f".to_string(),
            "{connection_file}".to_string(),
        ]),
    );
    let argv = resolver.resolve(Path::new("/tmp/cf.json")).unwrap();
    assert_eq!(argv, vec!["kernel-bin", "-f", "/tmp/cf.json"]);
}

#[test]
fn test_resolve_without_any_source_is_an_error() {
    let resolver = LaunchSpecResolver::new(None, None);
    let result = resolver.resolve(Path::new("/tmp/cf.json"));
    assert!(matches!(result, Err(SpecError::NoLaunchSource)));
}

#[test]
fn test_resolve_remote_spec_swaps_launcher_token() {
    let dir = tempfile::tempdir().unwrap();
    write_spec(
        dir.path(),
        serde_json::json!({
            "argv": ["remote_ikernel", "--interface", "ssh", "--kernel_cmd",
                     "python -m respawn-kernel -f {host_connection_file}"],
            "remote_ikernel_argv": ["remote_ikernel", "manage"],
        }),
    );

    let resolver = LaunchSpecResolver::new(Some(dir.path().to_path_buf()), None);
    let argv = resolver.resolve(Path::new("/tmp/cf.json")).unwrap();
    assert_eq!(
        argv[3],
        "python -m ipykernel_launcher -f {host_connection_file}"
    );
    // The surrounding vector is untouched.
    assert_eq!(argv[0], "remote_ikernel");
}

#[test]
fn test_substitute_tokens_only_touches_placeholders() {
    let argv = vec![
        "kernel-bin".to_string(),
        "--connection={connection_file}".to_string(),
        "--plain".to_string(),
    ];
    let out = substitute_tokens(argv, Path::new("/tmp/cf.json"), None);
    assert_eq!(out[1], "--connection=/tmp/cf.json");
    assert_eq!(out[2], "--plain");
}

#[test]
fn test_ensure_not_recursive() {
    assert!(ensure_not_recursive(&["python".to_string(), "-m".to_string()]).is_ok());
    assert!(ensure_not_recursive(&["/usr/bin/respawn-kernel".to_string()]).is_err());
}

#[test]
fn test_swap_remote_launcher_requires_kernel_cmd() {
    let result = swap_remote_launcher(
        vec!["remote_ikernel".to_string(), "manage".to_string()],
        "a",
        "b",
    );
    assert!(matches!(result, Err(SpecError::MalformedRemote)));
}
