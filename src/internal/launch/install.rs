use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::internal::launch::spec::{
    swap_remote_launcher, KernelSpecRecord, SpecError, CONNECTION_FILE_TOKEN, NAME, REAL_LAUNCHER,
    RESOURCE_DIR_TOKEN,
};

/// Install state of a kernelspec with respect to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// argv launches the proxy and the original vector is stashed.
    Installed,
    /// A plain spec the proxy can be installed on.
    Installable,
    /// A remote-ikernel spec whose kernel_cmd launches the proxy.
    RemoteInstalled,
    /// Unrecognized layout; leave it alone.
    Unknown,
}

/// The argv written into a kernelspec when the proxy is installed on it. The
/// placeholders are substituted by the launching frontend; the literal
/// resource dir is carried as a fallback for frontends that do not.
pub fn proxy_command(resource_dir: &Path) -> Vec<String> {
    vec![
        NAME.to_string(),
        "-f".to_string(),
        CONNECTION_FILE_TOKEN.to_string(),
        "--resource-dir".to_string(),
        RESOURCE_DIR_TOKEN.to_string(),
        "--resource-dir-fallback".to_string(),
        resource_dir.to_string_lossy().into_owned(),
    ]
}

/// Classify a kernelspec record without modifying it.
pub fn status_of(record: &KernelSpecRecord) -> InstallStatus {
    if record.is_remote() {
        let Some(cmd) = remote_kernel_cmd(record) else {
            return InstallStatus::Unknown;
        };
        if cmd.split(' ').any(|word| word == NAME) {
            return InstallStatus::RemoteInstalled;
        }
        if cmd.split(' ').any(|word| word == REAL_LAUNCHER) {
            return InstallStatus::Installable;
        }
        return InstallStatus::Unknown;
    }
    match &record.original_argv {
        Some(_) => {
            if record.argv.iter().any(|arg| arg.contains(NAME)) {
                InstallStatus::Installed
            } else {
                InstallStatus::Unknown
            }
        }
        None => InstallStatus::Installable,
    }
}

fn remote_kernel_cmd(record: &KernelSpecRecord) -> Option<&str> {
    let flag = record.argv.iter().position(|arg| arg == "--kernel_cmd")?;
    record.argv.get(flag + 1).map(|s| s.as_str())
}

/// Rewrite one kernelspec so the frontend launches the proxy. The original
/// argv is stashed under the reserved key so both the resolver and a later
/// `remove` can recover it.
pub fn install_on(name: &str, specs: &BTreeMap<String, PathBuf>) -> Result<(), SpecError> {
    let dir = specs
        .get(name)
        .ok_or_else(|| SpecError::UnknownSpec(name.to_string()))?;
    let path = dir.join("kernel.json");
    let mut record = KernelSpecRecord::load(&path)?;
    if status_of(&record) != InstallStatus::Installable {
        println!("not installable on {}", name);
        return Ok(());
    }
    if record.is_remote() {
        record.argv = swap_remote_launcher(record.argv, REAL_LAUNCHER, NAME)?;
    } else {
        record.original_argv = Some(record.argv.clone());
        record.argv = proxy_command(dir);
    }
    record.save(&path)
}

/// Undo `install_on`, restoring the stashed argv (or swapping the remote
/// launcher token back).
pub fn remove_from(name: &str, specs: &BTreeMap<String, PathBuf>) -> Result<(), SpecError> {
    let dir = specs
        .get(name)
        .ok_or_else(|| SpecError::UnknownSpec(name.to_string()))?;
    let path = dir.join("kernel.json");
    let mut record = KernelSpecRecord::load(&path)?;
    match status_of(&record) {
        InstallStatus::Installed => {
            if let Some(original) = record.original_argv.take() {
                record.argv = original;
            }
        }
        InstallStatus::RemoteInstalled => {
            record.argv = swap_remote_launcher(record.argv, NAME, REAL_LAUNCHER)?;
        }
        _ => {
            println!("not installed on {}", name);
            return Ok(());
        }
    }
    record.save(&path)
}

/// Discover kernelspec directories the way the frontend does: `JUPYTER_PATH`
/// entries first, then the per-user data dir, then the system-wide dirs.
/// Earlier entries shadow later ones with the same name.
pub fn find_kernel_specs() -> BTreeMap<String, PathBuf> {
    let mut specs = BTreeMap::new();
    for root in kernelspec_roots() {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.join("kernel.json").is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            specs.entry(name).or_insert(dir);
        }
    }
    specs
}

fn kernelspec_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(jupyter_path) = env::var("JUPYTER_PATH") {
        for entry in jupyter_path.split(':').filter(|e| !e.is_empty()) {
            roots.push(PathBuf::from(entry).join("kernels"));
        }
    }
    if let Some(data) = dirs::data_dir() {
        roots.push(data.join("jupyter").join("kernels"));
    }
    roots.push(PathBuf::from("/usr/local/share/jupyter/kernels"));
    roots.push(PathBuf::from("/usr/share/jupyter/kernels"));
    roots
}

/// Status of every discovered kernelspec, for the `list` command.
pub fn classify_all(specs: &BTreeMap<String, PathBuf>) -> Vec<(String, InstallStatus)> {
    let mut out = Vec::new();
    for (name, dir) in specs {
        let status = match KernelSpecRecord::load(&dir.join("kernel.json")) {
            Ok(record) => status_of(&record),
            Err(_) => InstallStatus::Unknown,
        };
        out.push((name.clone(), status));
    }
    out
}
