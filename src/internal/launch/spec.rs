use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Entry-point token of the proxy binary. A resolved launch vector must never
/// reference it, or the child would be another proxy.
pub const NAME: &str = "respawn-kernel";

/// Reserved kernelspec key holding the launch vector the spec had before the
/// proxy was installed.
pub const ORIGINAL_ARGV_KEY: &str = "respawn_original_argv";

/// Reserved kernelspec key marking a spec wrapped by the remote-ikernel
/// indirection layer. For those specs the launch command lives inside the
/// `--kernel_cmd` argument string instead of the argv itself.
pub const REMOTE_IKERNEL_KEY: &str = "remote_ikernel_argv";

/// Module token remote specs are rewritten between.
pub const REAL_LAUNCHER: &str = "ipykernel_launcher";

pub const CONNECTION_FILE_TOKEN: &str = "{connection_file}";
pub const RESOURCE_DIR_TOKEN: &str = "{resource_dir}";

const KERNEL_CMD_FLAG: &str = "--kernel_cmd";

/// A persisted kernelspec record. Unknown fields are preserved verbatim so an
/// install/remove rewrite never loses anything another tool put there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSpecRecord {
    pub argv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(
        rename = "respawn_original_argv",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_argv: Option<Vec<String>>,
    #[serde(
        rename = "remote_ikernel_argv",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_argv: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl KernelSpecRecord {
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SpecError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn is_remote(&self) -> bool {
        self.remote_argv.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("failed to read kernelspec: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid kernelspec JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernelspec at {0} has no saved launch vector")]
    NotInstalled(PathBuf),
    #[error("no kernelspec named {0}")]
    UnknownSpec(String),
    #[error("no resource directory and no fallback launch command configured")]
    NoLaunchSource,
    #[error("resolved launch vector still references the proxy entry point: {0:?}")]
    SelfReferential(Vec<String>),
    #[error("remote launch argv has no --kernel_cmd argument")]
    MalformedRemote,
}

/// Resolves the argument vector used to start the real kernel, as opposed to
/// the vector that started the proxy itself.
#[derive(Debug, Clone)]
pub struct LaunchSpecResolver {
    resource_dir: Option<PathBuf>,
    fallback_argv: Option<Vec<String>>,
}

impl LaunchSpecResolver {
    pub fn new(resource_dir: Option<PathBuf>, fallback_argv: Option<Vec<String>>) -> Self {
        Self {
            resource_dir,
            fallback_argv,
        }
    }

    pub fn resource_dir(&self) -> Option<&Path> {
        self.resource_dir.as_deref()
    }

    /// Produce the launch vector for a child bound to `connection_file`.
    /// Placeholder tokens are substituted, and the result is re-validated to
    /// never reference the proxy's own entry point: the installer guarantees
    /// that, but a recursive spawn chain is bad enough to check twice.
    pub fn resolve(&self, connection_file: &Path) -> Result<Vec<String>, SpecError> {
        let argv = match &self.resource_dir {
            Some(dir) => self.from_kernelspec(dir)?,
            None => self
                .fallback_argv
                .clone()
                .ok_or(SpecError::NoLaunchSource)?,
        };
        if argv.is_empty() {
            return Err(SpecError::NoLaunchSource);
        }
        let argv = substitute_tokens(argv, connection_file, self.resource_dir.as_deref());
        ensure_not_recursive(&argv)?;
        Ok(argv)
    }

    fn from_kernelspec(&self, dir: &Path) -> Result<Vec<String>, SpecError> {
        let record = KernelSpecRecord::load(&dir.join("kernel.json"))?;
        if record.is_remote() {
            return swap_remote_launcher(record.argv, NAME, REAL_LAUNCHER);
        }
        record
            .original_argv
            .ok_or_else(|| SpecError::NotInstalled(dir.to_path_buf()))
    }
}

/// Replace the `{connection_file}` and `{resource_dir}` placeholders inside
/// each argument.
pub fn substitute_tokens(
    argv: Vec<String>,
    connection_file: &Path,
    resource_dir: Option<&Path>,
) -> Vec<String> {
    let connection_file = connection_file.to_string_lossy();
    let resource_dir = resource_dir.map(|d| d.to_string_lossy().into_owned());
    argv.into_iter()
        .map(|arg| {
            let arg = arg.replace(CONNECTION_FILE_TOKEN, &connection_file);
            match &resource_dir {
                Some(dir) => arg.replace(RESOURCE_DIR_TOKEN, dir),
                None => arg,
            }
        })
        .collect()
}

/// Post-condition on every resolved vector: spawning it must not start
/// another proxy.
pub fn ensure_not_recursive(argv: &[String]) -> Result<(), SpecError> {
    if argv.iter().any(|arg| arg.contains(NAME)) {
        return Err(SpecError::SelfReferential(argv.to_vec()));
    }
    Ok(())
}

/// Swap one module token for another inside the `--kernel_cmd` argument of a
/// remote-ikernel argv. The surrounding vector is untouched; only the single
/// command string is rewritten.
pub fn swap_remote_launcher(
    mut argv: Vec<String>,
    from: &str,
    to: &str,
) -> Result<Vec<String>, SpecError> {
    let flag = argv
        .iter()
        .position(|arg| arg == KERNEL_CMD_FLAG)
        .ok_or(SpecError::MalformedRemote)?;
    let rewritten = {
        let cmd = argv.get(flag + 1).ok_or(SpecError::MalformedRemote)?;
        cmd.split(' ')
            .map(|word| if word == from { to } else { word })
            .collect::<Vec<_>>()
            .join(" ")
    };
    argv[flag + 1] = rewritten;
    Ok(argv)
}
