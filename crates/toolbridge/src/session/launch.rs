//! Validation of provider executables before they are spawned.
//!
//! A provider path is accepted only if it resolves inside the configured
//! scripts directory, is a regular file with a recognised extension and, on
//! Unix, cannot be modified by group or other users. Any failed check aborts
//! before a process exists.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a provider path was refused.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The scripts directory does not exist or cannot be resolved
    #[error("provider directory unavailable: {path}: {source}")]
    ScriptsDirUnavailable {
        /// Configured directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The provider path does not exist or cannot be resolved
    #[error("provider not found: {path}: {source}")]
    NotFound {
        /// Requested path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The provider resolves outside the scripts directory
    #[error("provider {0} is outside the allowed provider directory")]
    OutsideScriptsDir(PathBuf),
    /// The provider is not a regular file
    #[error("provider {0} is not a regular file")]
    NotARegularFile(PathBuf),
    /// The provider's extension has no known launcher
    #[error("provider {0} must be a native executable, a .py or a .js file")]
    UnsupportedExtension(PathBuf),
    /// The provider can be modified by users other than its owner
    #[error("provider {0} is writable by group or others")]
    InsecurePermissions(PathBuf),
}

/// How a validated provider is started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchKind {
    /// Executed directly
    Native,
    /// Run with `python3`
    Python,
    /// Run with `node`
    Node,
}

/// A provider that passed validation, with its explicit launch parameters.
#[derive(Debug, Clone)]
pub struct ProviderLaunch {
    script: PathBuf,
    kind: LaunchKind,
    env: Vec<(OsString, OsString)>,
}

impl ProviderLaunch {
    /// Validate `script` against `scripts_dir`.
    ///
    /// Relative paths are taken relative to `scripts_dir`.
    pub fn validate(script: &Path, scripts_dir: &Path) -> Result<Self, LaunchError> {
        let dir = fs::canonicalize(scripts_dir).map_err(|source| {
            LaunchError::ScriptsDirUnavailable {
                path: scripts_dir.to_path_buf(),
                source,
            }
        })?;

        let requested = dir.join(script);
        let resolved = fs::canonicalize(&requested).map_err(|source| LaunchError::NotFound {
            path: script.to_path_buf(),
            source,
        })?;

        if !resolved.starts_with(&dir) {
            return Err(LaunchError::OutsideScriptsDir(resolved));
        }

        let meta = fs::metadata(&resolved).map_err(|source| LaunchError::NotFound {
            path: resolved.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(LaunchError::NotARegularFile(resolved));
        }

        let kind = match resolved.extension().and_then(|e| e.to_str()) {
            None => LaunchKind::Native,
            Some("py") => LaunchKind::Python,
            Some("js") => LaunchKind::Node,
            Some(_) => return Err(LaunchError::UnsupportedExtension(resolved)),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o022 != 0 {
                return Err(LaunchError::InsecurePermissions(resolved));
            }
        }

        Ok(Self {
            script: resolved,
            kind,
            env: Vec::new(),
        })
    }

    /// Forward one environment variable to the provider.
    ///
    /// Providers start with an empty environment; only variables added here
    /// reach them.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The canonical provider path.
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// How the provider is started.
    pub fn kind(&self) -> LaunchKind {
        self.kind
    }

    /// Build the command: explicit program and arguments, cleared environment.
    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut command = match self.kind {
            LaunchKind::Native => tokio::process::Command::new(&self.script),
            LaunchKind::Python => {
                let mut c = tokio::process::Command::new("python3");
                c.arg(&self.script);
                c
            }
            LaunchKind::Node => {
                let mut c = tokio::process::Command::new("node");
                c.arg(&self.script);
                c
            }
        };
        command.env_clear();
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }
}
