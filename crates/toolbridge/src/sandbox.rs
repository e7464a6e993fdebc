//! Path containment for the workspace root.
//!
//! [`PathSandbox`] turns caller-supplied, workspace-relative path strings into
//! canonical absolute paths and rejects anything that lands outside the root.
//!
//! Resolution always joins the raw input onto the root first and only then
//! canonicalizes, so `..` segments, absolute inputs and symlinks are all
//! judged by where they actually end up. Containment is checked with
//! [`Path::starts_with`], which compares whole components: a root of `/ws`
//! does not contain `/ws-evil`.
//!
//! Components that do not exist yet (a file about to be created, or the
//! missing middle of `mkdir -p`) cannot be canonicalized. The path is walked
//! one component at a time: every component that exists is canonicalized on
//! the spot, missing ones are held back, and a `..` that cancels the last
//! missing name drops back onto the canonical path so the next existing
//! component is resolved again. Only names that do not exist are ever
//! applied lexically.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Whether the final path component may be a symlink that gets followed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Follow {
    /// Resolve a symlink in the final component to its target.
    Symlinks,
    /// Leave the final component unresolved.
    ///
    /// Used by create-type operations so a link planted inside the workspace
    /// cannot redirect the operation at the last moment.
    NoFinalSymlink,
}

/// Errors produced while resolving a path.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The path resolves outside the workspace root
    #[error("path escapes workspace: {input}")]
    Escapes {
        /// The caller-supplied path
        input: String,
    },
    /// The filesystem could not be queried while resolving the path
    #[error("cannot resolve {input}: {source}")]
    Io {
        /// The caller-supplied path
        input: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The workspace root is missing or not a directory
    #[error("workspace root unavailable: {0}")]
    RootUnavailable(String),
}

/// A workspace root together with the containment check for it.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Open a sandbox on an existing directory.
    ///
    /// The root is canonicalized once here; every later comparison is made
    /// against that canonical form.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root)
            .map_err(|e| SandboxError::RootUnavailable(format!("{}: {}", root.display(), e)))?;
        if !canonical.is_dir() {
            return Err(SandboxError::RootUnavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    /// Create the root directory if needed, then open a sandbox on it.
    pub fn create(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .map_err(|e| SandboxError::RootUnavailable(format!("{}: {}", root.display(), e)))?;
        Self::new(root)
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `input` to a canonical absolute path inside the root.
    ///
    /// An empty input resolves to the root itself.
    pub fn resolve(&self, input: &str, follow: Follow) -> Result<PathBuf, SandboxError> {
        let joined = self.root.join(input);
        let resolved = canonicalize_lenient(&joined, follow).map_err(|source| SandboxError::Io {
            input: input.to_string(),
            source,
        })?;

        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(SandboxError::Escapes {
                input: input.to_string(),
            })
        }
    }

    /// Whether an absolute, already-canonical path is at or under the root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Render an accepted path relative to the root, using `/` separators.
    ///
    /// The root itself renders as `.`. Paths outside the root render as their
    /// file name only so host layout never leaks into tool output.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Canonicalize `path`, tolerating components that do not exist yet.
fn canonicalize_lenient(path: &Path, follow: Follow) -> io::Result<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();

    // Hold back the final component when it must not be followed. `.` and
    // `..` are never links, so they are resolved normally.
    let (head, last) = match (follow, components.split_last()) {
        (Follow::NoFinalSymlink, Some((Component::Normal(name), head))) => {
            (head, Some(name.to_os_string()))
        }
        _ => (components.as_slice(), None),
    };

    let mut resolved = canonicalize_walk(head)?;
    if let Some(name) = last {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Walk `components`, canonicalizing each one that exists.
///
/// `pending` holds trailing names that do not exist. While it is non-empty
/// nothing under it can exist either, so further names are queued without
/// touching the filesystem.
fn canonicalize_walk(components: &[Component<'_>]) -> io::Result<PathBuf> {
    let mut base = PathBuf::new();
    let mut pending: Vec<OsString> = Vec::new();

    for component in components {
        match component {
            Component::Prefix(_) | Component::RootDir if pending.is_empty() => {
                base.push(component.as_os_str());
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unexpected root component",
                ));
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if pending.pop().is_none() {
                    base.pop();
                }
            }
            Component::Normal(name) if pending.is_empty() => {
                let candidate = base.join(name);
                match fs::symlink_metadata(&candidate) {
                    Ok(_) => base = fs::canonicalize(&candidate)?,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        pending.push(name.to_os_string())
                    }
                    Err(e) => return Err(e),
                }
            }
            Component::Normal(name) => pending.push(name.to_os_string()),
        }
    }

    base.extend(pending);
    Ok(base)
}
