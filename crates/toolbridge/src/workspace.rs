//! Filesystem operations confined to a workspace root.
//!
//! Every operation resolves its caller-supplied path(s) through
//! [`PathSandbox`] before touching the filesystem, and every path it reports
//! back is rendered relative to the root. Operations are synchronous and never
//! retry.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::{Follow, PathSandbox, SandboxError};

/// Errors returned by workspace operations.
///
/// [`FsError::SandboxViolation`] is a security rejection and is kept apart
/// from ordinary precondition failures such as [`FsError::NotFound`].
#[derive(Debug, Error)]
pub enum FsError {
    /// The path resolves outside the workspace root
    #[error("path escapes workspace: {0}")]
    SandboxViolation(String),
    /// Nothing exists at the path
    #[error("path does not exist: {0}")]
    NotFound(String),
    /// Something already exists at the path
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    /// Directory is not empty and recursive deletion was not requested
    #[error("directory not empty: {0} (use recursive=true to delete)")]
    NotEmpty(String),
    /// Path is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// Path is not a regular file
    #[error("not a file: {0}")]
    NotAFile(String),
    /// The operation is not meaningful for this path
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// File content is not UTF-8 text
    #[error("file is not valid UTF-8 text: {0}")]
    InvalidData(String),
    /// Any other IO failure
    #[error("IO error on {path}: {source}")]
    Io {
        /// Workspace-relative path
        path: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Short machine-readable kind, used as the error tag in tool output.
    pub fn kind(&self) -> &'static str {
        match self {
            FsError::SandboxViolation(_) => "sandbox_violation",
            FsError::NotFound(_) => "not_found",
            FsError::AlreadyExists(_) => "already_exists",
            FsError::NotEmpty(_) => "not_empty",
            FsError::NotADirectory(_) => "not_a_directory",
            FsError::NotAFile(_) => "not_a_file",
            FsError::InvalidPath(_) => "invalid_path",
            FsError::InvalidData(_) => "invalid_data",
            FsError::Io { .. } => "io",
        }
    }

    /// Whether this error is a security denial rather than a precondition.
    pub fn is_security_denial(&self) -> bool {
        matches!(self, FsError::SandboxViolation(_))
    }

    fn from_io(path: &str, err: io::Error) -> Self {
        let path = path.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(path),
            io::ErrorKind::NotADirectory => FsError::NotADirectory(path),
            io::ErrorKind::IsADirectory => FsError::NotAFile(path),
            _ => FsError::Io { path, source: err },
        }
    }
}

impl From<SandboxError> for FsError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Escapes { input } => FsError::SandboxViolation(input),
            SandboxError::Io { input, source } => FsError::from_io(&input, source),
            SandboxError::RootUnavailable(msg) => FsError::Io {
                path: ".".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, msg),
            },
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name, relative to the listed directory
    pub name: String,
    /// Entry type
    pub kind: EntryKind,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if the platform reports one
    pub modified: Option<String>,
}

/// Type of a directory entry. Symlinks are reported, not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A directory
    Directory,
    /// A regular file
    File,
    /// A symbolic link
    Symlink,
}

impl EntryKind {
    fn label(self) -> &'static str {
        match self {
            EntryKind::Directory => "Directory",
            EntryKind::File => "File",
            EntryKind::Symlink => "Symlink",
        }
    }
}

/// The filesystem tool surface over one workspace root.
#[derive(Debug, Clone)]
pub struct Workspace {
    sandbox: PathSandbox,
}

impl Workspace {
    /// Open (creating if needed) the workspace at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        Ok(Self {
            sandbox: PathSandbox::create(root)?,
        })
    }

    /// Wrap an existing sandbox.
    pub fn from_sandbox(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    fn resolve(&self, input: &str, follow: Follow) -> Result<(PathBuf, String), FsError> {
        let path = self.sandbox.resolve(input, follow)?;
        let display = self.sandbox.display(&path);
        Ok((path, display))
    }

    /// Create a directory.
    ///
    /// With `exist_ok`, an existing directory is a success; otherwise it is
    /// [`FsError::AlreadyExists`].
    pub fn create_directory(
        &self,
        path: &str,
        parents: bool,
        exist_ok: bool,
    ) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::NoFinalSymlink)?;

        if let Ok(meta) = fs::symlink_metadata(&target) {
            return if exist_ok && meta.is_dir() {
                Ok(format!("Directory already exists at {}", display))
            } else {
                Err(FsError::AlreadyExists(display))
            };
        }

        let result = if parents {
            fs::create_dir_all(&target)
        } else {
            fs::create_dir(&target)
        };
        result.map_err(|e| FsError::from_io(&display, e))?;
        Ok(format!("Directory created at {}", display))
    }

    /// Create a new file, optionally with initial content.
    pub fn create_file(&self, path: &str, content: Option<&str>) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::NoFinalSymlink)?;
        if target == self.root() {
            return Err(FsError::AlreadyExists(display));
        }

        // create_new refuses existing paths, including dangling symlinks.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| FsError::from_io(&display, e))?;

        match content {
            Some(content) => {
                file.write_all(content.as_bytes())
                    .map_err(|e| FsError::from_io(&display, e))?;
                Ok(format!(
                    "File created at {} with {} bytes of content",
                    display,
                    content.len()
                ))
            }
            None => Ok(format!("Empty file created at {}", display)),
        }
    }

    /// Overwrite or append to an existing file.
    ///
    /// Overwrites replace the file atomically; appends are a single write.
    pub fn write_file(&self, path: &str, content: &str, append: bool) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::Symlinks)?;

        let meta = fs::metadata(&target).map_err(|e| FsError::from_io(&display, e))?;
        if !meta.is_file() {
            return Err(FsError::NotAFile(display));
        }

        if append {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&target)
                .map_err(|e| FsError::from_io(&display, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| FsError::from_io(&display, e))?;
            return Ok(format!(
                "Content appended to {} ({} bytes)",
                display,
                content.len()
            ));
        }

        let dir = target
            .parent()
            .ok_or_else(|| FsError::InvalidPath(display.clone()))?;
        let mut staged =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| FsError::from_io(&display, e))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| FsError::from_io(&display, e))?;
        fs::set_permissions(staged.path(), meta.permissions())
            .map_err(|e| FsError::from_io(&display, e))?;
        staged
            .persist(&target)
            .map_err(|e| FsError::from_io(&display, e.error))?;

        Ok(format!(
            "Content written to {} ({} bytes)",
            display,
            content.len()
        ))
    }

    /// Read a file as UTF-8 text.
    pub fn read_file(&self, path: &str) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::Symlinks)?;

        let meta = fs::metadata(&target).map_err(|e| FsError::from_io(&display, e))?;
        if meta.is_dir() {
            return Err(FsError::NotAFile(display));
        }

        let bytes = fs::read(&target).map_err(|e| FsError::from_io(&display, e))?;
        String::from_utf8(bytes).map_err(|_| FsError::InvalidData(display))
    }

    /// List a directory's entries, sorted by name.
    pub fn list_entries(&self, path: &str) -> Result<(String, Vec<DirEntry>), FsError> {
        let (target, display) = self.resolve(path, Follow::Symlinks)?;

        let meta = fs::metadata(&target).map_err(|e| FsError::from_io(&display, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(display));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&target).map_err(|e| FsError::from_io(&display, e))? {
            let entry = entry.map_err(|e| FsError::from_io(&display, e))?;
            let meta = entry
                .metadata()
                .map_err(|e| FsError::from_io(&display, e))?;
            let kind = if meta.file_type().is_symlink() {
                EntryKind::Symlink
            } else if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: meta.len(),
                modified: meta.modified().ok().map(format_time),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((display, entries))
    }

    /// List a directory as text.
    pub fn list_directory(&self, path: &str, detailed: bool) -> Result<String, FsError> {
        let (display, entries) = self.list_entries(path)?;

        let items: Vec<String> = entries
            .iter()
            .map(|entry| {
                if detailed {
                    format!(
                        "{}\n  Type: {}\n  Size: {} bytes\n  Modified: {}",
                        entry.name,
                        entry.kind.label(),
                        entry.size,
                        entry.modified.as_deref().unwrap_or("unknown")
                    )
                } else {
                    entry.name.clone()
                }
            })
            .collect();

        if items.is_empty() {
            return Ok(format!("Contents of {}:\n(empty)", display));
        }
        Ok(format!("Contents of {}:\n{}", display, items.join("\n")))
    }

    /// Delete a file or directory.
    pub fn delete_path(&self, path: &str, recursive: bool) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::NoFinalSymlink)?;
        if target == self.root() {
            return Err(FsError::InvalidPath(
                "the workspace root cannot be deleted".to_string(),
            ));
        }

        let meta = fs::symlink_metadata(&target).map_err(|e| FsError::from_io(&display, e))?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&target).map_err(|e| FsError::from_io(&display, e))?;
                Ok(format!("Directory {} and all contents deleted", display))
            } else {
                fs::remove_dir(&target).map_err(|e| FsError::from_io(&display, e))?;
                Ok(format!("Directory {} deleted", display))
            }
        } else {
            fs::remove_file(&target).map_err(|e| FsError::from_io(&display, e))?;
            Ok(format!("File {} deleted", display))
        }
    }

    /// Move or rename a file or directory.
    ///
    /// Both endpoints are checked before anything is touched.
    pub fn move_path(&self, source: &str, destination: &str) -> Result<String, FsError> {
        let (src, src_display) = self.resolve(source, Follow::NoFinalSymlink)?;
        let (dest, dest_display) = self.resolve(destination, Follow::NoFinalSymlink)?;

        if src == self.root() || dest == self.root() {
            return Err(FsError::InvalidPath(
                "the workspace root cannot be moved or replaced".to_string(),
            ));
        }
        fs::symlink_metadata(&src).map_err(|e| FsError::from_io(&src_display, e))?;
        if fs::symlink_metadata(&dest).is_ok() {
            return Err(FsError::AlreadyExists(dest_display));
        }
        if dest.starts_with(&src) {
            return Err(FsError::InvalidPath(format!(
                "cannot move {} into itself",
                src_display
            )));
        }

        fs::rename(&src, &dest).map_err(|e| FsError::from_io(&dest_display, e))?;
        Ok(format!("Moved {} to {}", src_display, dest_display))
    }

    /// Copy a file or directory tree.
    ///
    /// Symbolic links inside a copied tree are skipped rather than followed.
    pub fn copy_path(&self, source: &str, destination: &str) -> Result<String, FsError> {
        let (src, src_display) = self.resolve(source, Follow::Symlinks)?;
        let (dest, dest_display) = self.resolve(destination, Follow::NoFinalSymlink)?;

        let meta = fs::metadata(&src).map_err(|e| FsError::from_io(&src_display, e))?;
        if fs::symlink_metadata(&dest).is_ok() {
            return Err(FsError::AlreadyExists(dest_display));
        }

        if meta.is_dir() {
            if dest.starts_with(&src) {
                return Err(FsError::InvalidPath(format!(
                    "cannot copy {} into itself",
                    src_display
                )));
            }
            let skipped = copy_tree(&src, &dest).map_err(|e| FsError::from_io(&dest_display, e))?;
            if skipped > 0 {
                return Ok(format!(
                    "Copied {} to {} (skipped {} symbolic links)",
                    src_display, dest_display, skipped
                ));
            }
        } else {
            fs::copy(&src, &dest).map_err(|e| FsError::from_io(&dest_display, e))?;
        }
        Ok(format!("Copied {} to {}", src_display, dest_display))
    }

    /// Describe a file (size and timestamps) or a directory (its entries).
    pub fn get_directory_or_file_info(&self, path: &str) -> Result<String, FsError> {
        let (target, display) = self.resolve(path, Follow::Symlinks)?;
        let meta = fs::metadata(&target).map_err(|e| FsError::from_io(&display, e))?;

        if meta.is_dir() {
            let (_, entries) = self.list_entries(path)?;
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            return Ok(format!(
                "Directory: {}\nContents:\n{}",
                display,
                names.join("\n")
            ));
        }

        let stamp = |t: io::Result<SystemTime>| {
            t.map(format_time)
                .unwrap_or_else(|_| "unavailable".to_string())
        };
        Ok(format!(
            "File: {}\nSize: {} bytes\nLast modified: {}\nCreated: {}",
            display,
            meta.len(),
            stamp(meta.modified()),
            stamp(meta.created()),
        ))
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Recursively copy `src` to `dest`, returning how many symlinks were skipped.
fn copy_tree(src: &Path, dest: &Path) -> io::Result<usize> {
    fs::create_dir(dest)?;
    let mut skipped = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_symlink() {
            skipped += 1;
        } else if file_type.is_dir() {
            skipped += copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(skipped)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().expect("create temp dir");
        let ws = Workspace::open(dir.path().join("ws")).unwrap();
        (dir, ws)
    }

    #[test]
    fn test_create_list_read_scenario() {
        let (_dir, ws) = workspace();

        ws.create_directory("a/b", true, false).unwrap();
        let msg = ws.create_file("a/b/x.txt", Some("hi")).unwrap();
        assert_eq!(msg, "File created at a/b/x.txt with 2 bytes of content");

        let listing = ws.list_directory("a/b", false).unwrap();
        assert_eq!(listing, "Contents of a/b:\nx.txt");
        assert_eq!(ws.read_file("a/b/x.txt").unwrap(), "hi");
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (_dir, ws) = workspace();
        ws.create_file("notes.md", None).unwrap();

        let content = "line one\nline two ünïcode ✓\n\ttabbed\n";
        ws.write_file("notes.md", content, false).unwrap();
        assert_eq!(ws.read_file("notes.md").unwrap(), content);

        ws.write_file("notes.md", "tail", true).unwrap();
        assert_eq!(
            ws.read_file("notes.md").unwrap(),
            format!("{}tail", content)
        );
    }

    #[test]
    fn test_write_requires_existing_file() {
        let (_dir, ws) = workspace();
        let err = ws.write_file("nope.txt", "x", false).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
        let err = ws.write_file("nope.txt", "x", true).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
        assert!(!ws.root().join("nope.txt").exists());
    }

    #[test]
    fn test_create_directory_exist_ok() {
        let (_dir, ws) = workspace();
        ws.create_directory("d", false, false).unwrap();

        let err = ws.create_directory("d", false, false).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
        assert!(ws.create_directory("d", true, true).is_ok());

        let err = ws.create_directory("missing/child", false, false).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_create_file_refuses_existing() {
        let (_dir, ws) = workspace();
        ws.create_file("f.txt", Some("one")).unwrap();
        let err = ws.create_file("f.txt", Some("two")).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
        assert_eq!(ws.read_file("f.txt").unwrap(), "one");
    }

    #[test]
    fn test_escapes_are_security_denials() {
        let (dir, ws) = workspace();
        fs::write(dir.path().join("outside.txt"), "secret").unwrap();

        let err = ws.read_file("../outside.txt").unwrap_err();
        assert!(err.is_security_denial());
        assert_eq!(err.kind(), "sandbox_violation");

        let err = ws.create_file("../planted.txt", Some("x")).unwrap_err();
        assert!(err.is_security_denial());
        assert!(!dir.path().join("planted.txt").exists());

        let missing = ws.read_file("absent.txt").unwrap_err();
        assert!(!missing.is_security_denial());
        assert_eq!(missing.kind(), "not_found");
    }

    #[cfg(unix)]
    #[test]
    fn test_links_reached_after_missing_parent_are_denied() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "TOP SECRET").unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        let err = ws.read_file("missing/../link/secret.txt").unwrap_err();
        assert_eq!(err.kind(), "sandbox_violation");

        let err = ws
            .write_file("missing/../link/secret.txt", "PWNED", false)
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_violation");
        let err = ws
            .write_file("missing/../link/secret.txt", "PWNED", true)
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_violation");

        let err = ws
            .create_file("missing/../link/planted.txt", Some("x"))
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_violation");

        let err = ws
            .create_directory("missing/../link/sub", true, true)
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_violation");

        assert_eq!(
            fs::read_to_string(outside.join("secret.txt")).unwrap(),
            "TOP SECRET"
        );
        assert!(!outside.join("planted.txt").exists());
        assert!(!outside.join("sub").exists());
        assert!(!ws.root().join("missing").exists());
    }

    #[test]
    fn test_delete_semantics() {
        let (_dir, ws) = workspace();
        ws.create_directory("full/inner", true, false).unwrap();

        let err = ws.delete_path("full", false).unwrap_err();
        assert!(matches!(err, FsError::NotEmpty(_)));

        let err = ws.delete_path("ghost", false).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));

        ws.delete_path("full", true).unwrap();
        assert!(!ws.root().join("full").exists());

        let err = ws.delete_path("", true).unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));
        assert!(ws.root().exists());
    }

    #[test]
    fn test_move_checks_both_endpoints_first() {
        let (dir, ws) = workspace();
        ws.create_file("keep.txt", Some("k")).unwrap();

        let err = ws.move_path("keep.txt", "../stolen.txt").unwrap_err();
        assert!(err.is_security_denial());
        assert!(ws.root().join("keep.txt").exists());
        assert!(!dir.path().join("stolen.txt").exists());

        ws.move_path("keep.txt", "moved.txt").unwrap();
        assert_eq!(ws.read_file("moved.txt").unwrap(), "k");
    }

    #[test]
    fn test_copy_file_and_tree() {
        let (_dir, ws) = workspace();
        ws.create_directory("src/nested", true, false).unwrap();
        ws.create_file("src/nested/a.txt", Some("a")).unwrap();

        ws.copy_path("src", "dst").unwrap();
        assert_eq!(ws.read_file("dst/nested/a.txt").unwrap(), "a");

        let err = ws.copy_path("src", "dst").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));

        let err = ws.copy_path("src", "src/nested/again").unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));

        ws.copy_path("src/nested/a.txt", "b.txt").unwrap();
        assert_eq!(ws.read_file("b.txt").unwrap(), "a");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_skips_symlinks_in_tree() {
        let (dir, ws) = workspace();
        fs::write(dir.path().join("secret.txt"), "s").unwrap();
        ws.create_directory("tree", false, false).unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), ws.root().join("tree/leak"))
            .unwrap();

        let msg = ws.copy_path("tree", "copy").unwrap();
        assert!(msg.contains("skipped 1 symbolic links"), "got: {}", msg);
        assert!(!ws.root().join("copy/leak").exists());
    }

    #[test]
    fn test_listing_never_shows_host_paths() {
        let (dir, ws) = workspace();
        ws.create_directory("sub", false, false).unwrap();
        ws.create_file("sub/f.txt", Some("12345")).unwrap();

        let detailed = ws.list_directory("", true).unwrap();
        let host = dir.path().to_string_lossy().to_string();
        assert!(!detailed.contains(&host));
        assert!(detailed.starts_with("Contents of .:\nsub\n  Type: Directory"));

        let info = ws.get_directory_or_file_info("sub/f.txt").unwrap();
        assert!(info.starts_with("File: sub/f.txt\nSize: 5 bytes"));
        assert!(!info.contains(&host));

        let info = ws.get_directory_or_file_info("sub").unwrap();
        assert_eq!(info, "Directory: sub\nContents:\nf.txt");

        let err = ws.get_directory_or_file_info("none").unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_read_rejects_directories_and_binary() {
        let (_dir, ws) = workspace();
        ws.create_directory("d", false, false).unwrap();
        assert!(matches!(
            ws.read_file("d").unwrap_err(),
            FsError::NotAFile(_)
        ));

        fs::write(ws.root().join("bin"), [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            ws.read_file("bin").unwrap_err(),
            FsError::InvalidData(_)
        ));
    }
}
