#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `exodus_walk` resolves an rsync-style source argument into the set of
//! content-addressed items a publish must contain. The walker enumerates
//! regular files beneath the source root, applies the compiled
//! [`FilterSet`](exodus_filters::FilterSet), follows symbolic links, and
//! yields one [`SyncItem`] per destination path, each carrying the SHA-256
//! key of its contents.
//!
//! # Design
//!
//! - [`WalkBuilder`] captures the source argument exactly as written (the
//!   trailing slash is significant), the filter, and the `--relative` /
//!   `--files-from` flags.
//! - [`Walker`] implements [`Iterator`] and yields items in depth-first
//!   order with directory entries sorted lexicographically, so the sequence
//!   is deterministic regardless of the underlying filesystem's iteration
//!   order.
//! - Symlinks always resolve: links to regular files contribute the target's
//!   contents at the link's path, links to directories are descended with
//!   the link's relative path preserved in emitted items.
//!
//! # Invariants
//!
//! - A single walk emits at most one [`SyncItem`] per distinct relative
//!   path. Two sources mapping to the same relative path with differing
//!   content fail the walk rather than silently picking one.
//! - Directory cycles introduced by symlinks are detected by tracking the
//!   resolved (device, inode) pair of every directory on the active
//!   traversal chain; a revisit is a [`WalkError`].
//! - Broken symlinks are skipped with a warning and never fail the walk.
//!
//! # Errors
//!
//! Traversal fails on unreadable files and directories, missing roots or
//! file-list entries, symlink cycles, and conflicting duplicate destination
//! paths. Each [`WalkError`] carries the offending path.

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use exodus_filters::{FilterAction, FilterSet};

mod hash;

pub use hash::hash_file;

/// One file that must appear at the destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncItem {
    /// Absolute path on the local filesystem the bytes were read from.
    pub src_path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub key: String,
    /// Destination-relative path, including any prefix implied by the
    /// trailing-slash or `--relative` rules.
    pub rel_path: String,
}

/// Configures a walk over an rsync-style source argument.
#[derive(Clone, Debug)]
pub struct WalkBuilder {
    source: String,
    filter: FilterSet,
    relative: bool,
    files_from: Option<PathBuf>,
}

impl WalkBuilder {
    /// Creates a builder for the source argument as written on the command
    /// line. A trailing `/` places the root's children directly under the
    /// destination; without it the root's basename is prepended.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filter: FilterSet::default(),
            relative: false,
            files_from: None,
        }
    }

    /// Sets the compiled filter consulted for every candidate path.
    #[must_use]
    pub fn filter(mut self, filter: FilterSet) -> Self {
        self.filter = filter;
        self
    }

    /// Preserves the full source-relative path under the destination.
    ///
    /// Implied by [`files_from`](Self::files_from).
    #[must_use]
    pub const fn relative(mut self, relative: bool) -> Self {
        self.relative = relative;
        self
    }

    /// Reads the newline-delimited file list at `path`; each entry is
    /// resolved against the source root and walked independently.
    #[must_use]
    pub fn files_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.files_from = Some(path.into());
        self
    }

    /// Builds a [`Walker`] for the configured source.
    pub fn build(self) -> Result<Walker, WalkError> {
        let trailing_slash = self.source.len() > 1 && self.source.ends_with('/');
        let root = clean_path(&absolutize(PathBuf::from(&self.source))?);
        fs::symlink_metadata(&root).map_err(|error| WalkError::root(root.clone(), error))?;

        let entries = match &self.files_from {
            Some(list) => Some(read_files_from(list)?),
            None => None,
        };
        let relative = self.relative || entries.is_some();

        let prefix = if relative {
            root.to_string_lossy().trim_start_matches('/').to_string()
        } else if trailing_slash {
            String::new()
        } else {
            root.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        let targets = match entries {
            Some(entries) => entries
                .into_iter()
                .map(|entry| {
                    let rel = join_rel(&prefix, &clean_entry(&entry));
                    (root.join(&entry), rel)
                })
                .collect(),
            None => VecDeque::from([(root, prefix)]),
        };

        Ok(Walker {
            targets,
            stack: Vec::new(),
            filter: self.filter,
            emitted: HashMap::new(),
            finished: false,
        })
    }
}

/// Depth-first iterator yielding one [`SyncItem`] per included file.
#[derive(Debug)]
pub struct Walker {
    targets: VecDeque<(PathBuf, String)>,
    stack: Vec<DirectoryState>,
    filter: FilterSet,
    emitted: HashMap<String, String>,
    finished: bool,
}

impl Walker {
    /// Runs the walk to completion and returns the collected items.
    pub fn collect_items(self) -> Result<Vec<SyncItem>, WalkError> {
        self.collect()
    }

    fn process(
        &mut self,
        full: PathBuf,
        rel: String,
        is_target: bool,
    ) -> Result<Option<SyncItem>, WalkError> {
        let metadata = fs::symlink_metadata(&full).map_err(|error| {
            if is_target {
                WalkError::root(full.clone(), error)
            } else {
                WalkError::metadata(full.clone(), error)
            }
        })?;

        let resolved = if metadata.file_type().is_symlink() {
            match fs::metadata(&full) {
                Ok(target) => target,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!("skipping broken symlink {}", full.display());
                    return Ok(None);
                }
                Err(error) => return Err(WalkError::metadata(full, error)),
            }
        } else {
            metadata
        };

        if resolved.is_dir() {
            self.enter_directory(full, rel, &resolved)?;
            return Ok(None);
        }

        if resolved.is_file() {
            return self.emit_file(full, rel);
        }

        tracing::debug!("skipping non-regular file {}", full.display());
        Ok(None)
    }

    fn enter_directory(
        &mut self,
        full: PathBuf,
        rel: String,
        metadata: &fs::Metadata,
    ) -> Result<(), WalkError> {
        if !rel.is_empty() && self.filter.decide(Path::new(&rel), &full, true) == FilterAction::Exclude
        {
            tracing::trace!("pruned directory {rel}");
            return Ok(());
        }

        let identity = DirIdentity::of(&full, metadata)?;
        if self.stack.iter().any(|state| state.identity == identity) {
            return Err(WalkError::symlink_cycle(full));
        }

        let state = DirectoryState::new(full, rel, identity)?;
        self.stack.push(state);
        Ok(())
    }

    fn emit_file(&mut self, full: PathBuf, rel: String) -> Result<Option<SyncItem>, WalkError> {
        let rel = if rel.is_empty() {
            full.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            rel
        };

        if self.filter.decide(Path::new(&rel), &full, false) == FilterAction::Exclude {
            tracing::trace!("excluded {rel}");
            return Ok(None);
        }

        let key = hash::hash_file(&full).map_err(|error| WalkError::read(full.clone(), error))?;
        match self.emitted.get(&rel) {
            Some(existing) if *existing == key => Ok(None),
            Some(_) => Err(WalkError::duplicate_target(rel)),
            None => {
                self.emitted.insert(rel.clone(), key.clone());
                Ok(Some(SyncItem {
                    src_path: full,
                    key,
                    rel_path: rel,
                }))
            }
        }
    }
}

impl Iterator for Walker {
    type Item = Result<SyncItem, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let (full, rel, is_target) = if let Some(state) = self.stack.last_mut() {
                match state.next_name() {
                    Some(name) => {
                        let full = state.fs_path.join(&name);
                        let rel = join_rel(&state.rel_prefix, &name.to_string_lossy());
                        (full, rel, false)
                    }
                    None => {
                        self.stack.pop();
                        continue;
                    }
                }
            } else if let Some((full, rel)) = self.targets.pop_front() {
                (full, rel, true)
            } else {
                return None;
            };

            match self.process(full, rel, is_target) {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => {}
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[derive(Debug)]
struct DirectoryState {
    fs_path: PathBuf,
    rel_prefix: String,
    identity: DirIdentity,
    entries: Vec<OsString>,
    index: usize,
}

impl DirectoryState {
    fn new(fs_path: PathBuf, rel_prefix: String, identity: DirIdentity) -> Result<Self, WalkError> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&fs_path)
            .map_err(|error| WalkError::read_dir(fs_path.clone(), error))?;
        for entry in read_dir {
            let entry =
                entry.map_err(|error| WalkError::read_dir(fs_path.clone(), error))?;
            entries.push(entry.file_name());
        }
        entries.sort();

        Ok(Self {
            fs_path,
            rel_prefix,
            identity,
            entries,
            index: 0,
        })
    }

    fn next_name(&mut self) -> Option<OsString> {
        let name = self.entries.get(self.index)?.clone();
        self.index += 1;
        Some(name)
    }
}

/// Identity of a resolved directory, used for cycle detection along the
/// active traversal chain.
#[derive(Clone, Debug, Eq, PartialEq)]
struct DirIdentity {
    #[cfg(unix)]
    device: u64,
    #[cfg(unix)]
    inode: u64,
    #[cfg(not(unix))]
    canonical: PathBuf,
}

impl DirIdentity {
    #[cfg(unix)]
    fn of(_path: &Path, metadata: &fs::Metadata) -> Result<Self, WalkError> {
        use std::os::unix::fs::MetadataExt;
        Ok(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(path: &Path, _metadata: &fs::Metadata) -> Result<Self, WalkError> {
        let canonical = fs::canonicalize(path)
            .map_err(|error| WalkError::metadata(path.to_path_buf(), error))?;
        Ok(Self { canonical })
    }
}

/// Error returned when a walk fails.
#[derive(Debug)]
pub struct WalkError {
    kind: WalkErrorKind,
}

#[derive(Debug)]
enum WalkErrorKind {
    Root { path: PathBuf, source: io::Error },
    FilesFrom { path: PathBuf, source: io::Error },
    ReadDir { path: PathBuf, source: io::Error },
    Metadata { path: PathBuf, source: io::Error },
    Read { path: PathBuf, source: io::Error },
    SymlinkCycle { path: PathBuf },
    DuplicateTarget { rel_path: String },
}

impl WalkError {
    fn root(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::Root { path, source },
        }
    }

    fn files_from(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::FilesFrom { path, source },
        }
    }

    fn read_dir(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::ReadDir { path, source },
        }
    }

    fn metadata(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::Metadata { path, source },
        }
    }

    fn read(path: PathBuf, source: io::Error) -> Self {
        Self {
            kind: WalkErrorKind::Read { path, source },
        }
    }

    fn symlink_cycle(path: PathBuf) -> Self {
        Self {
            kind: WalkErrorKind::SymlinkCycle { path },
        }
    }

    fn duplicate_target(rel_path: String) -> Self {
        Self {
            kind: WalkErrorKind::DuplicateTarget { rel_path },
        }
    }

    /// Reports whether the error is a symlink cycle.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, WalkErrorKind::SymlinkCycle { .. })
    }

    /// Reports whether the error is a conflicting duplicate destination.
    #[must_use]
    pub fn is_duplicate_target(&self) -> bool {
        matches!(self.kind, WalkErrorKind::DuplicateTarget { .. })
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WalkErrorKind::Root { path, source } => {
                write!(f, "failed to read source '{}': {}", path.display(), source)
            }
            WalkErrorKind::FilesFrom { path, source } => {
                write!(
                    f,
                    "failed to read file list '{}': {}",
                    path.display(),
                    source
                )
            }
            WalkErrorKind::ReadDir { path, source } => {
                write!(
                    f,
                    "failed to read directory '{}': {}",
                    path.display(),
                    source
                )
            }
            WalkErrorKind::Metadata { path, source } => {
                write!(
                    f,
                    "failed to inspect metadata for '{}': {}",
                    path.display(),
                    source
                )
            }
            WalkErrorKind::Read { path, source } => {
                write!(f, "failed to read '{}': {}", path.display(), source)
            }
            WalkErrorKind::SymlinkCycle { path } => {
                write!(f, "symlink cycle detected at '{}'", path.display())
            }
            WalkErrorKind::DuplicateTarget { rel_path } => {
                write!(
                    f,
                    "destination path '{rel_path}' maps to multiple sources with differing content"
                )
            }
        }
    }
}

impl Error for WalkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            WalkErrorKind::Root { source, .. }
            | WalkErrorKind::FilesFrom { source, .. }
            | WalkErrorKind::ReadDir { source, .. }
            | WalkErrorKind::Metadata { source, .. }
            | WalkErrorKind::Read { source, .. } => Some(source),
            WalkErrorKind::SymlinkCycle { .. } | WalkErrorKind::DuplicateTarget { .. } => None,
        }
    }
}

fn read_files_from(path: &Path) -> Result<Vec<String>, WalkError> {
    let contents = fs::read_to_string(path)
        .map_err(|error| WalkError::files_from(path.to_path_buf(), error))?;
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        entries.push(line.to_string());
    }
    Ok(entries)
}

fn absolutize(path: PathBuf) -> Result<PathBuf, WalkError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = std::env::current_dir()
            .map_err(|error| WalkError::root(PathBuf::from("."), error))?;
        Ok(cwd.join(path))
    }
}

// Lexical normalization only; symlinks are deliberately not resolved so the
// relative prefix reflects the path as given.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

fn clean_entry(entry: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in entry.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    parts.join("/")
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
