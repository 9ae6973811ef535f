use std::fmt;
use std::fs;
use std::io::{self, Read, Write};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::error::BdsError;

const TEMP_PREFIX: &str = ".bds-";
const TEMP_SUFFIX: &str = ".tmp";
const TEMP_RAND_LEN: usize = 6;

/// Names of in-flight temp files written by this module, and nothing else.
fn is_temp_name(name: &str) -> bool {
    name.strip_prefix(TEMP_PREFIX)
        .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
        .is_some_and(|random| {
            random.len() == TEMP_RAND_LEN && random.chars().all(|ch| ch.is_ascii_alphanumeric())
        })
}

fn temp_builder() -> Builder<'static, 'static> {
    let mut builder = Builder::new();
    builder
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .rand_bytes(TEMP_RAND_LEN);
    builder
}

/// Root-relative address of a node inside a mounted [`Storage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath(Utf8PathBuf);

impl NodePath {
    pub fn root() -> Self {
        Self(Utf8PathBuf::new())
    }

    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn join(&self, path: impl AsRef<Utf8Path>) -> Self {
        Self(self.0.join(path))
    }

    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn name(&self) -> Option<&str> {
        self.0.file_name()
    }

    pub fn parent(&self) -> Option<NodePath> {
        self.0.parent().map(|parent| Self(parent.to_path_buf()))
    }

    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    pub fn strip_prefix(&self, base: &NodePath) -> Option<&Utf8Path> {
        self.0.strip_prefix(&base.0).ok()
    }

    pub fn ends_with(&self, suffix: impl AsRef<Utf8Path>) -> bool {
        self.0.ends_with(suffix.as_ref())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Link,
}

/// Snapshot of a node: where it lives and what it is. Holding a `Node` does
/// not keep anything open; all access goes back through the [`Storage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    path: NodePath,
    kind: NodeKind,
}

impl Node {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_link(&self) -> bool {
        self.kind == NodeKind::Link
    }
}

/// Hierarchical storage rooted at one directory. It owns every node below
/// the root; callers only ever hold [`NodePath`]s and [`Node`] snapshots.
#[derive(Debug, Clone)]
pub struct Storage {
    root: Utf8PathBuf,
    mounted: bool,
}

impl Storage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: false,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn mount(&mut self) -> Result<(), BdsError> {
        let meta = fs::metadata(self.root.as_std_path())
            .map_err(|err| BdsError::Storage(format!("mount {}: {err}", self.root)))?;
        if !meta.is_dir() {
            return Err(BdsError::Storage(format!(
                "mount {}: not a directory",
                self.root
            )));
        }
        self.mounted = true;
        debug!(root = %self.root, "storage mounted");
        Ok(())
    }

    pub fn unmount(&mut self) {
        self.mounted = false;
        debug!(root = %self.root, "storage unmounted");
    }

    /// Absolute location of `path`; fails when unmounted or when the path
    /// tries to leave the root.
    pub fn resolve(&self, path: &NodePath) -> Result<Utf8PathBuf, BdsError> {
        if !self.mounted {
            return Err(BdsError::NotMounted(self.root.to_string()));
        }
        let escapes = path
            .as_path()
            .components()
            .any(|component| !matches!(component, Utf8Component::Normal(_)));
        if escapes {
            return Err(BdsError::IllegalArgument(format!(
                "node path must be relative to the storage root: {path}"
            )));
        }
        Ok(self.root.join(path.as_path()))
    }

    pub fn try_get_node(&self, path: &NodePath) -> Result<Option<Node>, BdsError> {
        let absolute = self.resolve(path)?;
        let meta = match fs::symlink_metadata(absolute.as_std_path()) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BdsError::Storage(format!("stat {absolute}: {err}"))),
        };
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            NodeKind::Link
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        Ok(Some(Node {
            path: path.clone(),
            kind,
        }))
    }

    pub fn get_node(&self, path: &NodePath) -> Result<Node, BdsError> {
        self.try_get_node(path)?
            .ok_or_else(|| BdsError::NodeNotFound(path.to_string()))
    }

    /// Creates `parent/name` (and any missing ancestors). Succeeds when the
    /// directory already exists.
    pub fn make_directory(&self, parent: &NodePath, name: &str) -> Result<Node, BdsError> {
        let path = parent.join(name);
        let absolute = self.resolve(&path)?;
        if let Some(existing) = self.try_get_node(&path)? {
            if existing.is_directory() {
                return Ok(existing);
            }
            return Err(BdsError::Storage(format!(
                "cannot create directory {path}: a non-directory node exists"
            )));
        }
        fs::create_dir_all(absolute.as_std_path())
            .map_err(|err| BdsError::Storage(format!("create directory {absolute}: {err}")))?;
        Ok(Node {
            path,
            kind: NodeKind::Directory,
        })
    }

    /// Writes `key` as a file holding `value` inside `dir`, replacing any
    /// previous value atomically.
    pub fn add_key_value_pair(
        &self,
        dir: &NodePath,
        key: &str,
        value: &str,
    ) -> Result<Node, BdsError> {
        let dir_abs = self.resolve(dir)?;
        fs::create_dir_all(dir_abs.as_std_path())
            .map_err(|err| BdsError::Storage(format!("create directory {dir_abs}: {err}")))?;
        let mut temp = temp_builder()
            .tempfile_in(dir_abs.as_std_path())
            .map_err(|err| BdsError::Storage(err.to_string()))?;
        temp.write_all(value.as_bytes())
            .map_err(|err| BdsError::Storage(err.to_string()))?;
        let target = dir_abs.join(key);
        temp.persist(target.as_std_path())
            .map_err(|err| BdsError::Storage(format!("write {target}: {err}")))?;
        Ok(Node {
            path: dir.join(key),
            kind: NodeKind::File,
        })
    }

    pub fn try_get_value(&self, dir: &NodePath, key: &str) -> Result<Option<String>, BdsError> {
        let path = dir.join(key);
        let absolute = self.resolve(&path)?;
        match fs::read_to_string(absolute.as_std_path()) {
            Ok(content) => Ok(Some(content.trim_end_matches(['\n', '\r']).to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BdsError::Storage(format!("read {absolute}: {err}"))),
        }
    }

    pub fn get_value(&self, dir: &NodePath, key: &str) -> Result<String, BdsError> {
        self.try_get_value(dir, key)?
            .ok_or_else(|| BdsError::NodeNotFound(dir.join(key).to_string()))
    }

    /// Immediate children of `dir`, sorted by name. A missing directory has
    /// no children.
    pub fn children(&self, dir: &NodePath) -> Result<Vec<Node>, BdsError> {
        let absolute = self.resolve(dir)?;
        let entries = match fs::read_dir(absolute.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BdsError::Storage(format!("list {absolute}: {err}"))),
        };
        let mut nodes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BdsError::Storage(err.to_string()))?;
            let name = entry.file_name().into_string().map_err(|_| {
                BdsError::Storage(format!("non-utf8 file name in {absolute}"))
            })?;
            if is_temp_name(&name) {
                continue;
            }
            if let Some(node) = self.try_get_node(&dir.join(&name))? {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(nodes)
    }

    /// All non-directory nodes below `dir`, depth first, sorted by path.
    pub fn walk_files(&self, dir: &NodePath) -> Result<Vec<Node>, BdsError> {
        let mut files = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            for child in self.children(&current)? {
                if child.is_directory() {
                    stack.push(child.path.clone());
                } else {
                    files.push(child);
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    pub fn read_bytes(&self, path: &NodePath) -> Result<Vec<u8>, BdsError> {
        let absolute = self.resolve(path)?;
        let mut file = fs::File::open(absolute.as_std_path())
            .map_err(|err| BdsError::Storage(format!("open {absolute}: {err}")))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|err| BdsError::Storage(format!("read {absolute}: {err}")))?;
        Ok(content)
    }

    pub fn open_file(&self, path: &NodePath) -> Result<fs::File, BdsError> {
        let absolute = self.resolve(path)?;
        fs::File::open(absolute.as_std_path())
            .map_err(|err| BdsError::Storage(format!("open {absolute}: {err}")))
    }

    /// Moves the file at `source` to `dir/name`. Never replaces an existing
    /// node: the target is created with a hard link, which fails if the name
    /// is taken, and the source is unlinked afterwards.
    pub fn try_add_node(
        &self,
        dir: &NodePath,
        name: &str,
        source: &NodePath,
    ) -> Result<Node, BdsError> {
        let source_node = self.get_node(source)?;
        if source_node.is_directory() {
            return Err(BdsError::IllegalArgument(format!(
                "only files can be moved: {source}"
            )));
        }
        let target = dir.join(name);
        let source_abs = self.resolve(source)?;
        let target_abs = self.resolve(&target)?;
        fs::hard_link(source_abs.as_std_path(), target_abs.as_std_path())
            .map_err(|err| BdsError::Storage(format!("add node {target}: {err}")))?;
        fs::remove_file(source_abs.as_std_path())
            .map_err(|err| BdsError::Storage(format!("remove {source}: {err}")))?;
        debug!(%source, %target, "node moved");
        Ok(Node {
            path: target,
            kind: NodeKind::File,
        })
    }

    /// Creates `dir/name` as a relative link to `target`. Fails if the name
    /// is already taken.
    pub fn try_add_link(
        &self,
        dir: &NodePath,
        name: &str,
        target: &NodePath,
    ) -> Result<Node, BdsError> {
        self.get_node(target)?;
        let link = dir.join(name);
        let link_abs = self.resolve(&link)?;
        let relative_target = relative_link_target(dir, target);
        make_symlink(&relative_target, &link_abs)
            .map_err(|err| BdsError::Storage(format!("add link {link}: {err}")))?;
        debug!(%link, %target, "link added");
        Ok(Node {
            path: link,
            kind: NodeKind::Link,
        })
    }

    /// Copies a file or directory tree from outside the storage into `dir`.
    /// Existing nodes are never replaced.
    pub fn import(&self, source: &Utf8Path, dir: &NodePath) -> Result<Vec<Node>, BdsError> {
        let name = source
            .file_name()
            .ok_or_else(|| BdsError::IllegalArgument(format!("cannot import {source}")))?;
        let meta = fs::metadata(source.as_std_path())
            .map_err(|err| BdsError::Storage(format!("stat {source}: {err}")))?;
        if !meta.is_dir() {
            return Ok(vec![self.import_file(source, dir, name)?]);
        }
        let mut imported = Vec::new();
        let mut stack = vec![(source.to_path_buf(), dir.join(name))];
        while let Some((from, to)) = stack.pop() {
            let to_abs = self.resolve(&to)?;
            fs::create_dir_all(to_abs.as_std_path())
                .map_err(|err| BdsError::Storage(format!("create directory {to_abs}: {err}")))?;
            let entries = fs::read_dir(from.as_std_path())
                .map_err(|err| BdsError::Storage(format!("list {from}: {err}")))?;
            for entry in entries {
                let entry = entry.map_err(|err| BdsError::Storage(err.to_string()))?;
                let path = Utf8PathBuf::from_path_buf(entry.path())
                    .map_err(|_| BdsError::Storage(format!("non-utf8 file name in {from}")))?;
                let Some(child_name) = path.file_name().map(str::to_string) else {
                    continue;
                };
                if path.is_dir() {
                    stack.push((path, to.join(&child_name)));
                } else {
                    imported.push(self.import_file(&path, &to, &child_name)?);
                }
            }
        }
        imported.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(imported)
    }

    fn import_file(&self, source: &Utf8Path, dir: &NodePath, name: &str) -> Result<Node, BdsError> {
        let dir_abs = self.resolve(dir)?;
        fs::create_dir_all(dir_abs.as_std_path())
            .map_err(|err| BdsError::Storage(format!("create directory {dir_abs}: {err}")))?;
        let temp = temp_builder()
            .tempfile_in(dir_abs.as_std_path())
            .map_err(|err| BdsError::Storage(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| BdsError::Storage(format!("copy {source}: {err}")))?;
        let target = dir_abs.join(name);
        temp.persist_noclobber(target.as_std_path())
            .map_err(|err| BdsError::Storage(format!("import {target}: {err}")))?;
        Ok(Node {
            path: dir.join(name),
            kind: NodeKind::File,
        })
    }
}

fn relative_link_target(link_dir: &NodePath, target: &NodePath) -> Utf8PathBuf {
    let mut relative = Utf8PathBuf::new();
    for _ in link_dir.as_path().components() {
        relative.push("..");
    }
    relative.push(target.as_path());
    relative
}

#[cfg(unix)]
fn make_symlink(target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path())
}

#[cfg(windows)]
fn make_symlink(target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target.as_std_path(), link.as_std_path())
}
