//! Script source resolution.
//!
//! A [`ScriptSourceResolver`] is the only thing that differs between script
//! variants: [`ProvidedSource`] asks a [`SourceProvider`] for a reader by
//! identifier, [`PathSource`] opens a file relative to a base path that also
//! travels into the namespace.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::ScriptsConfig;

/// Script file extension picked up by [`DirectoryProvider::list`].
pub const SCRIPT_EXTENSION: &str = "lua";

/// An open script text stream plus a label used to tag diagnostics.
pub struct SourceReader {
    label: String,
    reader: Box<dyn Read>,
}

impl SourceReader {
    pub fn new(label: impl Into<String>, reader: impl Read + 'static) -> Self {
        Self {
            label: label.into(),
            reader: Box::new(reader),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read the whole stream. The reader is released when this returns.
    pub fn into_text(mut self) -> io::Result<String> {
        let mut text = String::new();
        self.reader.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl std::fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReader")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Hands out script text by identifier.
pub trait SourceProvider: Send + Sync {
    fn open(&self, id: &str) -> io::Result<SourceReader>;
}

/// Resolves the source of one script instance.
pub trait ScriptSourceResolver {
    /// Identifier used to fetch the text and to report errors.
    fn identifier(&self) -> &str;

    /// Base path propagated into namespaces that support one.
    fn base_path(&self) -> Option<&Path> {
        None
    }

    fn open(&self) -> io::Result<SourceReader>;
}

/// Join `relative` onto `root`, refusing anything that escapes `root`.
pub(crate) fn resolve_within(root: &Path, relative: impl AsRef<Path>) -> io::Result<PathBuf> {
    let relative = relative.as_ref();
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path '{}' escapes {}", relative.display(), root.display()),
                ));
            }
        }
    }
    if resolved == root {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty script path",
        ));
    }
    Ok(resolved)
}

/// Serves scripts from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create a provider for the `[scripts]` configuration section.
    pub fn from_config(config: &ScriptsConfig) -> Self {
        Self::new(&config.path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create the root directory if it does not exist.
    pub fn ensure_root(&self) -> io::Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }

    /// List script identifiers under the root, sorted, with `/` separators.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        if self.root_exists() {
            self.scan(&self.root, &mut found)?;
        }
        found.sort();
        Ok(found)
    }

    fn scan(&self, dir: &Path, found: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.scan(&path, found)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION) {
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    let id = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    found.push(id);
                }
            }
        }
        Ok(())
    }
}

impl SourceProvider for DirectoryProvider {
    fn open(&self, id: &str) -> io::Result<SourceReader> {
        let path = resolve_within(&self.root, id)?;
        let file = File::open(path)?;
        Ok(SourceReader::new(id, BufReader::new(file)))
    }
}

/// Serves scripts held in memory, such as a cache filled by the caller.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    scripts: RwLock<HashMap<String, String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(id, text);
        self
    }

    /// Add or replace a script.
    pub fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        self.write().insert(id.into(), text.into());
    }

    pub fn remove(&self, id: &str) -> Option<String> {
        self.write().remove(id)
    }

    // Every update is a single map operation, so a writer that panicked
    // cannot have left the map half-changed.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.scripts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.scripts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SourceProvider for MemoryProvider {
    fn open(&self, id: &str) -> io::Result<SourceReader> {
        let text = self.read().get(id).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no script named '{id}'"))
        })?;
        Ok(SourceReader::new(id, Cursor::new(text.into_bytes())))
    }
}

/// Source obtained from a [`SourceProvider`] by identifier.
#[derive(Clone)]
pub struct ProvidedSource {
    id: String,
    provider: Arc<dyn SourceProvider>,
}

impl ProvidedSource {
    pub fn new(id: impl Into<String>, provider: Arc<dyn SourceProvider>) -> Self {
        Self {
            id: id.into(),
            provider,
        }
    }
}

impl ScriptSourceResolver for ProvidedSource {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn open(&self) -> io::Result<SourceReader> {
        self.provider.open(&self.id)
    }
}

/// Source file resolved relative to a base path.
#[derive(Debug, Clone)]
pub struct PathSource {
    base: PathBuf,
    relative: PathBuf,
    id: String,
}

impl PathSource {
    pub fn new(base: impl Into<PathBuf>, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        let id = relative.display().to_string();
        Self {
            base: base.into(),
            relative,
            id,
        }
    }

    /// Split `path` into its parent directory (the base path) and file name.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let relative = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self::new(base, relative)
    }

    pub fn full_path(&self) -> PathBuf {
        self.base.join(&self.relative)
    }
}

impl ScriptSourceResolver for PathSource {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn base_path(&self) -> Option<&Path> {
        Some(&self.base)
    }

    fn open(&self) -> io::Result<SourceReader> {
        let path = resolve_within(&self.base, &self.relative)?;
        let file = File::open(path)?;
        Ok(SourceReader::new(self.id.clone(), BufReader::new(file)))
    }
}
