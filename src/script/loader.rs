//! Script resource loading
//!
//! Workers name their script by an id. The loader decides what that id maps
//! to: a file under an asset directory, or an in-memory source registered by
//! the host (the equivalent of a blob URL).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Existence check and byte loading for script sources
pub trait ResourceLoader: Send + Sync {
    fn exists(&self, id: &str) -> bool;

    fn load(&self, id: &str) -> io::Result<String>;
}

/// Loads script ids as paths relative to an asset root
#[derive(Debug, Clone)]
pub struct AssetLoader {
    root: PathBuf,
}

impl AssetLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an id the way the asset reader does: `./` and `file://`
    /// prefixes are stripped, absolute paths are used as-is.
    pub fn resolve(&self, id: &str) -> PathBuf {
        let id = id.strip_prefix("file://").unwrap_or(id);
        let id = id.strip_prefix("./").unwrap_or(id);
        let path = Path::new(id);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl ResourceLoader for AssetLoader {
    fn exists(&self, id: &str) -> bool {
        self.resolve(id).is_file()
    }

    fn load(&self, id: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(id))
    }
}

/// In-memory script store
#[derive(Debug, Default)]
pub struct MemoryLoader {
    scripts: RwLock<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a script under `id`
    pub fn insert(&self, id: impl Into<String>, source: impl Into<String>) {
        self.scripts.write().insert(id.into(), source.into());
    }

    pub fn with_script(self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(id, source);
        self
    }

    pub fn remove(&self, id: &str) -> Option<String> {
        self.scripts.write().remove(id)
    }
}

impl ResourceLoader for MemoryLoader {
    fn exists(&self, id: &str) -> bool {
        self.scripts.read().contains_key(id)
    }

    fn load(&self, id: &str) -> io::Result<String> {
        self.scripts.read().get(id).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no script registered as {id}"))
        })
    }
}
