//! JSON Schema loading for evaluation records.
//!
//! Records are validated against `schema/evaluation.schema.json`, embedded
//! into the binary at compile time. Callers may point at another document
//! on disk; the loader keeps those cached by path and reparses when the
//! file's modification time changes.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// The bundled evaluation record schema.
pub const BUNDLED_SCHEMA: &str = include_str!("../schema/evaluation.schema.json");

/// Label reported in errors about the bundled schema.
const BUNDLED_SCHEMA_NAME: &str = "<bundled>/evaluation.schema.json";

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Schema file {} is not valid JSON: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to compile schema: {0}")]
    Compile(String),
}

#[derive(Debug)]
struct CachedSchema {
    modified: Option<SystemTime>,
    document: Arc<Value>,
}

/// Resolves and parses schema documents.
///
/// The loader is owned by the caller for the lifetime of a process or test;
/// there is no global instance.
#[derive(Debug, Default)]
pub struct SchemaLoader {
    bundled: Mutex<Option<Arc<Value>>>,
    cache: Mutex<HashMap<PathBuf, CachedSchema>>,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the schema at `path`, or the bundled one when no path is given.
    ///
    /// # Errors
    ///
    /// * `SchemaError::NotFound` - `path` does not exist
    /// * `SchemaError::Malformed` - the document is not valid JSON
    pub fn load(&self, path: Option<&Path>) -> Result<Arc<Value>, SchemaError> {
        match path {
            Some(path) => self.load_file(path),
            None => self.load_bundled(),
        }
    }

    fn load_bundled(&self) -> Result<Arc<Value>, SchemaError> {
        let mut bundled = self.bundled.lock();
        if let Some(document) = bundled.as_ref() {
            return Ok(Arc::clone(document));
        }

        let document: Value =
            serde_json::from_str(BUNDLED_SCHEMA).map_err(|source| SchemaError::Malformed {
                path: PathBuf::from(BUNDLED_SCHEMA_NAME),
                source,
            })?;
        let document = Arc::new(document);
        tracing::debug!("Loaded bundled evaluation schema");
        *bundled = Some(Arc::clone(&document));
        Ok(document)
    }

    fn load_file(&self, path: &Path) -> Result<Arc<Value>, SchemaError> {
        let path = path.to_path_buf();
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound { path });
            }
            Err(e) => return Err(SchemaError::Io(e)),
        };
        let modified = metadata.modified().ok();

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(&path) {
            if entry.modified.is_some() && entry.modified == modified {
                return Ok(Arc::clone(&entry.document));
            }
        }

        let document = Arc::new(read_schema(&path)?);
        tracing::debug!(path = %path.display(), "Loaded evaluation schema");
        cache.insert(
            path,
            CachedSchema {
                modified,
                document: Arc::clone(&document),
            },
        );
        Ok(document)
    }

    /// Drop every cached document.
    pub fn clear(&self) {
        *self.bundled.lock() = None;
        self.cache.lock().clear();
    }
}

/// Read and parse a schema document without caching.
pub fn read_schema(path: &Path) -> Result<Value, SchemaError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SchemaError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(SchemaError::Io(e)),
    };

    serde_json::from_str(&contents).map_err(|source| SchemaError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_schema_loads() {
        let loader = SchemaLoader::new();
        let schema = loader.load(None).unwrap();
        assert_eq!(schema["type"], "object");
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "metrics"));
    }

    #[test]
    fn test_bundled_schema_matches_shipped_file() {
        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema/evaluation.schema.json");
        let on_disk = read_schema(&shipped).unwrap();
        let bundled = SchemaLoader::new().load(None).unwrap();
        assert_eq!(*bundled, on_disk);
    }

    #[test]
    fn test_missing_schema_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let result = SchemaLoader::new().load(Some(&missing));
        assert!(matches!(result, Err(SchemaError::NotFound { .. })));
    }

    #[test]
    fn test_malformed_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let result = SchemaLoader::new().load(Some(&path));
        assert!(matches!(result, Err(SchemaError::Malformed { .. })));
    }

    #[test]
    fn test_cache_returns_same_document() {
        let loader = SchemaLoader::new();
        let first = loader.load(None).unwrap();
        let second = loader.load(None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reload_after_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(br#"{"type": "object"}"#).unwrap();
        drop(file);

        let loader = SchemaLoader::new();
        let first = loader.load(Some(&path)).unwrap();

        fs::write(&path, r#"{"type": "array"}"#).unwrap();
        loader.clear();
        let second = loader.load(Some(&path)).unwrap();

        assert_eq!(first["type"], "object");
        assert_eq!(second["type"], "array");
    }
}
