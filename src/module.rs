// ABOUTME: Process-wide module cache and import path resolution for `import`

use crate::env::Environment;
use crate::error::{ErrorKind, LoadError, PyRafError};
use crate::token::Span;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Shared by the evaluator and the compiler/VM so `import` behaves
/// identically under both engines: canonical path -> the module's exported
/// (global) environment, populated the first time the module is imported.
pub struct ModuleCache {
    loaded: RefCell<HashMap<PathBuf, Rc<Environment>>>,
    in_progress: RefCell<HashSet<PathBuf>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        ModuleCache {
            loaded: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    pub fn resolve(base_dir: &Path, import_path: &str) -> PathBuf {
        base_dir.join(import_path)
    }

    pub fn canonicalize(path: &Path) -> Result<PathBuf, LoadError> {
        path.canonicalize().map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn get(&self, canonical: &Path) -> Option<Rc<Environment>> {
        self.loaded.borrow().get(canonical).cloned()
    }

    pub fn begin(&self, canonical: &Path, span: Span) -> Result<(), PyRafError> {
        if self.in_progress.borrow().contains(canonical) {
            return Err(PyRafError::new(
                ErrorKind::ImportError {
                    message: format!("cyclic import of '{}'", canonical.display()),
                },
                span,
            ));
        }
        self.in_progress.borrow_mut().insert(canonical.to_path_buf());
        Ok(())
    }

    pub fn finish(&self, canonical: &Path, env: Rc<Environment>) {
        self.in_progress.borrow_mut().remove(canonical);
        self.loaded.borrow_mut().insert(canonical.to_path_buf(), env);
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn read_source(path: &Path) -> Result<String, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(raw.strip_prefix('\u{FEFF}').map(str::to_string).unwrap_or(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_relative_to_importing_dir() {
        let base = Path::new("/scripts/lib");
        let resolved = ModuleCache::resolve(base, "m.raf");
        assert_eq!(resolved, Path::new("/scripts/lib/m.raf"));
    }

    #[test]
    fn begin_detects_cycle() {
        let cache = ModuleCache::new();
        let path = PathBuf::from("/tmp/pyraf_cycle_test.raf");
        cache.begin(&path, Span::new(1, 1)).unwrap();
        let err = cache.begin(&path, Span::new(1, 1)).unwrap_err();
        assert_eq!(err.kind.label(), "ImportError");
    }

    #[test]
    fn finish_clears_in_progress_and_populates_cache() {
        let cache = ModuleCache::new();
        let path = PathBuf::from("/tmp/pyraf_finish_test.raf");
        cache.begin(&path, Span::new(1, 1)).unwrap();
        let env = Environment::new();
        cache.finish(&path, env);
        assert!(cache.get(&path).is_some());
        // no longer "in progress", so importing it again does not error
        assert!(cache.begin(&path, Span::new(1, 1)).is_ok());
    }

    #[test]
    fn read_source_strips_bom() {
        let path = std::env::temp_dir().join("pyraf_module_bom_test.raf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all("\u{FEFF}print(\"hi\");".as_bytes()).unwrap();
        let src = read_source(&path).unwrap();
        assert_eq!(src, "print(\"hi\");");
        std::fs::remove_file(&path).ok();
    }
}
