//! Discovery Module
//!
//! Recursively scans a directory for template files and compiles them on
//! first use. Templates are named by their path relative to the base
//! directory, without extension and with `/` separators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::cache::ProgramCache;
use crate::codegen::Program;
use crate::parse::CompileOptions;
use crate::validate::CompilerError;

pub const TEMPLATE_EXTENSIONS: &[&str] = &["html", "tpl"];

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Compile(#[from] CompilerError),
    #[error("no template named `{0}`")]
    NotFound(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Recursively find all template files in a directory
fn find_template_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext));
        if known {
            files.push(path.to_path_buf());
        }
    }

    files
}

/// `widgets/card.html` under `base` becomes `widgets/card`.
fn template_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?.with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIBRARY
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TemplateLibrary {
    base_dir: PathBuf,
    templates: BTreeMap<String, TemplateMetadata>,
    cache: ProgramCache,
}

impl TemplateLibrary {
    /// Scans `base_dir`. A missing directory yields an empty library.
    pub fn discover(base_dir: impl Into<PathBuf>) -> Self {
        Self::discover_with_cache(base_dir, ProgramCache::new())
    }

    pub fn discover_with_cache(base_dir: impl Into<PathBuf>, cache: ProgramCache) -> Self {
        let base_dir = base_dir.into();
        let mut templates = BTreeMap::new();

        if base_dir.exists() {
            for path in find_template_files(&base_dir) {
                let Some(name) = template_name(&base_dir, &path) else {
                    continue;
                };
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if let Some(previous) = templates.insert(
                    name.clone(),
                    TemplateMetadata {
                        name: name.clone(),
                        path: path.clone(),
                        size,
                    },
                ) {
                    tracing::warn!(
                        name = %name,
                        kept = %path.display(),
                        shadowed = %previous.path.display(),
                        "two templates share a name"
                    );
                }
            }
        }
        tracing::debug!(dir = %base_dir.display(), count = templates.len(), "templates discovered");

        Self {
            base_dir,
            templates,
            cache,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn metadata(&self, name: &str) -> Option<&TemplateMetadata> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn read(&self, meta: &TemplateMetadata) -> Result<(String, CompileOptions), LibraryError> {
        let markup = fs::read_to_string(&meta.path).map_err(|source| LibraryError::Io {
            path: meta.path.clone(),
            source,
        })?;
        let options = CompileOptions::for_file(meta.path.to_string_lossy());
        Ok((markup, options))
    }

    /// Compiles `name` on first use; later calls hit the cache.
    pub fn get(&self, name: &str) -> Result<Arc<Program>, LibraryError> {
        let meta = self
            .templates
            .get(name)
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))?;
        let (markup, options) = self.read(meta)?;
        Ok(self.cache.get_or_compile(&markup, &options)?)
    }

    /// Compiles every template in parallel, keyed by name.
    pub fn compile_all(&self) -> BTreeMap<String, Result<Arc<Program>, LibraryError>> {
        let mut results = BTreeMap::new();
        let mut sources = Vec::new();
        let mut pending = Vec::new();
        for (name, meta) in &self.templates {
            match self.read(meta) {
                Ok(source) => {
                    sources.push(source);
                    pending.push(name.clone());
                }
                Err(e) => {
                    results.insert(name.clone(), Err(e));
                }
            }
        }
        for (name, result) in pending.into_iter().zip(self.cache.precompile(&sources)) {
            results.insert(name, result.map_err(LibraryError::from));
        }
        results
    }

    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }
}
