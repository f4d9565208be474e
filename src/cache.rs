//! Compiled program cache.
//!
//! Programs are keyed by a SHA-256 of the markup and the options that shaped
//! them. An optional cache directory persists entries as JSON across runs.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::codegen::Program;
use crate::parse::CompileOptions;
use crate::validate::CompilerError;

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub program: Program,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

#[derive(Default)]
pub struct ProgramCache {
    programs: RwLock<HashMap<String, Arc<Program>>>,
    cache_dir: Option<PathBuf>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also persists entries under `cache_dir`.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            if let Err(e) = fs::create_dir_all(&cache_dir) {
                tracing::warn!(dir = %cache_dir.display(), error = %e, "cannot create cache directory");
            }
        }
        Self {
            cache_dir: Some(cache_dir),
            ..Self::default()
        }
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn key(markup: &str, options: &CompileOptions) -> String {
        let options = serde_json::to_string(options).unwrap_or_default();
        Self::compute_hash(&format!("{}\u{0}{}", options, markup))
    }

    fn get_cache_path(&self, hash: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", hash)))
    }

    fn load(&self, hash: &str) -> Option<Program> {
        let cache_path = self.get_cache_path(hash)?;
        let data = fs::read_to_string(&cache_path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(path = %cache_path.display(), error = %e, "cache entry unreadable, discarding");
                fs::remove_file(cache_path).ok();
                return None;
            }
        };
        (entry.hash == hash).then_some(entry.program)
    }

    fn store(&self, hash: &str, program: &Program) {
        let Some(cache_path) = self.get_cache_path(hash) else {
            return;
        };
        let entry = CacheEntry {
            hash: hash.to_string(),
            program: program.clone(),
        };
        if let Ok(data) = serde_json::to_string(&entry) {
            if let Err(e) = fs::write(&cache_path, data) {
                tracing::warn!(path = %cache_path.display(), error = %e, "cannot write cache entry");
            }
        }
    }

    pub fn get(&self, markup: &str, options: &CompileOptions) -> Option<Arc<Program>> {
        let hash = Self::key(markup, options);
        if let Some(program) = self.read().get(&hash) {
            return Some(program.clone());
        }
        let program = Arc::new(self.load(&hash)?);
        self.write().insert(hash, program.clone());
        Some(program)
    }

    /// Returns the cached program or compiles and caches it.
    pub fn get_or_compile(
        &self,
        markup: &str,
        options: &CompileOptions,
    ) -> Result<Arc<Program>, CompilerError> {
        if let Some(program) = self.get(markup, options) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(program);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(file = %options.file_path, "compiling template");
        let program = Program::compile(markup, options)?;
        let hash = Self::key(markup, options);
        self.store(&hash, &program);
        let program = Arc::new(program);
        self.write().insert(hash, program.clone());
        Ok(program)
    }

    /// Compiles many templates in parallel. Results keep the input order.
    pub fn precompile(
        &self,
        sources: &[(String, CompileOptions)],
    ) -> Vec<Result<Arc<Program>, CompilerError>> {
        sources
            .par_iter()
            .map(|(markup, options)| self.get_or_compile(markup, options))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.read().len(),
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Program>>> {
        self.programs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Program>>> {
        self.programs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_markup_compiles_once() {
        let cache = ProgramCache::new();
        let options = CompileOptions::default();
        let a = cache.get_or_compile("<p>{{ name }}</p>", &options).unwrap();
        let b = cache.get_or_compile("<p>{{ name }}</p>", &options).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, entries: 1 });
    }

    #[test]
    fn test_options_are_part_of_the_key() {
        let cache = ProgramCache::new();
        cache.get_or_compile("<p></p>", &CompileOptions::for_file("a.html")).unwrap();
        cache.get_or_compile("<p></p>", &CompileOptions::for_file("b.html")).unwrap();
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_precompile_keeps_order_and_errors() {
        let cache = ProgramCache::new();
        let sources = vec![
            ("<p></p>".to_string(), CompileOptions::for_file("ok.html")),
            ("<p *nope=\"x\"></p>".to_string(), CompileOptions::for_file("bad.html")),
        ];
        let results = cache.precompile(&sources);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().file, "bad.html");
    }

    #[test]
    fn test_disk_entries_survive_a_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompileOptions::default();
        let first = ProgramCache::with_dir(dir.path());
        let compiled = first.get_or_compile("<b>{{ x }}</b>", &options).unwrap();

        let second = ProgramCache::with_dir(dir.path());
        let loaded = second.get("<b>{{ x }}</b>", &options).unwrap();
        assert_eq!(*loaded, *compiled);
    }
}
