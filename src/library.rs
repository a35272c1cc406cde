//! The built, read-only collection of query descriptors.
//!
//! A [`QueryLibrary`] is constructed once at startup from one or more sources
//! (directory trees of `.sql` files, or literal strings) and never mutates
//! afterwards, so lookups are safe from any number of threads without
//! locking. Rebuilding means constructing a new library.

use crate::error::{Result, StashError};
use crate::parse::{parse_source, QueryDescriptor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A source of annotated SQL statements.
#[derive(Debug, Clone)]
pub enum Source {
    /// A directory tree; files with the configured extension are collected
    /// recursively, one category per file.
    Dir(PathBuf),
    /// A single file; the category is the file stem.
    File(PathBuf),
    /// A literal string with an optional category name.
    Literal {
        category: Option<String>,
        sql: String,
    },
}

impl Source {
    /// Convenience constructor for a directory source.
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self::Dir(path.into())
    }

    /// Convenience constructor for a file source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Convenience constructor for an unnamed literal source.
    pub fn literal(sql: impl Into<String>) -> Self {
        Self::Literal {
            category: None,
            sql: sql.into(),
        }
    }

    /// Convenience constructor for a named literal source.
    pub fn named_literal(category: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Literal {
            category: Some(category.into()),
            sql: sql.into(),
        }
    }
}

/// Options controlling library construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// File extension collected from directory sources (without the dot).
    pub extension: String,
    /// Tolerate sources that contain zero recognized statements.
    pub allow_empty: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            extension: "sql".to_string(),
            allow_empty: false,
        }
    }
}

/// Category used for literal sources without a name.
pub const INLINE_CATEGORY: &str = "<inline>";

/// An immutable registry of query descriptors, grouped by category and
/// indexed by query name.
#[derive(Debug, Default)]
pub struct QueryLibrary {
    categories: HashMap<String, HashMap<String, QueryDescriptor>>,
}

impl QueryLibrary {
    /// Builds a library from the given sources.
    ///
    /// Fails if a source path does not exist, if a source yields zero
    /// statements (unless `allow_empty` is set), or if two statements map to
    /// the same (category, name) pair.
    pub fn build(sources: &[Source], options: &BuildOptions) -> Result<Self> {
        let mut library = Self::default();
        for source in sources {
            match source {
                Source::Dir(path) => library.add_dir(path, options)?,
                Source::File(path) => {
                    let category = file_category(path, None)?;
                    library.add_file(path, &category, options)?;
                }
                Source::Literal { category, sql } => {
                    let category = category.as_deref().unwrap_or(INLINE_CATEGORY);
                    let descriptors = parse_source(sql, INLINE_CATEGORY)?;
                    if descriptors.is_empty() && !options.allow_empty {
                        return Err(StashError::config(
                            "literal source contains no recognized statements",
                        ));
                    }
                    library.insert_all(category, INLINE_CATEGORY, descriptors)?;
                }
            }
        }
        debug!(
            categories = library.categories.len(),
            queries = library.len(),
            "query library built"
        );
        Ok(library)
    }

    /// Builds a library from a single literal string.
    pub fn from_literal(sql: &str, options: &BuildOptions) -> Result<Self> {
        Self::build(&[Source::literal(sql)], options)
    }

    /// Builds a library from a single directory.
    pub fn from_dir(path: impl Into<PathBuf>, options: &BuildOptions) -> Result<Self> {
        Self::build(&[Source::Dir(path.into())], options)
    }

    /// Looks up a descriptor by category and name.
    pub fn get(&self, category: &str, name: &str) -> Result<&QueryDescriptor> {
        self.categories
            .get(category)
            .and_then(|queries| queries.get(name))
            .ok_or_else(|| StashError::unknown_query(category, name))
    }

    /// Returns the category names, unordered.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Returns the query names in one category, unordered.
    pub fn names(&self, category: &str) -> impl Iterator<Item = &str> {
        self.categories
            .get(category)
            .into_iter()
            .flat_map(|queries| queries.keys().map(String::as_str))
    }

    /// Iterates every descriptor with its category.
    pub fn descriptors(&self) -> impl Iterator<Item = (&str, &QueryDescriptor)> {
        self.categories
            .iter()
            .flat_map(|(category, queries)| {
                queries.values().map(move |d| (category.as_str(), d))
            })
    }

    /// Total number of queries across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(HashMap::len).sum()
    }

    /// True if the library holds no queries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_dir(&mut self, root: &Path, options: &BuildOptions) -> Result<()> {
        if !root.is_dir() {
            return Err(StashError::config(format!(
                "query source directory does not exist: {}",
                root.display()
            )));
        }
        let before = self.len();
        self.walk_dir(root, root, options)?;
        if self.len() == before && !options.allow_empty {
            return Err(StashError::config(format!(
                "no recognized statements under {}",
                root.display()
            )));
        }
        Ok(())
    }

    fn walk_dir(&mut self, root: &Path, dir: &Path, options: &BuildOptions) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            StashError::config(format!("cannot read directory {}: {e}", dir.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        // Deterministic build order, so error reporting is stable.
        paths.sort();

        for path in paths {
            if path.is_dir() {
                self.walk_dir(root, &path, options)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some(options.extension.as_str())
            {
                let category = file_category(&path, Some(root))?;
                self.add_file(&path, &category, options)?;
            }
        }
        Ok(())
    }

    fn add_file(&mut self, path: &Path, category: &str, options: &BuildOptions) -> Result<()> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StashError::config(format!("cannot read {origin}: {e}")))?;
        let descriptors = parse_source(&text, &origin)?;
        if descriptors.is_empty() && !options.allow_empty {
            return Err(StashError::config(format!(
                "{origin} contains no recognized statements"
            )));
        }
        debug!(category, file = %origin, queries = descriptors.len(), "parsed query file");
        self.insert_all(category, &origin, descriptors)
    }

    fn insert_all(
        &mut self,
        category: &str,
        origin: &str,
        descriptors: Vec<QueryDescriptor>,
    ) -> Result<()> {
        let queries = self.categories.entry(category.to_string()).or_default();
        for descriptor in descriptors {
            if queries.contains_key(&descriptor.name) {
                return Err(StashError::parse(
                    origin,
                    format!(
                        "duplicate query name '{}' in category '{category}'",
                        descriptor.name
                    ),
                ));
            }
            queries.insert(descriptor.name.clone(), descriptor);
        }
        Ok(())
    }
}

/// Derives the category for a file: its path relative to `root` (or just the
/// stem when no root applies), extension stripped, separators replaced by `.`.
fn file_category(path: &Path, root: Option<&Path>) -> Result<String> {
    let relative = match root {
        Some(root) => path.strip_prefix(root).unwrap_or(path),
        None => Path::new(
            path.file_name()
                .ok_or_else(|| StashError::config(format!("not a file: {}", path.display())))?,
        ),
    };
    let stripped = relative.with_extension("");
    let parts: Vec<String> = stripped
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return Err(StashError::config(format!(
            "cannot derive a category from {}",
            path.display()
        )));
    }
    Ok(parts.join("."))
}
