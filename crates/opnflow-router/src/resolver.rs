//! File resolution: finds input files from fuzzy parameters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, warn};

use crate::decision::Params;
use crate::error::RouterError;
use crate::payload::{render_with, ResolvedFiles};

/// Searches one base directory with parameterised glob patterns.
#[derive(Debug, Clone)]
pub struct FileResolver {
    base_path: PathBuf,
}

/// Metadata about a resolved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub exists: bool,
    pub path: String,
    pub size: Option<u64>,
    pub name: Option<String>,
}

impl FileResolver {
    /// Create a resolver rooted at `base_path`, which must exist.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, RouterError> {
        let base_path = base_path.as_ref();
        let base_path = base_path.canonicalize().map_err(|_| {
            RouterError::FileResolution(format!(
                "Base path does not exist: {}",
                base_path.display()
            ))
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve each pattern to the first lexical match under the base path.
    ///
    /// `{param}` placeholders are filled from `params` (glob metacharacters
    /// in values are matched literally). A pattern with no match resolves
    /// to `None`; a placeholder with no value is an error.
    pub fn resolve_files(
        &self,
        params: &Params,
        patterns: &BTreeMap<String, String>,
    ) -> Result<ResolvedFiles, RouterError> {
        let base = Pattern::escape(&self.base_path.to_string_lossy());
        let mut resolved = ResolvedFiles::new();

        for (file_type, pattern) in patterns {
            let filled = render_with(pattern, params, Pattern::escape).map_err(|e| {
                RouterError::FileResolution(format!(
                    "Cannot fill pattern '{pattern}' for {file_type}: {e}"
                ))
            })?;
            let search = format!("{base}/{filled}");

            let entries = glob::glob(&search).map_err(|e| {
                RouterError::FileResolution(format!("Invalid pattern '{pattern}': {e}"))
            })?;
            let mut matches: Vec<PathBuf> = entries
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(error = %e, "Unreadable path during file resolution");
                        None
                    }
                })
                .filter(|path| path.is_file())
                .collect();
            matches.sort();

            let hit = matches
                .into_iter()
                .next()
                .map(|path| path.canonicalize().unwrap_or(path));
            debug!(file_type = %file_type, pattern = %filled, found = ?hit, "Resolved file");
            resolved.insert(file_type.clone(), hit);
        }

        Ok(resolved)
    }

    /// Fail if any of `required` resolved to nothing.
    pub fn validate_resolved_files(
        resolved: &ResolvedFiles,
        required: &[String],
    ) -> Result<(), RouterError> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|t| !matches!(resolved.get(t.as_str()), Some(Some(_))))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(RouterError::FileResolution(format!(
            "Could not resolve required files: {}",
            missing.join(", ")
        )))
    }

    /// Existence, size and file name of `path`.
    pub fn file_info(path: &Path) -> FileInfo {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => FileInfo {
                exists: true,
                path: path.display().to_string(),
                size: Some(meta.len()),
                name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            },
            _ => FileInfo {
                exists: false,
                path: path.display().to_string(),
                size: None,
                name: None,
            },
        }
    }
}
