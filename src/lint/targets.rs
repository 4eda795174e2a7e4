use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use super::types::{LintConfig, Target};

/// Turns command-line paths into dispatch targets.
///
/// Files named explicitly are always included. Directories are walked with
/// gitignore support and filtered by the `include` globs.
pub struct TargetCollector {
    include: GlobSet,
    config: Arc<LintConfig>,
}

impl TargetCollector {
    pub fn new(include: &[String], config: Arc<LintConfig>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include {
            builder.add(Glob::new(pattern).with_context(|| format!("invalid include glob '{pattern}'"))?);
        }
        Ok(Self {
            include: builder.build()?,
            config,
        })
    }

    pub fn collect(&self, paths: &[PathBuf]) -> Result<Vec<Target>> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                self.walk(path, &mut files);
            } else if path.exists() {
                files.push(path.clone());
            } else {
                anyhow::bail!("No files matching '{}' were found.", path.display());
            }
        }
        files.sort();
        files.dedup();

        Ok(files
            .into_iter()
            .map(|path| Target::new(path, Arc::clone(&self.config)))
            .collect())
    }

    fn walk(&self, root: &Path, files: &mut Vec<PathBuf>) {
        for entry in WalkBuilder::new(root).build() {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                        continue;
                    }
                    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                    if self.include.is_empty() || self.include.is_match(relative) {
                        files.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => tracing::warn!("walk error: {e}"),
            }
        }
    }
}
