use anyhow::Result;
use ignore::WalkBuilder;
use log::debug;
use std::path::{Path, PathBuf};

use crate::config::IngestConfig;

/// Selects the source files of a checkout that get chunked and embedded.
#[derive(Debug, Clone)]
pub struct Indexer {
    exclude_dirs: Vec<String>,
    exclude_files: Vec<String>,
    include_extensions: Vec<String>,
}

impl Indexer {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            exclude_dirs: config.ignore_directories.clone(),
            exclude_files: config.ignore_files.clone(),
            include_extensions: config
                .include_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
        }
    }

    /// Candidate files under `root`, sorted by path.
    pub fn index_directory(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let exclude_dirs = self.exclude_dirs.clone();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .map(|name| exclude_dirs.iter().any(|dir| dir == name))
                        .unwrap_or(false))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.should_include(entry.path()) {
                files.push(entry.into_path());
            }
        }

        debug!("Found {} candidate files under {}", files.len(), root.display());
        Ok(files)
    }

    fn should_include(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.exclude_files.iter().any(|f| f == file_name) {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.include_extensions.iter().any(|valid| valid == ext))
            .unwrap_or(false)
    }
}

/// Path of `file` relative to `root`, rendered with a leading `/`.
pub fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}
