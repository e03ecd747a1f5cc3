use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::error::AggregatorError;
use crate::fs_util;
use crate::workspace::{RESULTS_DIR, Workspace};

/// Whether a file may go into a package: excluded raw-read/alignment
/// suffixes and files above the configured size cap stay out.
pub fn include_in_deliverable(config: &ResolvedConfig, path: &Path, metadata: &fs::Metadata) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if config.is_excluded(&name) {
        return false;
    }
    match config.config.max_file_bytes {
        Some(limit) if metadata.len() > limit => {
            warn!(path = %path.display(), size = metadata.len(), limit, "file exceeds size cap; leaving it out");
            false
        }
        _ => true,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deliverable {
    pub path: String,
    pub files: usize,
    pub excluded: usize,
}

pub struct Repackager<'a> {
    config: &'a ResolvedConfig,
}

impl<'a> Repackager<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self { config }
    }

    /// Archives the results root as `<output_name>.tar.gz` rooted at
    /// `results/`, then purges scratch and intermediate results.
    pub fn finish(&self, workspace: &Workspace) -> Result<Deliverable, AggregatorError> {
        let results = workspace.results_root();
        let deliverable = workspace.deliverable_path();
        info!(source = %results, dest = %deliverable, "packaging results");
        let stats = fs_util::write_tar_gz(
            results.as_std_path(),
            RESULTS_DIR,
            deliverable.as_std_path(),
            &|path, metadata| include_in_deliverable(self.config, path, metadata),
        )?;
        workspace.purge()?;
        Ok(Deliverable {
            path: deliverable.to_string(),
            files: stats.files,
            excluded: stats.excluded,
        })
    }

    /// Failure branch. The archive is only ever renamed into place whole;
    /// one that exists at this point is removed so a failed run never
    /// leaves a deliverable behind.
    pub fn abandon(&self, workspace: &Workspace) -> Result<(), AggregatorError> {
        warn!(output = workspace.output_name(), "run failed; no deliverable written");
        workspace.remove_deliverable()?;
        workspace.purge()
    }
}
