use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::AggregatorError;

pub const SCRATCH_DIR: &str = "extracted_from_zips";
pub const RESULTS_DIR: &str = "results";
pub const PRIMARY_AREA: &str = "AA_outputs";
pub const CATCH_ALL_AREA: &str = "other_files";
pub const MANIFEST_FILE: &str = "run.json";
pub const TABLE_STEM: &str = "aggregated_results";

/// Per-run directory layout. One workspace belongs to exactly one run;
/// callers serialize runs that share a root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
    output_name: String,
    no_clean: bool,
}

impl Workspace {
    pub fn new(root: Utf8PathBuf, output_name: impl Into<String>) -> Self {
        Self {
            root,
            output_name: output_name.into(),
            no_clean: false,
        }
    }

    pub fn in_current_dir(output_name: impl Into<String>) -> Result<Self, AggregatorError> {
        let cwd =
            std::env::current_dir().map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| AggregatorError::Filesystem("non-utf8 working directory".to_string()))?;
        Ok(Self::new(root, output_name))
    }

    pub fn with_no_clean(mut self, no_clean: bool) -> Self {
        self.no_clean = no_clean;
        self
    }

    pub fn no_clean(&self) -> bool {
        self.no_clean
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn scratch_root(&self) -> Utf8PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn results_root(&self) -> Utf8PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn primary_area(&self) -> Utf8PathBuf {
        self.results_root().join(PRIMARY_AREA)
    }

    pub fn catch_all_area(&self) -> Utf8PathBuf {
        self.results_root().join(CATCH_ALL_AREA)
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.results_root().join(MANIFEST_FILE)
    }

    pub fn table_path(&self, extension: &str) -> Utf8PathBuf {
        self.results_root().join(format!("{TABLE_STEM}.{extension}"))
    }

    pub fn deliverable_path(&self) -> Utf8PathBuf {
        self.root.join(format!("{}.tar.gz", self.output_name))
    }

    pub fn ensure(&self) -> Result<(), AggregatorError> {
        for dir in [
            self.scratch_root(),
            self.primary_area(),
            self.catch_all_area(),
        ] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| AggregatorError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// Clears whatever an earlier run left under this root: scratch, the
    /// results root and the deliverable. Runs regardless of no-clean mode,
    /// which only governs this run's own intermediates.
    pub fn reset(&self) -> Result<(), AggregatorError> {
        for dir in [self.scratch_root(), self.results_root()] {
            if dir.exists() {
                info!(path = %dir, "removing state left by an earlier run");
                fs::remove_dir_all(dir.as_std_path())
                    .map_err(|err| AggregatorError::Filesystem(format!("remove {dir}: {err}")))?;
            }
        }
        self.remove_deliverable()?;
        Ok(())
    }

    /// The deliverable is never an intermediate, so no-clean mode does not
    /// keep it.
    pub fn remove_deliverable(&self) -> Result<bool, AggregatorError> {
        let deliverable = self.deliverable_path();
        if !deliverable.is_file() {
            return Ok(false);
        }
        info!(path = %deliverable, "removing deliverable");
        fs::remove_file(deliverable.as_std_path())
            .map_err(|err| AggregatorError::Filesystem(format!("remove {deliverable}: {err}")))?;
        Ok(true)
    }

    /// Deletes the scratch tree and the intermediate results root.
    pub fn purge(&self) -> Result<(), AggregatorError> {
        if self.no_clean {
            info!("no-clean mode: keeping {} and {}", self.scratch_root(), self.results_root());
            return Ok(());
        }
        for dir in [self.scratch_root(), self.results_root()] {
            self.remove_dir(dir.as_std_path())?;
        }
        Ok(())
    }

    /// Removes one file. Every deletion outside the final purge goes
    /// through here so no-clean mode holds everywhere.
    pub fn remove_file(&self, path: &Path) -> Result<bool, AggregatorError> {
        if self.no_clean {
            debug!(path = %path.display(), "no-clean mode: keeping file");
            return Ok(false);
        }
        fs::remove_file(path)
            .map_err(|err| AggregatorError::Filesystem(format!("remove {}: {err}", path.display())))?;
        Ok(true)
    }

    pub fn remove_dir(&self, path: &Path) -> Result<bool, AggregatorError> {
        if self.no_clean || !path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(path)
            .map_err(|err| AggregatorError::Filesystem(format!("remove {}: {err}", path.display())))?;
        Ok(true)
    }

    /// Path relative to the results root, as stored in the manifest.
    pub fn relative_to_results(&self, path: &Path) -> Option<String> {
        let results = self.results_root();
        let relative = path.strip_prefix(results.as_std_path()).ok()?;
        let relative = Utf8Path::from_path(relative)?;
        if relative.as_str().is_empty() {
            return None;
        }
        Some(relative.as_str().replace('\\', "/"))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), AggregatorError> {
        let parent = path
            .parent()
            .ok_or_else(|| AggregatorError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".amplicon-agg-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(temp: &tempfile::TempDir) -> Workspace {
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Workspace::new(root, "cohort")
    }

    #[test]
    fn layout_paths() {
        let temp = tempfile::tempdir().unwrap();
        let ws = workspace(&temp);
        assert!(ws.primary_area().ends_with("results/AA_outputs"));
        assert!(ws.catch_all_area().ends_with("results/other_files"));
        assert!(ws.manifest_path().ends_with("results/run.json"));
        assert!(ws.table_path("csv").ends_with("results/aggregated_results.csv"));
        assert!(ws.deliverable_path().ends_with("cohort.tar.gz"));
    }

    #[test]
    fn relative_paths_are_rooted_at_results() {
        let temp = tempfile::tempdir().unwrap();
        let ws = workspace(&temp);
        let inside = ws.primary_area().join("S1/S1_AA_results/S1_summary.txt");
        assert_eq!(
            ws.relative_to_results(inside.as_std_path()).as_deref(),
            Some("AA_outputs/S1/S1_AA_results/S1_summary.txt")
        );
        assert_eq!(ws.relative_to_results(Path::new("/elsewhere/file")), None);
    }

    #[test]
    fn reset_clears_earlier_state_even_in_no_clean_mode() {
        let temp = tempfile::tempdir().unwrap();
        let ws = workspace(&temp).with_no_clean(true);
        ws.ensure().unwrap();
        fs::write(ws.primary_area().join("stale.txt").as_std_path(), "x").unwrap();
        fs::write(ws.deliverable_path().as_std_path(), "x").unwrap();

        ws.reset().unwrap();
        assert!(!ws.scratch_root().exists());
        assert!(!ws.results_root().exists());
        assert!(!ws.deliverable_path().exists());
        ws.reset().unwrap();
    }

    #[test]
    fn purge_respects_no_clean() {
        let temp = tempfile::tempdir().unwrap();
        let ws = workspace(&temp).with_no_clean(true);
        ws.ensure().unwrap();
        ws.purge().unwrap();
        assert!(ws.scratch_root().as_std_path().exists());

        let ws = ws.with_no_clean(false);
        ws.purge().unwrap();
        assert!(!ws.scratch_root().as_std_path().exists());
        assert!(!ws.results_root().as_std_path().exists());
    }
}
