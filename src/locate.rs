use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info};

use crate::classify::RoleClassifier;
use crate::config::ResolvedConfig;
use crate::domain::DirectoryRole;
use crate::error::AggregatorError;
use crate::fs_util;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexedKind {
    PrimaryDir,
    CnvDir,
    CnvCalls,
    RunMetadata,
    SampleMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateSample {
    pub sample: String,
    pub kind: IndexedKind,
    pub replaced: PathBuf,
    pub kept: PathBuf,
}

/// Per-sample lookup tables built once and then read by the resolver.
///
/// Duplicate identifiers follow a last-writer-wins policy: the entry seen
/// later in walk order replaces the earlier one. Each replacement is logged
/// at error level and recorded in `duplicates` so the operator sees it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleIndex {
    pub primary_dirs: BTreeMap<String, PathBuf>,
    pub cnv_dirs: BTreeMap<String, PathBuf>,
    pub cnv_calls: BTreeMap<String, PathBuf>,
    pub run_metadata: BTreeMap<String, PathBuf>,
    pub sample_metadata: BTreeMap<String, PathBuf>,
    pub duplicates: Vec<DuplicateSample>,
}

impl SampleIndex {
    fn insert(&mut self, kind: IndexedKind, sample: String, path: PathBuf) {
        let map = match kind {
            IndexedKind::PrimaryDir => &mut self.primary_dirs,
            IndexedKind::CnvDir => &mut self.cnv_dirs,
            IndexedKind::CnvCalls => &mut self.cnv_calls,
            IndexedKind::RunMetadata => &mut self.run_metadata,
            IndexedKind::SampleMetadata => &mut self.sample_metadata,
        };
        if let Some(replaced) = map.insert(sample.clone(), path.clone()) {
            if replaced == path {
                return;
            }
            error!(
                sample = %sample,
                kind = ?kind,
                replaced = %replaced.display(),
                kept = %path.display(),
                "duplicate sample identifier; keeping the last one seen"
            );
            self.duplicates.push(DuplicateSample {
                sample,
                kind,
                replaced,
                kept: path,
            });
        }
    }
}

pub struct Locator<'a> {
    config: &'a ResolvedConfig,
    classifier: RoleClassifier<'a>,
}

impl<'a> Locator<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self {
            config,
            classifier: RoleClassifier::new(config),
        }
    }

    /// Indexes the primary-output area, then the catch-all area. Large
    /// intermediate files inside CNV outputs are deleted along the way
    /// (subject to the workspace's no-clean mode).
    pub fn build(&self, workspace: &Workspace) -> Result<SampleIndex, AggregatorError> {
        let mut index = SampleIndex::default();
        for area in [workspace.primary_area(), workspace.catch_all_area()] {
            if area.as_std_path().exists() {
                self.index_area(area.as_std_path(), workspace, &mut index)?;
            }
        }
        info!(
            primary = index.primary_dirs.len(),
            cnv = index.cnv_dirs.len(),
            cnv_calls = index.cnv_calls.len(),
            run_metadata = index.run_metadata.len(),
            sample_metadata = index.sample_metadata.len(),
            "sample index built"
        );
        Ok(index)
    }

    fn index_area(
        &self,
        area: &Path,
        workspace: &Workspace,
        index: &mut SampleIndex,
    ) -> Result<(), AggregatorError> {
        let config = &self.config.config;
        for dir in fs_util::walk_dirs(area) {
            let probe = self.classifier.probe(&dir)?;
            match self.classifier.classify(&probe).role {
                DirectoryRole::PrimaryOutput => {
                    let sample = strip_suffix(&probe.name, &config.primary_suffix);
                    index.insert(IndexedKind::PrimaryDir, sample, dir.clone());
                }
                DirectoryRole::CnvOutput => {
                    let sample = strip_suffix(&probe.name, &config.cnv_suffix);
                    purge_large_intermediates(self.config, &dir, workspace)?;
                    // Older producers wrote an unrelated base name into the
                    // calls file, so the key comes from the directory.
                    if let Some(calls) = probe
                        .listing
                        .files
                        .iter()
                        .find(|name| name.ends_with(config.cnv_calls_suffix.as_str()))
                    {
                        index.insert(IndexedKind::CnvCalls, sample.clone(), dir.join(calls));
                    }
                    index.insert(IndexedKind::CnvDir, sample, dir.clone());
                }
                DirectoryRole::ClassificationOutput | DirectoryRole::Unclassified => {}
            }
        }

        for file in fs_util::walk_files(area) {
            let Some(name) = file.file_name().map(|name| name.to_string_lossy().to_string()) else {
                continue;
            };
            if let Some(sample) = name.strip_suffix(config.run_metadata_suffix.as_str()) {
                index.insert(IndexedKind::RunMetadata, sample.to_string(), file.clone());
            } else if let Some(sample) = name.strip_suffix(config.sample_metadata_suffix.as_str()) {
                index.insert(IndexedKind::SampleMetadata, sample.to_string(), file.clone());
            }
        }
        Ok(())
    }
}

/// Deletes files under `dir` matching the purge patterns. Returns how many
/// were removed.
pub fn purge_large_intermediates(
    config: &ResolvedConfig,
    dir: &Path,
    workspace: &Workspace,
) -> Result<usize, AggregatorError> {
    let mut removed = 0;
    for file in fs_util::walk_files(dir) {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if config.is_large_intermediate(&name) && workspace.remove_file(&file)? {
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn strip_suffix(name: &str, suffix: &str) -> String {
    name.strip_suffix(suffix).unwrap_or(name).to_string()
}
