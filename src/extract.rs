use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{ArchiveBundle, ArchiveFormat, archive_stem};
use crate::error::AggregatorError;
use crate::fs_util;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    /// Directories created under the destination, in extraction order.
    pub extracted: Vec<PathBuf>,
    /// Inputs or nested archives that were skipped, with the reason.
    pub skipped: Vec<SkippedArchive>,
    /// Number of nested passes run after the top-level inputs.
    pub nested_passes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedArchive {
    pub path: PathBuf,
    pub reason: String,
}

/// Recursively unpacks input bundles into a scratch tree.
pub struct Extractor<'a> {
    config: &'a ResolvedConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self { config }
    }

    /// Extracts every input, then keeps extracting archives found inside the
    /// destination until a full pass finds nothing new.
    pub fn extract_all(
        &self,
        inputs: &[ArchiveBundle],
        dest_root: &Path,
    ) -> Result<ExtractionReport, AggregatorError> {
        std::fs::create_dir_all(dest_root)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let mut report = ExtractionReport::default();

        for bundle in inputs {
            match bundle.format() {
                ArchiveFormat::Unsupported => {
                    warn!(path = %bundle.path().display(), "unsupported input format, skipping");
                    report.skipped.push(SkippedArchive {
                        path: bundle.path().to_path_buf(),
                        reason: "unsupported format".to_string(),
                    });
                }
                ArchiveFormat::Directory => {
                    let target = unique_target(dest_root, &bundle.stem(), None);
                    info!(path = %bundle.path().display(), "copying input directory");
                    fs_util::copy_dir_filtered(bundle.path(), &target, &|_| false)?;
                    report.extracted.push(target);
                }
                format => {
                    let target = unique_target(
                        dest_root,
                        &bundle.stem(),
                        Some(file_name_token(bundle.path())),
                    );
                    self.extract_one(bundle.path(), format, &target, &mut report)?;
                }
            }
        }

        let mut processed = HashSet::new();
        let max_passes = self.config.config.max_extraction_passes;
        loop {
            let pending = fs_util::walk_files(dest_root)
                .into_iter()
                .filter(|path| ArchiveFormat::detect(path).is_archive())
                .filter(|path| !processed.contains(path))
                .collect::<Vec<_>>();
            if pending.is_empty() {
                break;
            }
            if report.nested_passes == max_passes {
                warn!(
                    remaining = pending.len(),
                    "stopping nested extraction after {max_passes} passes"
                );
                break;
            }
            report.nested_passes += 1;
            info!(
                pass = report.nested_passes,
                archives = pending.len(),
                "extracting nested archives"
            );
            for archive in pending {
                processed.insert(archive.clone());
                let producer = archive
                    .strip_prefix(dest_root)
                    .ok()
                    .and_then(|relative| relative.components().next())
                    .map(|component| component.as_os_str().to_string_lossy().to_string());
                let stem = archive_stem(&archive);
                let fallback = producer
                    .filter(|producer| producer != &stem)
                    .map(|producer| format!("{producer}_{stem}"));
                let target = unique_target(dest_root, &stem, fallback);
                let format = ArchiveFormat::detect(&archive);
                self.extract_one(&archive, format, &target, &mut report)?;
            }
        }

        Ok(report)
    }

    fn extract_one(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        target: &Path,
        report: &mut ExtractionReport,
    ) -> Result<(), AggregatorError> {
        info!(path = %archive.display(), format = %format, target = %target.display(), "extracting");
        match fs_util::extract_archive(archive, format, target) {
            Ok(()) => {
                report.extracted.push(target.to_path_buf());
                Ok(())
            }
            Err(AggregatorError::ArchiveCorrupt { path, message }) => {
                warn!(path = %path.display(), "archive could not be read, skipping: {message}");
                report.skipped.push(SkippedArchive {
                    path,
                    reason: message,
                });
                Ok(())
            }
            Err(AggregatorError::ArchiveWrite { path, message })
                if self.config.is_benign_extraction_error(&message) =>
            {
                warn!(path = %path.display(), "archive extracted with warnings: {message}");
                report.extracted.push(target.to_path_buf());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// `dest/<stem>`, then `dest/<producer>_<stem>`, then numbered suffixes.
/// `dest_root/<stem>`, else `dest_root/<fallback>` named after the
/// producing archive, else a numbered variant.
fn unique_target(dest_root: &Path, stem: &str, fallback: Option<String>) -> PathBuf {
    let direct = dest_root.join(stem);
    if !direct.exists() {
        return direct;
    }
    let base = fallback.unwrap_or_else(|| stem.to_string());
    let candidate = dest_root.join(&base);
    if !candidate.exists() {
        return candidate;
    }
    (2usize..)
        .map(|n| dest_root.join(format!("{base}_{n}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// `run.zip` becomes `run_zip`.
fn file_name_token(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().replace('.', "_"))
        .unwrap_or_default()
}
