use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{NameRemap, ResolvedConfig};
use crate::error::AggregatorError;
use crate::fs_util;
use crate::locate::{SampleIndex, purge_large_intermediates};
use crate::manifest::Manifest;
use crate::record::{ArtifactField, ArtifactKind, ListField, ListKind, SampleRecord, decode_list};
use crate::repackage::include_in_deliverable;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub reference: Option<String>,
    pub resolved_fields: usize,
    pub not_provided_fields: usize,
    pub packaged_dirs: usize,
    pub unmapped_samples: Vec<String>,
}

/// Rewrites every record of a manifest in place: list columns decoded,
/// artifact paths resolved relative to the results root, sample
/// directories packaged, display names applied.
pub struct PathResolver<'a> {
    config: &'a ResolvedConfig,
    workspace: &'a Workspace,
    index: &'a SampleIndex,
    remap: Option<&'a NameRemap>,
}

#[derive(Debug, Clone)]
struct Packaged {
    primary: ArtifactField,
    cnv: ArtifactField,
}

impl<'a> PathResolver<'a> {
    pub fn new(
        config: &'a ResolvedConfig,
        workspace: &'a Workspace,
        index: &'a SampleIndex,
        remap: Option<&'a NameRemap>,
    ) -> Self {
        Self {
            config,
            workspace,
            index,
            remap,
        }
    }

    /// Fails with [`AggregatorError::MultipleReferenceGenomes`] as soon as a
    /// second reference version shows up; every other problem is per field.
    pub fn resolve(&self, manifest: &mut Manifest) -> Result<ResolveReport, AggregatorError> {
        let mut report = ResolveReport::default();
        let mut references = BTreeSet::new();
        let mut packaged: HashMap<String, Packaged> = HashMap::new();
        let mut unmapped = BTreeSet::new();

        for group in &mut manifest.groups {
            debug!(key = %group.key, sample = %group.sample_name, "resolving");
            for record in &mut group.records {
                let sample = record.sample_name.clone();
                self.decode_lists(record);

                if let Some(reference) = &record.reference_version {
                    references.insert(reference.clone());
                    if references.len() > 1 {
                        return Err(AggregatorError::MultipleReferenceGenomes(
                            references.into_iter().collect(),
                        ));
                    }
                }

                record.feature_bed = self.resolve_feature_bed(&group.source_dir, &record.feature_bed);
                for kind in ArtifactKind::FILES {
                    let resolved = self.resolve_artifact(kind, &sample, &group.source_dir, record.artifact(kind));
                    *record.artifact_mut(kind) = resolved;
                }

                let dirs = packaged
                    .entry(sample.clone())
                    .or_insert_with(|| self.package_sample(&sample));
                record.aa_directory = dirs.primary.clone();
                record.cnv_directory = dirs.cnv.clone();

                for (kind, field) in record.artifacts() {
                    if field.is_resolved() {
                        report.resolved_fields += 1;
                    } else {
                        debug!(sample = %sample, column = kind.column(), "not provided");
                        report.not_provided_fields += 1;
                    }
                }

                if let Some(remap) = self.remap {
                    match remap.get(&sample) {
                        Some(display) => record.sample_name = display.to_string(),
                        None => {
                            if unmapped.insert(sample.clone()) {
                                warn!(sample = %sample, "sample has no entry in the name map");
                            }
                        }
                    }
                }
            }
        }

        report.reference = references.into_iter().next();
        report.packaged_dirs = packaged
            .values()
            .map(|dirs| usize::from(dirs.primary.is_resolved()) + usize::from(dirs.cnv.is_resolved()))
            .sum();
        report.unmapped_samples = unmapped.into_iter().collect();
        info!(
            resolved = report.resolved_fields,
            not_provided = report.not_provided_fields,
            packaged = report.packaged_dirs,
            "paths resolved"
        );
        Ok(report)
    }

    fn decode_lists(&self, record: &mut SampleRecord) {
        let sample = record.sample_name.clone();
        for kind in ListKind::ALL {
            let field = record.list_mut(kind);
            match field {
                Some(ListField::Encoded(raw)) => match decode_list(raw) {
                    Ok(items) => *field = Some(ListField::Items(items)),
                    Err(reason) => {
                        warn!(sample = %sample, column = kind.column(), "could not decode list: {reason}");
                    }
                },
                Some(ListField::Items(_)) => {}
                None => {
                    debug!(sample = %sample, column = kind.column(), "column absent for sample");
                }
            }
        }
    }

    /// Feature BEDs live in the `*_classification_bed_files` folder next to
    /// the result table, whatever path the table recorded.
    fn resolve_feature_bed(&self, source_dir: &Path, field: &ArtifactField) -> ArtifactField {
        let Some(name) = field.referenced().and_then(base_name) else {
            return ArtifactField::NotProvided;
        };
        let suffix = self.config.config.classification_bed_suffix.as_str();
        let bed_dir = fs_util::list_dir(source_dir)
            .ok()
            .and_then(|listing| listing.dirs.into_iter().find(|dir| dir.ends_with(suffix)));
        let resolved = bed_dir
            .map(|dir| source_dir.join(dir).join(name))
            .filter(|candidate| candidate.is_file())
            .and_then(|candidate| self.relative(&candidate));
        match resolved {
            Some(path) => ArtifactField::Resolved(path),
            None => {
                warn!(path = %source_dir.display(), file = name, "feature BED file not found");
                ArtifactField::NotProvided
            }
        }
    }

    fn resolve_artifact(
        &self,
        kind: ArtifactKind,
        sample: &str,
        source_dir: &Path,
        field: &ArtifactField,
    ) -> ArtifactField {
        let artifacts_dir = source_dir.join(&self.config.config.artifacts_dir);
        let direct = field
            .referenced()
            .and_then(base_name)
            .map(|name| artifacts_dir.join(name))
            .filter(|candidate| candidate.is_file());

        let resolved = direct.or_else(|| match kind {
            ArtifactKind::CnvBed => self.cnv_calls_fallback(sample),
            ArtifactKind::RunMetadata => self.index.run_metadata.get(sample).cloned(),
            ArtifactKind::SampleMetadata => self.index.sample_metadata.get(sample).cloned(),
            _ => None,
        });

        match resolved.as_deref().and_then(|path| self.relative(path)) {
            Some(path) => ArtifactField::Resolved(path),
            None => {
                if let Some(referenced) = field.referenced() {
                    warn!(sample = %sample, column = kind.column(), referenced = %referenced, "file not found");
                }
                ArtifactField::NotProvided
            }
        }
    }

    /// Indexed calls file first, then any calls file in the sample's CNV
    /// directory.
    fn cnv_calls_fallback(&self, sample: &str) -> Option<PathBuf> {
        if let Some(calls) = self.index.cnv_calls.get(sample).filter(|path| path.is_file()) {
            return Some(calls.clone());
        }
        let dir = self.index.cnv_dirs.get(sample)?;
        let suffix = self.config.config.cnv_calls_suffix.as_str();
        fs_util::list_dir(dir)
            .ok()?
            .files
            .into_iter()
            .find(|name| name.ends_with(suffix))
            .map(|name| dir.join(name))
    }

    fn package_sample(&self, sample: &str) -> Packaged {
        Packaged {
            primary: self.package_dir(sample, self.index.primary_dirs.get(sample)),
            cnv: self.package_dir(sample, self.index.cnv_dirs.get(sample)),
        }
    }

    fn package_dir(&self, sample: &str, dir: Option<&PathBuf>) -> ArtifactField {
        let Some(dir) = dir.filter(|dir| dir.is_dir()) else {
            return ArtifactField::NotProvided;
        };
        let result = (|| -> Result<Option<String>, AggregatorError> {
            purge_large_intermediates(self.config, dir, self.workspace)?;
            let name = dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| AggregatorError::Filesystem("directory without a name".to_string()))?;
            let archive = dir.with_file_name(format!("{name}.tar.gz"));
            fs_util::write_tar_gz(dir, &name, &archive, &|path, metadata| {
                include_in_deliverable(self.config, path, metadata)
            })?;
            Ok(self.relative(&archive))
        })();
        match result {
            Ok(Some(path)) => ArtifactField::Resolved(path),
            Ok(None) => ArtifactField::NotProvided,
            Err(err) => {
                warn!(sample = %sample, path = %dir.display(), "could not package directory: {err}");
                ArtifactField::NotProvided
            }
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        self.workspace.relative_to_results(path)
    }
}

/// Last path component, accepting either separator.
fn base_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}
