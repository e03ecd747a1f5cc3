//! Content-based directory role assignment.
//!
//! Producer versions disagree on directory names, so a role is decided from
//! what a directory contains. Names only raise warnings when they disagree
//! with the content.
//!
//! Classification is split in two: [`RoleClassifier::plan`] walks the
//! scratch tree read-only and produces a [`ClassificationPlan`], then
//! [`RoleClassifier::stage`] copies directories into the staging areas.
//! Nothing is copied while the tree is being walked.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AggregatorConfig, ResolvedConfig};
use crate::domain::DirectoryRole;
use crate::error::AggregatorError;
use crate::fs_util::{self, DirListing};
use crate::workspace::Workspace;

/// Read-only snapshot of one directory, enough to decide its role.
#[derive(Debug, Clone)]
pub struct DirProbe {
    pub path: PathBuf,
    pub name: String,
    pub listing: DirListing,
    /// Summary-suffixed files paired with their first line.
    pub summaries: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Match,
    NoMatch,
    /// Matched the shape of the role but is ambiguous; the directory is
    /// left unclassified.
    Reject(String),
}

type RolePredicate = fn(&DirProbe, &AggregatorConfig) -> Verdict;

/// Evaluated top to bottom, first match wins. Primary output comes first
/// because it claims its whole subtree: the CNV and classification folders
/// that sit next to a primary run belong to that run.
const ROLE_RULES: &[(DirectoryRole, RolePredicate)] = &[
    (DirectoryRole::PrimaryOutput, is_primary_output),
    (DirectoryRole::CnvOutput, is_cnv_output),
    (DirectoryRole::ClassificationOutput, is_classification_output),
];

fn is_primary_output(probe: &DirProbe, config: &AggregatorConfig) -> Verdict {
    if probe.name == config.artifacts_dir {
        return Verdict::NoMatch;
    }
    match probe.summaries.as_slice() {
        [] => Verdict::NoMatch,
        [(_, first_line)] => {
            let marked = first_line
                .as_deref()
                .map(|line| line.starts_with(config.summary_marker.as_str()))
                .unwrap_or(false);
            if marked {
                Verdict::Match
            } else {
                Verdict::NoMatch
            }
        }
        many => Verdict::Reject(format!(
            "{} candidate summary files ({})",
            many.len(),
            many.iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

fn is_cnv_output(probe: &DirProbe, config: &AggregatorConfig) -> Verdict {
    if probe
        .listing
        .files
        .iter()
        .any(|name| name.ends_with(config.cnv_calls_suffix.as_str()))
    {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

fn is_classification_output(probe: &DirProbe, config: &AggregatorConfig) -> Verdict {
    let has_table = probe
        .listing
        .files
        .iter()
        .any(|name| name.ends_with(config.result_table_suffix.as_str()));
    let has_sentinel = probe.listing.dirs.iter().any(|name| *name == config.sentinel_dir);
    let named = probe.name.ends_with(config.classification_suffix.as_str());
    if has_table || has_sentinel || named {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub role: DirectoryRole,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingArea {
    Primary,
    CatchAll,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagingStep {
    pub source: PathBuf,
    pub area: StagingArea,
    pub target_name: String,
    pub role: DirectoryRole,
    /// Subtrees left out of the copy.
    pub skip: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationPlan {
    pub roles: BTreeMap<PathBuf, DirectoryRole>,
    pub steps: Vec<StagingStep>,
}

impl ClassificationPlan {
    pub fn role_of(&self, path: &Path) -> Option<DirectoryRole> {
        self.roles.get(path).copied()
    }

    pub fn staged(&self, area: StagingArea) -> impl Iterator<Item = &StagingStep> {
        self.steps.iter().filter(move |step| step.area == area)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingReport {
    pub primary: Vec<PathBuf>,
    pub catch_all: Vec<PathBuf>,
}

pub struct RoleClassifier<'a> {
    config: &'a ResolvedConfig,
}

impl<'a> RoleClassifier<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self { config }
    }

    pub fn probe(&self, dir: &Path) -> Result<DirProbe, AggregatorError> {
        let listing = fs_util::list_dir(dir)?;
        let summaries = listing
            .files
            .iter()
            .filter(|name| name.ends_with(self.config.config.summary_suffix.as_str()))
            .map(|name| (name.clone(), fs_util::first_line(&dir.join(name))))
            .collect();
        Ok(DirProbe {
            path: dir.to_path_buf(),
            name: dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            listing,
            summaries,
        })
    }

    pub fn classify(&self, probe: &DirProbe) -> Classification {
        let config = &self.config.config;
        let mut warnings = Vec::new();
        let mut role = DirectoryRole::Unclassified;
        for (candidate, predicate) in ROLE_RULES {
            match predicate(probe, config) {
                Verdict::Match => {
                    role = *candidate;
                    break;
                }
                Verdict::NoMatch => {}
                Verdict::Reject(reason) => {
                    warnings.push(format!("ambiguous {candidate}: {reason}"));
                    break;
                }
            }
        }

        let named_primary = probe.name.ends_with(config.primary_suffix.as_str());
        if named_primary && role != DirectoryRole::PrimaryOutput {
            warnings.push(format!(
                "named like {} but failed content validation",
                DirectoryRole::PrimaryOutput
            ));
        }
        if role == DirectoryRole::PrimaryOutput && !named_primary {
            warnings.push(format!(
                "{} without the {} suffix",
                DirectoryRole::PrimaryOutput,
                config.primary_suffix
            ));
        }
        if probe.name.ends_with(config.cnv_suffix.as_str()) && role != DirectoryRole::CnvOutput {
            warnings.push(format!(
                "named like {} but holds no {} file",
                DirectoryRole::CnvOutput,
                config.cnv_calls_suffix
            ));
        }
        Classification { role, warnings }
    }

    pub fn role_of(&self, dir: &Path) -> Result<DirectoryRole, AggregatorError> {
        Ok(self.classify(&self.probe(dir)?).role)
    }

    /// Assigns a role to every directory under `scratch_root` and decides
    /// what gets staged where. Read-only.
    ///
    /// With `reclassify` set, existing classification outputs are neither
    /// staged on their own nor copied along with a primary run.
    pub fn plan(
        &self,
        scratch_root: &Path,
        reclassify: bool,
    ) -> Result<ClassificationPlan, AggregatorError> {
        let dirs = fs_util::walk_dirs(scratch_root);
        let mut classified = Vec::with_capacity(dirs.len());
        for dir in &dirs {
            let probe = self.probe(dir)?;
            let classification = self.classify(&probe);
            for warning in &classification.warnings {
                warn!(path = %dir.display(), role = %classification.role, "{warning}");
            }
            classified.push((dir.clone(), classification.role));
        }

        let mut plan = ClassificationPlan {
            roles: classified.iter().cloned().collect(),
            steps: Vec::new(),
        };
        let mut claims = HashSet::new();
        let mut names = NameAllocator::default();

        let skip_classification = |unit: &Path| -> Vec<PathBuf> {
            if !reclassify {
                return Vec::new();
            }
            classified
                .iter()
                .filter(|(path, role)| {
                    *role == DirectoryRole::ClassificationOutput && path.starts_with(unit)
                })
                .map(|(path, _)| path.clone())
                .collect()
        };

        // Primary outputs first, so they claim their run folder before
        // anything inside it is looked at.
        for (dir, role) in &classified {
            if *role != DirectoryRole::PrimaryOutput {
                continue;
            }
            let unit = primary_unit(dir, scratch_root);
            if claimed_by(&unit, scratch_root, &claims).is_some() {
                debug!(path = %dir.display(), "primary output already claimed");
                continue;
            }
            let skip = skip_classification(&unit);
            let target_name = names.allocate(StagingArea::Primary, &unit);
            claims.insert(unit.clone());
            plan.steps.push(StagingStep {
                source: unit,
                area: StagingArea::Primary,
                target_name,
                role: DirectoryRole::PrimaryOutput,
                skip,
            });
        }

        let mut has_classified_descendant = HashSet::new();
        for (dir, role) in &classified {
            if *role == DirectoryRole::Unclassified {
                continue;
            }
            for ancestor in dir.ancestors().skip(1) {
                if ancestor == scratch_root || !has_classified_descendant.insert(ancestor.to_path_buf()) {
                    break;
                }
            }
        }

        for (dir, role) in &classified {
            if claimed_by(dir, scratch_root, &claims).is_some() {
                continue;
            }
            match role {
                DirectoryRole::PrimaryOutput => {}
                DirectoryRole::ClassificationOutput if reclassify => {
                    info!(path = %dir.display(), "dropping existing classification output");
                    claims.insert(dir.clone());
                }
                DirectoryRole::CnvOutput | DirectoryRole::ClassificationOutput => {
                    let target_name = names.allocate(StagingArea::CatchAll, dir);
                    claims.insert(dir.clone());
                    plan.steps.push(StagingStep {
                        source: dir.clone(),
                        area: StagingArea::CatchAll,
                        target_name,
                        role: *role,
                        skip: Vec::new(),
                    });
                }
                DirectoryRole::Unclassified => {
                    if has_classified_descendant.contains(dir) {
                        continue;
                    }
                    claims.insert(dir.clone());
                    if fs_util::walk_files(dir).is_empty() {
                        continue;
                    }
                    let target_name = names.allocate(StagingArea::CatchAll, dir);
                    plan.steps.push(StagingStep {
                        source: dir.clone(),
                        area: StagingArea::CatchAll,
                        target_name,
                        role: DirectoryRole::Unclassified,
                        skip: Vec::new(),
                    });
                }
            }
        }

        Ok(plan)
    }

    /// Copies every planned directory into its staging area. Sources are
    /// never moved, so the scratch tree stays intact and staging the same
    /// plan twice yields the same result.
    pub fn stage(
        &self,
        plan: &ClassificationPlan,
        workspace: &Workspace,
    ) -> Result<StagingReport, AggregatorError> {
        let mut report = StagingReport::default();
        for step in &plan.steps {
            let area = match step.area {
                StagingArea::Primary => workspace.primary_area(),
                StagingArea::CatchAll => workspace.catch_all_area(),
            };
            let target = area.as_std_path().join(&step.target_name);
            info!(
                source = %step.source.display(),
                target = %target.display(),
                role = %step.role,
                "staging directory"
            );
            let skip = &step.skip;
            fs_util::copy_dir_filtered(&step.source, &target, &|path| {
                skip.iter().any(|skipped| skipped == path)
            })?;
            match step.area {
                StagingArea::Primary => report.primary.push(target),
                StagingArea::CatchAll => report.catch_all.push(target),
            }
        }
        Ok(report)
    }
}

/// The run folder holding a primary output, unless that folder is the root
/// of an extracted archive (which may hold several samples).
fn primary_unit(dir: &Path, scratch_root: &Path) -> PathBuf {
    match dir.parent() {
        Some(parent) if parent != scratch_root && parent.parent() != Some(scratch_root) => {
            parent.to_path_buf()
        }
        _ => dir.to_path_buf(),
    }
}

/// Walks the ancestors of `path` up to the scratch root and returns the
/// first claimed one.
fn claimed_by<'c>(path: &Path, scratch_root: &Path, claims: &'c HashSet<PathBuf>) -> Option<&'c PathBuf> {
    for ancestor in path.ancestors() {
        if ancestor == scratch_root {
            return None;
        }
        if let Some(claim) = claims.get(ancestor) {
            return Some(claim);
        }
    }
    None
}

#[derive(Default)]
struct NameAllocator {
    used: HashSet<(bool, String)>,
}

impl NameAllocator {
    /// Base name, then `<parent>_<name>`, then numbered suffixes; unique per area.
    fn allocate(&mut self, area: StagingArea, source: &Path) -> String {
        let key = area == StagingArea::Primary;
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        if self.used.insert((key, name.clone())) {
            return name;
        }
        let parent = source
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|parent| format!("{}_{name}", parent.to_string_lossy()))
            .unwrap_or_else(|| name.clone());
        if self.used.insert((key, parent.clone())) {
            return parent;
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{parent}_{n}");
            if self.used.insert((key, candidate.clone())) {
                return candidate;
            }
            n += 1;
        }
    }
}
