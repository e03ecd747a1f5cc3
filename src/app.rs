use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, warn};

use crate::aggregate::{TableAggregator, TableReport};
use crate::classifier::{ClassifierRequest, ClassifierRunner};
use crate::classify::RoleClassifier;
use crate::config::{NameRemap, ResolvedConfig};
use crate::domain::{ArchiveBundle, ReferenceGenome};
use crate::error::AggregatorError;
use crate::extract::{ExtractionReport, Extractor};
use crate::locate::{DuplicateSample, Locator};
use crate::repackage::{Deliverable, Repackager};
use crate::resolve::{PathResolver, ResolveReport};
use crate::upload::UploadReceipt;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ReclassifyOptions {
    pub reference: ReferenceGenome,
    pub python3: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub key: String,
    pub sample_name: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagingSummary {
    pub primary: usize,
    pub catch_all: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub output_name: String,
    pub deliverable: Option<Deliverable>,
    pub samples: Vec<SampleSummary>,
    pub records: usize,
    pub extraction: ExtractionReport,
    pub staging: StagingSummary,
    pub tables: TableReport,
    pub resolution: ResolveReport,
    pub duplicates: Vec<DuplicateSample>,
    pub uploads: Vec<UploadReceipt>,
}

/// The full aggregation run: extract, classify and stage, optionally
/// reclassify, locate, aggregate, resolve, package.
pub struct Pipeline<C: ClassifierRunner> {
    config: ResolvedConfig,
    workspace: Workspace,
    classifier: Option<(C, ReclassifyOptions)>,
    remap: Option<NameRemap>,
}

impl<C: ClassifierRunner> Pipeline<C> {
    pub fn new(config: ResolvedConfig, workspace: Workspace) -> Self {
        Self {
            config,
            workspace,
            classifier: None,
            remap: None,
        }
    }

    pub fn with_classifier(mut self, classifier: C, options: ReclassifyOptions) -> Self {
        self.classifier = Some((classifier, options));
        self
    }

    pub fn with_name_map(mut self, remap: NameRemap) -> Self {
        self.remap = Some(remap);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Any error takes the failure branch: scratch state is purged and no
    /// deliverable is written.
    pub fn run(&self, inputs: &[ArchiveBundle], sink: &dyn ProgressSink) -> Result<RunSummary, AggregatorError> {
        match self.run_stages(inputs, sink) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                error!("{err}");
                if let Err(cleanup) = Repackager::new(&self.config).abandon(&self.workspace) {
                    warn!("cleanup after failure did not finish: {cleanup}");
                }
                Err(err)
            }
        }
    }

    fn run_stages(&self, inputs: &[ArchiveBundle], sink: &dyn ProgressSink) -> Result<RunSummary, AggregatorError> {
        let started = Instant::now();
        self.workspace.reset()?;
        self.workspace.ensure()?;
        let scratch = self.workspace.scratch_root();

        phase(sink, format!("phase=Extract; {} inputs", inputs.len()), None);
        let extraction = Extractor::new(&self.config).extract_all(inputs, scratch.as_std_path())?;

        phase(sink, "phase=Classify; planning staging".to_string(), Some(started.elapsed()));
        let classifier = RoleClassifier::new(&self.config);
        let plan = classifier.plan(scratch.as_std_path(), self.classifier.is_some())?;
        let staged = classifier.stage(&plan, &self.workspace)?;

        if let Some((runner, options)) = &self.classifier {
            phase(
                sink,
                format!("phase=Reclassify; reference {}", options.reference.as_str()),
                Some(started.elapsed()),
            );
            let request = ClassifierRequest {
                aa_outputs: self.workspace.primary_area().into_std_path_buf(),
                output_dir: self
                    .workspace
                    .catch_all_area()
                    .join(format!(
                        "{}{}",
                        self.workspace.output_name(),
                        self.config.config.classification_suffix
                    ))
                    .into_std_path_buf(),
                output_name: self.workspace.output_name().to_string(),
                reference: options.reference,
                python3: options.python3.clone(),
            };
            runner.classify(&request)?;
        }

        phase(sink, "phase=Locate; indexing samples".to_string(), Some(started.elapsed()));
        let index = Locator::new(&self.config).build(&self.workspace)?;

        phase(sink, "phase=Aggregate; reading result tables".to_string(), Some(started.elapsed()));
        let (mut manifest, tables) = TableAggregator::new(&self.config).aggregate(&self.workspace)?;

        phase(
            sink,
            format!("phase=Resolve; {} samples", manifest.len()),
            Some(started.elapsed()),
        );
        let resolution =
            PathResolver::new(&self.config, &self.workspace, &index, self.remap.as_ref()).resolve(&mut manifest)?;
        manifest.write_all(&self.workspace)?;

        phase(sink, "phase=Package; writing deliverable".to_string(), Some(started.elapsed()));
        let deliverable = Repackager::new(&self.config).finish(&self.workspace)?;
        phase(
            sink,
            format!("phase=Done; {}", deliverable.path),
            Some(started.elapsed()),
        );

        Ok(RunSummary {
            output_name: self.workspace.output_name().to_string(),
            deliverable: Some(deliverable),
            samples: manifest
                .groups
                .iter()
                .map(|group| SampleSummary {
                    key: group.key.as_str().to_string(),
                    sample_name: group.sample_name.clone(),
                    records: group.records.len(),
                })
                .collect(),
            records: manifest.record_count(),
            extraction,
            staging: StagingSummary {
                primary: staged.primary.len(),
                catch_all: staged.catch_all.len(),
            },
            tables,
            resolution,
            duplicates: index.duplicates,
            uploads: Vec::new(),
        })
    }
}

fn phase(sink: &dyn ProgressSink, message: String, elapsed: Option<Duration>) {
    sink.event(ProgressEvent { message, elapsed });
}
