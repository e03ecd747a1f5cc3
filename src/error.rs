use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AggregatorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid name map: {0}")]
    NameMap(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive {path} could not be read: {message}")]
    ArchiveCorrupt { path: PathBuf, message: String },

    #[error("archive {path} failed to extract: {message}")]
    ArchiveWrite { path: PathBuf, message: String },

    #[error("failed to parse result table {path}: {message}")]
    TableParse { path: PathBuf, message: String },

    #[error("no AmpliconSuite results were found in the inputs")]
    #[diagnostic(help("each sample needs a *_result_table.tsv produced by AmpliconClassifier"))]
    NoResults,

    #[error("multiple reference genomes detected across samples: {}", .0.join(", "))]
    #[diagnostic(help("aggregate samples aligned to different references in separate runs"))]
    MultipleReferenceGenomes(Vec<String>),

    #[error("required environment variable is not set: {0}")]
    MissingEnvironment(String),

    #[error("classifier input preparation failed: {0}")]
    InputPreparation(String),

    #[error("classifier failed: {0}")]
    ClassifierFailed(String),

    #[error("reference download failed: {0}")]
    ReferenceHttp(String),

    #[error("reference server returned status {status}: {message}")]
    ReferenceStatus { status: u16, message: String },

    #[error("upload request failed: {0}")]
    UploadHttp(String),

    #[error("upload server returned status {status}: {message}")]
    UploadStatus { status: u16, message: String },

    #[error("{0} does not appear to be an aggregated bundle")]
    #[diagnostic(help("run the aggregator before uploading"))]
    NotAggregated(String),

    #[error("failed to serialize manifest: {0}")]
    Manifest(String),
}

impl AggregatorError {
    /// Fatal conditions that end the run through the failure cleanup branch.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            AggregatorError::NoResults
                | AggregatorError::MultipleReferenceGenomes(_)
                | AggregatorError::MissingEnvironment(_)
                | AggregatorError::InputPreparation(_)
                | AggregatorError::ClassifierFailed(_)
                | AggregatorError::ArchiveWrite { .. }
        )
    }
}
