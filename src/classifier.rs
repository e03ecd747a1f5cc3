use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use crate::config::ClassifierEnv;
use crate::domain::ReferenceGenome;
use crate::error::AggregatorError;
use crate::fs_util;

pub const REFERENCE_BASE_URL: &str =
    "https://datasets.genepattern.org/data/module_support_files/AmpliconArchitect";

/// One classification pass over the staged primary outputs.
#[derive(Debug, Clone)]
pub struct ClassifierRequest {
    /// `results/AA_outputs`.
    pub aa_outputs: PathBuf,
    /// `results/other_files/<output_name>_classification`.
    pub output_dir: PathBuf,
    pub output_name: String,
    pub reference: ReferenceGenome,
    pub python3: PathBuf,
}

impl ClassifierRequest {
    pub fn input_file(&self) -> PathBuf {
        self.output_dir.join(format!("{}.input", self.output_name))
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_amplicon_classification_profiles.tsv", self.output_name))
    }
}

pub trait ClassifierRunner {
    /// Writes classifier outputs, including a result table, under
    /// `request.output_dir`.
    fn classify(&self, request: &ClassifierRequest) -> Result<(), AggregatorError>;
}

/// Runs the AmpliconClassifier scripts found under `AC_SRC`.
pub struct SystemClassifier {
    env: ClassifierEnv,
    client: Client,
    reference_base_url: String,
}

impl SystemClassifier {
    pub fn new(env: ClassifierEnv) -> Result<Self, AggregatorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("amplicon-agg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AggregatorError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|err| AggregatorError::ReferenceHttp(err.to_string()))?;
        Ok(Self {
            env,
            client,
            reference_base_url: REFERENCE_BASE_URL.to_string(),
        })
    }

    pub fn with_reference_base_url(mut self, url: impl Into<String>) -> Self {
        self.reference_base_url = url.into();
        self
    }

    /// Downloads and unpacks `<ref>_indexed.tar.gz` into the data repository
    /// unless the reference directory is already there.
    pub fn ensure_reference(&self, reference: ReferenceGenome) -> Result<PathBuf, AggregatorError> {
        let reference_dir = self.env.data_repo.join(reference.as_str());
        if reference_dir.is_dir() {
            return Ok(reference_dir);
        }
        let archive_name = format!("{}_indexed.tar.gz", reference.as_str());
        let url = format!("{}/{archive_name}", self.reference_base_url.trim_end_matches('/'));
        info!(url = %url, dest = %self.env.data_repo.display(), "downloading reference");
        std::fs::create_dir_all(&self.env.data_repo)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;

        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| AggregatorError::ReferenceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "reference request failed".to_string());
            return Err(AggregatorError::ReferenceStatus { status, message });
        }
        let archive = tempfile::Builder::new()
            .prefix(".amplicon-agg-ref")
            .suffix(".tar.gz")
            .tempfile_in(&self.env.data_repo)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let mut file = File::create(archive.path())
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| AggregatorError::ReferenceHttp(err.to_string()))?;
        drop(file);

        fs_util::extract_tar(archive.path(), true, &self.env.data_repo).map_err(|err| {
            AggregatorError::ReferenceHttp(format!("unpacking {archive_name}: {err}"))
        })?;
        if !reference_dir.is_dir() {
            return Err(AggregatorError::ReferenceHttp(format!(
                "{archive_name} did not contain {}",
                reference.as_str()
            )));
        }
        Ok(reference_dir)
    }

    fn script(&self, name: &str) -> PathBuf {
        self.env.classifier_src.join(name)
    }
}

impl ClassifierRunner for SystemClassifier {
    fn classify(&self, request: &ClassifierRequest) -> Result<(), AggregatorError> {
        self.ensure_reference(request.reference)?;
        std::fs::create_dir_all(&request.output_dir)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let prefix = request.output_dir.join(&request.output_name);

        info!(source = %request.aa_outputs.display(), "preparing classifier input");
        run_cmd(
            Path::new("bash"),
            &[
                self.script("make_input.sh").to_string_lossy().to_string(),
                request.aa_outputs.to_string_lossy().to_string(),
                prefix.to_string_lossy().to_string(),
            ],
            &self.env,
        )
        .map_err(AggregatorError::InputPreparation)?;
        if !request.input_file().is_file() {
            return Err(AggregatorError::InputPreparation(format!(
                "{} was not produced",
                request.input_file().display()
            )));
        }

        info!(reference = request.reference.as_str(), "running amplicon classifier");
        run_cmd(
            &request.python3,
            &[
                self.script("amplicon_classifier.py").to_string_lossy().to_string(),
                "-i".to_string(),
                request.input_file().to_string_lossy().to_string(),
                "--ref".to_string(),
                request.reference.as_str().to_string(),
                "-o".to_string(),
                prefix.to_string_lossy().to_string(),
            ],
            &self.env,
        )
        .map_err(AggregatorError::ClassifierFailed)?;

        run_cmd(
            &request.python3,
            &[
                self.script("make_results_table.py").to_string_lossy().to_string(),
                "-i".to_string(),
                request.input_file().to_string_lossy().to_string(),
                "--classification_file".to_string(),
                request.profiles_file().to_string_lossy().to_string(),
            ],
            &self.env,
        )
        .map_err(AggregatorError::ClassifierFailed)?;
        Ok(())
    }
}

fn run_cmd(program: &Path, args: &[String], env: &ClassifierEnv) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .env(crate::config::ENV_CLASSIFIER_SRC, &env.classifier_src)
        .env(crate::config::ENV_DATA_REPO, &env.data_repo)
        .output()
        .map_err(|err| format!("{}: {err}", program.display()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!(program = %program.display(), status = ?output.status.code(), "command failed");
    if stderr.is_empty() {
        Err(format!("command failed: {}", program.display()))
    } else {
        Err(stderr)
    }
}
