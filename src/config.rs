use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AggregatorError;

pub const ENV_CLASSIFIER_SRC: &str = "AC_SRC";
pub const ENV_DATA_REPO: &str = "AA_DATA_REPO";

/// Fixed tokens of the AmpliconSuite output layout. Every field has a default,
/// so an override file only names what it changes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub summary_suffix: String,
    pub summary_marker: String,
    pub result_table_suffix: String,
    pub sentinel_dir: String,
    pub primary_suffix: String,
    pub cnv_suffix: String,
    pub classification_suffix: String,
    pub classification_bed_suffix: String,
    pub cnv_calls_suffix: String,
    pub run_metadata_suffix: String,
    pub sample_metadata_suffix: String,
    pub artifacts_dir: String,
    pub excluded_suffixes: Vec<String>,
    pub purge_patterns: Vec<String>,
    pub max_file_bytes: Option<u64>,
    pub benign_extraction_errors: Vec<String>,
    pub max_extraction_passes: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            summary_suffix: "_summary.txt".to_string(),
            summary_marker: "#Amplicons".to_string(),
            result_table_suffix: "_result_table.tsv".to_string(),
            sentinel_dir: "AUX_DIR".to_string(),
            primary_suffix: "_AA_results".to_string(),
            cnv_suffix: "_cnvkit_output".to_string(),
            classification_suffix: "_classification".to_string(),
            classification_bed_suffix: "_classification_bed_files".to_string(),
            cnv_calls_suffix: "_CNV_CALLS.bed".to_string(),
            run_metadata_suffix: "_run_metadata.json".to_string(),
            sample_metadata_suffix: "_sample_metadata.json".to_string(),
            artifacts_dir: "files".to_string(),
            excluded_suffixes: default_excluded_suffixes(),
            purge_patterns: default_purge_patterns(),
            max_file_bytes: None,
            benign_extraction_errors: vec!["legacy path separator".to_string()],
            max_extraction_passes: 16,
        }
    }
}

pub fn default_excluded_suffixes() -> Vec<String> {
    [
        ".fastq", ".fastq.gz", ".fq", ".fq.gz", ".bam", ".bam.bai", ".bai", ".cram", ".crai",
        ".sam",
    ]
    .iter()
    .map(|suffix| suffix.to_string())
    .collect()
}

pub fn default_purge_patterns() -> Vec<String> {
    vec![
        r"\.(bam|cram|bai|crai)$".to_string(),
        r"\.(cnr|cnn|cns)\.gz$".to_string(),
        r"\.log\.\d+$".to_string(),
    ]
}

/// Configuration with its purge patterns compiled once.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AggregatorConfig,
    pub purge_rules: Vec<Regex>,
}

impl ResolvedConfig {
    pub fn is_excluded(&self, name: &str) -> bool {
        self.config
            .excluded_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }

    pub fn is_large_intermediate(&self, name: &str) -> bool {
        self.purge_rules.iter().any(|rule| rule.is_match(name))
    }

    pub fn is_benign_extraction_error(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.config
            .benign_extraction_errors
            .iter()
            .any(|token| lowered.contains(&token.to_lowercase()))
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(AggregatorConfig::default())
            .unwrap_or_else(|_| Self {
                config: AggregatorConfig::default(),
                purge_rules: Vec::new(),
            })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AggregatorError> {
        let config = match path {
            Some(path) => {
                let config_path = PathBuf::from(path);
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| AggregatorError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| AggregatorError::ConfigParse(err.to_string()))?
            }
            None => AggregatorConfig::default(),
        };
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: AggregatorConfig) -> Result<ResolvedConfig, AggregatorError> {
        let purge_rules = config
            .purge_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    AggregatorError::ConfigParse(format!("purge pattern {pattern}: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if config.max_extraction_passes == 0 {
            return Err(AggregatorError::ConfigParse(
                "max_extraction_passes must be at least 1".to_string(),
            ));
        }
        Ok(ResolvedConfig {
            config,
            purge_rules,
        })
    }
}

/// Operator-supplied translation from internal sample names to display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRemap {
    entries: HashMap<String, String>,
}

impl NameRemap {
    pub fn load(path: &Path) -> Result<Self, AggregatorError> {
        let content = fs::read_to_string(path)
            .map_err(|err| AggregatorError::NameMap(format!("{}: {err}", path.display())))?;
        Self::parse(&content)
    }

    /// Tab-separated `internal<TAB>display` rows. Rows without a tab fall
    /// back to whitespace separation; `#` starts a comment line.
    pub fn parse(content: &str) -> Result<Self, AggregatorError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut entries = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(|err| AggregatorError::NameMap(err.to_string()))?;
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            let mut columns = record
                .iter()
                .filter(|column| !column.is_empty())
                .collect::<Vec<_>>();
            if columns.is_empty() {
                continue;
            }
            if let [single] = columns[..] {
                columns = single.split_whitespace().collect();
            }
            match columns.as_slice() {
                [from, to] => {
                    entries.insert(from.to_string(), to.to_string());
                }
                _ => {
                    return Err(AggregatorError::NameMap(format!(
                        "line {line} must have exactly two columns"
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Locations of the external classifier, read from the environment.
#[derive(Debug, Clone)]
pub struct ClassifierEnv {
    pub classifier_src: PathBuf,
    pub data_repo: PathBuf,
}

impl ClassifierEnv {
    pub fn from_env() -> Result<Self, AggregatorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AggregatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| AggregatorError::MissingEnvironment(key.to_string()))
        };
        Ok(Self {
            classifier_src: read(ENV_CLASSIFIER_SRC)?,
            data_repo: read(ENV_DATA_REPO)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_compile() {
        let resolved = ConfigLoader::resolve(None).unwrap();
        assert_eq!(resolved.purge_rules.len(), 3);
        assert!(resolved.is_excluded("S1.cs.rmdup.bam"));
        assert!(resolved.is_excluded("reads_1.fastq.gz"));
        assert!(!resolved.is_excluded("S1_CNV_CALLS.bed"));
        assert!(resolved.is_large_intermediate("S1.cnr.gz"));
        assert!(resolved.is_large_intermediate("cnvkit.log.3"));
        assert!(!resolved.is_large_intermediate("S1_CNV_CALLS.bed"));
    }

    #[test]
    fn invalid_purge_pattern_is_rejected() {
        let config = AggregatorConfig {
            purge_patterns: vec!["(".to_string()],
            ..AggregatorConfig::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, AggregatorError::ConfigParse(_));
    }

    #[test]
    fn benign_errors_match_case_insensitively() {
        let resolved = ResolvedConfig::default();
        assert!(resolved.is_benign_extraction_error("zip entry uses Legacy Path Separator: a\\b"));
        assert!(!resolved.is_benign_extraction_error("No space left on device"));
    }

    #[test]
    fn name_remap_accepts_tabs_and_spaces() {
        let remap = NameRemap::parse("# comment\nS1\tPatient A\n\nS2 PatientB\n").unwrap();
        assert_eq!(remap.len(), 2);
        assert_eq!(remap.get("S1"), Some("Patient A"));
        assert_eq!(remap.get("S2"), Some("PatientB"));
        assert_eq!(remap.get("S3"), None);
    }

    #[test]
    fn name_remap_tolerates_trailing_tabs_and_blank_cells() {
        let remap = NameRemap::parse("S1\tPatient A\t\n  \t \nS3\t PatientC \n").unwrap();
        assert_eq!(remap.get("S1"), Some("Patient A"));
        assert_eq!(remap.get("S3"), Some("PatientC"));
        assert_eq!(remap.len(), 2);

        let err = NameRemap::parse("S1\tA\tB\n").unwrap_err();
        assert_matches!(err, AggregatorError::NameMap(message) if message.contains("line 1"));
    }

    #[test]
    fn name_remap_rejects_single_column() {
        let err = NameRemap::parse("S1\n").unwrap_err();
        assert_matches!(err, AggregatorError::NameMap(_));
    }

    #[test]
    fn classifier_env_requires_both_variables() {
        let err = ClassifierEnv::from_lookup(|key| {
            (key == ENV_CLASSIFIER_SRC).then(|| "/opt/ac".to_string())
        })
        .unwrap_err();
        assert_matches!(err, AggregatorError::MissingEnvironment(name) if name == ENV_DATA_REPO);

        let env = ClassifierEnv::from_lookup(|_| Some("/data".to_string())).unwrap();
        assert_eq!(env.data_repo, PathBuf::from("/data"));
    }
}
