use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AggregatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
    Directory,
    Unsupported,
}

impl ArchiveFormat {
    /// Detects the container format from the file name alone.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() {
            return ArchiveFormat::Directory;
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if name.ends_with(".tar") {
            ArchiveFormat::Tar
        } else if name.ends_with(".zip") {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::Unsupported
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            ArchiveFormat::Tar | ArchiveFormat::TarGz | ArchiveFormat::Zip
        )
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Tar => write!(f, "tar"),
            ArchiveFormat::TarGz => write!(f, "tar.gz"),
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Directory => write!(f, "directory"),
            ArchiveFormat::Unsupported => write!(f, "unsupported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBundle {
    path: PathBuf,
    format: ArchiveFormat,
}

impl ArchiveBundle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = ArchiveFormat::detect(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Base name with the container extension removed.
    pub fn stem(&self) -> String {
        archive_stem(&self.path)
    }
}

pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    for ext in [".tar.gz", ".tgz", ".tar", ".zip", ".TAR.GZ", ".TGZ", ".TAR", ".ZIP"] {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryRole {
    PrimaryOutput,
    CnvOutput,
    ClassificationOutput,
    Unclassified,
}

impl fmt::Display for DirectoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryRole::PrimaryOutput => write!(f, "primary-output"),
            DirectoryRole::CnvOutput => write!(f, "cnv-output"),
            DirectoryRole::ClassificationOutput => write!(f, "classification-output"),
            DirectoryRole::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ReferenceGenome {
    #[value(name = "hg19")]
    #[serde(rename = "hg19")]
    Hg19,
    #[value(name = "GRCh37")]
    #[serde(rename = "GRCh37")]
    Grch37,
    #[value(name = "GRCh38")]
    #[serde(rename = "GRCh38")]
    Grch38,
    #[value(name = "GRCh38_viral")]
    #[serde(rename = "GRCh38_viral")]
    Grch38Viral,
    #[value(name = "mm10")]
    #[serde(rename = "mm10")]
    Mm10,
}

impl ReferenceGenome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceGenome::Hg19 => "hg19",
            ReferenceGenome::Grch37 => "GRCh37",
            ReferenceGenome::Grch38 => "GRCh38",
            ReferenceGenome::Grch38Viral => "GRCh38_viral",
            ReferenceGenome::Mm10 => "mm10",
        }
    }
}

impl fmt::Display for ReferenceGenome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReferenceGenome {
    type Err = AggregatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "hg19" => Ok(ReferenceGenome::Hg19),
            "GRCh37" => Ok(ReferenceGenome::Grch37),
            "GRCh38" => Ok(ReferenceGenome::Grch38),
            "GRCh38_viral" => Ok(ReferenceGenome::Grch38Viral),
            "mm10" => Ok(ReferenceGenome::Mm10),
            _ => Err(AggregatorError::InvalidInput(format!(
                "unknown reference genome: {value}"
            ))),
        }
    }
}

/// Run-scoped manifest key, `sample_<n>` in discovery order starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SampleKey(String);

impl SampleKey {
    pub fn nth(n: usize) -> Self {
        Self(format!("sample_{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
