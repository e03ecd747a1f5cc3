use std::collections::BTreeMap;
use std::fmt;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const NOT_PROVIDED: &str = "Not Provided";

pub mod columns {
    pub const SAMPLE_NAME: &str = "Sample name";
    pub const AMPLICON_NUMBER: &str = "AA amplicon number";
    pub const FEATURE_ID: &str = "Feature ID";
    pub const CLASSIFICATION: &str = "Classification";
    pub const LOCATION: &str = "Location";
    pub const ONCOGENES: &str = "Oncogenes";
    pub const ALL_GENES: &str = "All genes";
    pub const COMPLEXITY_SCORE: &str = "Complexity score";
    pub const INTERVAL_LENGTH: &str = "Captured interval length";
    pub const MEDIAN_CN: &str = "Feature median copy number";
    pub const MAX_CN: &str = "Feature maximum copy number";
    pub const FILTER_FLAG: &str = "Filter flag";
    pub const REFERENCE: &str = "Reference version";
    pub const TISSUE: &str = "Tissue of origin";
    pub const SAMPLE_TYPE: &str = "Sample type";
    pub const FEATURE_BED: &str = "Feature BED file";
    pub const CNV_BED: &str = "CNV BED file";
    pub const AA_PNG: &str = "AA PNG file";
    pub const AA_PDF: &str = "AA PDF file";
    pub const AA_SUMMARY: &str = "AA summary file";
    pub const RUN_METADATA: &str = "Run metadata JSON";
    pub const SAMPLE_METADATA: &str = "Sample metadata JSON";
    pub const AA_DIRECTORY: &str = "AA directory";
    pub const CNV_DIRECTORY: &str = "cnvkit directory";
}

/// Column order of the flattened CSV/HTML export.
pub const FLAT_COLUMNS: &[&str] = &[
    columns::SAMPLE_NAME,
    columns::AMPLICON_NUMBER,
    columns::FEATURE_ID,
    columns::CLASSIFICATION,
    columns::LOCATION,
    columns::ONCOGENES,
    columns::ALL_GENES,
    columns::COMPLEXITY_SCORE,
    columns::INTERVAL_LENGTH,
    columns::MEDIAN_CN,
    columns::MAX_CN,
    columns::FILTER_FLAG,
    columns::REFERENCE,
    columns::TISSUE,
    columns::SAMPLE_TYPE,
    columns::FEATURE_BED,
    columns::CNV_BED,
    columns::AA_PNG,
    columns::AA_PDF,
    columns::AA_SUMMARY,
    columns::RUN_METADATA,
    columns::SAMPLE_METADATA,
    columns::AA_DIRECTORY,
    columns::CNV_DIRECTORY,
];

/// An artifact path column. Rows arrive holding whatever path the producer
/// wrote (`Referenced`); after resolution every field is either a path
/// relative to the results root or the "Not Provided" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArtifactField {
    Referenced(String),
    Resolved(String),
    #[default]
    NotProvided,
}

impl ArtifactField {
    pub fn from_cell(cell: Option<&str>) -> Self {
        match cell.map(str::trim) {
            Some(value) if !is_missing(value) && value != NOT_PROVIDED => {
                ArtifactField::Referenced(value.to_string())
            }
            _ => ArtifactField::NotProvided,
        }
    }

    pub fn referenced(&self) -> Option<&str> {
        match self {
            ArtifactField::Referenced(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ArtifactField::Referenced(value) | ArtifactField::Resolved(value) => value,
            ArtifactField::NotProvided => NOT_PROVIDED,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ArtifactField::Resolved(_))
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, ArtifactField::Referenced(_))
    }
}

impl fmt::Display for ArtifactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ArtifactField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A list column, delimiter-encoded in the table until converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListField {
    Items(Vec<String>),
    Encoded(String),
}

impl ListField {
    pub fn items(&self) -> Option<&[String]> {
        match self {
            ListField::Items(items) => Some(items),
            ListField::Encoded(_) => None,
        }
    }

    pub fn flatten(&self) -> String {
        match self {
            ListField::Items(items) => items.join("|"),
            ListField::Encoded(raw) => raw.clone(),
        }
    }
}

/// Decodes `a|b|c` (preferred) or `[a, b, c]`. Quotes around items are
/// dropped, so Python list literals decode too.
pub fn decode_list(raw: &str) -> Result<Vec<String>, String> {
    let trimmed = raw.trim();
    if trimmed.contains('|') {
        return Ok(trimmed
            .split('|')
            .map(clean_item)
            .filter(|item| !item.is_empty())
            .collect());
    }
    let opens = trimmed.starts_with('[');
    let closes = trimmed.ends_with(']');
    if opens != closes {
        return Err(format!("unbalanced brackets in {trimmed:?}"));
    }
    let inner = trimmed.trim_start_matches('[').trim_end_matches(']').trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner
        .split(',')
        .map(clean_item)
        .filter(|item| !item.is_empty())
        .collect())
}

fn clean_item(item: &str) -> String {
    item.trim()
        .trim_matches(|ch| ch == '\'' || ch == '"')
        .trim()
        .to_string()
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || matches!(value, "NA" | "N/A" | "nan" | "NaN" | "None" | "null")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    #[serde(rename = "Sample name")]
    pub sample_name: String,
    #[serde(rename = "AA amplicon number")]
    pub amplicon_number: Option<i64>,
    #[serde(rename = "Feature ID")]
    pub feature_id: Option<String>,
    #[serde(rename = "Classification")]
    pub classification: Option<String>,
    #[serde(rename = "Location")]
    pub location: Option<ListField>,
    #[serde(rename = "Oncogenes")]
    pub oncogenes: Option<ListField>,
    #[serde(rename = "All genes")]
    pub all_genes: Option<ListField>,
    #[serde(rename = "Complexity score")]
    pub complexity_score: Option<f64>,
    #[serde(rename = "Captured interval length")]
    pub captured_interval_length: Option<i64>,
    #[serde(rename = "Feature median copy number")]
    pub median_copy_number: Option<f64>,
    #[serde(rename = "Feature maximum copy number")]
    pub max_copy_number: Option<f64>,
    #[serde(rename = "Filter flag")]
    pub filter_flag: Option<String>,
    #[serde(rename = "Reference version")]
    pub reference_version: Option<String>,
    #[serde(rename = "Tissue of origin")]
    pub tissue_of_origin: Option<String>,
    #[serde(rename = "Sample type")]
    pub sample_type: Option<String>,
    #[serde(rename = "Feature BED file")]
    pub feature_bed: ArtifactField,
    #[serde(rename = "CNV BED file")]
    pub cnv_bed: ArtifactField,
    #[serde(rename = "AA PNG file")]
    pub aa_png: ArtifactField,
    #[serde(rename = "AA PDF file")]
    pub aa_pdf: ArtifactField,
    #[serde(rename = "AA summary file")]
    pub aa_summary: ArtifactField,
    #[serde(rename = "Run metadata JSON")]
    pub run_metadata_json: ArtifactField,
    #[serde(rename = "Sample metadata JSON")]
    pub sample_metadata_json: ArtifactField,
    #[serde(rename = "AA directory")]
    pub aa_directory: ArtifactField,
    #[serde(rename = "cnvkit directory")]
    pub cnv_directory: ArtifactField,
    /// Columns outside the fixed schema, kept under their original header.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Which artifact column a resolution step is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    FeatureBed,
    CnvBed,
    AaPng,
    AaPdf,
    AaSummary,
    RunMetadata,
    SampleMetadata,
    AaDirectory,
    CnvDirectory,
}

impl ArtifactKind {
    /// The columns resolved under a source directory's `files` folder.
    pub const FILES: [ArtifactKind; 6] = [
        ArtifactKind::CnvBed,
        ArtifactKind::AaPng,
        ArtifactKind::AaPdf,
        ArtifactKind::AaSummary,
        ArtifactKind::RunMetadata,
        ArtifactKind::SampleMetadata,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            ArtifactKind::FeatureBed => columns::FEATURE_BED,
            ArtifactKind::CnvBed => columns::CNV_BED,
            ArtifactKind::AaPng => columns::AA_PNG,
            ArtifactKind::AaPdf => columns::AA_PDF,
            ArtifactKind::AaSummary => columns::AA_SUMMARY,
            ArtifactKind::RunMetadata => columns::RUN_METADATA,
            ArtifactKind::SampleMetadata => columns::SAMPLE_METADATA,
            ArtifactKind::AaDirectory => columns::AA_DIRECTORY,
            ArtifactKind::CnvDirectory => columns::CNV_DIRECTORY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Location,
    Oncogenes,
    AllGenes,
}

impl ListKind {
    pub const ALL: [ListKind; 3] = [ListKind::Location, ListKind::Oncogenes, ListKind::AllGenes];

    pub fn column(&self) -> &'static str {
        match self {
            ListKind::Location => columns::LOCATION,
            ListKind::Oncogenes => columns::ONCOGENES,
            ListKind::AllGenes => columns::ALL_GENES,
        }
    }
}

impl SampleRecord {
    /// Builds a record from one table row. Only a missing sample name is an
    /// error; unparseable numbers are logged and left empty.
    pub fn from_row(headers: &[String], row: &[String]) -> Result<Self, String> {
        let mut cells: BTreeMap<&str, &str> = BTreeMap::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            cells.insert(header.trim(), value.as_str());
        }
        let mut take = |column: &str| cells.remove(column).map(str::trim);

        let sample_name = take(columns::SAMPLE_NAME)
            .filter(|value| !is_missing(value))
            .ok_or_else(|| format!("missing '{}' value", columns::SAMPLE_NAME))?
            .to_string();
        let text = |cell: Option<&str>| {
            cell.filter(|value| !is_missing(value))
                .map(|value| value.to_string())
        };
        let list = |cell: Option<&str>| {
            cell.filter(|value| !is_missing(value))
                .map(|value| ListField::Encoded(value.to_string()))
        };

        let amplicon_number = parse_number::<i64>(&sample_name, columns::AMPLICON_NUMBER, take(columns::AMPLICON_NUMBER));
        let feature_id = text(take(columns::FEATURE_ID));
        let classification = text(take(columns::CLASSIFICATION));
        let location = list(take(columns::LOCATION));
        let oncogenes = list(take(columns::ONCOGENES));
        let all_genes = list(take(columns::ALL_GENES));
        let complexity_score =
            parse_number::<f64>(&sample_name, columns::COMPLEXITY_SCORE, take(columns::COMPLEXITY_SCORE));
        let captured_interval_length =
            parse_number::<i64>(&sample_name, columns::INTERVAL_LENGTH, take(columns::INTERVAL_LENGTH));
        let median_copy_number =
            parse_number::<f64>(&sample_name, columns::MEDIAN_CN, take(columns::MEDIAN_CN));
        let max_copy_number = parse_number::<f64>(&sample_name, columns::MAX_CN, take(columns::MAX_CN));
        let filter_flag = text(take(columns::FILTER_FLAG));
        let reference_version = text(take(columns::REFERENCE));
        let tissue_of_origin = text(take(columns::TISSUE));
        let sample_type = text(take(columns::SAMPLE_TYPE));
        let feature_bed = ArtifactField::from_cell(take(columns::FEATURE_BED));
        let cnv_bed = ArtifactField::from_cell(take(columns::CNV_BED));
        let aa_png = ArtifactField::from_cell(take(columns::AA_PNG));
        let aa_pdf = ArtifactField::from_cell(take(columns::AA_PDF));
        let aa_summary = ArtifactField::from_cell(take(columns::AA_SUMMARY));
        let run_metadata_json = ArtifactField::from_cell(take(columns::RUN_METADATA));
        let sample_metadata_json = ArtifactField::from_cell(take(columns::SAMPLE_METADATA));
        // Packaged directories are always produced here, never taken from input.
        let _ = take(columns::AA_DIRECTORY);
        let _ = take(columns::CNV_DIRECTORY);

        let extra = cells
            .into_iter()
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| {
                let value = value.trim();
                let json = if is_missing(value) {
                    Value::Null
                } else {
                    Value::String(value.to_string())
                };
                (header.to_string(), json)
            })
            .collect();

        Ok(Self {
            sample_name,
            amplicon_number,
            feature_id,
            classification,
            location,
            oncogenes,
            all_genes,
            complexity_score,
            captured_interval_length,
            median_copy_number,
            max_copy_number,
            filter_flag,
            reference_version,
            tissue_of_origin,
            sample_type,
            feature_bed,
            cnv_bed,
            aa_png,
            aa_pdf,
            aa_summary,
            run_metadata_json,
            sample_metadata_json,
            aa_directory: ArtifactField::NotProvided,
            cnv_directory: ArtifactField::NotProvided,
            extra,
        })
    }

    pub fn artifact(&self, kind: ArtifactKind) -> &ArtifactField {
        match kind {
            ArtifactKind::FeatureBed => &self.feature_bed,
            ArtifactKind::CnvBed => &self.cnv_bed,
            ArtifactKind::AaPng => &self.aa_png,
            ArtifactKind::AaPdf => &self.aa_pdf,
            ArtifactKind::AaSummary => &self.aa_summary,
            ArtifactKind::RunMetadata => &self.run_metadata_json,
            ArtifactKind::SampleMetadata => &self.sample_metadata_json,
            ArtifactKind::AaDirectory => &self.aa_directory,
            ArtifactKind::CnvDirectory => &self.cnv_directory,
        }
    }

    pub fn artifact_mut(&mut self, kind: ArtifactKind) -> &mut ArtifactField {
        match kind {
            ArtifactKind::FeatureBed => &mut self.feature_bed,
            ArtifactKind::CnvBed => &mut self.cnv_bed,
            ArtifactKind::AaPng => &mut self.aa_png,
            ArtifactKind::AaPdf => &mut self.aa_pdf,
            ArtifactKind::AaSummary => &mut self.aa_summary,
            ArtifactKind::RunMetadata => &mut self.run_metadata_json,
            ArtifactKind::SampleMetadata => &mut self.sample_metadata_json,
            ArtifactKind::AaDirectory => &mut self.aa_directory,
            ArtifactKind::CnvDirectory => &mut self.cnv_directory,
        }
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (ArtifactKind, &ArtifactField)> {
        [
            ArtifactKind::FeatureBed,
            ArtifactKind::CnvBed,
            ArtifactKind::AaPng,
            ArtifactKind::AaPdf,
            ArtifactKind::AaSummary,
            ArtifactKind::RunMetadata,
            ArtifactKind::SampleMetadata,
            ArtifactKind::AaDirectory,
            ArtifactKind::CnvDirectory,
        ]
        .into_iter()
        .map(move |kind| (kind, self.artifact(kind)))
    }

    pub fn list_mut(&mut self, kind: ListKind) -> &mut Option<ListField> {
        match kind {
            ListKind::Location => &mut self.location,
            ListKind::Oncogenes => &mut self.oncogenes,
            ListKind::AllGenes => &mut self.all_genes,
        }
    }

    /// One row of the flattened export: [`FLAT_COLUMNS`] first, then one
    /// cell per name in `extra_columns`, empty where this record lacks it.
    pub fn flat_row(&self, extra_columns: &[String]) -> Vec<String> {
        let opt = |value: &Option<String>| value.clone().unwrap_or_default();
        let num = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        let int = |value: Option<i64>| value.map(|v| v.to_string()).unwrap_or_default();
        let list = |value: &Option<ListField>| value.as_ref().map(ListField::flatten).unwrap_or_default();
        let mut row = vec![
            self.sample_name.clone(),
            int(self.amplicon_number),
            opt(&self.feature_id),
            opt(&self.classification),
            list(&self.location),
            list(&self.oncogenes),
            list(&self.all_genes),
            num(self.complexity_score),
            int(self.captured_interval_length),
            num(self.median_copy_number),
            num(self.max_copy_number),
            opt(&self.filter_flag),
            opt(&self.reference_version),
            opt(&self.tissue_of_origin),
            opt(&self.sample_type),
            self.feature_bed.to_string(),
            self.cnv_bed.to_string(),
            self.aa_png.to_string(),
            self.aa_pdf.to_string(),
            self.aa_summary.to_string(),
            self.run_metadata_json.to_string(),
            self.sample_metadata_json.to_string(),
            self.aa_directory.to_string(),
            self.cnv_directory.to_string(),
        ];
        row.extend(extra_columns.iter().map(|column| match self.extra.get(column) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }));
        row
    }
}

trait Lenient: Sized {
    fn parse_lenient(value: &str) -> Option<Self>;
}

impl Lenient for f64 {
    fn parse_lenient(value: &str) -> Option<Self> {
        value.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl Lenient for i64 {
    fn parse_lenient(value: &str) -> Option<Self> {
        value.parse::<i64>().ok().or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64)
        })
    }
}

fn parse_number<T: Lenient>(sample: &str, column: &str, cell: Option<&str>) -> Option<T> {
    let value = cell.filter(|value| !is_missing(value))?;
    let parsed = T::parse_lenient(value);
    if parsed.is_none() {
        warn!(sample = %sample, column = %column, value = %value, "not a number, leaving empty");
    }
    parsed
}
