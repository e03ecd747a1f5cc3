use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::error::AggregatorError;
use crate::fs_util;
use crate::manifest::Manifest;
use crate::record::{SampleRecord, columns};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableReport {
    pub tables_found: usize,
    pub tables_skipped: Vec<PathBuf>,
    pub rows_skipped: usize,
}

/// Merges every per-sample result table into one manifest.
pub struct TableAggregator<'a> {
    config: &'a ResolvedConfig,
}

impl<'a> TableAggregator<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self { config }
    }

    pub fn result_tables(&self, workspace: &Workspace) -> Vec<PathBuf> {
        let suffix = self.config.config.result_table_suffix.as_str();
        [workspace.primary_area(), workspace.catch_all_area()]
            .iter()
            .filter(|area| area.as_std_path().exists())
            .flat_map(|area| fs_util::walk_files(area.as_std_path()))
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().ends_with(suffix))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Reads every result table, primary area first. A table that fails to
    /// parse is skipped. No rows at all is [`AggregatorError::NoResults`].
    pub fn aggregate(&self, workspace: &Workspace) -> Result<(Manifest, TableReport), AggregatorError> {
        let mut manifest = Manifest::default();
        let mut report = TableReport::default();

        for table in self.result_tables(workspace) {
            report.tables_found += 1;
            info!(path = %table.display(), "reading result table");
            let parsed = match parse_table(&table) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("{err}; skipping table");
                    report.tables_skipped.push(table);
                    continue;
                }
            };
            report.rows_skipped += parsed.rows_skipped;

            let source_dir = table
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| workspace.results_root().into_std_path_buf());
            for (sample_name, records) in parsed.by_sample {
                info!(sample = %sample_name, rows = records.len(), "collected sample");
                manifest.push(sample_name, source_dir.clone(), records);
            }
        }

        if manifest.is_empty() {
            return Err(AggregatorError::NoResults);
        }
        Ok((manifest, report))
    }
}

#[derive(Debug, Default)]
pub struct ParsedTable {
    /// Rows grouped by sample name, names in sorted order.
    pub by_sample: BTreeMap<String, Vec<SampleRecord>>,
    pub rows_skipped: usize,
}

/// Parses one tab-delimited result table. Rows without a sample name are
/// dropped; a missing header or a malformed row fails the whole table.
pub fn parse_table(path: &Path) -> Result<ParsedTable, AggregatorError> {
    let table_error = |message: String| AggregatorError::TableParse {
        path: path.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|err| table_error(err.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|err| table_error(err.to_string()))?
        .iter()
        .map(|header| header.trim().trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    if !headers.iter().any(|header| header == columns::SAMPLE_NAME) {
        return Err(table_error(format!("no '{}' column", columns::SAMPLE_NAME)));
    }

    let mut parsed = ParsedTable::default();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|err| table_error(err.to_string()))?;
        let row = row.iter().map(str::to_string).collect::<Vec<_>>();
        match SampleRecord::from_row(&headers, &row) {
            Ok(record) => parsed
                .by_sample
                .entry(record.sample_name.clone())
                .or_default()
                .push(record),
            Err(message) => {
                warn!(path = %path.display(), row = line + 1, "{message}; skipping row");
                parsed.rows_skipped += 1;
            }
        }
    }
    Ok(parsed)
}
