use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::SampleKey;
use crate::error::AggregatorError;
use crate::record::{FLAT_COLUMNS, SampleRecord};
use crate::workspace::Workspace;

/// One manifest entry: every row one result table holds for one sample.
#[derive(Debug, Clone, Serialize)]
pub struct SampleGroup {
    pub key: SampleKey,
    pub sample_name: String,
    /// Directory of the result table the rows came from.
    pub source_dir: PathBuf,
    pub records: Vec<SampleRecord>,
}

/// Sample groups in discovery order. Keys are only stable within one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    pub groups: Vec<SampleGroup>,
}

impl Manifest {
    pub fn push(&mut self, sample_name: String, source_dir: PathBuf, records: Vec<SampleRecord>) -> &SampleKey {
        let key = SampleKey::nth(self.groups.len() + 1);
        self.groups.push(SampleGroup {
            key,
            sample_name,
            source_dir,
            records,
        });
        &self.groups[self.groups.len() - 1].key
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|group| group.records.len()).sum()
    }

    pub fn get(&self, key: &str) -> Option<&SampleGroup> {
        self.groups.iter().find(|group| group.key.as_str() == key)
    }

    pub fn records(&self) -> impl Iterator<Item = &SampleRecord> {
        self.groups.iter().flat_map(|group| group.records.iter())
    }

    /// `{"runs": {"sample_<n>": [record, ...]}}` with every object's keys
    /// sorted.
    pub fn to_json(&self) -> Result<Value, AggregatorError> {
        let mut runs = Map::new();
        for group in &self.groups {
            let records = serde_json::to_value(&group.records)
                .map_err(|err| AggregatorError::Manifest(err.to_string()))?;
            runs.insert(group.key.as_str().to_string(), records);
        }
        let mut root = Map::new();
        root.insert("runs".to_string(), Value::Object(runs));
        Ok(Value::Object(root))
    }

    pub fn write_json(&self, workspace: &Workspace) -> Result<(), AggregatorError> {
        let json = serde_json::to_vec_pretty(&self.to_json()?)
            .map_err(|err| AggregatorError::Manifest(err.to_string()))?;
        Workspace::write_bytes_atomic(&workspace.manifest_path(), &json)
    }

    /// Columns kept from the result tables beyond the typed schema, sorted.
    pub fn extra_columns(&self) -> Vec<String> {
        self.records()
            .flat_map(|record| record.extra.keys())
            .filter(|column| !FLAT_COLUMNS.contains(&column.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn flat_columns(&self) -> Vec<String> {
        FLAT_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .chain(self.extra_columns())
            .collect()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, AggregatorError> {
        let extra = self.extra_columns();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![String::new()];
        header.extend(self.flat_columns());
        writer
            .write_record(&header)
            .map_err(|err| AggregatorError::Manifest(err.to_string()))?;
        for (index, record) in self.records().enumerate() {
            let mut row = vec![index.to_string()];
            row.extend(record.flat_row(&extra));
            writer
                .write_record(&row)
                .map_err(|err| AggregatorError::Manifest(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| AggregatorError::Manifest(err.to_string()))
    }

    pub fn to_html(&self) -> String {
        let extra = self.extra_columns();
        let mut html = String::from("<table border=\"1\" class=\"dataframe\">\n  <thead>\n    <tr style=\"text-align: right;\">\n      <th></th>\n");
        for column in self.flat_columns() {
            html.push_str(&format!("      <th>{}</th>\n", escape_html(&column)));
        }
        html.push_str("    </tr>\n  </thead>\n  <tbody>\n");
        for (index, record) in self.records().enumerate() {
            html.push_str(&format!("    <tr>\n      <th>{index}</th>\n"));
            for cell in record.flat_row(&extra) {
                html.push_str(&format!("      <td>{}</td>\n", escape_html(&cell)));
            }
            html.push_str("    </tr>\n");
        }
        html.push_str("  </tbody>\n</table>\n");
        html
    }

    /// Writes `run.json` and the flattened CSV/HTML tables.
    pub fn write_all(&self, workspace: &Workspace) -> Result<(), AggregatorError> {
        self.write_json(workspace)?;
        Workspace::write_bytes_atomic(&workspace.table_path("csv"), &self.to_csv()?)?;
        Workspace::write_bytes_atomic(&workspace.table_path("html"), self.to_html().as_bytes())?;
        Ok(())
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
