use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use amplicon_aggregator::aggregate::TableAggregator;
use amplicon_aggregator::config::ResolvedConfig;
use amplicon_aggregator::error::AggregatorError;
use amplicon_aggregator::record::ListField;
use amplicon_aggregator::workspace::Workspace;

const HEADER: &str = "Sample name\tAA amplicon number\tClassification\tOncogenes\tComplexity score\tReference version\tRunner notes";

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn workspace(root: &Path) -> Workspace {
    let ws = Workspace::new(Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap(), "batch");
    ws.ensure().unwrap();
    ws
}

#[test]
fn primary_tables_come_before_catch_all() {
    let temp = tempfile::tempdir().unwrap();
    let ws = workspace(temp.path());
    write(
        &ws.catch_all_area().join("A_classification/A_result_table.tsv").into_std_path_buf(),
        &format!("{HEADER}\nA\t1\tLinear\tMYC\t0.5\tGRCh38\t\n"),
    );
    write(
        &ws.primary_area().join("Z/Z_classification/Z_result_table.tsv").into_std_path_buf(),
        &format!("{HEADER}\nZ\t1\tecDNA\t[EGFR]\t2.5\tGRCh38\trerun\nZ\t2\tBFB\t\tnot-a-number\tGRCh38\t\n"),
    );

    let config = ResolvedConfig::default();
    let (manifest, report) = TableAggregator::new(&config).aggregate(&ws).unwrap();

    assert_eq!(report.tables_found, 2);
    assert!(report.tables_skipped.is_empty());
    let keys = manifest
        .groups
        .iter()
        .map(|group| (group.key.as_str(), group.sample_name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(keys, vec![("sample_1", "Z"), ("sample_2", "A")]);

    let z = manifest.get("sample_1").unwrap();
    assert_eq!(z.records.len(), 2);
    assert_eq!(z.source_dir, ws.primary_area().join("Z/Z_classification").into_std_path_buf());
    assert_eq!(z.records[0].oncogenes, Some(ListField::Encoded("[EGFR]".to_string())));
    assert_eq!(z.records[0].complexity_score, Some(2.5));
    assert_eq!(z.records[1].complexity_score, None);
    assert_eq!(z.records[1].oncogenes, None);
    assert_eq!(
        z.records[0].extra.get("Runner notes"),
        Some(&serde_json::Value::String("rerun".to_string()))
    );
    assert_eq!(manifest.record_count(), 3);
}

#[test]
fn unreadable_table_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let ws = workspace(temp.path());
    let broken = ws.primary_area().join("B/B_result_table.tsv").into_std_path_buf();
    write(&broken, "Sample name\tClassification\nB\tLinear\textra\n");
    write(
        &ws.primary_area().join("C/C_result_table.tsv").into_std_path_buf(),
        &format!("{HEADER}\nC\t1\tComplex non-cyclic\tNA\t1.0\thg19\t\n"),
    );

    let config = ResolvedConfig::default();
    let (manifest, report) = TableAggregator::new(&config).aggregate(&ws).unwrap();
    assert_eq!(report.tables_found, 2);
    assert_eq!(report.tables_skipped, vec![broken]);
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.groups[0].sample_name, "C");
}

#[test]
fn shared_table_yields_one_group_per_sample() {
    let temp = tempfile::tempdir().unwrap();
    let ws = workspace(temp.path());
    write(
        &ws.catch_all_area().join("batch_classification/batch_result_table.tsv").into_std_path_buf(),
        &format!("{HEADER}\nS2\t1\tLinear\t\t\tGRCh38\t\nS1\t1\tecDNA\t\t\tGRCh38\t\nS2\t2\tBFB\t\t\tGRCh38\t\n"),
    );

    let config = ResolvedConfig::default();
    let (manifest, _) = TableAggregator::new(&config).aggregate(&ws).unwrap();
    let names = manifest
        .groups
        .iter()
        .map(|group| (group.sample_name.as_str(), group.records.len()))
        .collect::<Vec<_>>();
    assert_eq!(names, vec![("S1", 1), ("S2", 2)]);
}

#[test]
fn no_tables_is_no_results() {
    let temp = tempfile::tempdir().unwrap();
    let ws = workspace(temp.path());
    write(&ws.catch_all_area().join("misc/notes.txt").into_std_path_buf(), "nothing");

    let config = ResolvedConfig::default();
    assert_matches!(
        TableAggregator::new(&config).aggregate(&ws),
        Err(AggregatorError::NoResults)
    );
}

#[test]
fn empty_table_is_no_results() {
    let temp = tempfile::tempdir().unwrap();
    let ws = workspace(temp.path());
    write(
        &ws.primary_area().join("S1/S1_result_table.tsv").into_std_path_buf(),
        &format!("{HEADER}\n"),
    );

    let config = ResolvedConfig::default();
    assert_matches!(
        TableAggregator::new(&config).aggregate(&ws),
        Err(AggregatorError::NoResults)
    );
}
