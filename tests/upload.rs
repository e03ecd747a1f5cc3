use std::cell::RefCell;
use std::fs::File;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

use amplicon_aggregator::error::AggregatorError;
use amplicon_aggregator::upload::{
    ProjectMetadata, Server, UploadClient, UploadReceipt, upload_bundles, validate_aggregated,
};

#[derive(Default)]
struct MockUpload {
    seen: RefCell<Vec<(PathBuf, ProjectMetadata)>>,
    fail_on: Option<PathBuf>,
}

impl UploadClient for MockUpload {
    fn upload(&self, bundle: &Path, metadata: &ProjectMetadata) -> Result<UploadReceipt, AggregatorError> {
        if self.fail_on.as_deref() == Some(bundle) {
            return Err(AggregatorError::UploadStatus {
                status: 500,
                message: "server error".to_string(),
            });
        }
        self.seen.borrow_mut().push((bundle.to_path_buf(), metadata.clone()));
        Ok(UploadReceipt {
            file: bundle.display().to_string(),
            project_name: metadata.project_name.clone(),
            server: Server::LocalDebug,
            parts: 1,
            status: 200,
            uploaded_at: Utc::now().to_rfc3339(),
        })
    }
}

fn write_tar_gz(path: &Path, names: &[&str]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for name in names {
        let content = b"{}";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn single_bundle_uses_output_name() {
    let client = MockUpload::default();
    let bundles = vec![PathBuf::from("/runs/batch.tar.gz")];
    let receipts = upload_bundles(&client, &bundles, "out/batch", "user@example.org", "from CLI").unwrap();

    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].project_name, "batch");
    let seen = client.seen.borrow();
    let (_, metadata) = &seen[0];
    assert_eq!(metadata.project_members, vec!["user@example.org".to_string()]);
    assert_eq!(metadata.description, "from CLI");
    assert!(metadata.private);
    assert!(metadata.accept_license);
}

#[test]
fn receipts_serialize_with_rfc3339_timestamps() {
    let client = MockUpload::default();
    let bundles = vec![PathBuf::from("/runs/batch.tar.gz")];
    let receipts = upload_bundles(&client, &bundles, "batch", "user@example.org", "").unwrap();

    let json = serde_json::to_value(&receipts).unwrap();
    let stamp = json[0]["uploaded_at"].as_str().unwrap();
    DateTime::parse_from_rfc3339(stamp).unwrap();
    assert_eq!(json[0]["project_name"], "batch");
}

#[test]
fn several_bundles_are_named_per_stem() {
    let client = MockUpload::default();
    let bundles = vec![PathBuf::from("/runs/first.tar.gz"), PathBuf::from("/runs/second.tar.gz")];
    let receipts = upload_bundles(&client, &bundles, "cohort", "user@example.org", "").unwrap();
    let names = receipts
        .iter()
        .map(|receipt| receipt.project_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["cohort_first", "cohort_second"]);
}

#[test]
fn first_failure_stops_the_batch() {
    let client = MockUpload {
        fail_on: Some(PathBuf::from("/runs/first.tar.gz")),
        ..MockUpload::default()
    };
    let bundles = vec![PathBuf::from("/runs/first.tar.gz"), PathBuf::from("/runs/second.tar.gz")];
    let err = upload_bundles(&client, &bundles, "cohort", "user@example.org", "").unwrap_err();
    assert_matches!(err, AggregatorError::UploadStatus { status: 500, .. });
    assert!(client.seen.borrow().is_empty());
}

#[test]
fn aggregated_bundles_are_recognised() {
    let temp = tempfile::tempdir().unwrap();
    let good = temp.path().join("batch.tar.gz");
    write_tar_gz(&good, &["results/run.json", "results/aggregated_results.csv"]);
    validate_aggregated(&good).unwrap();

    let dotted = temp.path().join("dotted.tar.gz");
    write_tar_gz(&dotted, &["./results/run.json"]);
    validate_aggregated(&dotted).unwrap();
}

#[test]
fn raw_inputs_are_not_aggregated() {
    let temp = tempfile::tempdir().unwrap();
    let raw = temp.path().join("S1.tar.gz");
    write_tar_gz(&raw, &["S1/S1_AA_results/S1_summary.txt"]);
    assert_matches!(validate_aggregated(&raw), Err(AggregatorError::NotAggregated(_)));

    let zip = temp.path().join("S1.zip");
    std::fs::write(&zip, b"PK").unwrap();
    assert_matches!(validate_aggregated(&zip), Err(AggregatorError::NotAggregated(_)));

    let garbage = temp.path().join("garbage.tar.gz");
    std::fs::write(&garbage, b"not gzip").unwrap();
    assert_matches!(validate_aggregated(&garbage), Err(AggregatorError::NotAggregated(_)));
}
