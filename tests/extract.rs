use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use zip::write::SimpleFileOptions;

use amplicon_aggregator::config::ResolvedConfig;
use amplicon_aggregator::domain::ArchiveBundle;
use amplicon_aggregator::extract::Extractor;

fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn nested_archives_are_unpacked_until_none_remain() {
    let temp = tempfile::tempdir().unwrap();
    let inner = zip_bytes(&[("S1_AA_results/S1_summary.txt", "#Amplicons = 1\n")]);
    let outer = temp.path().join("outer.tar.gz");
    write_tar_gz(&outer, &[("batch/inner.zip", inner.as_slice())]);

    let scratch = temp.path().join("scratch");
    let config = ResolvedConfig::default();
    let report = Extractor::new(&config)
        .extract_all(&[ArchiveBundle::new(&outer)], &scratch)
        .unwrap();

    assert_eq!(report.nested_passes, 1);
    assert!(report.skipped.is_empty());
    assert!(scratch.join("outer/batch/inner.zip").is_file());
    assert!(scratch.join("inner/S1_AA_results/S1_summary.txt").is_file());
    assert!(outer.is_file());
}

#[test]
fn corrupt_and_unsupported_inputs_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let bad = temp.path().join("bad.zip");
    fs::write(&bad, b"this is not a zip archive".as_slice()).unwrap();
    let notes = temp.path().join("notes.txt");
    fs::write(&notes, b"hello".as_slice()).unwrap();
    let good = temp.path().join("good.tar.gz");
    write_tar_gz(&good, &[("S2_cnvkit_output/S2_CNV_CALLS.bed", b"chr1\t1\t100\n".as_slice())]);

    let scratch = temp.path().join("scratch");
    let config = ResolvedConfig::default();
    let inputs = [ArchiveBundle::new(&bad), ArchiveBundle::new(&notes), ArchiveBundle::new(&good)];
    let report = Extractor::new(&config).extract_all(&inputs, &scratch).unwrap();

    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[1].reason, "unsupported format");
    assert!(scratch.join("good/S2_cnvkit_output/S2_CNV_CALLS.bed").is_file());
}

#[test]
fn legacy_separator_entries_are_tolerated() {
    let temp = tempfile::tempdir().unwrap();
    let legacy = temp.path().join("legacy.tar.gz");
    write_tar_gz(
        &legacy,
        &[
            ("S1\\S1_summary.txt", b"#Amplicons = 1\n".as_slice()),
            ("S1/S1_result_table.tsv", b"Sample name\nS1\n".as_slice()),
        ],
    );

    let scratch = temp.path().join("scratch");
    let config = ResolvedConfig::default();
    let report = Extractor::new(&config)
        .extract_all(&[ArchiveBundle::new(&legacy)], &scratch)
        .unwrap();

    assert_eq!(report.extracted, vec![scratch.join("legacy")]);
    assert!(scratch.join("legacy/S1/S1_result_table.tsv").is_file());
}

#[test]
fn directory_inputs_and_colliding_stems() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("run_dir");
    fs::create_dir_all(dir.join("S3_AA_results")).unwrap();
    fs::write(dir.join("S3_AA_results/S3_summary.txt"), "#Amplicons = 0\n").unwrap();
    fs::write(dir.join("._S3_summary.txt"), "resource fork").unwrap();

    fs::create_dir_all(temp.path().join("a")).unwrap();
    fs::create_dir_all(temp.path().join("b")).unwrap();
    let first = temp.path().join("a/S1.tar.gz");
    let second = temp.path().join("b/S1.tar.gz");
    write_tar_gz(&first, &[("one.txt", b"1".as_slice())]);
    write_tar_gz(&second, &[("two.txt", b"2".as_slice())]);

    let scratch = temp.path().join("scratch");
    let config = ResolvedConfig::default();
    let inputs = [ArchiveBundle::new(&dir), ArchiveBundle::new(&first), ArchiveBundle::new(&second)];
    Extractor::new(&config).extract_all(&inputs, &scratch).unwrap();

    assert!(scratch.join("run_dir/S3_AA_results/S3_summary.txt").is_file());
    assert!(!scratch.join("run_dir/._S3_summary.txt").exists());
    assert!(scratch.join("S1/one.txt").is_file());
    assert!(scratch.join("S1_tar_gz/two.txt").is_file());
}

#[test]
fn same_stem_in_different_formats_is_named_by_archive() {
    let temp = tempfile::tempdir().unwrap();
    let tarball = temp.path().join("run.tar.gz");
    write_tar_gz(&tarball, &[("one.txt", b"1".as_slice())]);
    let zipped = temp.path().join("run.zip");
    let mut writer = zip::ZipWriter::new(File::create(&zipped).unwrap());
    writer.start_file("two.txt", SimpleFileOptions::default()).unwrap();
    writer.write_all(b"2").unwrap();
    writer.finish().unwrap();

    let scratch = temp.path().join("scratch");
    let config = ResolvedConfig::default();
    let inputs = [ArchiveBundle::new(&tarball), ArchiveBundle::new(&zipped)];
    Extractor::new(&config).extract_all(&inputs, &scratch).unwrap();

    assert!(scratch.join("run/one.txt").is_file());
    assert!(scratch.join("run_zip/two.txt").is_file());
}
